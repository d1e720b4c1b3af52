use serde::{Deserialize, Serialize};

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationRecord>,
}

impl AuditEntry {
    /// New entry stamped with a v4 id and the current UTC time.
    pub fn new(event_type: AuditEventType, source: AuditSource, details: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
            evaluation: None,
        }
    }

    /// Entry for a rule evaluation of a request or response. The event type
    /// follows from the record: a response status means `ResponseEvaluated`,
    /// otherwise an invalid outcome means `RequestRejected`.
    pub fn evaluation(source: AuditSource, record: EvaluationRecord) -> Self {
        let event_type = match (record.status, record.is_valid) {
            (Some(_), _) => AuditEventType::ResponseEvaluated,
            (None, true) => AuditEventType::RequestEvaluated,
            (None, false) => AuditEventType::RequestRejected,
        };
        Self {
            evaluation: Some(record),
            ..Self::new(event_type, source, serde_json::Value::Null)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RequestEvaluated,
    RequestRejected,
    ResponseEvaluated,
    ProcessingFailed,
    RulesLoaded,
    CacheCleared,
    ServiceStarted,
    ServiceStopped,
}

/// Where an event came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AuditSource {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }
}

/// Summary of one request or response evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub path: String,
    pub method: String,
    /// Present for response evaluations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub is_valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    #[serde(default)]
    pub categories: Vec<String>,
}
