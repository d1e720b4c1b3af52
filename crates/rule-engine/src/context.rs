use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::FieldValue;

/// Everything a rule may look at for one evaluation.
///
/// A context is built once per request and shared read-only (behind an
/// `Arc`) by every rule evaluated against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestContext>,
    /// Only populated when evaluating after the handler has produced a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseContext>,
    /// The payload under validation; `None` when absent or unparseable.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: ContextMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Panels the user may open, e.g. `admin` or `moderation`.
    #[serde(default)]
    pub panels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub method: String,
    pub url: String,
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// The query string with percent-escapes decoded. `url` stays encoded.
    #[serde(default)]
    pub decoded_query: String,
    /// Header names are lower-cased.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseContext {
    pub status: u16,
    pub duration_ms: f64,
    #[serde(default)]
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl Default for ContextMetadata {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            client_ip: "unknown".to_string(),
            user_agent: None,
            request_id: None,
        }
    }
}

impl RuleContext {
    /// A context carrying only a payload.
    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Resolve a dot-separated field path.
    ///
    /// The leading segment selects a section (`user`, `request`, `response`,
    /// `metadata`, `data`); any other leading segment is looked up inside
    /// `data`, so `title` and `data.title` are the same field.
    pub fn resolve(&self, path: &str) -> FieldValue {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let Some(head) = segments.next() else {
            return FieldValue::Absent;
        };
        let rest: Vec<&str> = segments.collect();

        match head {
            "user" => match &self.user {
                Some(user) => resolve_user(user, &rest),
                None => FieldValue::Absent,
            },
            "request" => match &self.request {
                Some(request) => resolve_request(request, &rest),
                None => FieldValue::Absent,
            },
            "response" => match &self.response {
                Some(response) => resolve_response(response, &rest),
                None => FieldValue::Absent,
            },
            "metadata" => resolve_metadata(&self.metadata, &rest),
            "data" => resolve_json(self.data.as_ref(), &rest),
            _ => {
                let mut full = Vec::with_capacity(rest.len() + 1);
                full.push(head);
                full.extend(rest);
                resolve_json(self.data.as_ref(), &full)
            }
        }
    }
}

fn resolve_user(user: &UserContext, rest: &[&str]) -> FieldValue {
    match rest {
        [] => FieldValue::Map(BTreeMap::from([
            ("id".to_string(), FieldValue::from(user.id.as_str())),
            ("role".to_string(), FieldValue::from(user.role.as_str())),
        ])),
        ["id"] => FieldValue::from(user.id.as_str()),
        ["role"] => FieldValue::from(user.role.as_str()),
        ["permissions"] => FieldValue::from(user.permissions.clone()),
        ["panels"] => FieldValue::from(user.panels.clone()),
        _ => FieldValue::Absent,
    }
}

fn resolve_request(request: &RequestContext, rest: &[&str]) -> FieldValue {
    match rest {
        ["method"] => FieldValue::from(request.method.as_str()),
        ["url"] => FieldValue::from(request.url.as_str()),
        ["path"] => FieldValue::from(request.path.as_str()),
        ["content_type"] => text_or_absent(request.content_type.as_deref()),
        ["content_length"] => request.content_length.map(FieldValue::from).unwrap_or_default(),
        ["query"] => string_map(&request.query),
        ["decoded_query"] => {
            text_or_absent(Some(request.decoded_query.as_str()).filter(|q| !q.is_empty()))
        }
        ["query", key] => text_or_absent(request.query.get(*key).map(String::as_str)),
        ["headers"] => string_map(&request.headers),
        ["headers", name] => text_or_absent(
            request
                .headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str),
        ),
        _ => FieldValue::Absent,
    }
}

fn resolve_response(response: &ResponseContext, rest: &[&str]) -> FieldValue {
    match rest {
        ["status"] => FieldValue::from(u64::from(response.status)),
        ["duration_ms"] => FieldValue::Number(response.duration_ms),
        ["content_length"] => response.content_length.map(FieldValue::from).unwrap_or_default(),
        _ => FieldValue::Absent,
    }
}

fn resolve_metadata(metadata: &ContextMetadata, rest: &[&str]) -> FieldValue {
    match rest {
        ["timestamp"] => FieldValue::from(metadata.timestamp.to_rfc3339()),
        ["client_ip"] => FieldValue::from(metadata.client_ip.as_str()),
        ["user_agent"] => text_or_absent(metadata.user_agent.as_deref()),
        ["request_id"] => text_or_absent(metadata.request_id.as_deref()),
        _ => FieldValue::Absent,
    }
}

fn resolve_json(root: Option<&serde_json::Value>, rest: &[&str]) -> FieldValue {
    let mut current = match root {
        Some(value) => value,
        None => return FieldValue::Absent,
    };
    for segment in rest {
        let next = match current {
            serde_json::Value::Object(map) => map.get(*segment),
            serde_json::Value::Array(items) => {
                segment.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return FieldValue::Absent,
        }
    }
    FieldValue::from_json(current)
}

fn text_or_absent(value: Option<&str>) -> FieldValue {
    value.map(FieldValue::from).unwrap_or_default()
}

fn string_map(map: &BTreeMap<String, String>) -> FieldValue {
    FieldValue::Map(
        map.iter()
            .map(|(k, v)| (k.clone(), FieldValue::from(v.as_str())))
            .collect(),
    )
}
