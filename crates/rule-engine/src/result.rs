use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::schema::{ActionType, RuleAction, RuleCategory, RuleDefinition, Severity};

pub const RULE_EXECUTION_ERROR: &str = "RULE_EXECUTION_ERROR";
pub const RULE_ENGINE_TIMEOUT: &str = "RULE_ENGINE_TIMEOUT";

/// Rule id used on results the engine synthesises itself.
pub const ENGINE_RULE_ID: &str = "rule-engine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub rule_id: String,
    pub field: String,
    pub message: String,
    pub code: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub rule_id: String,
    pub field: String,
    pub message: String,
    pub code: String,
    pub severity: Severity,
}

/// Findings of one rule (or an aggregate of several).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// The only way to build a result: `is_valid` is derived from the
    /// errors, so warnings and non-error severities never invalidate.
    pub fn from_findings(errors: Vec<ValidationError>, warnings: Vec<ValidationWarning>) -> Self {
        let is_valid = !errors.iter().any(|e| e.severity == Severity::Error);
        Self {
            is_valid,
            errors,
            warnings,
        }
    }

    pub fn valid() -> Self {
        Self::from_findings(Vec::new(), Vec::new())
    }

    /// Concatenate findings from many results, preserving order.
    pub fn merge<'a>(results: impl IntoIterator<Item = &'a ValidationResult>) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for result in results {
            errors.extend(result.errors.iter().cloned());
            warnings.extend(result.warnings.iter().cloned());
        }
        Self::from_findings(errors, warnings)
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

/// Outcome of evaluating a single rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleExecutionResult {
    pub rule_id: String,
    pub rule_name: String,
    pub category: RuleCategory,
    /// False when the rule itself could not be evaluated.
    pub success: bool,
    pub validation: ValidationResult,
    pub execution_time_ms: f64,
    pub triggered_actions: Vec<RuleAction>,
    /// True when served from the engine's result cache.
    #[serde(default)]
    pub cached: bool,
}

impl RuleExecutionResult {
    /// Conditions did not hold.
    pub fn passed(rule: &RuleDefinition, execution_time_ms: f64) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            category: rule.category,
            success: true,
            validation: ValidationResult::valid(),
            execution_time_ms,
            triggered_actions: Vec::new(),
            cached: false,
        }
    }

    /// Conditions held: every declared action fires.
    pub fn triggered(rule: &RuleDefinition, execution_time_ms: f64) -> Self {
        let (errors, warnings) = findings_for(rule);
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            category: rule.category,
            success: true,
            validation: ValidationResult::from_findings(errors, warnings),
            execution_time_ms,
            triggered_actions: rule.actions.clone(),
            cached: false,
        }
    }

    /// The rule could not be evaluated.
    pub fn failed(
        rule_id: &str,
        rule_name: &str,
        category: RuleCategory,
        err: &RuleError,
        execution_time_ms: f64,
    ) -> Self {
        let error = ValidationError {
            rule_id: rule_id.to_string(),
            field: String::new(),
            message: err.to_string(),
            code: RULE_EXECUTION_ERROR.to_string(),
            severity: Severity::Error,
        };
        Self {
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            category,
            success: false,
            validation: ValidationResult::from_findings(vec![error], Vec::new()),
            execution_time_ms,
            triggered_actions: Vec::new(),
            cached: false,
        }
    }

    /// Marker appended when the whole call ran out of time.
    pub fn timed_out(category: RuleCategory, limit_ms: u64, elapsed_ms: f64, pending: usize) -> Self {
        let error = ValidationError {
            rule_id: ENGINE_RULE_ID.to_string(),
            field: String::new(),
            message: format!(
                "{category} rules exceeded {limit_ms}ms; {pending} rule(s) did not finish"
            ),
            code: RULE_ENGINE_TIMEOUT.to_string(),
            severity: Severity::Error,
        };
        Self {
            rule_id: ENGINE_RULE_ID.to_string(),
            rule_name: "Rule engine timeout".to_string(),
            category,
            success: false,
            validation: ValidationResult::from_findings(vec![error], Vec::new()),
            execution_time_ms: elapsed_ms,
            triggered_actions: Vec::new(),
            cached: false,
        }
    }
}

/// Map a rule's actions to the findings they surface.
fn findings_for(rule: &RuleDefinition) -> (Vec<ValidationError>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for action in &rule.actions {
        let field = action
            .target
            .clone()
            .or_else(|| rule.conditions.first().map(|c| c.field.clone()))
            .unwrap_or_default();
        let message = action
            .message
            .clone()
            .or_else(|| rule.description.clone())
            .unwrap_or_else(|| format!("matched rule '{}'", rule.name));
        let code = |default: &str| action.code.clone().unwrap_or_else(|| default.to_string());

        match action.action_type {
            ActionType::Reject => errors.push(ValidationError {
                rule_id: rule.id.clone(),
                field,
                message,
                code: code("RULE_REJECTED"),
                severity: Severity::Error,
            }),
            ActionType::Block => errors.push(ValidationError {
                rule_id: rule.id.clone(),
                field,
                message,
                code: code("RULE_BLOCKED"),
                severity: Severity::Error,
            }),
            ActionType::Validate => errors.push(ValidationError {
                rule_id: rule.id.clone(),
                field,
                message,
                code: code("VALIDATION_FAILED"),
                severity: action.severity.unwrap_or(Severity::Error),
            }),
            ActionType::Flag => warnings.push(ValidationWarning {
                rule_id: rule.id.clone(),
                field,
                message,
                code: code("RULE_FLAGGED"),
                severity: Severity::Warning,
            }),
            ActionType::Notify => warnings.push(ValidationWarning {
                rule_id: rule.id.clone(),
                field,
                message,
                code: code("RULE_NOTIFY"),
                severity: Severity::Warning,
            }),
            ActionType::Log => {
                tracing::info!(rule_id = %rule.id, %field, %message, "rule log action");
                warnings.push(ValidationWarning {
                    rule_id: rule.id.clone(),
                    field,
                    message,
                    code: code("RULE_LOGGED"),
                    severity: Severity::Info,
                });
            }
            ActionType::Transform | ActionType::Modify | ActionType::Approve | ActionType::Allow => {}
        }
    }

    (errors, warnings)
}
