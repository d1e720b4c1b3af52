use thiserror::Error;

/// Errors raised while evaluating a rule. The engine never lets these
/// escape `execute_rules`; they become `RULE_EXECUTION_ERROR` results.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("invalid regex pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("regex condition on `{field}` needs a text operand")]
    MissingPattern { field: String },

    #[error("custom condition on `{field}` does not name a handler")]
    MissingHandlerName { field: String },

    #[error("no condition handler registered under `{0}`")]
    UnknownHandler(String),

    #[error("condition handler `{handler}` failed: {reason}")]
    HandlerFailed { handler: String, reason: String },

    #[error("rule evaluation task aborted: {0}")]
    TaskAborted(String),

    #[error("unknown rule category `{0}`")]
    UnknownCategory(String),
}

impl RuleError {
    /// Convenience for handler implementations.
    pub fn handler(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}
