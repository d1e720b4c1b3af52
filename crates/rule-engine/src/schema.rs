use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::value::FieldValue;

/// The policy area a rule belongs to. The middleware decides per request
/// which categories run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Content,
    User,
    Business,
    Security,
    Performance,
    Validation,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 6] = [
        RuleCategory::Content,
        RuleCategory::User,
        RuleCategory::Business,
        RuleCategory::Security,
        RuleCategory::Performance,
        RuleCategory::Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::User => "user",
            Self::Business => "business",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleCategory {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RuleError::UnknownCategory(s.to_string()))
    }
}

/// A single declarative rule: conditions that must hold, and the actions
/// that fire when they do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Unique identifier; registering the same id again replaces the rule.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: RuleCategory,
    /// Higher numbers run first. Default 50.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_priority() -> i32 {
    50
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: RuleCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            category,
            priority: default_priority(),
            enabled: true,
            conditions: Vec::new(),
            actions: Vec::new(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn when(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn then(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// One comparison of a context field against an operand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Dot path into the context, see [`RuleContext::resolve`](crate::RuleContext::resolve).
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: FieldValue,
    /// How this condition joins the *next* one. Absent means AND.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
    /// Handler name for [`ConditionOperator::Custom`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl RuleCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            logical_operator: None,
            handler: None,
        }
    }

    /// Condition without an operand (`exists`, `not_exists`).
    pub fn check(field: impl Into<String>, operator: ConditionOperator) -> Self {
        Self::new(field, operator, FieldValue::Absent)
    }

    /// Condition delegated to a handler registered on the engine.
    pub fn custom(field: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            handler: Some(handler.into()),
            ..Self::check(field, ConditionOperator::Custom)
        }
    }

    pub fn and(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::And);
        self
    }

    pub fn or(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::Or);
        self
    }

    /// Negate the condition that follows this one.
    pub fn and_not(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::Not);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    LengthGreaterThan,
    LengthLessThan,
    Exists,
    NotExists,
    Regex,
    In,
    NotIn,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
    Not,
}

/// A declared outcome of a rule. The engine reports which actions fired;
/// carrying them out is up to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Field or resource the action is about.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "FieldValue::is_absent")]
    pub value: FieldValue,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    /// Only honoured by [`ActionType::Validate`]; defaults to error.
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl RuleAction {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            target: None,
            value: FieldValue::Absent,
            message: None,
            code: None,
            severity: None,
        }
    }

    pub fn reject(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Reject).on(target).message(message)
    }

    pub fn block(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Block).on(target).message(message)
    }

    pub fn flag(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Flag).on(target).message(message)
    }

    pub fn notify(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Notify).on(target).message(message)
    }

    pub fn log(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Log).on(target).message(message)
    }

    pub fn on(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn value(mut self, value: impl Into<FieldValue>) -> Self {
        self.value = value.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Validate,
    Transform,
    Reject,
    Approve,
    Flag,
    Log,
    Notify,
    Block,
    Allow,
    Modify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}
