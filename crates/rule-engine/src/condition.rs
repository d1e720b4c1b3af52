use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::context::RuleContext;
use crate::error::RuleError;
use crate::matcher::matches_operator;
use crate::schema::{ConditionOperator, LogicalOperator, RuleCondition};
use crate::value::FieldValue;

/// Evaluates `operator: custom` conditions.
///
/// Handlers may suspend (e.g. to consult a data store); only the rule that
/// references the handler waits on it. An `Err` becomes a
/// `RULE_EXECUTION_ERROR` result for that rule.
#[async_trait]
pub trait ConditionHandler: Send + Sync {
    async fn evaluate(
        &self,
        actual: &FieldValue,
        condition: &RuleCondition,
        context: &RuleContext,
    ) -> Result<bool, RuleError>;
}

/// Adapter turning a synchronous closure into a [`ConditionHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> ConditionHandler for FnHandler<F>
where
    F: Fn(&FieldValue, &RuleCondition, &RuleContext) -> Result<bool, RuleError> + Send + Sync,
{
    async fn evaluate(
        &self,
        actual: &FieldValue,
        condition: &RuleCondition,
        context: &RuleContext,
    ) -> Result<bool, RuleError> {
        (self.0)(actual, condition, context)
    }
}

pub fn handler_fn<F>(f: F) -> Arc<dyn ConditionHandler>
where
    F: Fn(&FieldValue, &RuleCondition, &RuleContext) -> Result<bool, RuleError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

pub(crate) type HandlerMap = HashMap<String, Arc<dyn ConditionHandler>>;

// ---------------------------------------------------------------------------
// Pre-compiled conditions
// ---------------------------------------------------------------------------

/// A condition together with its compiled regex operand. A pattern that
/// fails to compile is kept as the error, so the rule reports it on every
/// evaluation instead of being silently dropped at registration.
#[derive(Debug, Clone)]
pub(crate) struct CompiledCondition {
    pub condition: RuleCondition,
    pattern: Option<Result<Regex, RuleError>>,
}

impl CompiledCondition {
    pub fn compile(condition: RuleCondition) -> Self {
        let pattern = (condition.operator == ConditionOperator::Regex).then(|| {
            compile_pattern(&condition)
        });
        Self { condition, pattern }
    }
}

pub(crate) fn compile_pattern(condition: &RuleCondition) -> Result<Regex, RuleError> {
    let source = condition
        .value
        .as_text()
        .ok_or_else(|| RuleError::MissingPattern {
            field: condition.field.clone(),
        })?;
    Regex::new(source).map_err(|e| RuleError::InvalidPattern {
        pattern: source.to_string(),
        reason: e.to_string(),
    })
}

async fn evaluate_one(
    compiled: &CompiledCondition,
    context: &RuleContext,
    handlers: &HandlerMap,
) -> Result<bool, RuleError> {
    let condition = &compiled.condition;
    let actual = context.resolve(&condition.field);

    match condition.operator {
        ConditionOperator::Custom => {
            let name = condition
                .handler
                .as_deref()
                .ok_or_else(|| RuleError::MissingHandlerName {
                    field: condition.field.clone(),
                })?;
            let handler = handlers
                .get(name)
                .ok_or_else(|| RuleError::UnknownHandler(name.to_string()))?;
            handler.evaluate(&actual, condition, context).await
        }
        ConditionOperator::Regex => match &compiled.pattern {
            Some(Ok(re)) => Ok(matches_operator(
                condition.operator,
                &actual,
                &condition.value,
                Some(re),
            )),
            Some(Err(e)) => Err(e.clone()),
            None => Err(RuleError::MissingPattern {
                field: condition.field.clone(),
            }),
        },
        op => Ok(matches_operator(op, &actual, &condition.value, None)),
    }
}

/// Fold a rule's conditions left to right.
///
/// Each condition's `logical_operator` joins it to the next one; `not`
/// negates the next result and joins with AND. An empty list holds.
pub(crate) async fn evaluate_conditions(
    conditions: &[CompiledCondition],
    context: &RuleContext,
    handlers: &HandlerMap,
) -> Result<bool, RuleError> {
    let mut holds = true;
    let mut join = LogicalOperator::And;

    for compiled in conditions {
        let value = evaluate_one(compiled, context, handlers).await?;
        holds = match join {
            LogicalOperator::And => holds && value,
            LogicalOperator::Or => holds || value,
            LogicalOperator::Not => holds && !value,
        };
        join = compiled.condition.logical_operator.unwrap_or_default();
    }

    Ok(holds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile_all(conditions: Vec<RuleCondition>) -> Vec<CompiledCondition> {
        conditions.into_iter().map(CompiledCondition::compile).collect()
    }

    async fn holds(conditions: Vec<RuleCondition>, data: serde_json::Value) -> Result<bool, RuleError> {
        let ctx = RuleContext::with_data(data);
        evaluate_conditions(&compile_all(conditions), &ctx, &HandlerMap::new()).await
    }

    #[tokio::test]
    async fn empty_condition_list_holds() {
        assert!(holds(vec![], json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn and_is_the_default_join() {
        let conditions = vec![
            RuleCondition::check("title", ConditionOperator::Exists),
            RuleCondition::new("title", ConditionOperator::LengthGreaterThan, 3i64),
        ];
        assert!(holds(conditions.clone(), json!({"title": "long enough"})).await.unwrap());
        assert!(!holds(conditions, json!({"title": "no"})).await.unwrap());
    }

    #[tokio::test]
    async fn or_join() {
        let conditions = vec![
            RuleCondition::new("role", ConditionOperator::Equals, "admin").or(),
            RuleCondition::new("role", ConditionOperator::Equals, "moderator"),
        ];
        assert!(holds(conditions.clone(), json!({"role": "moderator"})).await.unwrap());
        assert!(!holds(conditions, json!({"role": "guest"})).await.unwrap());
    }

    #[tokio::test]
    async fn not_negates_the_following_condition() {
        // "email exists AND NOT email matches pattern"
        let conditions = vec![
            RuleCondition::check("email", ConditionOperator::Exists).and_not(),
            RuleCondition::new("email", ConditionOperator::Regex, r"^[^@\s]+@[^@\s]+\.[^@\s]+$"),
        ];
        assert!(holds(conditions.clone(), json!({"email": "not-an-email"})).await.unwrap());
        assert!(!holds(conditions.clone(), json!({"email": "a@b.io"})).await.unwrap());
        assert!(!holds(conditions, json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_regex_is_an_error() {
        let err = holds(
            vec![RuleCondition::new("title", ConditionOperator::Regex, "[unclosed")],
            json!({"title": "x"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
    }

    #[tokio::test]
    async fn custom_condition_uses_registered_handler() {
        let mut handlers = HandlerMap::new();
        handlers.insert(
            "is_even".into(),
            handler_fn(|actual, _, _| Ok(actual.as_number().is_some_and(|n| n % 2.0 == 0.0))),
        );
        let conditions = compile_all(vec![RuleCondition::custom("count", "is_even")]);

        let even = RuleContext::with_data(json!({"count": 4}));
        let odd = RuleContext::with_data(json!({"count": 3}));
        assert!(evaluate_conditions(&conditions, &even, &handlers).await.unwrap());
        assert!(!evaluate_conditions(&conditions, &odd, &handlers).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_handler_is_an_error() {
        let err = holds(vec![RuleCondition::custom("count", "missing")], json!({"count": 1}))
            .await
            .unwrap_err();
        assert_eq!(err, RuleError::UnknownHandler("missing".into()));
    }
}
