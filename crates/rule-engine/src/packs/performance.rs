use crate::schema::{ConditionOperator as Op, RuleAction, RuleCategory, RuleCondition, RuleDefinition};

use super::RulePack;

const LARGE_PAYLOAD_BYTES: i64 = 10 * 1024 * 1024;
const MAX_PAGE_SIZE: i64 = 100;
const SLOW_RESPONSE_MS: i64 = 1_000;

/// Observational checks on request size, paging and response time. Never rejects.
pub struct PerformanceRules;

impl RulePack for PerformanceRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::Performance
    }

    fn all_rules(&self) -> Vec<RuleDefinition> {
        vec![
            RuleDefinition::new("performance-large-payload", "Large payload", RuleCategory::Performance)
                .priority(50)
                .when(RuleCondition::new("request.content_length", Op::GreaterThan, LARGE_PAYLOAD_BYTES))
                .then(
                    RuleAction::flag("request.content_length", "Request body is larger than 10MB")
                        .code("LARGE_PAYLOAD"),
                ),
            RuleDefinition::new("performance-query-limit", "Page size", RuleCategory::Performance)
                .priority(40)
                .when(RuleCondition::new("request.query.limit", Op::GreaterThan, MAX_PAGE_SIZE))
                .then(
                    RuleAction::flag("request.query.limit", "Page size above 100 will be capped")
                        .code("LIMIT_TOO_HIGH"),
                ),
            RuleDefinition::new("performance-slow-response", "Slow response", RuleCategory::Performance)
                .priority(30)
                .when(RuleCondition::new("response.duration_ms", Op::GreaterThan, SLOW_RESPONSE_MS))
                .then(
                    RuleAction::flag("response.duration_ms", "Response took longer than 1s")
                        .code("SLOW_RESPONSE"),
                )
                .then(RuleAction::log("response.duration_ms", "slow response")),
        ]
    }
}
