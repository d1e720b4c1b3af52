use crate::schema::{ConditionOperator as Op, RuleAction, RuleCategory, RuleCondition, RuleDefinition};

use super::RulePack;

const LARGE_PAYMENT: i64 = 10_000;

/// Pricing, subscriptions and payments.
pub struct BusinessRules;

impl RulePack for BusinessRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::Business
    }

    fn all_rules(&self) -> Vec<RuleDefinition> {
        vec![
            RuleDefinition::new("business-price-negative", "Non-negative price", RuleCategory::Business)
                .priority(100)
                .when(RuleCondition::new("price", Op::LessThan, 0i64))
                .then(RuleAction::reject("price", "Price cannot be negative").code("INVALID_PRICE")),
            RuleDefinition::new(
                "business-subscription-tier",
                "Known subscription tier",
                RuleCategory::Business,
            )
            .priority(80)
            .when(RuleCondition::new(
                "subscription_tier",
                Op::NotIn,
                vec!["free", "premium", "creator"],
            ))
            .then(
                RuleAction::reject("subscription_tier", "Unknown subscription tier")
                    .code("INVALID_TIER"),
            ),
            RuleDefinition::new("business-large-payment", "Large payment", RuleCategory::Business)
                .describe("Payments above 10000 are reviewed by finance")
                .priority(60)
                .when(RuleCondition::new("amount", Op::GreaterThan, LARGE_PAYMENT))
                .then(RuleAction::notify("amount", "Large payment queued for review").code("LARGE_PAYMENT"))
                .tag("finance"),
        ]
    }
}
