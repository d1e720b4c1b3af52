//! Built-in rule packs, one per policy area.
//!
//! Packs are plain data: each returns its [`RuleDefinition`]s and the engine
//! orders them by priority at evaluation time.

mod business;
mod content;
mod performance;
mod security;
mod user;

pub use business::BusinessRules;
pub use content::ContentRules;
pub use performance::PerformanceRules;
pub use security::SecurityRules;
pub use user::UserRules;

use crate::schema::{RuleCategory, RuleDefinition};

/// A collection of rules belonging to one category.
pub trait RulePack: Send + Sync {
    fn category(&self) -> RuleCategory;

    fn all_rules(&self) -> Vec<RuleDefinition>;
}

/// The five packs shipped with the engine.
pub fn builtin_packs() -> Vec<Box<dyn RulePack>> {
    vec![
        Box::new(ContentRules),
        Box::new(UserRules),
        Box::new(BusinessRules),
        Box::new(SecurityRules),
        Box::new(PerformanceRules),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::context::RuleContext;
    use crate::evaluator::RuleEngine;
    use crate::result::RuleExecutionResult;

    use super::RulePack;

    /// Evaluate one pack against `context` with caching off.
    pub async fn run_pack(pack: &dyn RulePack, context: RuleContext) -> Vec<RuleExecutionResult> {
        let engine = RuleEngine::new(EngineConfig {
            enable_caching: false,
            ..EngineConfig::default()
        });
        engine.register_pack(pack);
        engine.execute_rules(Arc::new(context), pack.category()).await
    }

    /// Ids of the rules whose actions fired.
    pub fn fired(results: &[RuleExecutionResult]) -> Vec<&str> {
        results
            .iter()
            .filter(|r| !r.triggered_actions.is_empty())
            .map(|r| r.rule_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::validate_rules;
    use std::collections::HashSet;

    #[test]
    fn builtin_rules_are_well_formed() {
        let mut ids = HashSet::new();
        for pack in builtin_packs() {
            let rules = pack.all_rules();
            assert!(!rules.is_empty(), "{} pack is empty", pack.category());
            validate_rules(&rules).unwrap();
            for rule in &rules {
                assert_eq!(rule.category, pack.category(), "rule {} in wrong pack", rule.id);
                assert!(!rule.actions.is_empty(), "rule {} has no actions", rule.id);
                assert!(ids.insert(rule.id.clone()), "duplicate id {}", rule.id);
            }
        }
    }
}
