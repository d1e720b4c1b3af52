//! # rule-engine
//!
//! Declarative condition/action rules for PlayNite requests. Rules are
//! grouped by category, evaluated concurrently against a read-only
//! [`RuleContext`], and reported as one [`RuleExecutionResult`] per rule in
//! priority order.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rule_engine::{builtin_packs, EngineConfig, RuleCategory, RuleContext, RuleEngine};
//!
//! # async fn example() {
//! let engine = RuleEngine::new(EngineConfig::default());
//! for pack in builtin_packs() {
//!     engine.register_pack(pack.as_ref());
//! }
//! let context = Arc::new(RuleContext::with_data(serde_json::json!({"title": "Hello"})));
//! let results = engine.execute_rules(context, RuleCategory::Content).await;
//! println!("{results:?}");
//! # }
//! ```

mod cache;
mod condition;
mod config;
mod context;
mod error;
mod evaluator;
pub mod loader;
pub mod matcher;
pub mod packs;
mod result;
mod schema;
mod value;

pub use cache::fingerprint;
pub use condition::{handler_fn, ConditionHandler, FnHandler};
pub use config::{EngineConfig, LogLevel};
pub use context::{ContextMetadata, RequestContext, ResponseContext, RuleContext, UserContext};
pub use error::RuleError;
pub use evaluator::{EngineStats, RuleEngine};
pub use packs::{builtin_packs, RulePack};
pub use result::{
    RuleExecutionResult, ValidationError, ValidationResult, ValidationWarning, ENGINE_RULE_ID,
    RULE_ENGINE_TIMEOUT, RULE_EXECUTION_ERROR,
};
pub use schema::{
    ActionType, ConditionOperator, LogicalOperator, RuleAction, RuleCategory, RuleCondition,
    RuleDefinition, Severity,
};
pub use value::FieldValue;
