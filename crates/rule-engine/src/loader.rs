use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::condition::compile_pattern;
use crate::schema::{ConditionOperator, RuleDefinition};

/// A rule pack file: `{ version: "1.0", rules: [...] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    pub version: String,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// Load a [`RuleSet`] from a YAML file on disk.
pub fn load_rule_pack(path: impl AsRef<Path>) -> Result<RuleSet> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rule pack: {}", path.display()))?;
    load_rule_pack_from_str(&contents)
        .with_context(|| format!("failed to parse rule pack: {}", path.display()))
}

/// Parse and validate a [`RuleSet`] from a YAML string.
pub fn load_rule_pack_from_str(yaml: &str) -> Result<RuleSet> {
    let set: RuleSet = serde_yml::from_str(yaml).context("YAML deserialization failed")?;
    validate(&set)?;
    Ok(set)
}

fn validate(set: &RuleSet) -> Result<()> {
    if set.version != "1.0" {
        bail!(
            "unsupported rule pack version '{}'; only '1.0' is supported",
            set.version
        );
    }

    validate_rules(&set.rules)
}

/// Checks shared by YAML packs and the built-in packs: ids and names are
/// present, ids are unique, patterns compile, custom conditions name a
/// handler.
pub(crate) fn validate_rules(rules: &[RuleDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.id.trim().is_empty() {
            bail!("rule id must not be empty");
        }
        if rule.name.trim().is_empty() {
            bail!("rule '{}' has an empty name", rule.id);
        }
        if !seen.insert(&rule.id) {
            bail!("duplicate rule id: '{}'", rule.id);
        }

        for condition in &rule.conditions {
            match condition.operator {
                ConditionOperator::Regex => {
                    compile_pattern(condition)
                        .with_context(|| format!("rule '{}' has an unusable regex", rule.id))?;
                }
                ConditionOperator::Custom if condition.handler.is_none() => {
                    bail!(
                        "rule '{}': custom condition on '{}' does not name a handler",
                        rule.id,
                        condition.field
                    );
                }
                _ => {}
            }
        }
    }

    Ok(())
}
