use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::condition::{evaluate_conditions, CompiledCondition, ConditionHandler, HandlerMap};
use crate::config::{EngineConfig, LogLevel};
use crate::context::RuleContext;
use crate::error::RuleError;
use crate::packs::RulePack;
use crate::result::RuleExecutionResult;
use crate::schema::{RuleCategory, RuleDefinition};

/// A rule as held by the registry: the definition, its compiled
/// conditions, and the sequence number used to break priority ties.
#[derive(Debug)]
struct RegisteredRule {
    definition: RuleDefinition,
    conditions: Vec<CompiledCondition>,
    seq: u64,
}

impl RegisteredRule {
    fn new(definition: RuleDefinition, seq: u64) -> Self {
        let conditions = definition
            .conditions
            .iter()
            .cloned()
            .map(CompiledCondition::compile)
            .collect();
        Self {
            definition,
            conditions,
            seq,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    executions: AtomicU64,
    rules_evaluated: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    timeouts: AtomicU64,
    rule_failures: AtomicU64,
    timed_rules: AtomicU64,
    rule_time_us: AtomicU64,
}

/// Point-in-time snapshot of engine activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub registered_rules: usize,
    pub executions: u64,
    pub rules_evaluated: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub timeouts: u64,
    pub rule_failures: u64,
    pub cache_entries: usize,
    pub average_rule_time_ms: f64,
}

/// The rule registry and evaluator.
///
/// Construct once at start-up and share behind an `Arc`; every method takes
/// `&self`. Rule evaluations for one call run as spawned tasks, bounded by
/// `max_parallel_rules`, and are reported in priority order regardless of
/// completion order.
pub struct RuleEngine {
    config: EngineConfig,
    rules: RwLock<HashMap<String, Arc<RegisteredRule>>>,
    handlers: RwLock<Arc<HandlerMap>>,
    next_seq: AtomicU64,
    cache: ResultCache,
    counters: Counters,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("config", &self.config)
            .field("num_rules", &self.rule_count())
            .finish()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RuleEngine {
    pub fn new(config: EngineConfig) -> Self {
        let cache = ResultCache::new(Duration::from_millis(config.cache_timeout_ms));
        Self {
            config,
            rules: RwLock::new(HashMap::new()),
            handlers: RwLock::new(Arc::new(HandlerMap::new())),
            next_seq: AtomicU64::new(0),
            cache,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- Registry -------------------------------------------------------------

    /// Insert or replace a rule by id. A replaced rule keeps its original
    /// registration position for tie-breaking.
    pub fn register_rule(&self, rule: RuleDefinition) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let seq = match rules.get(&rule.id) {
            Some(existing) => existing.seq,
            None => self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        debug!(rule_id = %rule.id, category = %rule.category, priority = rule.priority, "registering rule");
        rules.insert(rule.id.clone(), Arc::new(RegisteredRule::new(rule, seq)));
        drop(rules);
        self.cache.clear();
    }

    pub fn register_rules(&self, rules: impl IntoIterator<Item = RuleDefinition>) -> usize {
        let mut count = 0;
        for rule in rules {
            self.register_rule(rule);
            count += 1;
        }
        count
    }

    pub fn register_pack(&self, pack: &dyn RulePack) -> usize {
        let count = self.register_rules(pack.all_rules());
        debug!(category = %pack.category(), count, "registered rule pack");
        count
    }

    /// Make a handler available to `operator: custom` conditions under `name`.
    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn ConditionHandler>) {
        let mut guard = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut handlers = HandlerMap::clone(&guard);
        handlers.insert(name.into(), handler);
        *guard = Arc::new(handlers);
        drop(guard);
        self.cache.clear();
    }

    pub fn rule(&self, id: &str) -> Option<RuleDefinition> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|r| r.definition.clone())
    }

    /// Every rule of `category`, enabled or not, in evaluation order.
    pub fn rules_by_category(&self, category: RuleCategory) -> Vec<RuleDefinition> {
        let mut matching: Vec<Arc<RegisteredRule>> = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.definition.category == category)
            .cloned()
            .collect();
        sort_for_evaluation(&mut matching);
        matching.iter().map(|r| r.definition.clone()).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Toggle a rule. Returns `false` when no rule has this id.
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = rules.get(id) else {
            return false;
        };
        let mut definition = current.definition.clone();
        definition.enabled = enabled;
        let updated = RegisteredRule {
            definition,
            conditions: current.conditions.clone(),
            seq: current.seq,
        };
        rules.insert(id.to_string(), Arc::new(updated));
        drop(rules);
        self.cache.clear();
        true
    }

    pub fn remove_rule(&self, id: &str) -> Option<RuleDefinition> {
        let removed = self
            .rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            self.cache.clear();
        }
        removed.map(|r| r.definition.clone())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> EngineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let timed = load(&self.counters.timed_rules);
        let average_rule_time_ms = if timed == 0 {
            0.0
        } else {
            load(&self.counters.rule_time_us) as f64 / timed as f64 / 1000.0
        };
        EngineStats {
            registered_rules: self.rule_count(),
            executions: load(&self.counters.executions),
            rules_evaluated: load(&self.counters.rules_evaluated),
            cache_hits: load(&self.counters.cache_hits),
            cache_misses: load(&self.counters.cache_misses),
            timeouts: load(&self.counters.timeouts),
            rule_failures: load(&self.counters.rule_failures),
            cache_entries: self.cache.len(),
            average_rule_time_ms,
        }
    }

    // -- Evaluation -----------------------------------------------------------

    /// Evaluate `context` against the enabled rules of `category`.
    ///
    /// Never fails: rule faults become `RULE_EXECUTION_ERROR` results, and a
    /// call that outlives `max_execution_time_ms` returns the completed
    /// results followed by a `RULE_ENGINE_TIMEOUT` marker. Contexts that carry
    /// a response are never cached; their timings make every one unique.
    pub async fn execute_rules(
        &self,
        context: Arc<RuleContext>,
        category: RuleCategory,
    ) -> Vec<RuleExecutionResult> {
        self.counters.executions.fetch_add(1, Ordering::Relaxed);

        let key = (self.config.enable_caching && context.response.is_none())
            .then(|| CacheKey::new(&context, category));
        if let Some(key) = &key {
            if let Some(hit) = self.cache.get(key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                if self.config.log_level.allows(LogLevel::Debug) {
                    debug!(%category, results = hit.len(), "rule results served from cache");
                }
                return hit;
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let rules = self.applicable_rules(category);
        let (mut results, timed_out) = self.run_rules(&rules, context, category).await;

        if let Some(marker) = timed_out {
            results.push(marker);
        } else if let Some(key) = key {
            self.cache.insert(key, results.clone());
        }
        results
    }

    /// String-keyed form of [`execute_rules`](Self::execute_rules). Unknown
    /// category names have no applicable rules.
    pub async fn execute_category(
        &self,
        context: Arc<RuleContext>,
        category: &str,
    ) -> Vec<RuleExecutionResult> {
        match category.parse::<RuleCategory>() {
            Ok(category) => self.execute_rules(context, category).await,
            Err(err) => {
                debug!(%err, "no rules for category");
                Vec::new()
            }
        }
    }

    fn applicable_rules(&self, category: RuleCategory) -> Vec<Arc<RegisteredRule>> {
        let mut rules: Vec<Arc<RegisteredRule>> = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.definition.enabled && r.definition.category == category)
            .cloned()
            .collect();
        sort_for_evaluation(&mut rules);
        rules
    }

    fn handler_snapshot(&self) -> Arc<HandlerMap> {
        Arc::clone(&self.handlers.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Spawn one task per rule and collect into priority-ordered slots.
    /// Returns the completed results and, on deadline expiry, the timeout
    /// marker to append.
    async fn run_rules(
        &self,
        rules: &[Arc<RegisteredRule>],
        context: Arc<RuleContext>,
        category: RuleCategory,
    ) -> (Vec<RuleExecutionResult>, Option<RuleExecutionResult>) {
        if rules.is_empty() {
            return (Vec::new(), None);
        }

        let started = Instant::now();
        let permits = if self.config.enable_parallel_execution {
            self.config.max_parallel_rules.max(1)
        } else {
            1
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let handlers = self.handler_snapshot();

        let mut pending: FuturesUnordered<_> = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let rule = Arc::clone(rule);
                let context = Arc::clone(&context);
                let handlers = Arc::clone(&handlers);
                let semaphore = Arc::clone(&semaphore);
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    evaluate_rule(&rule, &context, &handlers).await
                });
                async move { (index, handle.await) }
            })
            .collect();

        let mut slots: Vec<Option<RuleExecutionResult>> = rules.iter().map(|_| None).collect();

        let drain = async {
            while let Some((index, joined)) = pending.next().await {
                let result = match joined {
                    Ok(result) => result,
                    Err(err) => {
                        let rule = &rules[index].definition;
                        RuleExecutionResult::failed(
                            &rule.id,
                            &rule.name,
                            rule.category,
                            &RuleError::TaskAborted(err.to_string()),
                            elapsed_ms(started),
                        )
                    }
                };
                self.record(&result);
                slots[index] = Some(result);
            }
        };

        let expired = match self.config.max_execution_time_ms {
            0 => {
                drain.await;
                false
            }
            limit => tokio::time::timeout(Duration::from_millis(limit), drain)
                .await
                .is_err(),
        };

        // Dropping the remaining join handles detaches unfinished tasks.
        drop(pending);

        let unfinished = slots.iter().filter(|s| s.is_none()).count();
        let results: Vec<RuleExecutionResult> = slots.into_iter().flatten().collect();

        if !expired {
            return (results, None);
        }

        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
        let elapsed = elapsed_ms(started);
        if self.config.log_level.allows(LogLevel::Warn) {
            warn!(
                %category,
                limit_ms = self.config.max_execution_time_ms,
                completed = results.len(),
                unfinished,
                "rule execution timed out"
            );
        }
        let marker = RuleExecutionResult::timed_out(
            category,
            self.config.max_execution_time_ms,
            elapsed,
            unfinished,
        );
        (results, Some(marker))
    }

    fn record(&self, result: &RuleExecutionResult) {
        self.counters.rules_evaluated.fetch_add(1, Ordering::Relaxed);
        if self.config.enable_metrics {
            self.counters.timed_rules.fetch_add(1, Ordering::Relaxed);
            self.counters
                .rule_time_us
                .fetch_add((result.execution_time_ms * 1000.0) as u64, Ordering::Relaxed);
        }

        if !result.success {
            self.counters.rule_failures.fetch_add(1, Ordering::Relaxed);
            if self.config.log_level.allows(LogLevel::Warn) {
                let reason = result
                    .validation
                    .errors
                    .first()
                    .map(|e| e.message.as_str())
                    .unwrap_or_default();
                warn!(rule_id = %result.rule_id, reason, "rule evaluation failed");
            }
        } else if self.config.log_level.allows(LogLevel::Debug) {
            debug!(
                rule_id = %result.rule_id,
                is_valid = result.validation.is_valid,
                triggered = result.triggered_actions.len(),
                execution_time_ms = result.execution_time_ms,
                "rule evaluated"
            );
        }
    }
}

fn sort_for_evaluation(rules: &mut [Arc<RegisteredRule>]) {
    rules.sort_by_key(|r| (Reverse(r.definition.priority), r.seq));
}

async fn evaluate_rule(
    rule: &RegisteredRule,
    context: &RuleContext,
    handlers: &HandlerMap,
) -> RuleExecutionResult {
    let started = Instant::now();
    let outcome = evaluate_conditions(&rule.conditions, context, handlers).await;
    let elapsed = elapsed_ms(started);
    let definition = &rule.definition;

    match outcome {
        Ok(true) => RuleExecutionResult::triggered(definition, elapsed),
        Ok(false) => RuleExecutionResult::passed(definition, elapsed),
        Err(err) => RuleExecutionResult::failed(
            &definition.id,
            &definition.name,
            definition.category,
            &err,
            elapsed,
        ),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
