//! Context Cleaner
//!
//! Between attempts, removes what a failed attempt wrote to the entity stores and
//! gathers corrective hints. Strategies are looked up by error type with a no-op
//! default.

use async_trait::async_trait;
use entities::{EntityKind, EntityStore, JournalMark, StoreError, StoreSet, StoreSnapshot};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classifier::{ErrorClassification, ErrorType};
use crate::request::RecoveryHints;

#[derive(Debug, Error)]
pub enum CleanerError {
    #[error("store access failed: {0}")]
    Store(#[from] StoreError),

    #[error("cleaning strategy {strategy} failed: {reason}")]
    Failed { strategy: String, reason: String },
}

/// What a cleaning strategy gets to look at.
pub struct CleaningContext<'a> {
    pub request_id: &'a str,
    pub stores: &'a StoreSet,
    /// Journal position taken when the failed attempt started
    pub attempt_mark: &'a JournalMark,
    /// Pre-attempt copy, when one was taken
    pub snapshot: Option<&'a StoreSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanedContext {
    pub strategy: String,
    pub removed_traces: BTreeMap<EntityKind, Vec<String>>,
    pub valid_entities: BTreeMap<EntityKind, Vec<String>>,
    pub suggestions: Vec<String>,
}

impl CleanedContext {
    pub fn removed_count(&self) -> usize {
        self.removed_traces.values().map(Vec::len).sum()
    }

    pub fn into_hints(self) -> RecoveryHints {
        RecoveryHints {
            valid_entities: self.valid_entities,
            removed_traces: self.removed_traces,
            suggestions: self.suggestions,
        }
    }
}

#[async_trait]
pub trait CleaningStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Kinds this strategy may modify. Only these are snapshotted before attempts.
    fn touched_kinds(&self) -> Vec<EntityKind>;

    /// Must be idempotent: a second call for the same attempt changes nothing.
    async fn clean(
        &self,
        classification: &ErrorClassification,
        ctx: &CleaningContext<'_>,
    ) -> Result<CleanedContext, CleanerError>;

    /// Read-only hints for a final failure that was never cleaned.
    async fn describe(
        &self,
        classification: &ErrorClassification,
        _ctx: &CleaningContext<'_>,
    ) -> RecoveryHints {
        RecoveryHints {
            suggestions: classification.suggestion.iter().cloned().collect(),
            ..RecoveryHints::default()
        }
    }
}

fn suggestions_of(classification: &ErrorClassification) -> Vec<String> {
    classification.suggestion.iter().cloned().collect()
}

pub struct NoopCleaning;

#[async_trait]
impl CleaningStrategy for NoopCleaning {
    fn name(&self) -> &str {
        "noop"
    }

    fn touched_kinds(&self) -> Vec<EntityKind> {
        Vec::new()
    }

    async fn clean(
        &self,
        classification: &ErrorClassification,
        _ctx: &CleaningContext<'_>,
    ) -> Result<CleanedContext, CleanerError> {
        Ok(CleanedContext {
            strategy: self.name().to_string(),
            suggestions: suggestions_of(classification),
            ..CleanedContext::default()
        })
    }
}

/// Deletes records the failed attempt inserted. Records that existed before the
/// attempt are never touched.
pub struct TraceRemoval;

impl TraceRemoval {
    async fn remove_traces(
        &self,
        ctx: &CleaningContext<'_>,
    ) -> Result<BTreeMap<EntityKind, Vec<String>>, CleanerError> {
        let mut removed = BTreeMap::new();
        for (kind, ids) in ctx.stores.inserted_since(ctx.attempt_mark) {
            let preexisting = ctx.snapshot.and_then(|s| s.stores.get(&kind));
            let traces: Vec<String> = ids
                .into_iter()
                .filter(|id| !preexisting.is_some_and(|records| records.iter().any(|r| &r.id == id)))
                .collect();
            if traces.is_empty() {
                continue;
            }
            let deleted = ctx.stores.require(kind)?.delete(&traces).await?;
            debug!(
                request_id = %ctx.request_id,
                %kind,
                traces = traces.len(),
                deleted,
                "removed attempt traces"
            );
            removed.insert(kind, traces);
        }
        Ok(removed)
    }
}

#[async_trait]
impl CleaningStrategy for TraceRemoval {
    fn name(&self) -> &str {
        "trace-removal"
    }

    fn touched_kinds(&self) -> Vec<EntityKind> {
        EntityKind::all().to_vec()
    }

    async fn clean(
        &self,
        classification: &ErrorClassification,
        ctx: &CleaningContext<'_>,
    ) -> Result<CleanedContext, CleanerError> {
        Ok(CleanedContext {
            strategy: self.name().to_string(),
            removed_traces: self.remove_traces(ctx).await?,
            valid_entities: BTreeMap::new(),
            suggestions: suggestions_of(classification),
        })
    }
}

/// Trace removal plus the current identifier listing of every store, so the next
/// attempt (or whoever wrote the code) can pick an id that exists.
pub struct ReferenceRecovery {
    traces: TraceRemoval,
}

impl Default for ReferenceRecovery {
    fn default() -> Self {
        Self {
            traces: TraceRemoval,
        }
    }
}

impl ReferenceRecovery {
    fn suggestions(
        classification: &ErrorClassification,
        valid: &BTreeMap<EntityKind, Vec<String>>,
    ) -> Vec<String> {
        let mut suggestions = suggestions_of(classification);
        for (kind, ids) in valid {
            if ids.is_empty() {
                suggestions.push(format!("The {kind} store is empty"));
            } else {
                suggestions.push(format!("Valid {kind} ids: {}", ids.join(", ")));
            }
        }
        suggestions
    }
}

#[async_trait]
impl CleaningStrategy for ReferenceRecovery {
    fn name(&self) -> &str {
        "reference-recovery"
    }

    fn touched_kinds(&self) -> Vec<EntityKind> {
        self.traces.touched_kinds()
    }

    async fn clean(
        &self,
        classification: &ErrorClassification,
        ctx: &CleaningContext<'_>,
    ) -> Result<CleanedContext, CleanerError> {
        let removed_traces = self.traces.remove_traces(ctx).await?;
        let valid_entities = ctx.stores.valid_ids().await;
        Ok(CleanedContext {
            strategy: self.name().to_string(),
            suggestions: Self::suggestions(classification, &valid_entities),
            removed_traces,
            valid_entities,
        })
    }

    async fn describe(
        &self,
        classification: &ErrorClassification,
        ctx: &CleaningContext<'_>,
    ) -> RecoveryHints {
        let valid_entities = ctx.stores.valid_ids().await;
        RecoveryHints {
            suggestions: Self::suggestions(classification, &valid_entities),
            valid_entities,
            removed_traces: BTreeMap::new(),
        }
    }
}

/// Registry of cleaning strategies keyed by error type.
pub struct ContextCleaner {
    strategies: RwLock<HashMap<ErrorType, Arc<dyn CleaningStrategy>>>,
    fallback: Arc<dyn CleaningStrategy>,
}

impl Default for ContextCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextCleaner {
    /// Only the no-op fallback.
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            fallback: Arc::new(NoopCleaning),
        }
    }

    pub fn with_default_strategies() -> Self {
        let cleaner = Self::new();
        let references: Arc<dyn CleaningStrategy> = Arc::new(ReferenceRecovery::default());
        cleaner.register(ErrorType::TIMEOUT, Arc::new(TraceRemoval));
        cleaner.register(ErrorType::UNDEFINED_REFERENCE, references.clone());
        cleaner.register(ErrorType::ENTITY_NOT_FOUND, references);
        cleaner
    }

    pub fn register(&self, error_type: ErrorType, strategy: Arc<dyn CleaningStrategy>) {
        info!(%error_type, strategy = strategy.name(), "registered cleaning strategy");
        self.strategies.write().insert(error_type, strategy);
    }

    pub fn strategy_for(&self, error_type: &ErrorType) -> Arc<dyn CleaningStrategy> {
        self.strategies
            .read()
            .get(error_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Union of the kinds any registered strategy may touch.
    pub fn snapshot_kinds(&self) -> Vec<EntityKind> {
        let strategies = self.strategies.read();
        let kinds: BTreeSet<EntityKind> = strategies
            .values()
            .chain(std::iter::once(&self.fallback))
            .flat_map(|s| s.touched_kinds())
            .collect();
        kinds.into_iter().collect()
    }

    /// Run the strategy for this classification. A failing strategy is logged and
    /// yields an empty result instead of an error.
    pub async fn clean(
        &self,
        classification: &ErrorClassification,
        ctx: &CleaningContext<'_>,
    ) -> CleanedContext {
        let strategy = self.strategy_for(&classification.error_type);
        match strategy.clean(classification, ctx).await {
            Ok(cleaned) => {
                debug!(
                    request_id = %ctx.request_id,
                    strategy = strategy.name(),
                    removed = cleaned.removed_count(),
                    "context cleaned"
                );
                cleaned
            }
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    strategy = strategy.name(),
                    error = %e,
                    "cleaning strategy failed"
                );
                CleanedContext {
                    strategy: strategy.name().to_string(),
                    suggestions: suggestions_of(classification),
                    ..CleanedContext::default()
                }
            }
        }
    }

    pub async fn describe(
        &self,
        classification: &ErrorClassification,
        ctx: &CleaningContext<'_>,
    ) -> RecoveryHints {
        self.strategy_for(&classification.error_type)
            .describe(classification, ctx)
            .await
    }
}
