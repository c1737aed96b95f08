//! Pipeline assembly.

use super::context::Context;
use super::events::{ChangeListener, EventHook};
use super::history::{AuditSink, HistoryHook, HistoryStore, SqlAuditSink};
use super::hook::{Hook, HookChain, HookChainBuilder};
use super::operation::{OpOutput, Operation};
use super::policy_hook::PolicyHook;
use super::soft_delete::SoftDeleteHook;
use super::terminal::TerminalExecutor;
use crate::catalog::Catalog;
use crate::client::EntityClient;
use crate::error::{Error, Result};
use crate::security::{EntityPolicy, PolicyEvaluator};
use crate::storage::{Database, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

/// Collects policies and hooks, then freezes them into a [`Pipeline`].
pub struct PipelineBuilder {
    catalog: Arc<Catalog>,
    db: Database,
    policies: HashMap<String, EntityPolicy>,
    default_policy: Option<EntityPolicy>,
    hooks: Vec<(String, Arc<dyn Hook>)>,
    listeners: Vec<(String, Arc<dyn ChangeListener>)>,
    audit_sink: Arc<dyn AuditSink>,
}

impl PipelineBuilder {
    pub fn new(catalog: Catalog, db: Database) -> Self {
        Self {
            catalog: Arc::new(catalog),
            db,
            policies: HashMap::new(),
            default_policy: None,
            hooks: Vec::new(),
            listeners: Vec::new(),
            audit_sink: Arc::new(SqlAuditSink),
        }
    }

    /// Set the policy for an entity kind.
    pub fn policy(mut self, kind: impl Into<String>, policy: EntityPolicy) -> Self {
        self.policies.insert(kind.into(), policy);
        self
    }

    /// Policy for entity kinds without their own.
    pub fn default_policy(mut self, policy: EntityPolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    /// Add a custom hook for an entity kind.
    ///
    /// Custom hooks run after policy and soft-delete handling and before
    /// history, in registration order.
    pub fn hook(mut self, kind: impl Into<String>, hook: impl Hook + 'static) -> Self {
        self.hooks.push((kind.into(), Arc::new(hook)));
        self
    }

    /// Add a change listener for an entity kind.
    ///
    /// Listeners run after each committed mutation of that kind, in
    /// registration order.
    pub fn listener(mut self, kind: impl Into<String>, listener: impl ChangeListener + 'static) -> Self {
        self.listeners.push((kind.into(), Arc::new(listener)));
        self
    }

    /// Replace the history destination.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    /// Build one chain per entity:
    /// `policy -> soft_delete (soft entities) -> custom hooks -> events
    /// (entities with listeners) -> history (audited entities) -> terminal`.
    pub fn build(mut self) -> Result<Pipeline> {
        for kind in self
            .policies
            .keys()
            .chain(self.hooks.iter().map(|(kind, _)| kind))
            .chain(self.listeners.iter().map(|(kind, _)| kind))
        {
            if !self.catalog.contains(kind) {
                return Err(Error::Config(format!("unknown entity '{}'", kind)));
            }
        }

        let mut chains = HashMap::new();
        for schema in self.catalog.entities() {
            let policy = self
                .policies
                .remove(&schema.kind)
                .or_else(|| self.default_policy.clone())
                .ok_or_else(|| {
                    Error::Config(format!("entity '{}' has no policy", schema.kind))
                })?;

            let evaluator = PolicyEvaluator::new(schema.clone(), Arc::new(policy));
            let mut chain = HookChainBuilder::new(schema.kind.clone())
                .register(Arc::new(PolicyHook::new(evaluator)));
            if schema.is_soft_delete() {
                chain = chain.register(Arc::new(SoftDeleteHook));
            }
            for (_, hook) in self.hooks.iter().filter(|(kind, _)| *kind == schema.kind) {
                chain = chain.register(hook.clone());
            }
            let listeners: Vec<Arc<dyn ChangeListener>> = self
                .listeners
                .iter()
                .filter(|(kind, _)| *kind == schema.kind)
                .map(|(_, listener)| listener.clone())
                .collect();
            if !listeners.is_empty() {
                chain = chain.register(Arc::new(EventHook::new(listeners)));
            }
            if schema.audited {
                chain = chain.register(Arc::new(HistoryHook::new(
                    schema.clone(),
                    self.db.clone(),
                    self.audit_sink.clone(),
                )));
            }
            let chain = chain.build(Arc::new(TerminalExecutor::new(
                schema.clone(),
                self.db.clone(),
            )));
            tracing::debug!(entity = %schema.kind, hooks = ?chain.hook_names(), "hook chain built");
            chains.insert(schema.kind.clone(), chain);
        }

        tracing::info!(entities = chains.len(), "pipeline ready");
        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                history: HistoryStore::new(self.db.clone()),
                catalog: self.catalog,
                db: self.db,
                chains,
            }),
        })
    }
}

struct PipelineInner {
    catalog: Arc<Catalog>,
    db: Database,
    chains: HashMap<String, HookChain>,
    history: HistoryStore,
}

/// Read-only registry of hook chains, one per entity kind.
///
/// Cheap to clone and safe to share between threads.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn builder(catalog: Catalog, db: Database) -> PipelineBuilder {
        PipelineBuilder::new(catalog, db)
    }

    /// Client for one entity kind.
    pub fn entity(&self, kind: &str) -> Result<EntityClient<'_>> {
        let schema = self.inner.catalog.get(kind)?;
        Ok(EntityClient::new(self, schema))
    }

    /// Run an operation through its entity's chain.
    pub fn execute(&self, op: Operation, cx: &Context<'_>) -> Result<OpOutput> {
        let chain = self.chain(&op.entity)?;
        let span = tracing::debug_span!("operation", entity = %op.entity, kind = %op.kind);
        let _guard = span.enter();
        chain.execute(op, cx)
    }

    /// The chain for an entity kind.
    pub fn chain(&self, kind: &str) -> Result<&HookChain> {
        self.inner
            .chains
            .get(kind)
            .ok_or_else(|| Error::validation(kind, None, format!("unknown entity '{}'", kind)))
    }

    /// Start a caller-owned transaction.
    pub fn begin(&self) -> Result<Transaction> {
        self.inner.db.begin()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub(crate) fn history(&self) -> &HistoryStore {
        &self.inner.history
    }
}
