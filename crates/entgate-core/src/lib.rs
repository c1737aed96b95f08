//! entgate core - the access pipeline every entity operation passes through.
//!
//! An [`Operation`] built by an entity client is handed to the entity's
//! [`HookChain`]. The canonical chain enforces policy, rewrites deletes and
//! queries for soft-delete semantics, executes the statement, records audit
//! history for audited entities and notifies change listeners:
//!
//! ```text
//! PolicyHook -> SoftDeleteHook -> custom hooks -> EventHook -> HistoryHook -> TerminalExecutor
//! ```
//!
//! The [`Pipeline`] holding every chain is built once at startup and is
//! read-only afterwards.

pub mod cancel;
pub mod catalog;
pub mod client;
pub mod error;
pub mod ids;
pub mod pipeline;
pub mod security;
pub mod storage;

pub use cancel::CancelToken;
pub use catalog::{
    Catalog, ColumnDef, ColumnType, DeleteMode, EdgeDef, EdgeJoin, EntitySchema, SchemaFile,
};
pub use client::{
    CreateBuilder, CreateBulkBuilder, DeleteBuilder, DeleteOneBuilder, EntityClient, QueryBuilder,
    UpdateBuilder, UpdateOneBuilder,
};
pub use error::{
    AuditWriteError, ConstraintKind, Error, ErrorKind, EventDeliveryError, Result,
};
pub use pipeline::{
    AuditRecord, AuditSink, Change, ChangeEvent, ChangeListener, Context, EdgeLoad, HistoryOp,
    Hook, HookChain, HookChainBuilder, Next, OpKind, OpOptions, OpOutput, Operation, OrderBy,
    Pipeline, PipelineBuilder, QuerySpec, SortOrder, SqlAuditSink, Terminal,
};
pub use security::{
    Actor, DecisionReason, DenyRows, EntityPolicy, GroupDelegate, HiddenFields, MutationRule,
    MutationVerdict, PolicyDecision, PolicyEvaluator, ProtectedFields, QueryRule, QueryVerdict,
    RequireClaim, TenantIsolation,
};
pub use storage::{Database, DatabaseConfig, Transaction};

/// Re-export model types.
pub use entgate_model as model;
pub use entgate_model::{FieldChanges, Predicate, Row, Value};
