//! The operation pipeline.

mod builder;
mod context;
mod events;
mod history;
mod hook;
mod operation;
mod policy_hook;
mod soft_delete;
mod terminal;

pub use builder::{Pipeline, PipelineBuilder};
pub use context::Context;
pub(crate) use events::deliver;
pub use events::{ChangeEvent, ChangeListener, EventHook};
pub use history::{AuditRecord, AuditSink, HistoryHook, HistoryOp, Snapshot, SqlAuditSink};
pub(crate) use history::{HistoryScope, HistoryStore};
pub use hook::{Hook, HookChain, HookChainBuilder, Next, Terminal};
pub use operation::{
    Annotations, Change, EdgeLoad, OpKind, OpOptions, OpOutput, Operation, OrderBy, QuerySpec,
    SortOrder,
};
pub use policy_hook::PolicyHook;
pub use soft_delete::SoftDeleteHook;
pub use terminal::TerminalExecutor;
