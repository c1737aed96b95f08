//! Execution context.

use crate::cancel::CancelToken;
use crate::pipeline::OpOptions;
use crate::security::Actor;
use crate::storage::Transaction;

/// Per-call context: who is acting, how to cancel, and the transaction to
/// run in, if any.
///
/// Without a transaction each mutation runs in its own implicit
/// transaction.
#[derive(Clone)]
pub struct Context<'t> {
    pub actor: Actor,
    pub cancel: CancelToken,
    pub options: OpOptions,
    tx: Option<&'t Transaction>,
}

impl Context<'static> {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            cancel: CancelToken::new(),
            options: OpOptions::default(),
            tx: None,
        }
    }
}

impl<'t> Context<'t> {
    /// Use a cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Include soft-deleted rows in queries and updates.
    pub fn skip_soft_delete(mut self) -> Self {
        self.options.skip_soft_delete = true;
        self
    }

    /// Do not record history.
    pub fn skip_history(mut self) -> Self {
        self.options.skip_history = true;
        self
    }

    /// Run inside a caller-owned transaction.
    pub fn with_tx<'u>(self, tx: &'u Transaction) -> Context<'u> {
        Context {
            actor: self.actor,
            cancel: self.cancel,
            options: self.options,
            tx: Some(tx),
        }
    }

    pub fn tx(&self) -> Option<&'t Transaction> {
        self.tx
    }
}
