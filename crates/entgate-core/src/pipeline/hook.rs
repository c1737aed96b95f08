//! Hook chains.
//!
//! A chain is an ordered, frozen list of hooks ending at a terminal. The
//! first registered hook is the outermost: it sees the operation first and
//! the output last. A hook may inspect or amend the operation, short-circuit
//! with an error, or call [`Next::run`] and post-process the result.

use super::context::Context;
use super::operation::{OpOutput, Operation};
use crate::error::{Error, Result};
use std::sync::Arc;

/// One link in a chain.
pub trait Hook: Send + Sync {
    /// Name used in logs and error context.
    fn name(&self) -> &'static str;

    fn handle(&self, op: Operation, cx: &Context<'_>, next: Next<'_>) -> Result<OpOutput>;
}

/// Executes the finished operation against the store.
pub trait Terminal: Send + Sync {
    fn execute(&self, op: Operation, cx: &Context<'_>) -> Result<OpOutput>;
}

/// The rest of the chain after the current hook.
pub struct Next<'a> {
    hooks: &'a [Arc<dyn Hook>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    /// Hand the operation to the next hook, or the terminal.
    pub fn run(self, op: Operation, cx: &Context<'_>) -> Result<OpOutput> {
        match self.hooks.split_first() {
            Some((hook, rest)) => {
                tracing::trace!(hook = hook.name(), entity = %op.entity, kind = %op.kind, "enter hook");
                hook.handle(
                    op,
                    cx,
                    Next {
                        hooks: rest,
                        terminal: self.terminal,
                    },
                )
            }
            None => self.terminal.execute(op, cx),
        }
    }
}

/// An immutable chain for one entity kind.
#[derive(Clone)]
pub struct HookChain {
    entity: String,
    hooks: Arc<[Arc<dyn Hook>]>,
    terminal: Arc<dyn Terminal>,
}

impl HookChain {
    /// Run an operation through the chain.
    ///
    /// Cancellation, the operation's shape and its actor are checked before
    /// the first hook runs. Switches set on the context are merged into the
    /// operation's options.
    pub fn execute(&self, mut op: Operation, cx: &Context<'_>) -> Result<OpOutput> {
        cx.cancel.check("hook chain")?;
        op.validate_shape()?;
        if op.actor != cx.actor {
            return Err(Error::validation(
                &op.entity,
                None,
                "operation actor does not match the context actor",
            ));
        }
        op.options.skip_soft_delete |= cx.options.skip_soft_delete;
        op.options.skip_history |= cx.options.skip_history;
        Next {
            hooks: &self.hooks,
            terminal: self.terminal.as_ref(),
        }
        .run(op, cx)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Hook names, outermost first.
    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }
}

/// Collects hooks before a chain is frozen.
pub struct HookChainBuilder {
    entity: String,
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookChainBuilder {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            hooks: Vec::new(),
        }
    }

    /// Append a hook; it runs inside every hook registered before it.
    pub fn register(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Freeze the chain.
    pub fn build(self, terminal: Arc<dyn Terminal>) -> HookChain {
        HookChain {
            entity: self.entity,
            hooks: self.hooks.into(),
            terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Actor;
    use entgate_model::Predicate;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Hook for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handle(&self, mut op: Operation, cx: &Context<'_>, next: Next<'_>) -> Result<OpOutput> {
            self.log.lock().push(format!("{}:before", self.name));
            op.predicates.push(Predicate::eq("seen_by", self.name));
            let out = next.run(op, cx);
            self.log.lock().push(format!("{}:after", self.name));
            out
        }
    }

    struct Refuse;

    impl Hook for Refuse {
        fn name(&self) -> &'static str {
            "refuse"
        }

        fn handle(&self, op: Operation, _cx: &Context<'_>, _next: Next<'_>) -> Result<OpOutput> {
            Err(Error::unauthorized(op.entity, op.kind, "refused"))
        }
    }

    struct Echo {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Terminal for Echo {
        fn execute(&self, op: Operation, _cx: &Context<'_>) -> Result<OpOutput> {
            self.log.lock().push(format!("terminal:{}", op.predicates.len()));
            Ok(OpOutput {
                affected: op.predicates.len() as u64,
                ..OpOutput::default()
            })
        }
    }

    fn cx() -> Context<'static> {
        Context::new(Actor::new("org_1", "u1").unwrap())
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Hook> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
        })
    }

    #[test]
    fn test_first_registered_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChainBuilder::new("risk")
            .register(recorder("a", &log))
            .register(recorder("b", &log))
            .build(Arc::new(Echo { log: log.clone() }));

        let out = chain
            .execute(Operation::query("risk", cx().actor.clone()), &cx())
            .unwrap();
        assert_eq!(out.affected, 2);
        assert_eq!(
            *log.lock(),
            vec!["a:before", "b:before", "terminal:2", "b:after", "a:after"]
        );
        assert_eq!(chain.hook_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_short_circuit_skips_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChainBuilder::new("risk")
            .register(recorder("a", &log))
            .register(Arc::new(Refuse))
            .register(recorder("c", &log))
            .build(Arc::new(Echo { log: log.clone() }));

        let err = chain
            .execute(Operation::delete("risk", cx().actor.clone()), &cx())
            .unwrap_err();
        assert!(matches!(err, Error::Authorization { .. }));
        assert_eq!(*log.lock(), vec!["a:before", "a:after"]);
    }

    #[test]
    fn test_cancelled_before_first_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChainBuilder::new("risk")
            .register(recorder("a", &log))
            .build(Arc::new(Echo { log: log.clone() }));
        let cx = cx();
        cx.cancel.cancel();
        let err = chain
            .execute(Operation::query("risk", cx.actor.clone()), &cx)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_actor_must_match_context() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChainBuilder::new("risk")
            .register(recorder("a", &log))
            .build(Arc::new(Echo { log: log.clone() }));
        let other = Actor::new("org_2", "u2").unwrap();
        let err = chain.execute(Operation::query("risk", other), &cx()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_context_switches_reach_operation() {
        struct Options {
            seen: Arc<Mutex<Option<crate::pipeline::OpOptions>>>,
        }

        impl Terminal for Options {
            fn execute(&self, op: Operation, _cx: &Context<'_>) -> Result<OpOutput> {
                *self.seen.lock() = Some(op.options);
                Ok(OpOutput::default())
            }
        }

        let seen = Arc::new(Mutex::new(None));
        let chain = HookChainBuilder::new("risk").build(Arc::new(Options { seen: seen.clone() }));
        let cx = cx().skip_history();
        chain.execute(Operation::query("risk", cx.actor.clone()), &cx).unwrap();
        let options = (*seen.lock()).unwrap();
        assert!(options.skip_history);
        assert!(!options.skip_soft_delete);
    }

    #[test]
    fn test_malformed_operation_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = HookChainBuilder::new("risk").build(Arc::new(Echo { log: log.clone() }));
        let err = chain
            .execute(Operation::create("risk", cx().actor.clone(), vec![]), &cx())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(log.lock().is_empty());
    }
}
