//! The engine's owning sequence.
//!
//! Everything that touches engine state runs on one sequence: handle commands,
//! completions coming back from the persistent store, and change deliveries to
//! subscribers. Work that originates elsewhere (a store thread, a subscription
//! delivery) is posted here as a [`SequenceTask`] and runs in FIFO order.

use crate::engine::CookieEngine;
use tokio::sync::mpsc;

pub(crate) type EngineTask = Box<dyn FnOnce(&mut CookieEngine) + Send>;

/// A unit of work queued on the engine's sequence.
pub enum SequenceTask {
    /// Needs mutable access to the engine (load and flush completions).
    Engine(EngineTask),
    /// Does not touch engine state (subscriber deliveries, caller callbacks).
    Detached(Box<dyn FnOnce() + Send>),
}

impl SequenceTask {
    pub(crate) fn run(self, engine: &mut CookieEngine) {
        match self {
            SequenceTask::Engine(task) => task(engine),
            SequenceTask::Detached(task) => task(),
        }
    }
}

impl std::fmt::Debug for SequenceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceTask::Engine(_) => f.write_str("SequenceTask::Engine"),
            SequenceTask::Detached(_) => f.write_str("SequenceTask::Detached"),
        }
    }
}

/// Posts tasks onto the engine's sequence. Cheap to clone, usable from any thread.
#[derive(Clone, Debug)]
pub struct SequencedTaskRunner {
    tx: mpsc::UnboundedSender<SequenceTask>,
}

impl SequencedTaskRunner {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SequenceTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn post_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(SequenceTask::Detached(Box::new(task))).is_err() {
            log::trace!("engine sequence is gone, dropping posted task");
        }
    }

    pub(crate) fn post_engine_task<F>(&self, task: F)
    where
        F: FnOnce(&mut CookieEngine) + Send + 'static,
    {
        if self.tx.send(SequenceTask::Engine(Box::new(task))).is_err() {
            log::trace!("engine sequence is gone, dropping posted engine task");
        }
    }
}
