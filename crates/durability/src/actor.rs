//! Single-writer execution context
//!
//! Every snapshot store owns one actor: a dedicated, named OS thread that
//! drains a queue of jobs and runs them one at a time against state only it
//! can touch. Callers enqueue a closure and await a future for its result, so
//! store-internal state needs no locks and all blocking file I/O stays off
//! the caller's async runtime.
//!
//! # Design Notes
//!
//! - Jobs run strictly in submission order
//! - A panicking job is caught and logged; its caller sees `ActorUnavailable`
//! - The thread exits once every strong handle is dropped

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{Result, SnapshotStoreError};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Handle to an actor owning state `S`
pub(crate) struct Actor<S> {
    sender: mpsc::UnboundedSender<Job<S>>,
}

impl<S> Clone for Actor<S> {
    fn clone(&self) -> Self {
        Actor {
            sender: self.sender.clone(),
        }
    }
}

/// Handle that does not keep the actor alive
pub(crate) struct WeakActor<S> {
    sender: mpsc::WeakUnboundedSender<Job<S>>,
}

impl<S> Clone for WeakActor<S> {
    fn clone(&self) -> Self {
        WeakActor {
            sender: self.sender.clone(),
        }
    }
}

impl<S> WeakActor<S> {
    /// Get a strong handle if the actor is still running
    pub(crate) fn upgrade(&self) -> Option<Actor<S>> {
        self.sender.upgrade().map(|sender| Actor { sender })
    }
}

impl<S: Send + 'static> Actor<S> {
    /// Spawn the actor thread
    ///
    /// `init` builds the state on the calling thread and receives a weak
    /// handle so the state can hand out references back to its own actor.
    pub(crate) fn spawn(name: String, init: impl FnOnce(WeakActor<S>) -> S) -> io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job<S>>();
        let mut state = init(WeakActor {
            sender: sender.downgrade(),
        });

        let actor_name = name.clone();
        thread::Builder::new().name(name).spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                if panic::catch_unwind(AssertUnwindSafe(|| job(&mut state))).is_err() {
                    error!(target: "snapvault::actor", actor = %actor_name, "Actor job panicked");
                }
            }
            debug!(target: "snapvault::actor", actor = %actor_name, "Actor stopped");
        })?;

        Ok(Actor { sender })
    }

    /// Run `f` on the actor and wait for its result
    pub(crate) async fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(Box::new(move |state: &mut S| {
                // The caller may have stopped waiting; the job still ran.
                let _ = reply.send(f(state));
            }))
            .map_err(|_| SnapshotStoreError::ActorUnavailable)?;
        result.await.map_err(|_| SnapshotStoreError::ActorUnavailable)
    }

    /// Enqueue `f` without waiting for it
    ///
    /// Returns false if the actor has stopped.
    pub(crate) fn submit<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.sender.send(Box::new(f)).is_ok()
    }

    /// Get a weak handle
    pub(crate) fn downgrade(&self) -> WeakActor<S> {
        WeakActor {
            sender: self.sender.downgrade(),
        }
    }
}
