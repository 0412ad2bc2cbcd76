//! Completion queue for the asynchronous driver.
//!
//! Transports post each finished response as a [`Completion`] through a
//! cloneable [`CompletionPoster`]. A single consumer drains the queue and
//! routes each completion to the task registered under its session id, so
//! `process_async_response` is never entered concurrently for one task.
//! What the caller must see is reported on an [`Outcome`] channel.
//!
//! Handling a completion can block while the task's reassembly stream is
//! full, so [`CompletionQueue::run_blocking`] belongs on a dedicated thread
//! (or `tokio::task::spawn_blocking`), never on an async worker.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::async_get::Dispatch;
use crate::error::{FetchError, FetchResult};
use crate::message::{FetchRequest, FetchResponse};
use crate::task::{FetchState, RangeFetchTask};

/// A response delivered by a transport for one session.
#[derive(Debug)]
pub struct Completion {
    pub session: u32,
    pub response: FetchResponse,
}

/// What the consumer reports back for a session.
#[derive(Debug)]
pub enum Outcome {
    /// The response the client should receive (synthesized or passed through).
    Response { session: u32, response: FetchResponse },
    /// The task failed and has been closed.
    Failed { session: u32, error: FetchError },
}

/// Posting handle for transports; cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct CompletionPoster {
    tx: UnboundedSender<Completion>,
}

impl CompletionPoster {
    pub fn post(&self, session: u32, response: FetchResponse) -> FetchResult<()> {
        self.tx
            .send(Completion { session, response })
            .map_err(|_| FetchError::TaskAlreadyClosed(session))
    }
}

/// Shared registry of session id -> task and its dispatcher.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<u32, (RangeFetchTask, Arc<dyn Dispatch>)>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task: RangeFetchTask, dispatch: Arc<dyn Dispatch>) {
        self.write().insert(task.session(), (task, dispatch));
    }

    /// Removes a task (call when it completes or fails).
    pub fn unregister(&self, session: u32) -> Option<RangeFetchTask> {
        self.write().remove(&session).map(|(task, _)| task)
    }

    /// Closes a task on request (e.g. client disconnected). Its in-flight
    /// completions are then discarded by the consumer.
    pub fn request_abort(&self, session: u32) {
        if let Some((task, _)) = self.read().get(&session) {
            task.close();
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, session: u32) -> Option<(RangeFetchTask, Arc<dyn Dispatch>)> {
        self.read()
            .get(&session)
            .map(|(t, d)| (t.clone(), Arc::clone(d)))
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<u32, (RangeFetchTask, Arc<dyn Dispatch>)>> {
        self.tasks.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<u32, (RangeFetchTask, Arc<dyn Dispatch>)>> {
        self.tasks.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Single consumer of completions.
pub struct CompletionQueue {
    rx: UnboundedReceiver<Completion>,
    registry: Arc<TaskRegistry>,
    outcomes: UnboundedSender<Outcome>,
}

impl CompletionQueue {
    /// Creates the queue, a poster for transports and the outcome receiver.
    pub fn new() -> (Self, CompletionPoster, UnboundedReceiver<Outcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                registry: Arc::new(TaskRegistry::new()),
                outcomes: out_tx,
            },
            CompletionPoster { tx },
            out_rx,
        )
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        Arc::clone(&self.registry)
    }

    /// Registers `task` and sends its first request.
    pub fn start(
        &self,
        task: RangeFetchTask,
        req: FetchRequest,
        dispatch: Arc<dyn Dispatch>,
    ) -> FetchResult<()> {
        let session = task.session();
        self.registry.register(task.clone(), Arc::clone(&dispatch));
        if let Err(e) = task.async_get(req, dispatch.as_ref()) {
            self.registry.unregister(session);
            return Err(e);
        }
        Ok(())
    }

    /// Consumes completions until every poster is dropped.
    ///
    /// Panics if called from within an async runtime context.
    pub fn run_blocking(mut self) {
        while let Some(c) = self.rx.blocking_recv() {
            self.handle(c);
        }
        tracing::debug!("completion queue drained, all posters gone");
    }

    /// Handles every completion already queued without waiting for more.
    /// Returns how many were handled.
    pub fn drain_ready(&mut self) -> usize {
        let mut n = 0;
        loop {
            match self.rx.try_recv() {
                Ok(c) => {
                    self.handle(c);
                    n += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return n,
            }
        }
    }

    fn handle(&self, c: Completion) {
        let session = c.session;
        let Some((task, dispatch)) = self.registry.get(session) else {
            tracing::debug!(session, "completion for unknown session dropped");
            return;
        };
        let mut finished = false;
        match task.process_async_response(c.response, dispatch.as_ref()) {
            Ok(Some(response)) => {
                finished = task.state() != FetchState::WaitRangeGetRes;
                self.report(Outcome::Response { session, response });
            }
            Ok(None) => {}
            Err(FetchError::TaskAlreadyClosed(_)) if task.is_closed() => {
                tracing::debug!(session, "completion for closed session dropped");
            }
            Err(error) => {
                task.abort(&error);
                self.report(Outcome::Failed { session, error });
            }
        }
        if finished || task.is_closed() || task.is_complete() {
            self.registry.unregister(session);
        }
    }

    fn report(&self, outcome: Outcome) {
        if self.outcomes.send(outcome).is_err() {
            tracing::debug!("outcome receiver dropped");
        }
    }
}
