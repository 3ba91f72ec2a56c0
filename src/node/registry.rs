//! Session task registry
//!
//! Every download session the node spawns is owned here so shutdown can
//! cancel and reap them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task owned by the registry. Returns false once the registry
    /// has been shut down.
    pub async fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        if self.is_closed() {
            warn!("Task registry is shut down; not spawning");
            return false;
        }

        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                if e.is_panic() {
                    warn!("Session task panicked: {}", e);
                }
            }
        }

        tasks.spawn(task);
        debug!("Session tasks running: {}", tasks.len());
        true
    }

    /// Tasks not yet reaped, finished or not
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse new tasks, abort the running ones and wait for them to exit
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        if !tasks.is_empty() {
            debug!("Aborting {} session tasks", tasks.len());
        }
        tasks.shutdown().await;
    }
}
