//! Background worker with cooperative cancellation
//!
//! A worker is one spawned task plus a broadcast shutdown channel. The task
//! is expected to check the receiver between cycles; `stop` signals it and
//! waits for the task to return.

use std::future::Future;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

pub struct WorkerHandle<T> {
    name: String,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<T>,
}

impl<T: Send + 'static> WorkerHandle<T> {
    /// Spawn `body` on the runtime, handing it the shutdown receiver
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shutdown, receiver) = broadcast::channel(1);
        let name = name.into();
        debug!(worker = %name, "Spawning worker");

        Self {
            name,
            shutdown,
            task: tokio::spawn(body(receiver)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the current cycle to finish
    pub async fn stop(self) -> Result<T, JoinError> {
        debug!(worker = %self.name, "Stopping worker");
        // the task may already be gone, in which case nobody is listening
        let _ = self.shutdown.send(());
        self.task.await
    }

    /// Wait for the worker to return on its own
    pub async fn join(self) -> Result<T, JoinError> {
        self.task.await
    }
}
