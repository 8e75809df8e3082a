//! Bounded worker pool.
//!
//! A bounded queue feeds one dispatcher task, which runs at most `workers`
//! jobs at a time on a `JoinSet`. `submit` never waits: a full queue is
//! reported back to the caller, who decides what to do with the work.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error};

use crate::config::PoolConfig;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("{pool} pool is saturated")]
    Saturated { pool: String },

    #[error("{pool} pool is shut down")]
    Closed { pool: String },
}

/// Handle to a running pool. Clones share the same queue and workers.
#[derive(Clone)]
pub struct WorkerPool {
    name: Arc<str>,
    sender: Arc<Mutex<Option<mpsc::Sender<Job>>>>,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WorkerPool {
    /// Start the dispatcher. Must be called from inside a tokio runtime.
    pub fn start(name: &str, config: &PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let name: Arc<str> = Arc::from(name);
        let dispatcher = tokio::spawn(run_dispatch_loop(
            Arc::clone(&name),
            rx,
            config.workers.max(1),
        ));

        Self {
            name,
            sender: Arc::new(Mutex::new(Some(tx))),
            dispatcher: Arc::new(Mutex::new(Some(dispatcher))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job without waiting for room.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .map_err(|_| self.closed())?
            .clone()
            .ok_or_else(|| self.closed())?;

        sender.try_send(Box::pin(job)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::Saturated {
                pool: self.name.to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => self.closed(),
        })
    }

    /// Stop accepting jobs and wait until every queued and running job finished.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let dispatcher = self
            .dispatcher
            .lock()
            .ok()
            .and_then(|mut handle| handle.take());
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                error!(pool = %self.name, "Dispatcher task ended abnormally: {e}");
            }
        }
    }

    fn closed(&self) -> PoolError {
        PoolError::Closed {
            pool: self.name.to_string(),
        }
    }
}

async fn run_dispatch_loop(name: Arc<str>, mut rx: mpsc::Receiver<Job>, workers: usize) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        running.spawn(async move {
            let _permit = permit;
            job.await;
        });

        while let Some(result) = running.try_join_next() {
            log_join_result(&name, result);
        }
    }

    while let Some(result) = running.join_next().await {
        log_join_result(&name, result);
    }
    debug!(pool = %name, "Worker pool drained");
}

fn log_join_result(pool: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(pool, "Pool worker crashed: {e}");
    }
}
