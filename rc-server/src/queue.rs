//! Bounded command queue and fixed worker pool.
//!
//! Exactly [`MAX_CONCURRENT_COMMANDS`] workers run for the lifetime of the
//! server; the queue holds at most [`COMMAND_QUEUE_MAX_BACKLOG`] entries
//! awaiting a worker.

use std::time::Duration;

use rc_core::{Message, Response};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub const COMMAND_QUEUE_MAX_BACKLOG: usize = 5;
pub const MAX_CONCURRENT_COMMANDS: usize = 5;

/// How long a connection handler waits for a free queue slot before giving
/// up with `QueueFull`.
pub const ENQUEUE_DEADLINE: Duration = Duration::from_millis(1);

/// A unit of work handed from the connection handler to a worker.
pub struct QueueEntry {
    pub message: Message,
    pub reply: oneshot::Sender<Response>,
}

/// Handle shared by every connection handler to submit work.
#[derive(Clone)]
pub struct CommandQueue {
    sender: mpsc::Sender<QueueEntry>,
}

impl CommandQueue {
    /// Try to enqueue `message`, waiting at most [`ENQUEUE_DEADLINE`] for a
    /// free slot. Returns the response once a worker has run the command,
    /// or `None` if the deadline elapsed (the caller should reply
    /// `QueueFull`).
    pub async fn submit(&self, message: Message) -> Option<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let entry = QueueEntry {
            message,
            reply: reply_tx,
        };

        match tokio::time::timeout(ENQUEUE_DEADLINE, self.sender.send(entry)).await {
            Ok(Ok(())) => reply_rx.await.ok(),
            Ok(Err(_)) => None,
            Err(_elapsed) => None,
        }
    }
}

/// Owns the queue and the worker pool's lifetime.
pub struct WorkerPool {
    queue: CommandQueue,
    shutdown: CancellationToken,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn exactly [`MAX_CONCURRENT_COMMANDS`] workers feeding off a
    /// freshly constructed bounded queue.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_MAX_BACKLOG);
        let shutdown = CancellationToken::new();
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(MAX_CONCURRENT_COMMANDS);
        for worker_id in 0..MAX_CONCURRENT_COMMANDS {
            let rx = rx.clone();
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, shutdown).await;
            }));
        }

        Self {
            queue: CommandQueue { sender: tx },
            shutdown,
            workers,
        }
    }

    pub fn queue(&self) -> CommandQueue {
        self.queue.clone()
    }

    /// Signal every worker to stop and wait for them all to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<QueueEntry>>>,
    shutdown: CancellationToken,
) {
    loop {
        let entry = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!(worker_id, "shutting down, breaking command loop");
                    return;
                }
                entry = rx.recv() => entry,
            }
        };

        let Some(entry) = entry else {
            return;
        };

        tracing::debug!(worker_id, id = entry.message.id, "running command");
        let response = crate::executor::run(&entry.message).await;
        let _ = entry.reply.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::MessageOptions;

    #[tokio::test]
    async fn runs_a_command_end_to_end() {
        let pool = WorkerPool::start();
        let queue = pool.queue();

        let msg = Message::new(1, "echo ok", MessageOptions::default());
        let resp = queue.submit(msg).await.unwrap();
        assert_eq!(resp.stdout, "ok\n");
        assert_eq!(resp.id, "1");

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrent_commands() {
        let pool = WorkerPool::start();
        let queue = pool.queue();

        let mut handles = Vec::new();
        for i in 0..MAX_CONCURRENT_COMMANDS {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let msg = Message::new(
                    i as u32,
                    "sleep 0.2",
                    MessageOptions {
                        timeout: 0,
                        cwd: String::new(),
                        env: Default::default(),
                    },
                );
                queue.submit(msg).await
            }));
        }

        for h in handles {
            assert!(h.await.unwrap().is_some());
        }

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_workers_without_dropping_in_flight() {
        let pool = WorkerPool::start();
        let queue = pool.queue();
        let msg = Message::new(9, "echo done", MessageOptions::default());
        let resp = queue.submit(msg).await.unwrap();
        assert_eq!(resp.exit_code, 0);
        pool.shutdown().await;
    }
}
