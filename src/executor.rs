//! Task queues for background notifications.
//!
//! The connection never runs application callbacks or deferred writes on its
//! reader task. Instead it hands them to an [`Executor`], which owns a
//! [`TaskTracker`] and a serial queue for control work (acknowledgements,
//! pings, resets). Independent work such as an incoming-stream callback is
//! spawned directly; work that must stay ordered is submitted to a
//! [`SerialQueue`].
//!
//! Every job runs under `catch_unwind` so a panicking callback is logged and
//! discarded without taking the queue down.

use std::{any::Any, future::Future, panic::AssertUnwindSafe};

use futures::{FutureExt, future::BoxFuture};
use log::error;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&'static str>().copied())
        .unwrap_or("non-string panic payload")
}

async fn run_isolated(name: &str, job: impl Future<Output = ()>) {
    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
        crate::metrics::inc_errors();
        let message = panic_message(panic.as_ref());
        // Emit via both `log` and `tracing` for tests that capture either.
        error!("background task panicked: queue={name}, panic={message}");
        tracing::error!(queue = name, panic = message, "background task panicked");
    }
}

/// A queue whose jobs run one at a time, in submission order.
///
/// Cloning yields another handle to the same queue. The worker exits once
/// every handle is dropped and the backlog is drained.
#[derive(Clone, Debug)]
pub struct SerialQueue {
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl SerialQueue {
    /// Start a queue whose worker is tracked by `tracker`.
    #[must_use]
    pub fn new(name: impl Into<String>, tracker: &TaskTracker) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        let name = name.into();
        tracker.spawn(async move {
            while let Some(job) = rx.recv().await {
                run_isolated(&name, job).await;
            }
        });
        Self { tx }
    }

    /// Enqueue `job`. Returns `false` if the worker has already stopped.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.send(job.boxed()).is_ok()
    }
}

/// Spawns and queues background work for one connection.
#[derive(Clone, Debug)]
pub struct Executor {
    tracker: TaskTracker,
    control: SerialQueue,
}

impl Executor {
    /// Create an executor tracking its tasks with `tracker`.
    #[must_use]
    pub fn new(tracker: TaskTracker) -> Self {
        let control = SerialQueue::new("control", &tracker);
        Self { tracker, control }
    }

    /// Queue for ordered control work such as acknowledgements.
    #[must_use]
    pub fn control(&self) -> &SerialQueue { &self.control }

    /// Start a fresh serial queue tracked by this executor.
    #[must_use]
    pub fn serial_queue(&self, name: impl Into<String>) -> SerialQueue {
        SerialQueue::new(name, &self.tracker)
    }

    /// Run `job` concurrently with everything else.
    pub fn spawn<F>(&self, name: &'static str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(run_isolated(name, job));
    }

    /// Tracker owning every task this executor started.
    #[must_use]
    pub fn tracker(&self) -> &TaskTracker { &self.tracker }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use tokio::{sync::oneshot, time::timeout};
    use tracing_test::traced_test;

    use super::*;

    #[tokio::test]
    async fn serial_queue_preserves_order() {
        let tracker = TaskTracker::new();
        let queue = SerialQueue::new("test", &tracker);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            assert!(queue.submit(async move {
                tokio::task::yield_now().await;
                seen.lock().expect("lock").push(i);
            }));
        }
        drop(queue);
        tracker.close();
        timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("queue should drain");
        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 2, 3, 4]);
    }

    #[traced_test]
    #[tokio::test]
    async fn panicking_job_does_not_stop_the_queue() {
        let tracker = TaskTracker::new();
        let queue = SerialQueue::new("test", &tracker);
        let (tx, rx) = oneshot::channel();
        queue.submit(async {
            panic!("boom");
        });
        queue.submit(async move {
            let _ = tx.send(());
        });
        timeout(Duration::from_secs(1), rx)
            .await
            .expect("second job should run")
            .expect("sender kept");
        assert!(logs_contain("background task panicked"));
        assert!(logs_contain("panic=\"boom\"") || logs_contain("panic=boom"));
    }

    #[test]
    fn panic_payloads_render_as_text() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(5_u32);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
