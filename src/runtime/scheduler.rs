//! Periodic Task Scheduler
//!
//! Owns the background loops (health check, event dispatch, metrics
//! pruning, memory sampling) as named, cancellable tasks. Each loop ticks
//! its own interval, checks the shutdown flag at the top of every cycle,
//! and finishes its in-flight work before exiting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::runtime::shutdown::ShutdownFlag;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct NamedTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Scheduler of cancellable periodic tasks
pub struct Scheduler {
    flag: Arc<ShutdownFlag>,
    tasks: Mutex<Vec<NamedTask>>,
}

impl Scheduler {
    /// Create a scheduler tied to a shutdown flag
    pub fn new(flag: Arc<ShutdownFlag>) -> Self {
        Self {
            flag,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a named periodic task. The closure runs once per period; the
    /// loop exits on shutdown, letting an in-flight cycle complete first.
    pub async fn spawn_periodic<F, Fut>(&self, name: &str, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let flag = self.flag.clone();
        let task_name = name.to_string();
        let loop_name = task_name.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut shutdown_rx = flag.subscribe();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if flag.is_requested() {
                            break;
                        }
                        task().await;
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }
            debug!("Periodic task '{}' stopped", loop_name);
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(NamedTask {
            name: task_name,
            handle,
        });
        debug!("Spawned periodic task '{}' every {:?}", name, period);
    }

    /// Number of owned tasks
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Trip the shutdown flag and join every task with a bounded wait
    pub async fn shutdown(&self) {
        self.flag.request();

        let tasks: Vec<NamedTask> = {
            let mut guard = self.tasks.lock().await;
            guard.drain(..).collect()
        };

        for task in tasks {
            match tokio::time::timeout(JOIN_TIMEOUT, task.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Task '{}' ended with join error: {}", task.name, e),
                Err(_) => warn!("Task '{}' did not stop within {:?}", task.name, JOIN_TIMEOUT),
            }
        }
        info!("Scheduler stopped");
    }
}
