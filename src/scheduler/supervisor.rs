//! Ownership of long-lived background workers.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

/// Named background tasks that are stopped together at shutdown.
#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a worker.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "Spawning worker");
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Spawns a worker that calls `job` every `every`, first after one period.
    pub fn spawn_periodic<F, Fut>(&mut self, name: impl Into<String>, every: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let every = every.max(Duration::from_millis(1));
        self.spawn(name, async move {
            let mut timer = interval_at(Instant::now() + every, every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                job().await;
            }
        });
    }

    /// Names of the workers still owned.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stops every worker and waits for it to go away.
    pub async fn shutdown(self) {
        for (_, handle) in &self.tasks {
            handle.abort();
        }

        for (name, handle) in self.tasks {
            match handle.await {
                Ok(()) => debug!(task = %name, "Worker finished"),
                Err(e) if e.is_cancelled() => debug!(task = %name, "Worker stopped"),
                Err(e) => error!(task = %name, error = %e, "Worker panicked"),
            }
        }

        info!("All workers stopped");
    }
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("tasks", &self.names())
            .finish()
    }
}
