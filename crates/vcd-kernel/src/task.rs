//! Waiting on remote tasks and on eventually-consistent indexes.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};
use vcd_sdk::{Entity, GC_PENDING, OpContext, Task, TaskStatus, Urn};

use crate::error::{KernelError, KernelResult};
use crate::session::Session;

/// Destination for human-readable progress lines.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, line: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn emit(&self, line: &str) {
        info!(target: "vcd::progress", "{line}");
    }
}

/// Keeps every line; used by tests.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingProgressSink {
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for RecordingProgressSink {
    fn emit(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}

pub struct TaskWaiter<'a> {
    session: &'a Session,
}

impl<'a> TaskWaiter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub async fn wait(&self, task: Task) -> KernelResult<Task> {
        self.poll(task, None).await
    }

    /// Like [`Self::wait`], emitting one progress line per poll.
    pub async fn wait_with_progress(&self, task: Task, label: &str) -> KernelResult<Task> {
        self.poll(task, Some(label)).await
    }

    async fn poll(&self, mut task: Task, label: Option<&str>) -> KernelResult<Task> {
        let config = &self.session.config;
        let started = Instant::now();
        loop {
            match task.status {
                TaskStatus::Success => {
                    debug!(task = %task.id, operation = %task.operation, "task finished");
                    return Ok(task);
                }
                TaskStatus::Error | TaskStatus::Aborted => {
                    return Err(KernelError::TaskAborted {
                        task_id: task.id.to_string(),
                        status: task.status.as_str().to_string(),
                        message: task.error.unwrap_or_else(|| task.operation.clone()),
                    });
                }
                _ => {}
            }
            if started.elapsed() >= config.task_budget {
                return Err(KernelError::Timeout {
                    what: format!("task {} ({})", task.id, task.operation),
                    budget: config.task_budget,
                });
            }
            self.session.ctx.sleep(config.poll_interval).await?;
            task = self.session.client.get_task(&self.session.ctx, &task.id).await?;
            if let Some(label) = label {
                let line = match task.progress {
                    Some(pct) => format!("{label}: {pct}%"),
                    None => format!("{label}: {}", task.status.as_str()),
                };
                self.session.progress.emit(&line);
            }
        }
    }

    /// Poll the catalog index until `id` shows up.
    pub async fn wait_synchronized(&self, id: &Urn) -> KernelResult<Entity> {
        let config = &self.session.config;
        let started = Instant::now();
        loop {
            match self
                .session
                .client
                .query_synchronized_by_id(&self.session.ctx, id)
                .await
            {
                Ok(entity) => return Ok(entity),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
            if started.elapsed() >= config.sync_budget {
                return Err(KernelError::Timeout {
                    what: format!("{id} to become available in the catalog"),
                    budget: config.sync_budget,
                });
            }
            self.session.ctx.sleep(config.sync_interval).await?;
        }
    }

    /// Block until the guest customization status leaves `GC_PENDING`.
    pub async fn wait_guest_customization(&self, vm: &Urn, budget: Duration) -> KernelResult<String> {
        let started = Instant::now();
        loop {
            let status = self
                .session
                .client
                .guest_customization_status(&self.session.ctx, vm)
                .await?;
            if status != GC_PENDING {
                return Ok(status);
            }
            if started.elapsed() >= budget {
                return Err(KernelError::Timeout {
                    what: format!("guest customization of {vm}"),
                    budget,
                });
            }
            self.session.ctx.sleep(self.session.config.poll_interval).await?;
        }
    }
}

/// Call `fetch` until it succeeds, refreshing the state between attempts.
///
/// Delays double from 50 ms up to one second; after `max_delay` has elapsed
/// the last fetch error is returned.
pub async fn run_with_retry<S, T, R, RF, F>(
    ctx: &OpContext,
    initial: S,
    mut refresh: R,
    fetch: F,
    max_delay: Duration,
) -> KernelResult<T>
where
    R: FnMut(S) -> RF,
    RF: Future<Output = KernelResult<S>>,
    F: Fn(&S) -> KernelResult<T>,
{
    let started = Instant::now();
    let mut delay = Duration::from_millis(50);
    let mut state = initial;
    loop {
        let err = match fetch(&state) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if started.elapsed() >= max_delay {
            return Err(err);
        }
        debug!(error = %err, ?delay, "retrying after refresh");
        ctx.sleep(delay).await?;
        delay = (delay * 2).min(Duration::from_secs(1));
        state = refresh(state).await?;
    }
}
