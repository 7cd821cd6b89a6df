//! Per-instance periodic job actor
//!
//! Each locally scheduled instance runs as its own actor: an interval
//! ticker plus a command channel that doubles as the job's cancellation
//! token. Jobs execute concurrently with each other and with the liveness
//! sweep; a single failed execution permanently removes the schedule.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Executor.execute → record log → [failure? unschedule self]
//!     ↑
//!     └─── Commands (Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::interval;
use tracing::{debug, instrument, warn};

use crate::MeasureInstance;
use crate::catalog::MeasureImplementation;
use crate::executor::Executor;
use crate::logging::ExecutionLogSink;

use super::SchedulerState;

/// Commands that can be sent to a running measure job
#[derive(Debug)]
pub(crate) enum JobCommand {
    /// Cancel the schedule
    ///
    /// The actor finishes any in-flight cycle and then exits; there is no
    /// mid-cycle cancellation.
    Shutdown,
}

/// Handle for cancelling a scheduled measure job
pub(crate) struct JobHandle {
    sender: mpsc::Sender<JobCommand>,
}

impl JobHandle {
    /// Cancel the job. Best effort: the job may already have unscheduled
    /// itself after a failed execution.
    pub(crate) async fn shutdown(&self) {
        let _ = self.sender.send(JobCommand::Shutdown).await;
    }

    fn same_job(&self, tag: &mpsc::Sender<JobCommand>) -> bool {
        self.sender.same_channel(tag)
    }
}

/// Actor executing one measure instance on a fixed period
pub(crate) struct MeasureJob {
    instance: MeasureInstance,

    /// Implementation resolved once at schedule time, reused every tick.
    implementation: MeasureImplementation,

    period: Duration,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<JobCommand>,

    /// Sender half of our own command channel. Used as an identity tag when
    /// self-unscheduling, so a replacement job that took over the map entry
    /// is never removed by its predecessor.
    self_tag: mpsc::Sender<JobCommand>,

    executor: Arc<Executor>,
    logs: Arc<dyn ExecutionLogSink>,

    /// Shared job bookkeeping, for self-removal on failure.
    state: Arc<Mutex<SchedulerState>>,
}

impl MeasureJob {
    /// Spawn the job as a tokio task and return its cancellation handle.
    pub(crate) fn spawn(
        instance: MeasureInstance,
        implementation: MeasureImplementation,
        period: Duration,
        executor: Arc<Executor>,
        logs: Arc<dyn ExecutionLogSink>,
        state: Arc<Mutex<SchedulerState>>,
    ) -> JobHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let job = Self {
            instance,
            implementation,
            period,
            command_rx: cmd_rx,
            self_tag: cmd_tx.clone(),
            executor,
            logs,
            state,
        };

        tokio::spawn(job.run());

        JobHandle { sender: cmd_tx }
    }

    #[instrument(skip(self), fields(instance = %self.instance.instance_name))]
    async fn run(mut self) {
        debug!("starting measure job");

        let mut ticker = interval(self.period);

        loop {
            tokio::select! {
                // Timer tick - run one execution cycle
                _ = ticker.tick() => {
                    let log = self
                        .executor
                        .execute(&self.instance, &mut self.implementation)
                        .await;
                    let success = log.success;
                    self.logs.record(log).await;

                    if !success {
                        // One failure is fatal to a local schedule; the
                        // owner has to reschedule explicitly.
                        warn!("execution failed, removing schedule");
                        self.unschedule_self().await;
                        break;
                    }
                }

                // Handle commands
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        JobCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                // Command channel closed - exit
                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("measure job stopped");
    }

    async fn unschedule_self(&self) {
        let mut state = self.state.lock().await;
        let ours = state
            .local
            .get(&self.instance.id)
            .is_some_and(|handle| handle.same_job(&self.self_tag));
        if ours {
            state.local.remove(&self.instance.id);
        }
    }
}
