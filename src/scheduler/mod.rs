//! Measure scheduling
//!
//! The scheduler owns the mapping from instance id to active job: either a
//! local periodic job actor or membership in a remote agent's assignment
//! list. It is the sole entry point the REST/agent layer uses to schedule,
//! unschedule and query instances.
//!
//! Per instance id the lifecycle is `unscheduled → scheduled-local →
//! unscheduled` or `unscheduled → scheduled-remote → unscheduled`. Jobs are
//! destroyed by explicit removal, by the job's own failure handling, or by
//! the agent liveness sweep's eviction cascade. All three paths serialize
//! on the same state mutex, so none of them can lose another's update.

pub mod job;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::agents::AgentRegistry;
use crate::catalog::MeasureCatalog;
use crate::executor::Executor;
use crate::logging::ExecutionLogSink;
use crate::store::{InstanceDirectory, PropertyStore};
use crate::{InstanceId, MeasureInstance, RemoteJobSpec};

use job::{JobHandle, MeasureJob};

/// Job bookkeeping: local job handles plus per-agent assignment lists.
///
/// An instance id appears in at most one of the two structures at any time.
#[derive(Default)]
pub(crate) struct SchedulerState {
    pub(crate) local: HashMap<InstanceId, JobHandle>,
    pub(crate) remote: HashMap<String, Vec<InstanceId>>,
}

/// Parse a scheduling expression as a strictly positive period in
/// milliseconds. Absent, empty, zero or non-numeric expressions reject.
fn parse_period(expression: Option<&str>) -> Option<Duration> {
    let expression = expression?;
    if expression.is_empty() || !expression.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis: u64 = expression.parse().ok()?;
    (millis > 0).then(|| Duration::from_millis(millis))
}

/// The scheduling engine's public surface.
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
    executor: Arc<Executor>,
    catalog: Arc<dyn MeasureCatalog>,
    instances: Arc<dyn InstanceDirectory>,
    properties: Arc<dyn PropertyStore>,
    agents: Arc<AgentRegistry>,
    logs: Arc<dyn ExecutionLogSink>,
}

impl Scheduler {
    pub fn new(
        executor: Arc<Executor>,
        catalog: Arc<dyn MeasureCatalog>,
        instances: Arc<dyn InstanceDirectory>,
        properties: Arc<dyn PropertyStore>,
        agents: Arc<AgentRegistry>,
        logs: Arc<dyn ExecutionLogSink>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::default())),
            executor,
            catalog,
            instances,
            properties,
            agents,
            logs,
        }
    }

    /// Schedule an instance.
    ///
    /// Returns false, with no side effects, when the instance is not
    /// flagged for scheduling, its scheduling expression is unusable, its
    /// measure cannot be resolved, or its remote agent is not alive.
    #[instrument(skip(self, instance), fields(instance = %instance.instance_name))]
    pub async fn schedule_measure(&self, instance: &MeasureInstance) -> bool {
        if !instance.scheduled {
            return false;
        }
        let Some(period) = parse_period(instance.scheduling_expression.as_deref()) else {
            debug!("rejecting schedule: no usable scheduling expression");
            return false;
        };

        if instance.remote {
            self.schedule_remote(instance).await
        } else {
            self.schedule_local(instance, period).await
        }
    }

    async fn schedule_remote(&self, instance: &MeasureInstance) -> bool {
        let Some(label) = instance.remote_label.as_deref() else {
            warn!("rejecting schedule: remote instance without a remote label");
            return false;
        };
        if !self.agents.is_alive(label).await {
            debug!(agent = %label, "rejecting schedule: agent is not alive");
            return false;
        }

        let mut state = self.state.lock().await;
        let assignments = state.remote.entry(label.to_string()).or_default();
        if !assignments.contains(&instance.id) {
            assignments.push(instance.id);
        }

        debug!(agent = %label, "assigned instance to agent");
        true
    }

    async fn schedule_local(&self, instance: &MeasureInstance, period: Duration) -> bool {
        // Resolved once; every tick reuses the same implementation.
        let implementation = match self
            .catalog
            .resolve(instance.application_type.as_deref(), &instance.measure_name)
            .await
        {
            Ok(implementation) => implementation,
            Err(e) => {
                warn!(error = %e, "rejecting schedule: measure not resolvable");
                return false;
            }
        };

        // Insert under the lock: the freshly spawned job cannot touch the
        // bookkeeping before its handle is registered.
        let mut state = self.state.lock().await;
        let handle = MeasureJob::spawn(
            instance.clone(),
            implementation,
            period,
            self.executor.clone(),
            self.logs.clone(),
            self.state.clone(),
        );
        if let Some(previous) = state.local.insert(instance.id, handle) {
            // Rescheduling a live instance replaces its job.
            previous.shutdown().await;
        }

        debug!(period_ms = period.as_millis() as u64, "scheduled local job");
        true
    }

    /// Remove whatever schedule the instance has. Idempotent; always true,
    /// including for ids that were never scheduled.
    pub async fn remove_measure(&self, id: InstanceId) -> bool {
        let mut state = self.state.lock().await;

        if let Some(handle) = state.local.remove(&id) {
            handle.shutdown().await;
            debug!(instance_id = id, "cancelled local job");
        } else {
            for assignments in state.remote.values_mut() {
                assignments.retain(|assigned| *assigned != id);
            }
        }

        true
    }

    /// Whether the instance currently has an active schedule.
    ///
    /// A remote assignment whose agent has died reports false without being
    /// purged; purging happens only through the liveness sweep.
    pub async fn is_scheduled(&self, id: InstanceId) -> bool {
        let assigned_agent = {
            let state = self.state.lock().await;
            if state.local.contains_key(&id) {
                return true;
            }
            state
                .remote
                .iter()
                .find(|(_, assignments)| assignments.contains(&id))
                .map(|(label, _)| label.clone())
        };

        match assigned_agent {
            Some(label) => self.agents.is_alive(&label).await,
            None => false,
        }
    }

    /// The work currently assigned to an agent, rehydrated with each
    /// instance's full unmasked property set.
    pub async fn assignments(&self, agent_label: &str) -> Vec<RemoteJobSpec> {
        let ids = {
            let state = self.state.lock().await;
            state.remote.get(agent_label).cloned().unwrap_or_default()
        };

        let mut specs = Vec::with_capacity(ids.len());
        for id in ids {
            let instance = match self.instances.find(id).await {
                Ok(Some(instance)) => instance,
                Ok(None) => {
                    warn!(instance_id = id, "assigned instance no longer exists");
                    continue;
                }
                Err(e) => {
                    warn!(instance_id = id, error = %e, "failed to rehydrate assignment");
                    continue;
                }
            };

            let properties = match self.properties.by_instance(id).await {
                Ok(properties) => properties,
                Err(e) => {
                    warn!(instance_id = id, error = %e, "failed to load assignment properties");
                    continue;
                }
            };

            specs.push(RemoteJobSpec {
                instance_id: instance.id,
                instance_name: instance.instance_name,
                measure_name: instance.measure_name,
                measure_version: instance.measure_version,
                scheduling_expression: instance.scheduling_expression,
                properties: properties
                    .into_iter()
                    .map(|property| (property.name, property.value))
                    .collect(),
            });
        }

        specs
    }
}
