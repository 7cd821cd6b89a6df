//! Agent registry and liveness sweep
//!
//! Remote agents register with the set of measures they can execute and
//! then heartbeat. `is_alive` only checks registration; the staleness
//! threshold is enforced exclusively by the periodic sweep, so a caller can
//! observe "alive" for an agent that is already past the threshold but not
//! yet swept.
//!
//! When the sweep evicts an agent it unschedules every instance in the
//! population whose measure name matches one the agent provided: a reverse
//! lookup across all instances, not just the agent's own assignment list.
//! This mirrors the platform's observed behavior; see DESIGN.md.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, warn};

use crate::scheduler::Scheduler;
use crate::store::InstanceDirectory;

/// One registered remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub label: String,
    pub last_life_sign: DateTime<Utc>,
    /// Measure definition names this agent can execute.
    pub provided_measures: BTreeSet<String>,
}

/// Tracks remote agent liveness.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or refresh) an agent with the measures it provides.
    /// Registration counts as a life sign.
    pub async fn register_agent(&self, label: &str, provided_measures: BTreeSet<String>) {
        let mut agents = self.agents.write().await;
        debug!(agent = %label, measures = provided_measures.len(), "registering agent");
        agents.insert(
            label.to_string(),
            AgentRecord {
                label: label.to_string(),
                last_life_sign: Utc::now(),
                provided_measures,
            },
        );
    }

    /// Refresh an agent's life sign. Returns false for unknown agents: a
    /// heartbeat racing its own eviction is dropped, not resurrected; the
    /// agent comes back by re-registering.
    pub async fn register_life_sign(&self, label: &str) -> bool {
        let mut agents = self.agents.write().await;
        match agents.get_mut(label) {
            Some(agent) => {
                agent.last_life_sign = Utc::now();
                true
            }
            None => {
                warn!(agent = %label, "life sign from unregistered agent");
                false
            }
        }
    }

    /// True iff the agent is currently registered. Staleness is not
    /// checked here; only the sweep evicts.
    pub async fn is_alive(&self, label: &str) -> bool {
        self.agents.read().await.contains_key(label)
    }

    pub async fn unregister(&self, label: &str) -> Option<AgentRecord> {
        self.agents.write().await.remove(label)
    }

    /// Snapshot of all registered agents, sorted by label.
    pub async fn agents(&self) -> Vec<AgentRecord> {
        let agents = self.agents.read().await;
        let mut snapshot: Vec<_> = agents.values().cloned().collect();
        snapshot.sort_by(|a, b| a.label.cmp(&b.label));
        snapshot
    }

    /// Agents whose last life sign is older than the threshold.
    async fn stale(&self, threshold: Duration) -> Vec<AgentRecord> {
        let now = Utc::now();
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|agent| {
                (now - agent.last_life_sign).num_milliseconds() > threshold.as_millis() as i64
            })
            .cloned()
            .collect()
    }
}

/// Commands accepted by the liveness sweeper
#[derive(Debug)]
pub enum SweeperCommand {
    /// Run a sweep immediately, reporting how many agents were evicted.
    SweepNow { respond_to: oneshot::Sender<usize> },

    /// Gracefully shut down the sweeper
    Shutdown,
}

/// Handle for controlling the liveness sweeper
#[derive(Clone)]
pub struct SweeperHandle {
    sender: mpsc::Sender<SweeperCommand>,
}

impl SweeperHandle {
    /// Trigger an immediate sweep, bypassing the interval timer.
    pub async fn sweep_now(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SweeperCommand::SweepNow { respond_to: tx })
            .await
            .map_err(|_| anyhow::anyhow!("sweeper is not running"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("sweeper dropped the response"))
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(SweeperCommand::Shutdown).await;
    }
}

/// Background task evicting agents that stopped heartbeating.
pub struct LivenessSweeper {
    registry: Arc<AgentRegistry>,
    scheduler: Arc<Scheduler>,
    instances: Arc<dyn InstanceDirectory>,
    period: Duration,
    threshold: Duration,
    command_rx: mpsc::Receiver<SweeperCommand>,
}

impl LivenessSweeper {
    /// Spawn the sweeper with the given sweep period; the staleness
    /// threshold equals the period.
    pub fn spawn(
        registry: Arc<AgentRegistry>,
        scheduler: Arc<Scheduler>,
        instances: Arc<dyn InstanceDirectory>,
        period: Duration,
    ) -> SweeperHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let sweeper = Self {
            registry,
            scheduler,
            instances,
            period,
            threshold: period,
            command_rx: cmd_rx,
        };

        tokio::spawn(sweeper.run());

        SweeperHandle { sender: cmd_tx }
    }

    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!(period_ms = self.period.as_millis() as u64, "starting liveness sweeper");

        let mut ticker = interval(self.period);
        // The immediate first tick would evict nothing; skip it so a freshly
        // started engine sweeps one full period after boot.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SweeperCommand::SweepNow { respond_to } => {
                            let evicted = self.sweep().await;
                            let _ = respond_to.send(evicted);
                        }

                        SweeperCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("liveness sweeper stopped");
    }

    /// Evict every stale agent and cascade the unscheduling. Returns the
    /// number of agents evicted.
    async fn sweep(&self) -> usize {
        let stale = self.registry.stale(self.threshold).await;

        for agent in &stale {
            // Unregister first: from this point is_alive reports false.
            self.registry.unregister(&agent.label).await;
            warn!(agent = %agent.label, "agent went silent, evicting");

            for measure_name in &agent.provided_measures {
                let population = match self.instances.by_measure_name(measure_name).await {
                    Ok(population) => population,
                    Err(e) => {
                        warn!(measure = %measure_name, error = %e, "eviction cascade lookup failed");
                        continue;
                    }
                };

                for instance in population {
                    debug!(
                        agent = %agent.label,
                        instance = %instance.instance_name,
                        "unscheduling after agent eviction"
                    );
                    self.scheduler.remove_measure(instance.id).await;
                }
            }
        }

        stale.len()
    }
}
