//! API shared state

use std::sync::Arc;

use crate::agents::AgentRegistry;
use crate::executor::Executor;
use crate::logging::MemoryLogSink;
use crate::scheduler::Scheduler;
use crate::store::InstanceDirectory;

/// Shared state handed to every API handler.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub executor: Arc<Executor>,
    pub registry: Arc<AgentRegistry>,
    pub instances: Arc<dyn InstanceDirectory>,
    pub logs: Arc<MemoryLogSink>,
}
