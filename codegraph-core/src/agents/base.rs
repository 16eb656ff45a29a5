//! Shared agent runtime (spec §4.1): every worker role (parser, indexer,
//! query, semantic, dev) is an [`AgentWorker`] wrapped in the generic
//! [`Agent`], which owns the id, status, bounded queue accounting,
//! capability clamping, metrics, and the `resources:adjusted` subscription.
//! Grounded on the `async_trait`-object-behind-`Arc` shape used throughout
//! the teacher (`Embedder`, `VectorStore`, `ToolSource`).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::bus::KnowledgeBus;
use crate::error::{BusyReason, EngineError};
use crate::model::{GraphId, Task};

/// Lifecycle state of an [`Agent`] (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Shutdown,
}

/// Resource and scheduling envelope, clamped by `resources:adjusted`
/// (spec §4.1, §8: "`maxConcurrency` clamped to `[1, defaultMaxConcurrency*2]`").
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AgentCapabilities {
    pub max_concurrency: usize,
    pub memory_limit_mb: u64,
    pub priority: u8,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_duration_ms: u64,
    pub memory_mb: f64,
}

impl AgentMetrics {
    pub fn average_duration_ms(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / total as f64
        }
    }
}

/// The subclass contract every worker role implements; all queueing,
/// status transitions, and metrics live in [`Agent`] around this.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    fn agent_type(&self) -> &'static str;

    /// Subclass-specific acceptance predicate beyond the generic idle/queue/
    /// memory checks (spec §4.1: "subclass-specific predicate fails").
    fn accepts(&self, _task: &Task) -> bool {
        true
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError>;
}

/// Process-memory snapshot via `/proc/self/statm`, in megabytes. Returns 0
/// on platforms without procfs rather than failing the sampler.
fn sample_process_memory_mb() -> f64 {
    let Ok(contents) = std::fs::read_to_string("/proc/self/statm") else {
        return 0.0;
    };
    let resident_pages: u64 = contents
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let page_size_kb = 4.0;
    (resident_pages as f64 * page_size_kb) / 1024.0
}

/// Generic agent runtime wrapping an [`AgentWorker`] with the contract
/// described in spec §4.1.
pub struct Agent<W: AgentWorker> {
    id: GraphId,
    worker: W,
    status: RwLock<AgentStatus>,
    default_capabilities: AgentCapabilities,
    max_concurrency: AtomicUsize,
    queue_len: AtomicUsize,
    metrics: RwLock<AgentMetrics>,
    last_activity_millis: AtomicU64,
    started_at: Instant,
    bus: Arc<KnowledgeBus>,
}

impl<W: AgentWorker + 'static> Agent<W> {
    pub fn new(worker: W, capabilities: AgentCapabilities, bus: Arc<KnowledgeBus>) -> Arc<Self> {
        let agent = Arc::new(Self {
            id: crate::model::new_id(),
            worker,
            status: RwLock::new(AgentStatus::Idle),
            default_capabilities: capabilities,
            max_concurrency: AtomicUsize::new(capabilities.max_concurrency.max(1)),
            queue_len: AtomicUsize::new(0),
            metrics: RwLock::new(AgentMetrics::default()),
            last_activity_millis: AtomicU64::new(0),
            started_at: Instant::now(),
            bus,
        });
        agent.clone().spawn_resource_listener();
        agent
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn agent_type(&self) -> &'static str {
        self.worker.agent_type()
    }

    pub async fn status(&self) -> AgentStatus {
        *self.status.read().await
    }

    pub fn effective_max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::Relaxed)
    }

    pub async fn metrics(&self) -> AgentMetrics {
        self.metrics.read().await.clone()
    }

    pub fn last_activity(&self) -> Instant {
        self.started_at + Duration::from_millis(self.last_activity_millis.load(Ordering::Relaxed))
    }

    fn mark_activity(&self) {
        let elapsed = self.started_at.elapsed().as_millis() as u64;
        self.last_activity_millis.store(elapsed, Ordering::Relaxed);
    }

    /// `canHandle(task)` (spec §4.1): not-idle, queue-full, memory, and
    /// subclass checks, each with a structured rejection reason and a
    /// retry hint.
    pub async fn can_handle(&self, task: &Task) -> Result<(), (BusyReason, Duration)> {
        if self.queue_len.load(Ordering::Relaxed) >= self.effective_max_concurrency() {
            return Err((BusyReason::QueueFull, Duration::from_millis(200)));
        }
        if *self.status.read().await == AgentStatus::Shutdown || *self.status.read().await == AgentStatus::Error {
            return Err((BusyReason::NotIdle, Duration::from_millis(500)));
        }
        let memory_mb = sample_process_memory_mb();
        if memory_mb > self.default_capabilities.memory_limit_mb as f64 * 0.9 {
            return Err((BusyReason::MemoryLimit, Duration::from_millis(1000)));
        }
        if !self.worker.accepts(task) {
            return Err((BusyReason::UnsupportedTask, Duration::from_millis(0)));
        }
        Ok(())
    }

    /// `process(task)` (spec §4.1): fails fast with `AgentBusy` when
    /// `can_handle` rejects; otherwise runs the task to completion, timing
    /// it and updating counters.
    pub async fn process(&self, mut task: Task) -> Result<serde_json::Value, EngineError> {
        if let Err((reason, retry_after)) = self.can_handle(&task).await {
            return Err(EngineError::busy(reason, retry_after));
        }

        self.queue_len.fetch_add(1, Ordering::Relaxed);
        *self.status.write().await = AgentStatus::Busy;
        task.mark_started();
        self.mark_activity();

        let started = Instant::now();
        let result = self.worker.handle(&task).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        {
            let mut metrics = self.metrics.write().await;
            metrics.total_duration_ms += elapsed_ms;
            metrics.memory_mb = sample_process_memory_mb();
            match &result {
                Ok(_) => metrics.tasks_completed += 1,
                Err(_) => metrics.tasks_failed += 1,
            }
        }

        self.queue_len.fetch_sub(1, Ordering::Relaxed);
        self.mark_activity();

        match &result {
            Ok(value) => {
                task.mark_completed(value.clone());
                self.bus.publish(
                    "task:completed",
                    serde_json::json!({"taskId": task.id.to_string(), "agentType": self.agent_type()}),
                    self.agent_type(),
                    None,
                );
                *self.status.write().await = AgentStatus::Idle;
            }
            Err(err) => {
                task.mark_failed(err.to_string());
                self.bus.publish(
                    "task:failed",
                    serde_json::json!({"taskId": task.id.to_string(), "agentType": self.agent_type(), "error": err.to_string()}),
                    self.agent_type(),
                    None,
                );
                *self.status.write().await = if self.queue_len.load(Ordering::Relaxed) == 0 {
                    AgentStatus::Idle
                } else {
                    AgentStatus::Error
                };
            }
        }

        result
    }

    pub async fn shutdown(&self) {
        *self.status.write().await = AgentStatus::Shutdown;
    }

    /// Subscribes to `resources:adjusted` and clamps `maxConcurrency` to
    /// `[1, defaultMaxConcurrency*2]` (spec §4.1, §8).
    fn spawn_resource_listener(self: Arc<Self>) {
        let mut receiver = self.bus.subscribe("resources:adjusted");
        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                if let Some(new_limit) = entry.data.get("newAgentLimit").and_then(|v| v.as_u64()) {
                    let clamped = (new_limit as usize).clamp(1, self.default_capabilities.max_concurrency * 2);
                    self.max_concurrency.store(clamped, Ordering::Relaxed);
                }
                if *self.status.read().await == AgentStatus::Shutdown {
                    break;
                }
            }
        });
    }
}

/// Object-safe facade the Conductor holds agents behind, since `Agent<W>` is
/// generic per worker role and the Conductor's registry is heterogeneous.
#[async_trait]
pub trait DynAgent: Send + Sync {
    fn id(&self) -> GraphId;
    fn agent_type(&self) -> &'static str;
    async fn status(&self) -> AgentStatus;
    async fn metrics(&self) -> AgentMetrics;
    fn last_activity(&self) -> Instant;
    fn effective_max_concurrency(&self) -> usize;
    async fn can_handle(&self, task: &Task) -> Result<(), (BusyReason, Duration)>;
    async fn process(&self, task: Task) -> Result<serde_json::Value, EngineError>;
    async fn shutdown(&self);
}

#[async_trait]
impl<W: AgentWorker + 'static> DynAgent for Agent<W> {
    fn id(&self) -> GraphId {
        Agent::id(self)
    }

    fn agent_type(&self) -> &'static str {
        Agent::agent_type(self)
    }

    async fn status(&self) -> AgentStatus {
        Agent::status(self).await
    }

    async fn metrics(&self) -> AgentMetrics {
        Agent::metrics(self).await
    }

    fn last_activity(&self) -> Instant {
        Agent::last_activity(self)
    }

    fn effective_max_concurrency(&self) -> usize {
        Agent::effective_max_concurrency(self)
    }

    async fn can_handle(&self, task: &Task) -> Result<(), (BusyReason, Duration)> {
        Agent::can_handle(self, task).await
    }

    async fn process(&self, task: Task) -> Result<serde_json::Value, EngineError> {
        Agent::process(self, task).await
    }

    async fn shutdown(&self) {
        Agent::shutdown(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskPayload, TaskPriority};

    struct EchoWorker;

    #[async_trait]
    impl AgentWorker for EchoWorker {
        fn agent_type(&self) -> &'static str {
            "echo"
        }

        async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError> {
            Ok(serde_json::json!({"echoed": task.id.to_string()}))
        }
    }

    fn query_task() -> Task {
        Task::new(
            TaskPayload::Query {
                query: "foo".into(),
                limit: None,
                params: serde_json::Value::Null,
            },
            TaskPriority::default(),
        )
    }

    #[tokio::test]
    async fn process_returns_to_idle_after_success() {
        let bus = Arc::new(KnowledgeBus::new());
        let agent = Agent::new(
            EchoWorker,
            AgentCapabilities {
                max_concurrency: 2,
                memory_limit_mb: 4096,
                priority: 5,
            },
            bus,
        );
        let result = agent.process(query_task()).await;
        assert!(result.is_ok());
        assert_eq!(agent.status().await, AgentStatus::Idle);
        assert_eq!(agent.metrics().await.tasks_completed, 1);
    }

    #[tokio::test]
    async fn queue_full_rejects_with_busy_reason() {
        let bus = Arc::new(KnowledgeBus::new());
        let agent = Agent::new(
            EchoWorker,
            AgentCapabilities {
                max_concurrency: 1,
                memory_limit_mb: 4096,
                priority: 5,
            },
            bus,
        );
        agent.queue_len.fetch_add(1, Ordering::Relaxed);
        let err = agent.process(query_task()).await.unwrap_err();
        match err {
            EngineError::Busy { reason, .. } => assert_eq!(reason, BusyReason::QueueFull),
            other => panic!("expected Busy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resources_adjusted_clamps_to_double_default() {
        let bus = Arc::new(KnowledgeBus::new());
        let agent = Agent::new(
            EchoWorker,
            AgentCapabilities {
                max_concurrency: 4,
                memory_limit_mb: 4096,
                priority: 5,
            },
            bus.clone(),
        );
        bus.publish("resources:adjusted", serde_json::json!({"newAgentLimit": 999}), "test", None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(agent.effective_max_concurrency(), 8);
    }
}
