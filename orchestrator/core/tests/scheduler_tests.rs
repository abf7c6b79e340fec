// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use colony_core::application::reconciler::{Action, Reconciler};
use colony_core::application::scheduler::{SchedulerSettings, TaskScheduler};
use colony_core::domain::agent::{Agent, AgentId, AgentPhase, AgentSpec, AgentStatus};
use colony_core::domain::clock::{Clock, ManualClock};
use colony_core::domain::errors::ReconcileError;
use colony_core::domain::events::TaskEvent;
use colony_core::domain::meta::{ConditionStatus, ObjectKey, ObjectMeta};
use colony_core::domain::runtime::{SubtaskOutcome, SubtaskReport};
use colony_core::domain::store::ObjectStore;
use colony_core::domain::task::{
    SubtaskPhase, Task, TaskPhase, TaskSpec, REASON_BRANCHES_FAILED, REASON_CANCELLED,
    REASON_INVALID_GRAPH, REASON_NO_CAPACITY, REASON_RETRY_EXHAUSTED,
};
use colony_core::infrastructure::checkpoint::InMemoryCheckpointStore;
use colony_core::infrastructure::event_bus::{DomainEvent, EventBus};
use colony_core::infrastructure::repositories::InMemoryStore;
use colony_core::infrastructure::runtime::InMemoryAgentRuntime;
use colony_core::infrastructure::slot_ledger::SlotLedger;

struct Harness {
    tasks: Arc<InMemoryStore<Task>>,
    agents: Arc<InMemoryStore<Agent>>,
    runtime: Arc<InMemoryAgentRuntime>,
    checkpoints: Arc<InMemoryCheckpointStore>,
    ledger: Arc<SlotLedger>,
    event_bus: EventBus,
    clock: ManualClock,
    scheduler: TaskScheduler,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn harness() -> Harness {
    let tasks = Arc::new(InMemoryStore::<Task>::new());
    let agents = Arc::new(InMemoryStore::<Agent>::new());
    let runtime = Arc::new(InMemoryAgentRuntime::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let ledger = Arc::new(SlotLedger::new());
    let event_bus = EventBus::with_default_capacity();
    let clock = ManualClock::new(start());
    let scheduler = TaskScheduler::new(
        tasks.clone(),
        agents.clone(),
        runtime.clone(),
        checkpoints.clone(),
        ledger.clone(),
        event_bus.clone(),
        Arc::new(clock.clone()),
        SchedulerSettings::default(),
    );
    Harness {
        tasks,
        agents,
        runtime,
        checkpoints,
        ledger,
        event_bus,
        clock,
        scheduler,
    }
}

impl Harness {
    async fn ready_agent(&self, name: &str, yaml: &str) -> AgentId {
        self.ready_agent_in("default", name, yaml).await
    }

    async fn ready_agent_in(&self, namespace: &str, name: &str, yaml: &str) -> AgentId {
        let spec: AgentSpec = serde_yaml::from_str(yaml).unwrap();
        let agent = Agent {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: AgentStatus {
                phase: AgentPhase::Ready,
                phase_since: Some(self.clock.now()),
                ..AgentStatus::default()
            },
        };
        self.agents.create(agent).await.unwrap().id()
    }

    async fn submit(&self, name: &str, yaml: &str) -> ObjectKey {
        self.submit_in("default", name, yaml).await
    }

    async fn submit_in(&self, namespace: &str, name: &str, yaml: &str) -> ObjectKey {
        let spec: TaskSpec = serde_yaml::from_str(yaml).unwrap();
        let task = Task {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: Default::default(),
        };
        self.tasks.create(task).await.unwrap().metadata.key()
    }

    async fn task(&self, key: &ObjectKey) -> Task {
        self.tasks.get(key).await.unwrap().unwrap()
    }

    /// Slots held by an agent in the `default` namespace.
    fn load(&self, agent: &AgentId) -> usize {
        self.ledger.load(&ObjectKey::new("default", agent.as_str()))
    }

    fn report(
        &self,
        task: &ObjectKey,
        subtask: &str,
        agent: &AgentId,
        attempt: u32,
        outcome: SubtaskOutcome,
    ) {
        self.runtime.report(SubtaskReport {
            task: task.clone(),
            subtask: subtask.to_string(),
            agent: agent.clone(),
            attempt,
            outcome,
            reported_at: self.clock.now(),
        });
    }
}

fn completed(result: serde_json::Value) -> SubtaskOutcome {
    SubtaskOutcome::Completed {
        result: Some(result),
        artifact_available: true,
    }
}

fn failed(error: &str) -> SubtaskOutcome {
    SubtaskOutcome::Failed {
        error: error.to_string(),
    }
}

#[tokio::test]
async fn cyclic_task_fails_validation_and_nothing_is_assigned() {
    let h = harness();
    let agent = h.ready_agent("worker-0", "type: coder\n").await;
    let key = h
        .submit(
            "loop",
            "subtasks: [{name: a}, {name: b}, {name: c}]\n\
             dependencies:\n  - {from: a, to: b}\n  - {from: b, to: c}\n  - {from: c, to: a}\n",
        )
        .await;

    let err = h.scheduler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Validation(_)));
    assert!(!err.is_retryable());

    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Failed);
    assert_eq!(task.status.reason.as_deref(), Some(REASON_INVALID_GRAPH));
    assert!(task
        .status
        .subtasks
        .values()
        .all(|s| s.phase != SubtaskPhase::Running));
    assert_eq!(h.load(&agent), 0);

    // A second pass changes nothing and is still a validation failure.
    let writes = h.tasks.write_calls();
    assert!(matches!(
        h.scheduler.reconcile(&key).await,
        Err(ReconcileError::Validation(_))
    ));
    assert_eq!(h.tasks.write_calls(), writes);
}

#[tokio::test]
async fn agent_capacity_is_never_exceeded_across_tasks() {
    let h = harness();
    let agent = h
        .ready_agent("worker-0", "type: coder\nmaxConcurrentTasks: 2\n")
        .await;
    let first = h.submit("first", "subtasks: [{name: a}, {name: b}]\n").await;
    let second = h.submit("second", "subtasks: [{name: a}, {name: b}]\n").await;

    h.scheduler.reconcile(&first).await.unwrap();
    h.scheduler.reconcile(&second).await.unwrap();

    let running: usize = [h.task(&first).await, h.task(&second).await]
        .iter()
        .map(|t| t.running_on(&agent).len())
        .sum();
    assert_eq!(running, 2);
    assert_eq!(h.load(&agent), 2);

    let second = h.task(&second).await;
    assert_eq!(second.status.phase, TaskPhase::Scheduled);
    assert_eq!(second.status.reason.as_deref(), Some(REASON_NO_CAPACITY));
}

#[tokio::test]
async fn downstream_waits_for_upstream_completion() {
    let h = harness();
    let agent = h.ready_agent("worker-0", "type: coder\n").await;
    let key = h
        .submit(
            "chain",
            "subtasks: [{name: a}, {name: b}]\ndependencies:\n  - {from: a, to: b}\n",
        )
        .await;

    h.scheduler.reconcile(&key).await.unwrap();
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Running);
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Running);
    assert_eq!(task.status.subtasks["b"].phase, SubtaskPhase::Pending);
    assert_eq!(task.status.assigned_agents, vec![agent.clone()]);

    h.report(&key, "a", &agent, 1, completed(serde_json::json!({"ok": true})));
    h.scheduler.reconcile(&key).await.unwrap();
    let task = h.task(&key).await;
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Completed);
    assert_eq!(task.status.subtasks["b"].phase, SubtaskPhase::Running);
    assert_eq!(task.status.progress, 50);

    h.report(&key, "b", &agent, 1, completed(serde_json::json!({"ok": true})));
    let action = h.scheduler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::AwaitChange);
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Completed);
    assert_eq!(task.status.progress, 100);
    assert!(task.status.completion_time.is_some());
    assert_eq!(h.checkpoints.saved(&key).map(|c| c.step), Some(2));
    assert_eq!(h.load(&agent), 0);
}

#[tokio::test]
async fn failed_attempts_back_off_then_fail_the_task() {
    let h = harness();
    let agent = h.ready_agent("worker-0", "type: coder\n").await;
    let key = h.submit("flaky", "subtasks: [{name: a}]\n").await;
    h.scheduler.reconcile(&key).await.unwrap();

    let mut delays = Vec::new();
    for attempt in 1..=3u32 {
        h.report(&key, "a", &agent, attempt, failed("boom"));
        let action = h.scheduler.reconcile(&key).await.unwrap();
        let st = h.task(&key).await.status.subtasks["a"].clone();
        assert_eq!(st.phase, SubtaskPhase::Queued);
        assert_eq!(st.retry_count, attempt);
        let delay = (st.not_before.unwrap() - h.clock.now()).to_std().unwrap();
        assert_eq!(action, Action::Requeue(delay));
        delays.push(delay.as_secs());

        h.clock.advance(delay);
        h.scheduler.reconcile(&key).await.unwrap();
        let st = h.task(&key).await.status.subtasks["a"].clone();
        assert_eq!(st.phase, SubtaskPhase::Running);
        assert_eq!(st.attempt, attempt + 1);
    }
    assert_eq!(delays, vec![60, 120, 240]);

    h.report(&key, "a", &agent, 4, failed("boom"));
    h.scheduler.reconcile(&key).await.unwrap();
    let task = h.task(&key).await;
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Failed);
    assert_eq!(task.status.phase, TaskPhase::Failed);
    assert_eq!(task.status.reason.as_deref(), Some(REASON_RETRY_EXHAUSTED));
}

#[tokio::test]
async fn resumed_task_keeps_checkpointed_work() {
    let h = harness();
    let agent = h.ready_agent("worker-0", "type: coder\n").await;
    let key = h
        .submit(
            "pipeline",
            "resume: true\n\
             retryPolicy: {maxRetries: 0}\n\
             subtasks: [{name: a}, {name: b}, {name: c}]\n\
             dependencies:\n  - {from: a, to: b}\n  - {from: b, to: c}\n",
        )
        .await;
    let mut events = h.event_bus.subscribe();

    h.scheduler.reconcile(&key).await.unwrap();
    h.report(&key, "a", &agent, 1, completed(serde_json::json!("A")));
    h.scheduler.reconcile(&key).await.unwrap();
    h.report(&key, "b", &agent, 1, completed(serde_json::json!("B")));
    h.scheduler.reconcile(&key).await.unwrap();
    assert_eq!(h.checkpoints.saved(&key).map(|c| c.step), Some(2));

    h.report(&key, "c", &agent, 1, failed("crashed"));
    let action = h.scheduler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::Requeue(Duration::ZERO));
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Failed);
    assert_eq!(task.status.reason.as_deref(), Some(REASON_RETRY_EXHAUSTED));

    h.scheduler.reconcile(&key).await.unwrap();
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Resuming);
    assert_eq!(task.status.resume_attempts, 1);
    assert_eq!(task.status.subtasks["c"].phase, SubtaskPhase::Pending);

    // Drain everything published so far; only new assignments matter below.
    while events.try_recv().is_ok() {}

    h.scheduler.reconcile(&key).await.unwrap();
    let task = h.task(&key).await;
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Completed);
    assert_eq!(task.status.subtasks["a"].attempt, 1);
    assert_eq!(task.status.subtasks["b"].phase, SubtaskPhase::Completed);
    assert_eq!(task.status.subtasks["b"].attempt, 1);
    assert_eq!(task.status.subtasks["c"].phase, SubtaskPhase::Running);
    assert_eq!(task.status.subtasks["c"].attempt, 2);

    let mut reassigned = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::Task(TaskEvent::SubtaskAssigned { subtask, .. }) = event {
            reassigned.push(subtask.subtask);
        }
    }
    assert_eq!(reassigned, vec!["c".to_string()]);
}

#[tokio::test]
async fn unchanged_task_is_not_rewritten() {
    let h = harness();
    h.ready_agent("worker-0", "type: coder\n").await;
    let key = h.submit("steady", "subtasks: [{name: a}]\n").await;

    h.scheduler.reconcile(&key).await.unwrap();
    let writes = h.tasks.write_calls();
    let version = h.task(&key).await.metadata.resource_version;

    h.scheduler.reconcile(&key).await.unwrap();
    h.scheduler.reconcile(&key).await.unwrap();
    assert_eq!(h.tasks.write_calls(), writes);
    assert_eq!(h.task(&key).await.metadata.resource_version, version);
}

#[tokio::test]
async fn timeout_fails_running_work() {
    let h = harness();
    let agent = h.ready_agent("worker-0", "type: coder\n").await;
    let key = h.submit("slow", "timeout: 5m\nsubtasks: [{name: a}]\n").await;

    let action = h.scheduler.reconcile(&key).await.unwrap();
    assert!(matches!(action, Action::Requeue(_)));

    h.clock.advance(Duration::from_secs(301));
    h.scheduler.reconcile(&key).await.unwrap();
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Failed);
    assert_eq!(task.status.reason.as_deref(), Some("TaskTimeout"));
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Failed);
    assert_eq!(h.load(&agent), 0);
}

#[tokio::test]
async fn same_agent_name_in_two_namespaces_runs_both_tasks() {
    let h = harness();
    for namespace in ["team-a", "team-b"] {
        h.ready_agent_in(namespace, "swarm-agent-0", "type: coder\nmaxConcurrentTasks: 1\n")
            .await;
    }
    let first = h.submit_in("team-a", "job", "subtasks: [{name: a}]\n").await;
    let second = h.submit_in("team-b", "job", "subtasks: [{name: a}]\n").await;

    h.scheduler.reconcile(&first).await.unwrap();
    h.scheduler.reconcile(&second).await.unwrap();

    for key in [&first, &second] {
        let task = h.task(key).await;
        assert_eq!(task.status.phase, TaskPhase::Running, "{key}");
        assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Running, "{key}");
        assert_eq!(task.status.reason, None, "{key}");
    }
    assert_eq!(h.ledger.load(&ObjectKey::new("team-a", "swarm-agent-0")), 1);
    assert_eq!(h.ledger.load(&ObjectKey::new("team-b", "swarm-agent-0")), 1);

    // A report from team-a's agent settles only team-a's task.
    let agent = AgentId::new("swarm-agent-0");
    h.report(&first, "a", &agent, 1, completed(serde_json::json!(1)));
    h.scheduler.reconcile(&first).await.unwrap();
    h.scheduler.reconcile(&second).await.unwrap();
    assert_eq!(h.task(&first).await.status.phase, TaskPhase::Completed);
    assert_eq!(h.task(&second).await.status.phase, TaskPhase::Running);
    assert_eq!(h.ledger.load(&ObjectKey::new("team-a", "swarm-agent-0")), 0);
    assert_eq!(h.ledger.load(&ObjectKey::new("team-b", "swarm-agent-0")), 1);
}

#[tokio::test]
async fn cancelled_task_keeps_running_slot_until_reported() {
    let h = harness();
    let agent = h.ready_agent("worker-0", "type: coder\n").await;
    let key = h
        .submit(
            "cancel-me",
            "subtasks: [{name: a}, {name: b}]\ndependencies:\n  - {from: a, to: b}\n",
        )
        .await;
    h.scheduler.reconcile(&key).await.unwrap();

    let mut task = h.task(&key).await;
    task.spec.cancel = true;
    h.tasks.update(&task).await.unwrap();

    let action = h.scheduler.reconcile(&key).await.unwrap();
    assert!(matches!(action, Action::Requeue(_)));
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Cancelled);
    assert_eq!(task.status.reason.as_deref(), Some(REASON_CANCELLED));
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Running);
    assert_eq!(task.status.subtasks["b"].phase, SubtaskPhase::Cancelled);
    assert_eq!(h.load(&agent), 1);

    // The late report is still recorded, but b is never dispatched.
    h.report(&key, "a", &agent, 1, completed(serde_json::json!("done")));
    let action = h.scheduler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::AwaitChange);
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Cancelled);
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Completed);
    assert_eq!(task.status.subtasks["b"].phase, SubtaskPhase::Cancelled);
    assert_eq!(h.load(&agent), 0);
}

#[tokio::test]
async fn continue_independent_finishes_other_branches_then_fails() {
    let h = harness();
    let agent = h
        .ready_agent("worker-0", "type: coder\nmaxConcurrentTasks: 4\n")
        .await;
    let key = h
        .submit(
            "branches",
            "failurePolicy: ContinueIndependent\n\
             retryPolicy: {maxRetries: 0}\n\
             subtasks: [{name: a}, {name: b}, {name: c}, {name: d}]\n\
             dependencies:\n  - {from: a, to: b}\n  - {from: b, to: d}\n  - {from: c, to: d}\n",
        )
        .await;

    h.scheduler.reconcile(&key).await.unwrap();
    h.report(&key, "a", &agent, 1, failed("boom"));
    h.scheduler.reconcile(&key).await.unwrap();

    // The failed branch is pruned while c keeps running.
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Running);
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Failed);
    assert_eq!(task.status.subtasks["b"].phase, SubtaskPhase::Skipped);
    assert_eq!(task.status.subtasks["c"].phase, SubtaskPhase::Running);
    assert_eq!(task.status.subtasks["d"].phase, SubtaskPhase::Skipped);

    h.report(&key, "c", &agent, 1, completed(serde_json::json!("C")));
    let action = h.scheduler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::AwaitChange);
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Failed);
    assert_eq!(task.status.reason.as_deref(), Some(REASON_BRANCHES_FAILED));
    assert_eq!(task.status.subtasks["c"].phase, SubtaskPhase::Completed);
    assert_eq!(task.status.subtasks["d"].phase, SubtaskPhase::Skipped);
    assert_eq!(h.load(&agent), 0);
}

#[tokio::test]
async fn false_condition_skips_downstream_subtask() {
    let h = harness();
    let agent = h.ready_agent("worker-0", "type: coder\n").await;
    let key = h
        .submit(
            "review",
            "subtasks: [{name: review}, {name: publish}, {name: rework}]\n\
             dependencies:\n\
             \x20 - from: review\n\
             \x20   to: publish\n\
             \x20   kind: conditional\n\
             \x20   condition: {path: /approved, operator: Equals, value: true}\n\
             \x20 - from: review\n\
             \x20   to: rework\n\
             \x20   kind: conditional\n\
             \x20   condition: {path: /approved, operator: Equals, value: false}\n",
        )
        .await;

    h.scheduler.reconcile(&key).await.unwrap();
    h.report(&key, "review", &agent, 1, completed(serde_json::json!({"approved": false})));
    h.scheduler.reconcile(&key).await.unwrap();

    let task = h.task(&key).await;
    assert_eq!(task.status.subtasks["publish"].phase, SubtaskPhase::Skipped);
    assert_eq!(task.status.subtasks["rework"].phase, SubtaskPhase::Running);

    h.report(&key, "rework", &agent, 1, completed(serde_json::json!("fixed")));
    h.scheduler.reconcile(&key).await.unwrap();
    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Completed);
    assert_eq!(task.status.subtasks["publish"].phase, SubtaskPhase::Skipped);
    assert_eq!(task.status.subtasks["publish"].attempt, 0);
}

#[tokio::test]
async fn resume_stops_after_max_attempts() {
    let h = harness();
    let agent = h.ready_agent("worker-0", "type: coder\n").await;
    let key = h
        .submit(
            "doomed",
            "resume: true\nretryPolicy: {maxRetries: 0}\nsubtasks: [{name: a}]\n",
        )
        .await;
    h.scheduler.reconcile(&key).await.unwrap();

    // Default settings allow three resumes.
    for attempt in 1..=3u32 {
        h.report(&key, "a", &agent, attempt, failed("crashed"));
        h.scheduler.reconcile(&key).await.unwrap();
        assert_eq!(h.task(&key).await.status.phase, TaskPhase::Failed);

        h.scheduler.reconcile(&key).await.unwrap();
        let task = h.task(&key).await;
        assert_eq!(task.status.phase, TaskPhase::Resuming);
        assert_eq!(task.status.resume_attempts, attempt);

        h.scheduler.reconcile(&key).await.unwrap();
        let task = h.task(&key).await;
        assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Running);
        assert_eq!(task.status.subtasks["a"].attempt, attempt + 1);
    }

    h.report(&key, "a", &agent, 4, failed("crashed"));
    h.scheduler.reconcile(&key).await.unwrap();
    let action = h.scheduler.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::AwaitChange);

    let task = h.task(&key).await;
    assert_eq!(task.status.phase, TaskPhase::Failed);
    assert_eq!(task.status.reason.as_deref(), Some(REASON_RETRY_EXHAUSTED));
    assert_eq!(task.status.resume_attempts, 3);
    let resumable = task
        .status
        .conditions
        .iter()
        .find(|c| c.condition_type == "Resumable")
        .unwrap();
    assert_eq!(resumable.status, ConditionStatus::False);
    assert_eq!(resumable.reason, "ResumeExhausted");

    let writes = h.tasks.write_calls();
    assert_eq!(h.scheduler.reconcile(&key).await.unwrap(), Action::AwaitChange);
    assert_eq!(h.tasks.write_calls(), writes);
    assert_eq!(h.load(&agent), 0);
}
