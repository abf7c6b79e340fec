// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use colony_core::application::agent_lifecycle::{
    AgentReconciler, LifecycleSettings, REASON_HEARTBEAT_TIMEOUT, REASON_RECOVERING,
    REASON_RECOVERY_EXHAUSTED,
};
use colony_core::application::reconciler::{Action, Reconciler};
use colony_core::application::scheduler::{SchedulerSettings, TaskScheduler};
use colony_core::domain::agent::{Agent, AgentPhase, AgentSpec, AgentStatus, AGENT_FINALIZER};
use colony_core::domain::clock::{Clock, ManualClock};
use colony_core::domain::cluster::{Cluster, ClusterSpec};
use colony_core::domain::events::AgentLifecycleEvent;
use colony_core::domain::meta::{ObjectKey, ObjectMeta, OwnerReference};
use colony_core::domain::store::ObjectStore;
use colony_core::domain::task::{SubtaskPhase, Task, TaskSpec, REASON_AGENT_LOST};
use colony_core::infrastructure::checkpoint::InMemoryCheckpointStore;
use colony_core::infrastructure::event_bus::{DomainEvent, EventBus};
use colony_core::infrastructure::repositories::InMemoryStore;
use colony_core::infrastructure::runtime::InMemoryAgentRuntime;
use colony_core::infrastructure::slot_ledger::SlotLedger;
use colony_core::infrastructure::work_queue::WorkQueue;

struct Plane {
    agents: Arc<InMemoryStore<Agent>>,
    clusters: Arc<InMemoryStore<Cluster>>,
    tasks: Arc<InMemoryStore<Task>>,
    runtime: Arc<InMemoryAgentRuntime>,
    ledger: Arc<SlotLedger>,
    event_bus: EventBus,
    task_queue: WorkQueue<ObjectKey>,
    clock: ManualClock,
    lifecycle: AgentReconciler,
    scheduler: TaskScheduler,
}

fn plane() -> Plane {
    let agents = Arc::new(InMemoryStore::<Agent>::new());
    let tasks = Arc::new(InMemoryStore::<Task>::new());
    let clusters = Arc::new(InMemoryStore::<Cluster>::new());
    let runtime = Arc::new(InMemoryAgentRuntime::new());
    let ledger = Arc::new(SlotLedger::new());
    let event_bus = EventBus::with_default_capacity();
    let task_queue = WorkQueue::new(Duration::from_millis(500), Duration::from_secs(300));
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());

    let lifecycle = AgentReconciler::new(
        agents.clone(),
        tasks.clone(),
        clusters.clone(),
        runtime.clone(),
        event_bus.clone(),
        Arc::new(clock.clone()),
        LifecycleSettings::default(),
    )
    .with_task_queue(task_queue.clone());
    let scheduler = TaskScheduler::new(
        tasks.clone(),
        agents.clone(),
        runtime.clone(),
        Arc::new(InMemoryCheckpointStore::new()),
        ledger.clone(),
        event_bus.clone(),
        Arc::new(clock.clone()),
        SchedulerSettings::default(),
    );
    Plane {
        agents,
        clusters,
        tasks,
        runtime,
        ledger,
        event_bus,
        task_queue,
        clock,
        lifecycle,
        scheduler,
    }
}

impl Plane {
    /// Standalone agent brought to `Ready` by a heartbeat at the current time.
    async fn live_agent(&self, name: &str) -> Agent {
        self.live_agent_with(ObjectMeta::new("default", name)).await
    }

    async fn live_agent_with(&self, metadata: ObjectMeta) -> Agent {
        let spec: AgentSpec = serde_yaml::from_str("type: coder\npeers: []\n").unwrap();
        let agent = self
            .agents
            .create(Agent {
                metadata,
                spec,
                status: AgentStatus::default(),
            })
            .await
            .unwrap();
        let key = agent.metadata.key();
        assert_ok!(self.lifecycle.reconcile(&key).await);
        self.runtime.heartbeat(&key, self.clock.now());
        assert_ok!(self.lifecycle.reconcile(&key).await);
        let agent = self.agents.get(&key).await.unwrap().unwrap();
        assert_eq!(agent.status.phase, AgentPhase::Ready);
        agent
    }

    async fn agent(&self, key: &ObjectKey) -> Agent {
        self.agents.get(key).await.unwrap().unwrap()
    }

    async fn submit(&self, name: &str, yaml: &str) -> ObjectKey {
        let spec: TaskSpec = serde_yaml::from_str(yaml).unwrap();
        self.tasks
            .create(Task {
                metadata: ObjectMeta::new("default", name),
                spec,
                status: Default::default(),
            })
            .await
            .unwrap()
            .metadata
            .key()
    }
}

#[tokio::test]
async fn heartbeat_timeout_releases_subtasks_for_requeue() {
    let p = plane();
    let agent = p.live_agent("worker-0").await;
    let agent_key = agent.metadata.key();
    let task_key = p.submit("job", "subtasks: [{name: a}, {name: b}]\n").await;

    assert_ok!(p.scheduler.reconcile(&task_key).await);
    assert_eq!(p.ledger.load(&agent_key), 2);

    assert_ok!(p.lifecycle.reconcile(&agent_key).await);
    let busy = p.agents.get(&agent_key).await.unwrap().unwrap();
    assert_eq!(busy.status.phase, AgentPhase::Busy);
    assert_eq!(busy.status.assigned_subtasks.len(), 2);

    let mut events = p.event_bus.subscribe();
    p.clock.advance(Duration::from_secs(60));
    assert_ok!(p.lifecycle.reconcile(&agent_key).await);

    let failed = p.agents.get(&agent_key).await.unwrap().unwrap();
    assert_eq!(failed.status.phase, AgentPhase::Failed);
    assert_eq!(failed.status.reason.as_deref(), Some(REASON_HEARTBEAT_TIMEOUT));

    let mut released = None;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::AgentLifecycle(AgentLifecycleEvent::AgentFailed {
            released: r, ..
        }) = event
        {
            released = Some(r);
        }
    }
    assert_eq!(released.map(|r| r.len()), Some(2));
    assert_eq!(p.task_queue.len(), 1);

    assert_ok!(p.scheduler.reconcile(&task_key).await);
    let task = p.tasks.get(&task_key).await.unwrap().unwrap();
    for name in ["a", "b"] {
        let st = &task.status.subtasks[name];
        assert_eq!(st.phase, SubtaskPhase::Queued, "{name}");
        assert_eq!(st.retry_count, 1, "{name}");
        assert_eq!(st.last_error.as_deref(), Some(REASON_AGENT_LOST), "{name}");
        assert!(st.assigned_agent.is_none(), "{name}");
    }
    assert_eq!(p.ledger.load(&agent_key), 0);
}

#[tokio::test]
async fn heartbeat_inside_timeout_keeps_agent_alive() {
    let p = plane();
    let agent = p.live_agent("worker-0").await;
    let key = agent.metadata.key();

    p.clock.advance(Duration::from_secs(45));
    p.runtime.heartbeat(&key, p.clock.now());
    p.clock.advance(Duration::from_secs(45));
    assert_ok!(p.lifecycle.reconcile(&key).await);

    let agent = p.agents.get(&key).await.unwrap().unwrap();
    assert_eq!(agent.status.phase, AgentPhase::Ready);
}

#[tokio::test]
async fn deleted_agent_waits_for_assignments_to_drain() {
    let p = plane();
    let agent = p.live_agent("worker-0").await;
    let agent_key = agent.metadata.key();
    let task_key = p.submit("job", "subtasks: [{name: a}]\n").await;
    assert_ok!(p.scheduler.reconcile(&task_key).await);

    p.agents.delete(&agent_key).await.unwrap();
    assert_ok!(p.lifecycle.reconcile(&agent_key).await);
    let terminating = p.agents.get(&agent_key).await.unwrap().unwrap();
    assert_eq!(terminating.status.phase, AgentPhase::Terminating);
    assert!(terminating.metadata.has_finalizer(AGENT_FINALIZER));

    // The scheduler treats a terminating agent as lost and requeues the work.
    assert_ok!(p.scheduler.reconcile(&task_key).await);
    let task = p.tasks.get(&task_key).await.unwrap().unwrap();
    assert_eq!(task.status.subtasks["a"].phase, SubtaskPhase::Queued);

    assert_ok!(p.lifecycle.reconcile(&agent_key).await);
    assert!(p.agents.get(&agent_key).await.unwrap().is_none());
}

#[tokio::test]
async fn heartbeat_is_scoped_to_the_agent_namespace() {
    let p = plane();
    let team_a = p
        .live_agent_with(ObjectMeta::new("team-a", "swarm-agent-0"))
        .await
        .metadata
        .key();
    let team_b = p
        .live_agent_with(ObjectMeta::new("team-b", "swarm-agent-0"))
        .await
        .metadata
        .key();

    p.clock.advance(Duration::from_secs(45));
    p.runtime.heartbeat(&team_a, p.clock.now());
    p.clock.advance(Duration::from_secs(45));
    assert_ok!(p.lifecycle.reconcile(&team_a).await);
    assert_ok!(p.lifecycle.reconcile(&team_b).await);

    assert_eq!(p.agent(&team_a).await.status.phase, AgentPhase::Ready);
    let silent = p.agent(&team_b).await;
    assert_eq!(silent.status.phase, AgentPhase::Failed);
    assert_eq!(silent.status.reason.as_deref(), Some(REASON_HEARTBEAT_TIMEOUT));
}

#[tokio::test]
async fn silent_agent_gives_up_after_recovery_ceiling() {
    let p = plane();
    let key = p.live_agent("worker-0").await.metadata.key();
    let cooldown = Duration::from_secs(300);

    // Default settings allow three recoveries; the agent never beats again.
    for attempt in 1..=3u32 {
        p.clock.advance(Duration::from_secs(60));
        assert_ok!(p.lifecycle.reconcile(&key).await);
        assert_eq!(p.agent(&key).await.status.phase, AgentPhase::Failed);

        p.clock.advance(cooldown);
        assert_ok!(p.lifecycle.reconcile(&key).await);
        let agent = p.agent(&key).await;
        assert_eq!(agent.status.phase, AgentPhase::Initializing);
        assert_eq!(agent.status.reason.as_deref(), Some(REASON_RECOVERING));
        assert_eq!(agent.status.recovery_attempts, attempt);
    }

    p.clock.advance(Duration::from_secs(60));
    assert_ok!(p.lifecycle.reconcile(&key).await);
    p.clock.advance(cooldown);
    let mut events = p.event_bus.subscribe();
    let action = p.lifecycle.reconcile(&key).await.unwrap();
    assert_eq!(action, Action::AwaitChange);

    let agent = p.agent(&key).await;
    assert_eq!(agent.status.phase, AgentPhase::Failed);
    assert_eq!(agent.status.reason.as_deref(), Some(REASON_RECOVERY_EXHAUSTED));
    assert_eq!(agent.status.recovery_attempts, 3);
    let mut exhausted = false;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::AgentLifecycle(AgentLifecycleEvent::RecoveryExhausted {
            attempts, ..
        }) = event
        {
            assert_eq!(attempts, 3);
            exhausted = true;
        }
    }
    assert!(exhausted);

    // Further passes leave the exhausted agent for its cluster to replace.
    let writes = p.agents.write_calls();
    p.clock.advance(cooldown);
    assert_eq!(p.lifecycle.reconcile(&key).await.unwrap(), Action::AwaitChange);
    assert_eq!(p.agents.write_calls(), writes);
}

#[tokio::test]
async fn agent_whose_cluster_is_gone_is_deleted() {
    let p = plane();
    let spec: ClusterSpec = serde_yaml::from_str("topology: mesh\n").unwrap();
    let cluster = p
        .clusters
        .create(Cluster {
            metadata: ObjectMeta::new("default", "swarm"),
            spec,
            status: Default::default(),
        })
        .await
        .unwrap();

    let mut metadata = ObjectMeta::new("default", "swarm-agent-0");
    metadata.owner = Some(OwnerReference {
        kind: "Cluster".to_string(),
        name: "swarm".to_string(),
        uid: cluster.metadata.uid,
    });
    let key = p.live_agent_with(metadata).await.metadata.key();
    assert!(p.agent(&key).await.metadata.has_finalizer(AGENT_FINALIZER));

    // Owner still present: the agent is left alone.
    assert_ok!(p.lifecycle.reconcile(&key).await);
    assert_eq!(p.agent(&key).await.status.phase, AgentPhase::Ready);

    p.clusters.delete(&cluster.metadata.key()).await.unwrap();
    assert!(p.clusters.get(&cluster.metadata.key()).await.unwrap().is_none());

    assert_ok!(p.lifecycle.reconcile(&key).await);
    assert!(p.agent(&key).await.metadata.is_deleting());

    assert_ok!(p.lifecycle.reconcile(&key).await);
    assert!(p.agents.get(&key).await.unwrap().is_none());
}
