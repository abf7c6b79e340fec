// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Reconcilers publish after a successful status write, so every event describes
// a transition that is already persisted.

use crate::domain::events::{AgentLifecycleEvent, ClusterEvent, TaskEvent};
use crate::domain::meta::ObjectKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Cluster(ClusterEvent),
    AgentLifecycle(AgentLifecycleEvent),
    Task(TaskEvent),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_cluster_event(&self, event: ClusterEvent) {
        self.publish(DomainEvent::Cluster(event));
    }

    pub fn publish_agent_event(&self, event: AgentLifecycleEvent) {
        self.publish(DomainEvent::AgentLifecycle(event));
    }

    pub fn publish_task_event(&self, event: TaskEvent) {
        self.publish(DomainEvent::Task(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single task
    pub fn subscribe_task(&self, task: ObjectKey) -> TaskEventReceiver {
        TaskEventReceiver {
            receiver: self.sender.subscribe(),
            task,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for task-specific events (filtered)
pub struct TaskEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    task: ObjectKey,
}

impl TaskEventReceiver {
    /// Receive the next event for the subscribed task, skipping all others
    pub async fn recv(&mut self) -> Result<TaskEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Task(task_event) = event {
                if task_of(&task_event) == &self.task {
                    return Ok(task_event);
                }
            }
        }
    }
}

fn task_of(event: &TaskEvent) -> &ObjectKey {
    match event {
        TaskEvent::PhaseChanged { task, .. } => task,
        TaskEvent::CheckpointSaved { task, .. } => task,
        TaskEvent::Resumed { task, .. } => task,
        TaskEvent::SubtaskAssigned { subtask, .. } => &subtask.task,
        TaskEvent::SubtaskCompleted { subtask, .. } => &subtask.task,
        TaskEvent::SubtaskRetryScheduled { subtask, .. } => &subtask.task,
        TaskEvent::SubtaskFailed { subtask, .. } => &subtask.task,
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
