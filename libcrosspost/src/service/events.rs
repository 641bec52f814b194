//! Progress events
//!
//! An in-process broadcast bus. The orchestrator emits an event when a
//! publish starts, as each target finishes, and when the whole run is done.
//! Emitting never blocks: with no subscribers the event is dropped, and a
//! lagging subscriber loses the oldest events rather than slowing publishers.
//!
//! # Example
//!
//! ```no_run
//! use libcrosspost::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = receiver.recv().await {
//!         if let Event::TargetCompleted { result, .. } = event {
//!             println!("{}: {}", result.platform, result.success);
//!         }
//!     }
//! });
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::PublishResult;

pub type EventReceiver = broadcast::Receiver<Event>;

pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before old events are dropped
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Dispatch began for these base platforms
    PublishStarted {
        post_id: String,
        platforms: Vec<String>,
        /// Set when this run is a retry
        retry: bool,
    },

    /// One result is in; fan-out platforms report once per sub-target
    TargetCompleted {
        post_id: String,
        result: PublishResult,
    },

    PublishCompleted {
        post_id: String,
        results: Vec<PublishResult>,
    },

    /// The run was rejected before any platform was contacted
    PublishFailed { post_id: String, error: String },
}

impl Event {
    pub fn post_id(&self) -> &str {
        match self {
            Event::PublishStarted { post_id, .. }
            | Event::TargetCompleted { post_id, .. }
            | Event::PublishCompleted { post_id, .. }
            | Event::PublishFailed { post_id, .. } => post_id,
        }
    }
}
