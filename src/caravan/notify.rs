//! Notification sink for caravan events.
//!
//! Delivery is fire-and-forget from the engine's point of view: notices are sent after
//! a transition commits, and a delivery failure is logged without undoing anything.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::errors::CaravanError;
use super::storage::CaravanStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Departed,
    Arrived,
    Ambushed,
    Collected,
    AmbushResolved,
    Salvaged,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NoticeKind::Departed => "departed",
            NoticeKind::Arrived => "arrived",
            NoticeKind::Ambushed => "ambushed",
            NoticeKind::Collected => "collected",
            NoticeKind::AmbushResolved => "ambush_resolved",
            NoticeKind::Salvaged => "salvaged",
        };
        f.write_str(label)
    }
}

/// A delivered notice as stored in a mailbox or sent over a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    pub owner: String,
    pub kind: NoticeKind,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, owner: &str, kind: NoticeKind, payload: Value) -> Result<(), CaravanError>;
}

/// Discards every notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _owner: &str, _kind: NoticeKind, _payload: Value) -> Result<(), CaravanError> {
        Ok(())
    }
}

/// Queues notices as JSON in the store's mail tree until the owner reads them.
pub struct MailboxNotifier {
    store: Arc<CaravanStore>,
}

impl MailboxNotifier {
    pub fn new(store: Arc<CaravanStore>) -> Self {
        Self { store }
    }

    /// Remove and return all pending notices for `owner`, oldest first.
    pub fn drain_notices(&self, owner: &str) -> Result<Vec<Notice>, CaravanError> {
        drain_notices(&self.store, owner)
    }
}

impl Notifier for MailboxNotifier {
    fn notify(&self, owner: &str, kind: NoticeKind, payload: Value) -> Result<(), CaravanError> {
        let notice = Notice {
            owner: owner.to_string(),
            kind,
            payload,
            sent_at: Utc::now(),
        };
        let body = serde_json::to_string(&notice)
            .map_err(|e| CaravanError::Internal(format!("encode notice: {}", e)))?;
        self.store.enqueue_mail(owner, &body)
    }
}

/// Read back the notices a [`MailboxNotifier`] queued for `owner`.
pub fn drain_notices(store: &CaravanStore, owner: &str) -> Result<Vec<Notice>, CaravanError> {
    let mut notices = Vec::new();
    for body in store.drain_mail(owner)? {
        match serde_json::from_str::<Notice>(&body) {
            Ok(notice) => notices.push(notice),
            Err(e) => log::warn!("dropping unreadable notice for {}: {}", owner, e),
        }
    }
    Ok(notices)
}

/// Forwards notices to an in-process consumer, e.g. a server pushing them to players.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, owner: &str, kind: NoticeKind, payload: Value) -> Result<(), CaravanError> {
        self.tx
            .send(Notice {
                owner: owner.to_string(),
                kind,
                payload,
                sent_at: Utc::now(),
            })
            .map_err(|_| CaravanError::Internal("notice channel closed".to_string()))
    }
}

/// Keeps notices in memory. Handy for embedding and tests.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        match self.notices.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, kind: NoticeKind) -> usize {
        self.notices().iter().filter(|n| n.kind == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, owner: &str, kind: NoticeKind, payload: Value) -> Result<(), CaravanError> {
        let notice = Notice {
            owner: owner.to_string(),
            kind,
            payload,
            sent_at: Utc::now(),
        };
        match self.notices.lock() {
            Ok(mut guard) => guard.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
        Ok(())
    }
}
