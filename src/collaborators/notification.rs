use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{NotificationSender, Recipient};

/// a message waiting to be handed to the sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(
        recipient: Recipient,
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            recipient,
            title: title.into(),
            message: message.into(),
            data,
        }
    }
}

/// lifecycle of the notification handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Created,
    Running,
    Stopped,
}

/// result of dispatching a batch of notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// explicitly constructed notification handle passed into the ledger.
///
/// delivery is best effort: failures are logged and counted, never retried
/// and never surfaced to the caller.
pub struct NotificationService {
    sender: Arc<dyn NotificationSender>,
    state: ServiceState,
    delivered: u64,
    failed: u64,
}

impl NotificationService {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self {
            sender,
            state: ServiceState::Created,
            delivered: 0,
            failed: 0,
        }
    }

    /// create and start in one step
    pub fn started(sender: Arc<dyn NotificationSender>) -> Self {
        let mut service = Self::new(sender);
        service.start();
        service
    }

    pub fn start(&mut self) {
        if self.state != ServiceState::Running {
            debug!("notification service started");
        }
        self.state = ServiceState::Running;
    }

    pub fn shutdown(&mut self) {
        if self.state == ServiceState::Running {
            debug!(
                delivered = self.delivered,
                failed = self.failed,
                "notification service stopped"
            );
        }
        self.state = ServiceState::Stopped;
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    /// send one notification, returns whether it was delivered
    pub fn dispatch(&mut self, notification: &Notification) -> bool {
        if !self.is_running() {
            warn!(
                state = ?self.state,
                title = %notification.title,
                "notification service not running, message dropped"
            );
            return false;
        }

        match self.sender.send(
            &notification.recipient,
            &notification.title,
            &notification.message,
            &notification.data,
        ) {
            Ok(()) => {
                self.delivered += 1;
                true
            }
            Err(e) => {
                self.failed += 1;
                warn!(
                    recipient = ?notification.recipient,
                    title = %notification.title,
                    error = %e,
                    "notification delivery failed"
                );
                false
            }
        }
    }

    pub fn dispatch_all(&mut self, notifications: &[Notification]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if !self.is_running() {
            summary.skipped = notifications.len();
            if !notifications.is_empty() {
                warn!(
                    count = notifications.len(),
                    "notification service not running, batch dropped"
                );
            }
            return summary;
        }
        for notification in notifications {
            if self.dispatch(notification) {
                summary.delivered += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }
}

impl Drop for NotificationService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
