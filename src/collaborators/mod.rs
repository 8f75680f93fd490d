//! interfaces to the services the ledger calls but does not own
pub mod memory;
pub mod notification;

use serde::{Deserialize, Serialize};

use crate::errors::CollaboratorError;
use crate::payments::{PaymentAllocation, PaymentReceipt};
use crate::types::{Resident, ResidentId, Unit, UnitId};

pub use memory::{FailingDocumentGenerator, InMemoryDirectory, RecordingSender, StaticDocumentGenerator};
pub use notification::{Notification, NotificationService, ServiceState};

/// read-only view of the community's units and residents
pub trait UnitDirectory: Send + Sync {
    fn unit(&self, id: UnitId) -> Option<Unit>;

    fn active_units(&self) -> Vec<Unit>;

    /// active units under a street or tower grouping
    fn active_units_on_street(&self, street: &str) -> Vec<Unit>;

    fn active_residents(&self, unit_id: UnitId) -> Vec<Resident>;

    fn resident(&self, id: ResidentId) -> Option<Resident>;
}

/// who a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Unit(UnitId),
    Resident(ResidentId),
    Administrator(String),
}

/// transport for push or in-app notifications
pub trait NotificationSender: Send + Sync {
    fn send(
        &self,
        recipient: &Recipient,
        title: &str,
        message: &str,
        data: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

/// official receipt artifact produced on approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDocument {
    pub url: String,
    pub filename: String,
}

/// renders the official receipt for an approved payment
pub trait ReceiptDocumentGenerator: Send + Sync {
    fn generate(
        &self,
        receipt: &PaymentReceipt,
        allocations: &[PaymentAllocation],
    ) -> Result<ReceiptDocument, CollaboratorError>;
}
