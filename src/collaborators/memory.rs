//! in-memory collaborators for tests, demos and embedding
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::CollaboratorError;
use crate::payments::{PaymentAllocation, PaymentReceipt};
use crate::types::{Resident, ResidentId, Unit, UnitId};

use super::notification::Notification;
use super::{NotificationSender, ReceiptDocument, ReceiptDocumentGenerator, Recipient, UnitDirectory};

/// unit and resident directory held in memory
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    units: Mutex<BTreeMap<UnitId, Unit>>,
    residents: Mutex<BTreeMap<ResidentId, Resident>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    // maps stay consistent across a panicking writer, so poisoning is ignored
    fn units(&self) -> MutexGuard<'_, BTreeMap<UnitId, Unit>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn residents(&self) -> MutexGuard<'_, BTreeMap<ResidentId, Resident>> {
        self.residents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// add an active unit and return its id
    pub fn add_unit(&self, street: &str, number: &str) -> UnitId {
        let unit = Unit {
            id: Uuid::new_v4(),
            street: street.to_string(),
            number: number.to_string(),
            active: true,
        };
        let id = unit.id;
        self.insert_unit(unit);
        id
    }

    pub fn insert_unit(&self, unit: Unit) {
        self.units().insert(unit.id, unit);
    }

    /// returns false for an unknown unit
    pub fn set_unit_active(&self, id: UnitId, active: bool) -> bool {
        match self.units().get_mut(&id) {
            Some(unit) => {
                unit.active = active;
                true
            }
            None => false,
        }
    }

    /// add an active resident to a unit and return its id
    pub fn add_resident(&self, unit_id: UnitId, name: &str, registered_at: DateTime<Utc>) -> ResidentId {
        let resident = Resident {
            id: Uuid::new_v4(),
            unit_id,
            name: name.to_string(),
            active: true,
            registered_at,
        };
        let id = resident.id;
        self.residents().insert(id, resident);
        id
    }

    /// returns false for an unknown resident
    pub fn set_resident_active(&self, id: ResidentId, active: bool) -> bool {
        match self.residents().get_mut(&id) {
            Some(resident) => {
                resident.active = active;
                true
            }
            None => false,
        }
    }
}

impl UnitDirectory for InMemoryDirectory {
    fn unit(&self, id: UnitId) -> Option<Unit> {
        self.units().get(&id).cloned()
    }

    fn active_units(&self) -> Vec<Unit> {
        self.units().values().filter(|u| u.active).cloned().collect()
    }

    fn active_units_on_street(&self, street: &str) -> Vec<Unit> {
        self.units()
            .values()
            .filter(|u| u.active && u.street == street)
            .cloned()
            .collect()
    }

    fn active_residents(&self, unit_id: UnitId) -> Vec<Resident> {
        self.residents()
            .values()
            .filter(|r| r.active && r.unit_id == unit_id)
            .cloned()
            .collect()
    }

    fn resident(&self, id: ResidentId) -> Option<Resident> {
        self.residents().get(&id).cloned()
    }
}

/// notification sender that keeps every message it was given
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every following send fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sent_to(&self, recipient: &Recipient) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| &n.recipient == recipient)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl NotificationSender for RecordingSender {
    fn send(
        &self,
        recipient: &Recipient,
        title: &str,
        message: &str,
        data: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("push gateway offline".to_string()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("recorder poisoned".to_string()))?;
        sent.push(Notification::new(recipient.clone(), title, message, data.clone()));
        Ok(())
    }
}

/// document generator returning predictable urls
#[derive(Debug)]
pub struct StaticDocumentGenerator {
    base_url: String,
    generated: AtomicUsize,
}

impl StaticDocumentGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            generated: AtomicUsize::new(0),
        }
    }

    pub fn generated_count(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

impl ReceiptDocumentGenerator for StaticDocumentGenerator {
    fn generate(
        &self,
        receipt: &PaymentReceipt,
        allocations: &[PaymentAllocation],
    ) -> Result<ReceiptDocument, CollaboratorError> {
        if allocations.is_empty() && receipt.credited_amount.is_zero() {
            return Err(CollaboratorError::Rejected(format!(
                "receipt {} has nothing to document",
                receipt.folio
            )));
        }
        self.generated.fetch_add(1, Ordering::SeqCst);
        let filename = format!("{}.pdf", receipt.folio);
        Ok(ReceiptDocument {
            url: format!("{}/{}", self.base_url.trim_end_matches('/'), filename),
            filename,
        })
    }
}

/// document generator that always fails
#[derive(Debug, Default)]
pub struct FailingDocumentGenerator;

impl ReceiptDocumentGenerator for FailingDocumentGenerator {
    fn generate(
        &self,
        receipt: &PaymentReceipt,
        _allocations: &[PaymentAllocation],
    ) -> Result<ReceiptDocument, CollaboratorError> {
        Err(CollaboratorError::Unavailable(format!(
            "renderer unavailable for {}",
            receipt.folio
        )))
    }
}
