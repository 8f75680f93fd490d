//! ledger data store: the seven ledger collections plus the unit of work
pub mod transaction;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::charges::{ChargeInstance, ChargeTemplate, Discount};
use crate::errors::{LedgerError, Result};
use crate::payments::{PaymentAllocation, PaymentReceipt, UnitCreditBalance};
use crate::surcharges::{SurchargeApplication, SurchargePolicy};
use crate::types::{
    AllocationId, ApplicationId, DiscountId, InstanceId, PolicyId, ReceiptId, TemplateId, UnitId,
};

pub use transaction::{Committed, Transaction};

/// every persisted ledger collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerTables {
    pub templates: BTreeMap<TemplateId, ChargeTemplate>,
    pub instances: BTreeMap<InstanceId, ChargeInstance>,
    pub discounts: BTreeMap<DiscountId, Discount>,
    pub receipts: BTreeMap<ReceiptId, PaymentReceipt>,
    pub allocations: BTreeMap<AllocationId, PaymentAllocation>,
    pub policies: BTreeMap<PolicyId, SurchargePolicy>,
    pub applications: BTreeMap<ApplicationId, SurchargeApplication>,
    pub credits: BTreeMap<UnitId, UnitCreditBalance>,
    folio_sequence: u64,
}

impl LedgerTables {
    pub fn template(&self, id: TemplateId) -> Result<&ChargeTemplate> {
        self.templates
            .get(&id)
            .ok_or_else(|| LedgerError::not_found("charge template", id))
    }

    pub fn template_mut(&mut self, id: TemplateId) -> Result<&mut ChargeTemplate> {
        self.templates
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("charge template", id))
    }

    pub fn instance(&self, id: InstanceId) -> Result<&ChargeInstance> {
        self.instances
            .get(&id)
            .ok_or_else(|| LedgerError::not_found("charge instance", id))
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Result<&mut ChargeInstance> {
        self.instances
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("charge instance", id))
    }

    pub fn receipt(&self, id: ReceiptId) -> Result<&PaymentReceipt> {
        self.receipts
            .get(&id)
            .ok_or_else(|| LedgerError::not_found("payment receipt", id))
    }

    pub fn receipt_mut(&mut self, id: ReceiptId) -> Result<&mut PaymentReceipt> {
        self.receipts
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("payment receipt", id))
    }

    pub fn policy(&self, id: PolicyId) -> Result<&SurchargePolicy> {
        self.policies
            .get(&id)
            .ok_or_else(|| LedgerError::not_found("surcharge policy", id))
    }

    pub fn policy_mut(&mut self, id: PolicyId) -> Result<&mut SurchargePolicy> {
        self.policies
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("surcharge policy", id))
    }

    pub fn instances_for_template(&self, template_id: TemplateId) -> Vec<&ChargeInstance> {
        self.instances
            .values()
            .filter(|i| i.template_id == template_id)
            .collect()
    }

    pub fn instances_for_unit(&self, unit_id: UnitId) -> Vec<&ChargeInstance> {
        let mut instances: Vec<&ChargeInstance> = self
            .instances
            .values()
            .filter(|i| i.unit_id == unit_id)
            .collect();
        instances.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        instances
    }

    /// open instances with a balance, oldest due date first
    pub fn outstanding_for_unit(&self, unit_id: UnitId) -> Vec<&ChargeInstance> {
        self.instances_for_unit(unit_id)
            .into_iter()
            .filter(|i| i.status.is_open() && i.balance.is_positive())
            .collect()
    }

    pub fn allocations_for_receipt(&self, receipt_id: ReceiptId) -> Vec<PaymentAllocation> {
        self.allocations
            .values()
            .filter(|a| a.receipt_id == receipt_id)
            .cloned()
            .collect()
    }

    pub fn allocations_for_instance(&self, instance_id: InstanceId) -> Vec<&PaymentAllocation> {
        self.allocations
            .values()
            .filter(|a| a.instance_id == instance_id)
            .collect()
    }

    pub fn receipts_for_unit(&self, unit_id: UnitId) -> Vec<&PaymentReceipt> {
        let mut receipts: Vec<&PaymentReceipt> = self
            .receipts
            .values()
            .filter(|r| r.unit_id == unit_id)
            .collect();
        receipts.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.folio.cmp(&b.folio)));
        receipts
    }

    /// surcharge applications of one policy against one instance
    pub fn applications_for(&self, policy_id: PolicyId, instance_id: InstanceId) -> Vec<&SurchargeApplication> {
        self.applications
            .values()
            .filter(|a| a.policy_id == policy_id && a.instance_id == instance_id)
            .collect()
    }

    /// date the policy last produced an application anywhere
    pub fn last_application_date(&self, policy_id: PolicyId) -> Option<NaiveDate> {
        self.applications
            .values()
            .filter(|a| a.policy_id == policy_id)
            .map(|a| a.applied_on)
            .max()
    }

    pub fn credit(&self, unit_id: UnitId) -> Option<&UnitCreditBalance> {
        self.credits.get(&unit_id)
    }

    pub fn credit_mut(&mut self, unit_id: UnitId, now: DateTime<Utc>) -> &mut UnitCreditBalance {
        self.credits
            .entry(unit_id)
            .or_insert_with(|| UnitCreditBalance::new(unit_id, now))
    }

    /// next unique receipt folio, e.g. `REC-20240201-000042`
    pub fn next_folio(&mut self, prefix: &str, date: NaiveDate) -> String {
        self.folio_sequence += 1;
        format!("{}-{}-{:06}", prefix, date.format("%Y%m%d"), self.folio_sequence)
    }
}

/// in-memory ledger store with all-or-nothing transactions
#[derive(Debug, Default)]
pub struct LedgerStore {
    tables: LedgerTables,
    commits: u64,
    rollbacks: u64,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// committed state
    pub fn tables(&self) -> &LedgerTables {
        &self.tables
    }

    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    pub fn rollback_count(&self) -> u64 {
        self.rollbacks
    }

    /// run `work` as one unit of work.
    ///
    /// the closure sees a staged copy of the tables; on `Ok` the copy replaces
    /// the committed state and the outbox events are handed back, on `Err`
    /// both are discarded.
    pub fn transaction<T, F>(&mut self, now: DateTime<Utc>, work: F) -> Result<Committed<T>>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut tx = Transaction::begin(self.tables.clone(), now);
        match work(&mut tx) {
            Ok(value) => {
                let (tables, events) = tx.finish();
                self.tables = tables;
                self.commits += 1;
                debug!(events = events.len(), "transaction committed");
                Ok(Committed { value, events })
            }
            Err(e) => {
                self.rollbacks += 1;
                debug!(error = %e, "transaction rolled back");
                Err(e)
            }
        }
    }

    /// serialize the committed state
    pub fn snapshot_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.tables).map_err(|e| LedgerError::Persistence {
            message: e.to_string(),
        })
    }

    /// restore a store from a snapshot
    pub fn from_snapshot_json(json: &str) -> Result<Self> {
        let tables: LedgerTables = serde_json::from_str(json).map_err(|e| LedgerError::Persistence {
            message: e.to_string(),
        })?;
        Ok(Self {
            tables,
            commits: 0,
            rollbacks: 0,
        })
    }
}
