use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::collaborators::ReceiptDocumentGenerator;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::store::Transaction;
use crate::types::{AllocationKind, InstanceId, ReceiptId, ReceiptStatus};

use super::{PaymentAllocation, PaymentReceipt};

/// what an approval changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub receipt: PaymentReceipt,
    pub allocations: Vec<PaymentAllocation>,
    /// instances that reached a zero balance
    pub paid_instances: Vec<InstanceId>,
    pub credit_posted: Money,
}

/// pending -> approved | rejected
pub struct ApprovalWorkflow<'a> {
    documents: Option<&'a dyn ReceiptDocumentGenerator>,
    epsilon: Money,
}

impl<'a> ApprovalWorkflow<'a> {
    pub fn new(documents: &'a dyn ReceiptDocumentGenerator, epsilon: Money) -> Self {
        Self {
            documents: Some(documents),
            epsilon,
        }
    }

    /// workflow that settles without producing an official document
    pub fn without_documents(epsilon: Money) -> Self {
        Self {
            documents: None,
            epsilon,
        }
    }

    /// approve a receipt inside the caller's transaction.
    ///
    /// any error leaves the transaction to be rolled back, including a
    /// failure of the document generator.
    pub fn approve(&self, tx: &mut Transaction, receipt_id: ReceiptId, approver: &str) -> Result<ApprovalOutcome> {
        let now = tx.now();
        let mut receipt = tx.receipt(receipt_id)?.clone();
        receipt.ensure_pending()?;

        let allocations = self.load_or_create_allocations(tx, &receipt, approver)?;

        let allocated: Money = allocations.iter().map(|a| a.amount).sum();
        let accounted = allocated + receipt.credited_amount;
        if !accounted.approx_eq(receipt.total, self.epsilon) {
            return Err(LedgerError::validation(format!(
                "receipt {} totals {} but allocations account for {}",
                receipt.folio, receipt.total, accounted
            )));
        }

        let mut paid_instances = Vec::new();
        for allocation in &allocations {
            // balance is re-read from the staged state right before mutating it
            let instance = tx.instance_mut(allocation.instance_id)?;
            if instance.unit_id != receipt.unit_id {
                return Err(LedgerError::validation(format!(
                    "charge {} does not belong to the unit of receipt {}",
                    instance.id, receipt.folio
                )));
            }
            instance.apply_payment(allocation.amount, now)?;
            debug!(
                instance_id = %instance.id,
                applied = %allocation.amount,
                balance = %instance.balance,
                "allocation applied"
            );

            if instance.balance.is_zero() {
                let (instance_id, unit_id) = (instance.id, instance.unit_id);
                paid_instances.push(instance_id);
                tx.emit(LedgerEvent::ChargePaid {
                    instance_id,
                    unit_id,
                    timestamp: now,
                });
            }
        }

        if receipt.credited_amount.is_positive() {
            let new_balance = tx
                .credit_mut(receipt.unit_id, now)
                .deposit(receipt.id, receipt.credited_amount, now)?;
            tx.emit(LedgerEvent::CreditPosted {
                unit_id: receipt.unit_id,
                amount: receipt.credited_amount,
                new_balance,
                timestamp: now,
            });
        }

        receipt.status = ReceiptStatus::Approved;
        receipt.reviewed_by = Some(approver.to_string());
        receipt.reviewed_at = Some(now);

        if let Some(documents) = self.documents {
            let document = documents.generate(&receipt, &allocations).map_err(|e| {
                LedgerError::aborted(format!("receipt document for {} failed: {}", receipt.folio, e))
            })?;
            receipt.document = Some(document);
        }

        tx.emit(LedgerEvent::ReceiptApproved {
            receipt_id: receipt.id,
            folio: receipt.folio.clone(),
            unit_id: receipt.unit_id,
            resident_id: receipt.resident_id,
            amount: receipt.total,
            approver: approver.to_string(),
            document_url: receipt.document.as_ref().map(|d| d.url.clone()),
            timestamp: now,
        });
        tx.receipts.insert(receipt.id, receipt.clone());

        Ok(ApprovalOutcome {
            credit_posted: receipt.credited_amount,
            receipt,
            allocations,
            paid_instances,
        })
    }

    /// reject a receipt; balances are untouched
    pub fn reject(
        &self,
        tx: &mut Transaction,
        receipt_id: ReceiptId,
        reviewer: &str,
        reason: &str,
    ) -> Result<PaymentReceipt> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::validation("a rejection reason is required"));
        }

        let now = tx.now();
        let receipt = tx.receipt_mut(receipt_id)?;
        receipt.ensure_pending()?;

        receipt.status = ReceiptStatus::Rejected;
        receipt.reviewed_by = Some(reviewer.to_string());
        receipt.reviewed_at = Some(now);
        receipt.rejection_reason = Some(reason.to_string());
        let receipt = receipt.clone();

        tx.emit(LedgerEvent::ReceiptRejected {
            receipt_id: receipt.id,
            folio: receipt.folio.clone(),
            unit_id: receipt.unit_id,
            resident_id: receipt.resident_id,
            reason: reason.to_string(),
            timestamp: now,
        });
        Ok(receipt)
    }

    /// stored allocations, or the single-target allocation of a resident receipt
    fn load_or_create_allocations(
        &self,
        tx: &mut Transaction,
        receipt: &PaymentReceipt,
        approver: &str,
    ) -> Result<Vec<PaymentAllocation>> {
        let existing = tx.allocations_for_receipt(receipt.id);
        if !existing.is_empty() {
            return Ok(existing);
        }

        match receipt.target_instance {
            Some(instance_id) => {
                let allocation = PaymentAllocation {
                    id: Uuid::new_v4(),
                    receipt_id: receipt.id,
                    instance_id,
                    amount: receipt.total - receipt.credited_amount,
                    kind: AllocationKind::Manual,
                    allocated_by: approver.to_string(),
                    allocated_at: tx.now(),
                };
                tx.allocations.insert(allocation.id, allocation.clone());
                Ok(vec![allocation])
            }
            None if receipt.credited_amount.is_positive() => Ok(Vec::new()),
            None => Err(LedgerError::validation(format!(
                "receipt {} has no allocations",
                receipt.folio
            ))),
        }
    }
}
