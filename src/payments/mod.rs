pub mod allocation;
pub mod approval;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::ReceiptDocument;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{
    ActorId, AllocationId, AllocationKind, InstanceId, PaymentMethod, ReceiptId, ReceiptStatus,
    ResidentId, UnitId,
};

pub use allocation::{AllocationPlan, PaymentAllocator, PlannedAllocation};
pub use approval::{ApprovalOutcome, ApprovalWorkflow};

/// bank metadata reported with a payment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub bank: Option<String>,
    pub reference: Option<String>,
    pub account_last_digits: Option<String>,
}

/// a reported payment awaiting or past administrative review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub id: ReceiptId,
    pub folio: String,
    pub unit_id: UnitId,
    /// resident the receipt belongs to
    pub resident_id: Option<ResidentId>,
    /// the single charge a resident-submitted receipt pays
    pub target_instance: Option<InstanceId>,
    pub total: Money,
    /// part of the total posted to the unit credit balance on approval
    pub credited_amount: Money,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub bank: BankDetails,
    /// uploaded evidence reference
    pub evidence: Option<String>,
    pub notes: Option<String>,
    pub status: ReceiptStatus,
    pub submitted_by: ActorId,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_by: Option<ActorId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    /// official receipt, set only after approval
    pub document: Option<ReceiptDocument>,
}

impl PaymentReceipt {
    pub fn is_pending(&self) -> bool {
        self.status == ReceiptStatus::Pending
    }

    /// fail unless the receipt can still be decided
    pub fn ensure_pending(&self) -> Result<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(LedgerError::conflict(format!(
                "receipt {} was already {:?}",
                self.folio, self.status
            )))
        }
    }
}

/// portion of a receipt applied to one charge instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: AllocationId,
    pub receipt_id: ReceiptId,
    pub instance_id: InstanceId,
    pub amount: Money,
    pub kind: AllocationKind,
    pub allocated_by: ActorId,
    pub allocated_at: DateTime<Utc>,
}

/// one movement on a unit's credit balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditMovement {
    pub receipt_id: ReceiptId,
    /// positive when credit is generated, negative when consumed
    pub amount: Money,
    pub balance_after: Money,
    pub at: DateTime<Utc>,
}

/// running surplus of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCreditBalance {
    pub unit_id: UnitId,
    pub balance: Money,
    pub movements: Vec<CreditMovement>,
    pub updated_at: DateTime<Utc>,
}

impl UnitCreditBalance {
    pub fn new(unit_id: UnitId, now: DateTime<Utc>) -> Self {
        Self {
            unit_id,
            balance: Money::ZERO,
            movements: Vec::new(),
            updated_at: now,
        }
    }

    /// add surplus from a payment
    pub fn deposit(&mut self, receipt_id: ReceiptId, amount: Money, now: DateTime<Utc>) -> Result<Money> {
        if !amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "credit deposit must be positive, got {}",
                amount
            )));
        }
        self.record(receipt_id, amount, now);
        Ok(self.balance)
    }

    /// consume credit against charges
    pub fn withdraw(&mut self, receipt_id: ReceiptId, amount: Money, now: DateTime<Utc>) -> Result<Money> {
        if !amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "credit withdrawal must be positive, got {}",
                amount
            )));
        }
        if amount > self.balance {
            return Err(LedgerError::validation(format!(
                "credit withdrawal {} exceeds available credit {}",
                amount, self.balance
            )));
        }
        self.record(receipt_id, -amount, now);
        Ok(self.balance)
    }

    fn record(&mut self, receipt_id: ReceiptId, amount: Money, now: DateTime<Utc>) {
        self.balance += amount;
        self.updated_at = now;
        self.movements.push(CreditMovement {
            receipt_id,
            amount,
            balance_after: self.balance,
            at: now,
        });
    }
}

/// receipt reported by a resident against one of their charges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidentReceiptRequest {
    pub resident_id: ResidentId,
    pub instance_id: InstanceId,
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub bank: BankDetails,
    pub evidence: Option<String>,
    pub notes: Option<String>,
}

/// one manual allocation line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub instance_id: InstanceId,
    pub amount: Money,
}

/// how an administrator-entered payment is spread across charges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// caller chooses the charges and amounts
    Manual(Vec<AllocationLine>),
    /// pay the oldest due charges first, surplus becomes credit
    OldestFirst,
}

/// payment entered by an administrator on behalf of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualPaymentRequest {
    pub unit_id: UnitId,
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub bank: BankDetails,
    pub strategy: AllocationStrategy,
    pub recorded_by: ActorId,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_credit_movements() {
        let now = Utc::now();
        let mut credit = UnitCreditBalance::new(Uuid::new_v4(), now);
        let receipt = Uuid::new_v4();

        assert_eq!(credit.deposit(receipt, Money::from_major(150), now).unwrap(), Money::from_major(150));
        assert_eq!(credit.withdraw(receipt, Money::from_major(100), now).unwrap(), Money::from_major(50));
        assert!(credit.withdraw(receipt, Money::from_major(51), now).is_err());
        assert!(credit.deposit(receipt, Money::ZERO, now).is_err());

        assert_eq!(credit.movements.len(), 2);
        assert_eq!(credit.movements[1].amount, Money::from_major(-100));
        assert_eq!(credit.movements[1].balance_after, Money::from_major(50));
    }
}
