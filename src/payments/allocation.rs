use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::store::LedgerTables;
use crate::types::{AllocationKind, InstanceId, ReceiptId, UnitId};

use super::{AllocationLine, PaymentAllocation};

/// amount planned against one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAllocation {
    pub instance_id: InstanceId,
    pub amount: Money,
    /// instance balance when the plan was made
    pub balance_before: Money,
}

/// allocation result before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub kind: AllocationKind,
    pub lines: Vec<PlannedAllocation>,
    /// amount left over after every applicable balance was covered
    pub leftover: Money,
}

impl AllocationPlan {
    pub fn allocated(&self) -> Money {
        self.lines.iter().map(|l| l.amount).sum()
    }

    /// turn the plan into allocation rows for a receipt
    pub fn into_allocations(
        self,
        receipt_id: ReceiptId,
        allocated_by: &str,
        now: DateTime<Utc>,
    ) -> Vec<PaymentAllocation> {
        let kind = self.kind;
        self.lines
            .into_iter()
            .map(|line| PaymentAllocation {
                id: Uuid::new_v4(),
                receipt_id,
                instance_id: line.instance_id,
                amount: line.amount,
                kind,
                allocated_by: allocated_by.to_string(),
                allocated_at: now,
            })
            .collect()
    }
}

/// spreads a payment across a unit's outstanding charges
pub struct PaymentAllocator {
    epsilon: Money,
}

impl PaymentAllocator {
    pub fn new(epsilon: Money) -> Self {
        Self { epsilon }
    }

    /// validate caller-chosen lines against current balances and ownership
    pub fn manual(
        &self,
        tables: &LedgerTables,
        unit_id: UnitId,
        total: Money,
        lines: &[AllocationLine],
    ) -> Result<AllocationPlan> {
        if !total.is_positive() {
            return Err(LedgerError::validation(format!(
                "payment total must be positive, got {}",
                total
            )));
        }
        if lines.is_empty() {
            return Err(LedgerError::validation("manual allocation needs at least one line"));
        }

        let mut seen = BTreeSet::new();
        let mut planned = Vec::with_capacity(lines.len());
        for line in lines {
            if !seen.insert(line.instance_id) {
                return Err(LedgerError::validation(format!(
                    "charge {} appears more than once",
                    line.instance_id
                )));
            }
            if !line.amount.is_positive() {
                return Err(LedgerError::validation(format!(
                    "allocation for charge {} must be positive",
                    line.instance_id
                )));
            }

            let instance = tables.instance(line.instance_id)?;
            if instance.unit_id != unit_id {
                return Err(LedgerError::validation(format!(
                    "charge {} does not belong to the paying unit",
                    instance.id
                )));
            }
            if !instance.status.is_open() {
                return Err(LedgerError::validation(format!(
                    "charge {} is {:?}",
                    instance.id, instance.status
                )));
            }
            if line.amount > instance.balance {
                return Err(LedgerError::allocation_exceeds_balance(
                    instance.id,
                    line.amount,
                    instance.balance,
                ));
            }

            planned.push(PlannedAllocation {
                instance_id: instance.id,
                amount: line.amount,
                balance_before: instance.balance,
            });
        }

        let plan = AllocationPlan {
            kind: AllocationKind::Manual,
            lines: planned,
            leftover: Money::ZERO,
        };
        if !plan.allocated().approx_eq(total, self.epsilon) {
            return Err(LedgerError::validation(format!(
                "allocations sum to {} but the payment is {}",
                plan.allocated(),
                total
            )));
        }
        Ok(plan)
    }

    /// cover the oldest due charges first; whatever remains is leftover
    pub fn oldest_first(&self, tables: &LedgerTables, unit_id: UnitId, total: Money) -> Result<AllocationPlan> {
        if !total.is_positive() {
            return Err(LedgerError::validation(format!(
                "payment total must be positive, got {}",
                total
            )));
        }

        let mut remaining = total;
        let mut planned = Vec::new();
        for instance in tables.outstanding_for_unit(unit_id) {
            if !remaining.is_positive() {
                break;
            }
            let amount = remaining.min(instance.balance);
            remaining -= amount;
            planned.push(PlannedAllocation {
                instance_id: instance.id,
                amount,
                balance_before: instance.balance,
            });
        }

        Ok(AllocationPlan {
            kind: AllocationKind::AutomaticOldestFirst,
            lines: planned,
            leftover: remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charges::{ChargeInstance, ChargeScope, ChargeTemplate};
    use crate::types::{ChargeStatus, TemplateStatus};
    use chrono::NaiveDate;

    fn template(amount: i64, due: NaiveDate) -> ChargeTemplate {
        ChargeTemplate {
            id: Uuid::new_v4(),
            name: format!("cuota {}", due),
            category: "maintenance".to_string(),
            amount: Money::from_major(amount),
            issue_date: due,
            due_date: due,
            recurrence: None,
            next_generation_date: None,
            scope: ChargeScope::All,
            status: TemplateStatus::Active,
            created_by: "admin".to_string(),
            created_at: Utc::now(),
            parent_template: None,
            cycle: 0,
            due_anchor_day: 1,
            generation_anchor_day: 1,
            last_cycle_due_date: None,
            last_cycle_template: None,
        }
    }

    fn tables_with(unit_id: UnitId, charges: &[(i64, NaiveDate)]) -> (LedgerTables, Vec<InstanceId>) {
        let mut tables = LedgerTables::default();
        let mut ids = Vec::new();
        for (amount, due) in charges {
            let instance = ChargeInstance::new(&template(*amount, *due), unit_id, Utc::now());
            ids.push(instance.id);
            tables.instances.insert(instance.id, instance);
        }
        (tables, ids)
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn test_oldest_first_partial_second() {
        let unit = Uuid::new_v4();
        // newer charge inserted first so ordering must come from the due date
        let (tables, ids) = tables_with(unit, &[(500, date(2, 29)), (400, date(1, 31))]);
        let allocator = PaymentAllocator::new(Money::EPSILON);

        let plan = allocator.oldest_first(&tables, unit, Money::from_major(700)).unwrap();

        assert_eq!(plan.lines.len(), 2);
        assert_eq!(plan.lines[0].instance_id, ids[1]);
        assert_eq!(plan.lines[0].amount, Money::from_major(400));
        assert_eq!(plan.lines[1].instance_id, ids[0]);
        assert_eq!(plan.lines[1].amount, Money::from_major(300));
        assert_eq!(plan.leftover, Money::ZERO);
    }

    #[test]
    fn test_oldest_first_leftover() {
        let unit = Uuid::new_v4();
        let (tables, _) = tables_with(unit, &[(400, date(1, 31))]);
        let allocator = PaymentAllocator::new(Money::EPSILON);

        let plan = allocator.oldest_first(&tables, unit, Money::from_major(550)).unwrap();
        assert_eq!(plan.allocated(), Money::from_major(400));
        assert_eq!(plan.leftover, Money::from_major(150));

        let nothing_owed = allocator.oldest_first(&tables, Uuid::new_v4(), Money::from_major(100)).unwrap();
        assert!(nothing_owed.lines.is_empty());
        assert_eq!(nothing_owed.leftover, Money::from_major(100));
    }

    #[test]
    fn test_oldest_first_skips_closed() {
        let unit = Uuid::new_v4();
        let (mut tables, ids) = tables_with(unit, &[(400, date(1, 31)), (500, date(2, 29))]);
        tables.instances.get_mut(&ids[0]).unwrap().status = ChargeStatus::Cancelled;
        let allocator = PaymentAllocator::new(Money::EPSILON);

        let plan = allocator.oldest_first(&tables, unit, Money::from_major(100)).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].instance_id, ids[1]);
    }

    #[test]
    fn test_manual_validates_each_line() {
        let unit = Uuid::new_v4();
        let (tables, ids) = tables_with(unit, &[(400, date(1, 31)), (500, date(2, 29))]);
        let allocator = PaymentAllocator::new(Money::EPSILON);

        let ok = allocator
            .manual(
                &tables,
                unit,
                Money::from_major(600),
                &[
                    AllocationLine { instance_id: ids[1], amount: Money::from_major(500) },
                    AllocationLine { instance_id: ids[0], amount: Money::from_major(100) },
                ],
            )
            .unwrap();
        assert_eq!(ok.kind, AllocationKind::Manual);
        assert_eq!(ok.allocated(), Money::from_major(600));

        // exceeds balance
        let over = allocator.manual(
            &tables,
            unit,
            Money::from_major(450),
            &[AllocationLine { instance_id: ids[0], amount: Money::from_major(450) }],
        );
        assert!(matches!(over, Err(LedgerError::Validation { .. })));

        // sum mismatch
        let mismatch = allocator.manual(
            &tables,
            unit,
            Money::from_major(300),
            &[AllocationLine { instance_id: ids[0], amount: Money::from_major(200) }],
        );
        assert!(matches!(mismatch, Err(LedgerError::Validation { .. })));

        // another unit's charge
        let foreign = allocator.manual(
            &tables,
            Uuid::new_v4(),
            Money::from_major(100),
            &[AllocationLine { instance_id: ids[0], amount: Money::from_major(100) }],
        );
        assert!(matches!(foreign, Err(LedgerError::Validation { .. })));

        // unknown charge
        let unknown = allocator.manual(
            &tables,
            unit,
            Money::from_major(100),
            &[AllocationLine { instance_id: Uuid::new_v4(), amount: Money::from_major(100) }],
        );
        assert!(matches!(unknown, Err(LedgerError::NotFound { .. })));
    }

    #[test]
    fn test_manual_within_epsilon() {
        let unit = Uuid::new_v4();
        let (tables, ids) = tables_with(unit, &[(400, date(1, 31))]);
        let allocator = PaymentAllocator::new(Money::EPSILON);

        let plan = allocator.manual(
            &tables,
            unit,
            Money::from_cents(20_001),
            &[AllocationLine { instance_id: ids[0], amount: Money::from_major(200) }],
        );
        assert!(plan.is_ok());
    }
}
