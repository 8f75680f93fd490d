pub mod issuance;
pub mod scope;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Percentage};
use crate::errors::{LedgerError, Result};
use crate::types::{
    ActorId, ChargeStatus, DiscountId, DiscountType, InstanceId, RecurrencePeriod, TemplateId,
    TemplateStatus, UnitId,
};

pub use issuance::{ChargeIssuer, DiscountRequest, IssueChargeRequest, IssuedCharges, TemplateUpdate};
pub use scope::ChargeScope;

/// `max(0, amount - fixed_discount - amount * pct / 100)`
pub fn compute_final_amount(amount: Money, fixed_discount: Money, pct_discount: Percentage) -> Money {
    (amount - fixed_discount - amount.percentage(pct_discount)).non_negative()
}

/// `max(0, final_amount - approved payments)`
pub fn compute_balance(final_amount: Money, paid_amount: Money) -> Money {
    (final_amount - paid_amount).non_negative()
}

/// definition of a billing campaign before per-unit fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeTemplate {
    pub id: TemplateId,
    pub name: String,
    pub category: String,
    pub amount: Money,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub recurrence: Option<RecurrencePeriod>,
    pub next_generation_date: Option<NaiveDate>,
    pub scope: ChargeScope,
    pub status: TemplateStatus,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,

    // recurrence bookkeeping
    /// recurring master this cycle was generated from
    pub parent_template: Option<TemplateId>,
    /// 0 for manually issued templates, 1.. for regenerated cycles
    pub cycle: u32,
    /// day of month the due date schedule is anchored to
    pub due_anchor_day: u32,
    /// day of month the generation schedule is anchored to
    pub generation_anchor_day: u32,
    pub last_cycle_due_date: Option<NaiveDate>,
    pub last_cycle_template: Option<TemplateId>,
}

impl ChargeTemplate {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some() && self.status != TemplateStatus::Cancelled
    }

    /// due for regeneration on `today`
    pub fn is_due_for_generation(&self, today: NaiveDate) -> bool {
        self.is_recurring()
            && self.status == TemplateStatus::Active
            && self.next_generation_date.map_or(false, |d| d <= today)
    }

    /// due date of the most recent cycle
    pub fn current_cycle_due_date(&self) -> NaiveDate {
        self.last_cycle_due_date.unwrap_or(self.due_date)
    }

    /// anchors taken from the dates the schedule starts from
    pub(crate) fn anchor_days(due_date: NaiveDate, next_generation: Option<NaiveDate>) -> (u32, u32) {
        let due_anchor = due_date.day();
        let generation_anchor = next_generation.map(|d| d.day()).unwrap_or(due_anchor);
        (due_anchor, generation_anchor)
    }
}

/// per-unit billable obligation derived from a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeInstance {
    pub id: InstanceId,
    pub template_id: TemplateId,
    pub unit_id: UnitId,
    pub name: String,
    pub category: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,

    // amounts
    pub amount: Money,
    pub discount_amount: Money,
    pub discount_percentage: Percentage,
    pub surcharge_amount: Money,
    pub final_amount: Money,
    pub paid_amount: Money,
    pub balance: Money,

    pub status: ChargeStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChargeInstance {
    /// new instance with balance equal to the gross amount
    pub fn new(template: &ChargeTemplate, unit_id: UnitId, created_at: DateTime<Utc>) -> Self {
        let mut instance = Self {
            id: uuid::Uuid::new_v4(),
            template_id: template.id,
            unit_id,
            name: template.name.clone(),
            category: template.category.clone(),
            issue_date: template.issue_date,
            due_date: template.due_date,
            amount: template.amount,
            discount_amount: Money::ZERO,
            discount_percentage: Percentage::ZERO,
            surcharge_amount: Money::ZERO,
            final_amount: template.amount,
            paid_amount: Money::ZERO,
            balance: template.amount,
            status: ChargeStatus::Pending,
            paid_at: None,
            created_at,
        };
        instance.recompute();
        instance
    }

    /// amount after discounts, before surcharges
    pub fn discounted_amount(&self) -> Money {
        compute_final_amount(self.amount, self.discount_amount, self.discount_percentage)
    }

    /// refresh the derived final amount and balance from their inputs
    pub fn recompute(&mut self) {
        self.final_amount = self.discounted_amount() + self.surcharge_amount;
        self.balance = compute_balance(self.final_amount, self.paid_amount);
    }

    /// flip to paid once nothing is owed
    pub fn settle_status(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_open() && self.balance.is_zero() {
            self.status = ChargeStatus::Paid;
            self.paid_at = Some(now);
            return true;
        }
        false
    }

    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days().max(0)
    }

    pub fn has_payments(&self) -> bool {
        self.paid_amount.is_positive()
    }

    /// apply an approved allocation against the balance
    pub fn apply_payment(&mut self, amount: Money, now: DateTime<Utc>) -> Result<()> {
        if !amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "payment amount must be positive, got {}",
                amount
            )));
        }
        if !self.status.is_open() {
            return Err(LedgerError::validation(format!(
                "charge {} is {:?} and cannot take payments",
                self.id, self.status
            )));
        }
        if amount > self.balance {
            return Err(LedgerError::allocation_exceeds_balance(self.id, amount, self.balance));
        }

        self.paid_amount += amount;
        self.recompute();
        self.settle_status(now);
        Ok(())
    }

    /// add a late fee on top of the final amount
    pub fn add_surcharge(&mut self, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "surcharge must be positive, got {}",
                amount
            )));
        }
        if self.status != ChargeStatus::Overdue {
            return Err(LedgerError::validation(format!(
                "surcharges apply only to overdue charges, {} is {:?}",
                self.id, self.status
            )));
        }
        self.surcharge_amount += amount;
        self.recompute();
        Ok(())
    }

    /// apply a discount and return the monetary reduction it produced
    pub fn apply_discount(&mut self, kind: DiscountType, value: Decimal) -> Result<Money> {
        if self.status.is_terminal() {
            return Err(LedgerError::validation(format!(
                "charge {} is {:?} and cannot be discounted",
                self.id, self.status
            )));
        }
        if value <= Decimal::ZERO {
            return Err(LedgerError::validation("discount value must be positive"));
        }

        let before = self.final_amount;
        let (fixed, pct) = match kind {
            DiscountType::Fixed => (self.discount_amount + Money::from_decimal(value), self.discount_percentage),
            DiscountType::Percentage => {
                if value > Decimal::ONE_HUNDRED {
                    return Err(LedgerError::validation(format!(
                        "discount percentage {} exceeds 100",
                        value
                    )));
                }
                (
                    self.discount_amount,
                    self.discount_percentage.saturating_add(Percentage::from_decimal(value)),
                )
            }
        };

        let new_final = compute_final_amount(self.amount, fixed, pct) + self.surcharge_amount;
        if new_final < self.paid_amount {
            return Err(LedgerError::validation(format!(
                "discount would lower charge {} to {} below the {} already paid",
                self.id, new_final, self.paid_amount
            )));
        }

        self.discount_amount = fixed;
        self.discount_percentage = pct;
        self.recompute();
        Ok(before - self.final_amount)
    }
}

/// audit record of a discount applied to one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: DiscountId,
    pub instance_id: InstanceId,
    pub kind: DiscountType,
    pub value: Decimal,
    /// monetary reduction produced when applied
    pub amount: Money,
    pub reason: String,
    pub applied_by: ActorId,
    pub applied_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    pub(crate) fn template(amount: i64) -> ChargeTemplate {
        let due = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        ChargeTemplate {
            id: Uuid::new_v4(),
            name: "Mantenimiento Enero".to_string(),
            category: "maintenance".to_string(),
            amount: Money::from_major(amount),
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            due_date: due,
            recurrence: None,
            next_generation_date: None,
            scope: ChargeScope::All,
            status: TemplateStatus::Active,
            created_by: "admin".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            parent_template: None,
            cycle: 0,
            due_anchor_day: 31,
            generation_anchor_day: 31,
            last_cycle_due_date: None,
            last_cycle_template: None,
        }
    }

    #[test]
    fn test_compute_final_amount() {
        let amount = Money::from_major(500);
        assert_eq!(compute_final_amount(amount, Money::ZERO, Percentage::ZERO), amount);
        assert_eq!(
            compute_final_amount(amount, Money::from_major(50), Percentage::from_whole(10)),
            Money::from_major(400)
        );
        // never negative
        assert_eq!(
            compute_final_amount(amount, Money::from_major(450), Percentage::from_whole(20)),
            Money::ZERO
        );
    }

    #[test]
    fn test_compute_balance_never_negative() {
        assert_eq!(compute_balance(Money::from_major(500), Money::from_major(200)), Money::from_major(300));
        assert_eq!(compute_balance(Money::from_major(500), Money::from_major(600)), Money::ZERO);
    }

    #[test]
    fn test_full_payment_marks_paid() {
        let now = Utc::now();
        let mut instance = ChargeInstance::new(&template(500), Uuid::new_v4(), now);
        assert_eq!(instance.balance, Money::from_major(500));

        instance.apply_payment(Money::from_major(200), now).unwrap();
        assert_eq!(instance.balance, Money::from_major(300));
        assert_eq!(instance.status, ChargeStatus::Pending);

        instance.apply_payment(Money::from_major(300), now).unwrap();
        assert_eq!(instance.balance, Money::ZERO);
        assert_eq!(instance.status, ChargeStatus::Paid);
        assert_eq!(instance.paid_at, Some(now));
    }

    #[test]
    fn test_overpayment_rejected() {
        let now = Utc::now();
        let mut instance = ChargeInstance::new(&template(500), Uuid::new_v4(), now);
        let result = instance.apply_payment(Money::from_major(501), now);
        assert!(matches!(result, Err(LedgerError::Validation { .. })));
        assert_eq!(instance.balance, Money::from_major(500));
    }

    #[test]
    fn test_discounts_stack() {
        let now = Utc::now();
        let mut instance = ChargeInstance::new(&template(500), Uuid::new_v4(), now);

        let reduced = instance.apply_discount(DiscountType::Fixed, dec!(50)).unwrap();
        assert_eq!(reduced, Money::from_major(50));
        assert_eq!(instance.balance, Money::from_major(450));

        let reduced = instance.apply_discount(DiscountType::Percentage, dec!(10)).unwrap();
        assert_eq!(reduced, Money::from_major(50));
        assert_eq!(instance.final_amount, Money::from_major(400));
        assert_eq!(instance.final_amount, instance.discounted_amount());

        assert!(instance.apply_discount(DiscountType::Percentage, dec!(101)).is_err());
        assert!(instance.apply_discount(DiscountType::Fixed, dec!(0)).is_err());
    }

    #[test]
    fn test_discount_cannot_undercut_payments() {
        let now = Utc::now();
        let mut instance = ChargeInstance::new(&template(500), Uuid::new_v4(), now);
        instance.apply_payment(Money::from_major(450), now).unwrap();

        let result = instance.apply_discount(DiscountType::Fixed, dec!(100));
        assert!(matches!(result, Err(LedgerError::Validation { .. })));
        assert_eq!(instance.balance, Money::from_major(50));

        instance.apply_discount(DiscountType::Fixed, dec!(50)).unwrap();
        assert_eq!(instance.balance, Money::ZERO);
    }

    #[test]
    fn test_surcharge_only_when_overdue() {
        let now = Utc::now();
        let mut instance = ChargeInstance::new(&template(200), Uuid::new_v4(), now);
        assert!(instance.add_surcharge(Money::from_major(10)).is_err());

        instance.status = ChargeStatus::Overdue;
        instance.add_surcharge(Money::from_major(10)).unwrap();
        assert_eq!(instance.final_amount, Money::from_major(210));
        assert_eq!(instance.balance, Money::from_major(210));
        assert_eq!(instance.discounted_amount(), Money::from_major(200));
    }

    #[test]
    fn test_days_overdue() {
        let instance = ChargeInstance::new(&template(100), Uuid::new_v4(), Utc::now());
        let due = instance.due_date;
        assert_eq!(instance.days_overdue(due), 0);
        assert_eq!(instance.days_overdue(due - chrono::Duration::days(3)), 0);
        assert_eq!(instance.days_overdue(due + chrono::Duration::days(12)), 12);
    }
}
