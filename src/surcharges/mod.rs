pub mod engine;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::charges::ChargeInstance;
use crate::decimal::{Money, Percentage};
use crate::errors::{LedgerError, Result};
use crate::types::{ActorId, ApplicationId, InstanceId, PolicyId, UnitId};

pub use engine::{PolicyReadiness, SurchargeEngine, SurchargeRunReport};

/// how a surcharge amount is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurchargeKind {
    /// the policy value as a flat amount
    Fixed,
    /// percentage of the instance final amount
    PercentOfOriginal,
    /// percentage of the current balance
    PercentOfBalance,
    /// percentage of the running total; computed on the same base as
    /// `PercentOfOriginal` until accumulation semantics are settled
    PercentOfRunningTotal,
}

impl SurchargeKind {
    pub fn is_percentage(&self) -> bool {
        !matches!(self, SurchargeKind::Fixed)
    }
}

/// eligibility filter, all filters of a policy must match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "filter", content = "value", rename_all = "snake_case")]
pub enum SurchargeFilter {
    CategoryEquals(String),
    /// case-insensitive substring of the charge name
    NameContains(String),
    DaysOverdueGreaterThan(u32),
}

impl SurchargeFilter {
    pub fn matches(&self, instance: &ChargeInstance, today: NaiveDate) -> bool {
        match self {
            SurchargeFilter::CategoryEquals(category) => instance.category.eq_ignore_ascii_case(category),
            SurchargeFilter::NameContains(fragment) => instance
                .name
                .to_lowercase()
                .contains(&fragment.to_lowercase()),
            SurchargeFilter::DaysOverdueGreaterThan(days) => instance.days_overdue(today) > i64::from(*days),
        }
    }
}

/// configurable late-payment fee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurchargePolicy {
    pub id: PolicyId,
    pub name: String,
    pub kind: SurchargeKind,
    /// flat amount for `Fixed`, percentage otherwise
    pub value: Decimal,
    /// inclusive threshold: an instance whose balance equals `min_debt` is eligible
    pub min_debt: Money,
    /// charge categories in scope, empty means every category
    pub categories: Vec<String>,
    pub filters: Vec<SurchargeFilter>,
    pub recurring: bool,
    pub frequency_days: Option<u32>,
    pub valid_from: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub active: bool,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

impl SurchargePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::validation("surcharge policy needs a name"));
        }
        if self.value <= Decimal::ZERO {
            return Err(LedgerError::validation("surcharge value must be positive"));
        }
        if self.kind.is_percentage() && self.value > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation(format!(
                "surcharge percentage {} exceeds 100",
                self.value
            )));
        }
        if self.min_debt.is_negative() {
            return Err(LedgerError::validation("minimum debt must not be negative"));
        }
        if self.recurring && self.frequency_days.map_or(true, |d| d == 0) {
            return Err(LedgerError::validation("recurring policies need a frequency of at least one day"));
        }
        if let Some(until) = self.valid_until {
            if until < self.valid_from {
                return Err(LedgerError::validation("validity window ends before it starts"));
            }
        }
        for filter in &self.filters {
            match filter {
                SurchargeFilter::CategoryEquals(s) | SurchargeFilter::NameContains(s) if s.trim().is_empty() => {
                    return Err(LedgerError::validation("surcharge filters must not be blank"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn is_within_window(&self, today: NaiveDate) -> bool {
        today >= self.valid_from && self.valid_until.map_or(true, |until| today <= until)
    }

    /// active and inside its validity window
    pub fn is_runnable(&self, today: NaiveDate) -> bool {
        self.active && self.is_within_window(today)
    }

    /// eligibility of one instance, ignoring prior applications
    pub fn matches(&self, instance: &ChargeInstance, today: NaiveDate) -> bool {
        instance.status == crate::types::ChargeStatus::Overdue
            && instance.balance.is_positive()
            && instance.balance >= self.min_debt
            && (self.categories.is_empty()
                || self.categories.iter().any(|c| c.eq_ignore_ascii_case(&instance.category)))
            && self.filters.iter().all(|f| f.matches(instance, today))
    }

    /// surcharge amount for an instance in its current state
    pub fn compute_amount(&self, instance: &ChargeInstance) -> Money {
        match self.kind {
            SurchargeKind::Fixed => Money::from_decimal(self.value),
            SurchargeKind::PercentOfOriginal | SurchargeKind::PercentOfRunningTotal => {
                instance.final_amount.percentage(Percentage::from_decimal(self.value))
            }
            SurchargeKind::PercentOfBalance => instance.balance.percentage(Percentage::from_decimal(self.value)),
        }
    }

    /// base the amount was computed from, kept on the audit record
    pub fn base_amount(&self, instance: &ChargeInstance) -> Money {
        match self.kind {
            SurchargeKind::Fixed => Money::ZERO,
            SurchargeKind::PercentOfOriginal | SurchargeKind::PercentOfRunningTotal => instance.final_amount,
            SurchargeKind::PercentOfBalance => instance.balance,
        }
    }
}

/// request to create a surcharge policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurchargePolicyRequest {
    pub name: String,
    pub kind: SurchargeKind,
    pub value: Decimal,
    /// inclusive, see `SurchargePolicy::min_debt`
    pub min_debt: Money,
    pub categories: Vec<String>,
    pub filters: Vec<SurchargeFilter>,
    pub recurring: bool,
    pub frequency_days: Option<u32>,
    pub valid_from: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub created_by: ActorId,
}

impl SurchargePolicyRequest {
    pub fn into_policy(self, now: DateTime<Utc>) -> SurchargePolicy {
        SurchargePolicy {
            id: uuid::Uuid::new_v4(),
            name: self.name.trim().to_string(),
            kind: self.kind,
            value: self.value,
            min_debt: self.min_debt,
            categories: self.categories,
            filters: self.filters,
            recurring: self.recurring,
            frequency_days: if self.recurring { self.frequency_days } else { None },
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            active: true,
            created_by: self.created_by,
            created_at: now,
        }
    }
}

/// audit record of a surcharge applied to one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurchargeApplication {
    pub id: ApplicationId,
    pub policy_id: PolicyId,
    pub instance_id: InstanceId,
    pub unit_id: UnitId,
    pub amount: Money,
    pub base_amount: Money,
    pub balance_after: Money,
    pub applied_on: NaiveDate,
    pub applied_at: DateTime<Utc>,
}
