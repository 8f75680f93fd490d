use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UnitId = Uuid;
pub type ResidentId = Uuid;
pub type TemplateId = Uuid;
pub type InstanceId = Uuid;
pub type ReceiptId = Uuid;
pub type AllocationId = Uuid;
pub type PolicyId = Uuid;
pub type ApplicationId = Uuid;
pub type DiscountId = Uuid;

/// who performed an administrative action
pub type ActorId = String;

/// recurrence unit of a charge template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePeriod {
    Weekly,
    Biweekly,
    Monthly,
    Bimonthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl RecurrencePeriod {
    /// length of the period in calendar months, none for day-based periods
    pub fn months(&self) -> Option<u32> {
        match self {
            RecurrencePeriod::Weekly | RecurrencePeriod::Biweekly => None,
            RecurrencePeriod::Monthly => Some(1),
            RecurrencePeriod::Bimonthly => Some(2),
            RecurrencePeriod::Quarterly => Some(3),
            RecurrencePeriod::Semiannual => Some(6),
            RecurrencePeriod::Annual => Some(12),
        }
    }

    /// advance a date by one period.
    ///
    /// month-based periods land on `anchor_day` of the target month, clamped
    /// to the last day of that month, so a schedule anchored on the 31st
    /// goes Jan 31 -> Feb 29 -> Mar 31 instead of drifting to the 29th.
    pub fn advance(&self, date: NaiveDate, anchor_day: u32) -> NaiveDate {
        match self {
            RecurrencePeriod::Weekly => date + Duration::days(7),
            RecurrencePeriod::Biweekly => date + Duration::days(14),
            _ => {
                let months = self.months().unwrap_or(1);
                add_months_anchored(date, months, anchor_day)
            }
        }
    }
}

/// add calendar months landing on the anchor day, clamped to month end
pub fn add_months_anchored(date: NaiveDate, months: u32, anchor_day: u32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = anchor_day.clamp(1, days_in_month(year, month));

    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// template lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Active,
    Pending,
    Cancelled,
}

/// charge instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// issued and not yet due
    Pending,
    /// fully paid
    Paid,
    /// past due with an outstanding balance
    Overdue,
    /// voided through template cancellation
    Cancelled,
}

impl ChargeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChargeStatus::Paid | ChargeStatus::Cancelled)
    }

    /// still owes money
    pub fn is_open(&self) -> bool {
        matches!(self, ChargeStatus::Pending | ChargeStatus::Overdue)
    }
}

/// payment receipt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Approved,
    Rejected,
}

/// how the money was paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Transfer,
    Deposit,
    Cash,
    Card,
    Check,
    /// consumed from the unit credit balance
    Credit,
}

/// how an allocation was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    AutomaticOldestFirst,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Fixed,
    Percentage,
}

/// a housing unit as seen by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    /// street or tower grouping
    pub street: String,
    pub number: String,
    pub active: bool,
}

/// a resident of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resident {
    pub id: ResidentId,
    pub unit_id: UnitId,
    pub name: String,
    pub active: bool,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

/// the resident who stands for a unit: earliest registration among the
/// active residents, ties broken by lowest id
pub fn owner_of_record(residents: &[Resident]) -> Option<&Resident> {
    residents
        .iter()
        .filter(|r| r.active)
        .min_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)))
}
