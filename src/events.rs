use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::collaborators::{Notification, Recipient, UnitDirectory};
use crate::config::NotificationConfig;
use crate::decimal::Money;
use crate::types::{owner_of_record, ActorId, InstanceId, PolicyId, ReceiptId, ResidentId, TemplateId, UnitId};

/// events recorded inside a transaction and dispatched after it commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    // issuance events
    ChargesIssued {
        template_id: TemplateId,
        name: String,
        amount: Money,
        due_date: NaiveDate,
        units: Vec<UnitId>,
        timestamp: DateTime<Utc>,
    },
    TemplateCancelled {
        template_id: TemplateId,
        cancelled_instances: usize,
        timestamp: DateTime<Utc>,
    },
    DiscountApplied {
        instance_id: InstanceId,
        unit_id: UnitId,
        amount: Money,
        new_balance: Money,
        timestamp: DateTime<Utc>,
    },

    // payment events
    ReceiptSubmitted {
        receipt_id: ReceiptId,
        folio: String,
        unit_id: UnitId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    ReceiptApproved {
        receipt_id: ReceiptId,
        folio: String,
        unit_id: UnitId,
        resident_id: Option<ResidentId>,
        amount: Money,
        approver: ActorId,
        document_url: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ReceiptRejected {
        receipt_id: ReceiptId,
        folio: String,
        unit_id: UnitId,
        resident_id: Option<ResidentId>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ChargePaid {
        instance_id: InstanceId,
        unit_id: UnitId,
        timestamp: DateTime<Utc>,
    },
    CreditPosted {
        unit_id: UnitId,
        amount: Money,
        new_balance: Money,
        timestamp: DateTime<Utc>,
    },

    // surcharge events
    ChargeOverdue {
        instance_id: InstanceId,
        unit_id: UnitId,
        balance: Money,
        timestamp: DateTime<Utc>,
    },
    SurchargeApplied {
        policy_id: PolicyId,
        instance_id: InstanceId,
        unit_id: UnitId,
        amount: Money,
        new_balance: Money,
        timestamp: DateTime<Utc>,
    },

    // recurrence events
    TemplateRegenerated {
        master_id: TemplateId,
        cycle_template_id: TemplateId,
        cycle: u32,
        next_generation_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::ChargesIssued { .. } => "charges_issued",
            LedgerEvent::TemplateCancelled { .. } => "template_cancelled",
            LedgerEvent::DiscountApplied { .. } => "discount_applied",
            LedgerEvent::ReceiptSubmitted { .. } => "receipt_submitted",
            LedgerEvent::ReceiptApproved { .. } => "receipt_approved",
            LedgerEvent::ReceiptRejected { .. } => "receipt_rejected",
            LedgerEvent::ChargePaid { .. } => "charge_paid",
            LedgerEvent::CreditPosted { .. } => "credit_posted",
            LedgerEvent::ChargeOverdue { .. } => "charge_overdue",
            LedgerEvent::SurchargeApplied { .. } => "surcharge_applied",
            LedgerEvent::TemplateRegenerated { .. } => "template_regenerated",
        }
    }

    /// notifications this event produces once its transaction committed
    pub fn notifications(&self, directory: &dyn UnitDirectory, config: &NotificationConfig) -> Vec<Notification> {
        if !config.enabled {
            return Vec::new();
        }

        match self {
            LedgerEvent::ChargesIssued {
                template_id,
                name,
                amount,
                due_date,
                units,
                ..
            } if config.notify_on_issue => {
                let data = json!({
                    "event": self.name(),
                    "template_id": template_id,
                    "amount": amount,
                    "due_date": due_date,
                });
                units
                    .iter()
                    .flat_map(|unit_id| directory.active_residents(*unit_id))
                    .map(|resident| {
                        Notification::new(
                            Recipient::Resident(resident.id),
                            "New charge",
                            format!("{} for {} is due on {}", name, amount, due_date),
                            data.clone(),
                        )
                    })
                    .collect()
            }
            LedgerEvent::DiscountApplied {
                instance_id,
                unit_id,
                amount,
                new_balance,
                ..
            } if config.notify_on_issue => vec![Notification::new(
                unit_owner(directory, *unit_id),
                "Discount applied",
                format!("A discount of {} was applied, the balance is now {}", amount, new_balance),
                json!({ "event": self.name(), "instance_id": instance_id }),
            )],
            LedgerEvent::ReceiptSubmitted {
                receipt_id,
                folio,
                amount,
                ..
            } => config
                .admin_recipients
                .iter()
                .map(|admin| {
                    Notification::new(
                        Recipient::Administrator(admin.clone()),
                        "Payment receipt to review",
                        format!("Receipt {} for {} is waiting for review", folio, amount),
                        json!({ "event": self.name(), "receipt_id": receipt_id }),
                    )
                })
                .collect(),
            LedgerEvent::ReceiptApproved {
                receipt_id,
                folio,
                unit_id,
                resident_id,
                amount,
                document_url,
                ..
            } if config.notify_on_approval => vec![Notification::new(
                resident_or_owner(directory, *unit_id, *resident_id),
                "Payment approved",
                format!("Your payment {} for {} was approved", folio, amount),
                json!({
                    "event": self.name(),
                    "receipt_id": receipt_id,
                    "document_url": document_url,
                }),
            )],
            LedgerEvent::ReceiptRejected {
                receipt_id,
                folio,
                unit_id,
                resident_id,
                reason,
                ..
            } if config.notify_on_rejection => vec![Notification::new(
                resident_or_owner(directory, *unit_id, *resident_id),
                "Payment rejected",
                format!("Your payment {} was rejected: {}", folio, reason),
                json!({ "event": self.name(), "receipt_id": receipt_id }),
            )],
            LedgerEvent::CreditPosted {
                unit_id,
                amount,
                new_balance,
                ..
            } if config.notify_on_approval => vec![Notification::new(
                unit_owner(directory, *unit_id),
                "Credit balance updated",
                format!("{} was added to your credit, which is now {}", amount, new_balance),
                json!({ "event": self.name(), "unit_id": unit_id }),
            )],
            LedgerEvent::SurchargeApplied {
                policy_id,
                instance_id,
                unit_id,
                amount,
                new_balance,
                ..
            } if config.notify_on_surcharge => vec![Notification::new(
                unit_owner(directory, *unit_id),
                "Late payment surcharge",
                format!("A surcharge of {} was applied, the balance is now {}", amount, new_balance),
                json!({
                    "event": self.name(),
                    "policy_id": policy_id,
                    "instance_id": instance_id,
                }),
            )],
            _ => Vec::new(),
        }
    }
}

/// the owner of record, or the unit itself when it has no active resident
fn unit_owner(directory: &dyn UnitDirectory, unit_id: UnitId) -> Recipient {
    let residents = directory.active_residents(unit_id);
    match owner_of_record(&residents) {
        Some(owner) => Recipient::Resident(owner.id),
        None => Recipient::Unit(unit_id),
    }
}

fn resident_or_owner(directory: &dyn UnitDirectory, unit_id: UnitId, resident_id: Option<ResidentId>) -> Recipient {
    match resident_id {
        Some(id) => Recipient::Resident(id),
        None => unit_owner(directory, unit_id),
    }
}

/// collects events raised during one unit of work
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<LedgerEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
