use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::store::Transaction;
use crate::types::{ActorId, ChargeStatus, DiscountType, InstanceId, RecurrencePeriod, TemplateId, TemplateStatus, Unit};

use super::{ChargeInstance, ChargeScope, ChargeTemplate, Discount};

/// discount supplied at issue time or applied later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRequest {
    pub kind: DiscountType,
    pub value: Decimal,
    pub reason: String,
    pub applied_by: ActorId,
}

/// fields of a new billing campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueChargeRequest {
    pub name: String,
    pub category: String,
    pub amount: Money,
    /// defaults to the issuing day
    pub issue_date: Option<NaiveDate>,
    pub due_date: NaiveDate,
    pub recurrence: Option<RecurrencePeriod>,
    /// first regeneration day; defaults to the due date for recurring charges
    pub next_generation_date: Option<NaiveDate>,
    pub scope: ChargeScope,
    pub created_by: ActorId,
    /// applied to every instance of the fan-out
    #[serde(default)]
    pub discounts: Vec<DiscountRequest>,
}

impl IssueChargeRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::validation("charge name must not be blank"));
        }
        if self.category.trim().is_empty() {
            return Err(LedgerError::validation("charge category must not be blank"));
        }
        if !self.amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "charge amount must be positive, got {}",
                self.amount
            )));
        }
        let issue_date = self.issue_date.unwrap_or(today);
        if self.due_date < issue_date {
            return Err(LedgerError::validation(format!(
                "due date {} is before issue date {}",
                self.due_date, issue_date
            )));
        }
        match (self.recurrence, self.next_generation_date) {
            (None, Some(_)) => {
                return Err(LedgerError::validation(
                    "next generation date given for a charge without recurrence",
                ))
            }
            (Some(_), Some(next)) if next < issue_date => {
                return Err(LedgerError::validation(format!(
                    "next generation date {} is before issue date {}",
                    next, issue_date
                )))
            }
            _ => {}
        }
        for discount in &self.discounts {
            discount.validate()?;
        }
        Ok(())
    }

    /// template record for this request, not yet stored
    pub fn into_template(self, today: NaiveDate, now: DateTime<Utc>) -> ChargeTemplate {
        let next_generation_date = self
            .recurrence
            .map(|_| self.next_generation_date.unwrap_or(self.due_date));
        let (due_anchor_day, generation_anchor_day) =
            ChargeTemplate::anchor_days(self.due_date, next_generation_date);

        ChargeTemplate {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            category: self.category.trim().to_string(),
            amount: self.amount,
            issue_date: self.issue_date.unwrap_or(today),
            due_date: self.due_date,
            recurrence: self.recurrence,
            next_generation_date,
            scope: self.scope,
            status: TemplateStatus::Active,
            created_by: self.created_by,
            created_at: now,
            parent_template: None,
            cycle: 0,
            due_anchor_day,
            generation_anchor_day,
            last_cycle_due_date: None,
            last_cycle_template: None,
        }
    }
}

impl DiscountRequest {
    pub fn validate(&self) -> Result<()> {
        if self.value <= Decimal::ZERO {
            return Err(LedgerError::validation("discount value must be positive"));
        }
        if self.kind == DiscountType::Percentage && self.value > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation(format!(
                "discount percentage {} exceeds 100",
                self.value
            )));
        }
        if self.reason.trim().is_empty() {
            return Err(LedgerError::validation("discount needs a reason"));
        }
        Ok(())
    }
}

/// administrator edit of an issued template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateUpdate {
    pub amount: Option<Money>,
    pub due_date: Option<NaiveDate>,
    pub status: Option<TemplateStatus>,
}

impl TemplateUpdate {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.due_date.is_none() && self.status.is_none()
    }
}

/// result of a fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedCharges {
    pub template: ChargeTemplate,
    pub instances: Vec<InstanceId>,
}

/// creates templates and their per-unit instances inside a transaction
pub struct ChargeIssuer;

impl ChargeIssuer {
    /// store the template and one instance per unit, then apply any
    /// creation-time discounts to each instance
    pub fn fan_out(
        tx: &mut Transaction,
        template: ChargeTemplate,
        units: &[Unit],
        discounts: &[DiscountRequest],
    ) -> Result<IssuedCharges> {
        if units.is_empty() {
            return Err(LedgerError::validation(format!(
                "charge {} resolves to no units",
                template.name
            )));
        }
        if tx.templates.contains_key(&template.id) {
            return Err(LedgerError::conflict(format!("template {} already exists", template.id)));
        }

        let now = tx.now();
        let mut instances = Vec::with_capacity(units.len());
        for unit in units {
            let instance = ChargeInstance::new(&template, unit.id, now);
            let id = instance.id;
            tx.instances.insert(id, instance);
            for discount in discounts {
                Self::apply_discount(tx, id, discount)?;
            }
            instances.push(id);
        }

        debug!(template = %template.id, units = units.len(), "charge fanned out");
        tx.emit(LedgerEvent::ChargesIssued {
            template_id: template.id,
            name: template.name.clone(),
            amount: template.amount,
            due_date: template.due_date,
            units: units.iter().map(|u| u.id).collect(),
            timestamp: now,
        });
        tx.templates.insert(template.id, template.clone());

        Ok(IssuedCharges { template, instances })
    }

    /// discount one instance and keep the audit record
    pub fn apply_discount(tx: &mut Transaction, instance_id: InstanceId, request: &DiscountRequest) -> Result<Discount> {
        request.validate()?;
        let now = tx.now();

        let instance = tx.instance_mut(instance_id)?;
        let reduction = instance.apply_discount(request.kind, request.value)?;
        instance.settle_status(now);
        let (unit_id, new_balance, paid) = (instance.unit_id, instance.balance, instance.status == ChargeStatus::Paid);

        let discount = Discount {
            id: Uuid::new_v4(),
            instance_id,
            kind: request.kind,
            value: request.value,
            amount: reduction,
            reason: request.reason.trim().to_string(),
            applied_by: request.applied_by.clone(),
            applied_at: now,
        };
        tx.discounts.insert(discount.id, discount.clone());
        tx.emit(LedgerEvent::DiscountApplied {
            instance_id,
            unit_id,
            amount: reduction,
            new_balance,
            timestamp: now,
        });
        if paid {
            tx.emit(LedgerEvent::ChargePaid {
                instance_id,
                unit_id,
                timestamp: now,
            });
        }
        Ok(discount)
    }

    /// apply an administrator edit, propagating to the instances it may touch
    pub fn update_template(tx: &mut Transaction, id: TemplateId, update: &TemplateUpdate) -> Result<ChargeTemplate> {
        if update.is_empty() {
            return Err(LedgerError::validation("template update changes nothing"));
        }
        let today = tx.today();
        let now = tx.now();
        let template = tx.template(id)?.clone();

        if template.status == TemplateStatus::Cancelled {
            return Err(LedgerError::conflict(format!(
                "template {} is cancelled and cannot be edited",
                template.name
            )));
        }

        if let Some(amount) = update.amount {
            if !amount.is_positive() {
                return Err(LedgerError::validation(format!(
                    "charge amount must be positive, got {}",
                    amount
                )));
            }
            for instance_id in Self::instance_ids(tx, id) {
                let instance = tx.instance_mut(instance_id)?;
                if instance.status.is_terminal() || instance.has_payments() {
                    continue;
                }
                instance.amount = amount;
                instance.recompute();
                instance.settle_status(now);
            }
            tx.template_mut(id)?.amount = amount;
        }

        if let Some(due_date) = update.due_date {
            if due_date < template.issue_date {
                return Err(LedgerError::validation(format!(
                    "due date {} is before issue date {}",
                    due_date, template.issue_date
                )));
            }
            for instance_id in Self::instance_ids(tx, id) {
                let instance = tx.instance_mut(instance_id)?;
                if instance.status.is_terminal() {
                    continue;
                }
                instance.due_date = due_date;
                if instance.status == ChargeStatus::Overdue && due_date >= today {
                    instance.status = ChargeStatus::Pending;
                }
            }
            let stored = tx.template_mut(id)?;
            stored.due_date = due_date;
            if stored.last_cycle_due_date.is_none() {
                stored.due_anchor_day = due_date.day();
            }
        }

        match update.status {
            Some(TemplateStatus::Cancelled) => {
                Self::cancel_template(tx, id)?;
            }
            Some(status) => tx.template_mut(id)?.status = status,
            None => {}
        }

        Ok(tx.template(id)?.clone())
    }

    /// cancel a template and every instance not already paid
    pub fn cancel_template(tx: &mut Transaction, id: TemplateId) -> Result<usize> {
        let now = tx.now();
        let template = tx.template_mut(id)?;
        if template.status == TemplateStatus::Cancelled {
            return Err(LedgerError::conflict(format!("template {} is already cancelled", template.name)));
        }
        template.status = TemplateStatus::Cancelled;
        template.recurrence = None;
        template.next_generation_date = None;

        let mut cancelled = 0;
        for instance_id in Self::instance_ids(tx, id) {
            let instance = tx.instance_mut(instance_id)?;
            if instance.status.is_terminal() {
                continue;
            }
            instance.status = ChargeStatus::Cancelled;
            cancelled += 1;
        }

        tx.emit(LedgerEvent::TemplateCancelled {
            template_id: id,
            cancelled_instances: cancelled,
            timestamp: now,
        });
        Ok(cancelled)
    }

    /// remove a template and its instances when no money has touched them
    pub fn delete_template(tx: &mut Transaction, id: TemplateId) -> Result<usize> {
        let name = tx.template(id)?.name.clone();
        if tx
            .templates
            .values()
            .any(|t| t.is_recurring() && t.last_cycle_template == Some(id))
        {
            return Err(LedgerError::conflict(format!(
                "template {} is the latest cycle of a recurring charge and cannot be deleted",
                name
            )));
        }
        let instance_ids = Self::instance_ids(tx, id);

        for instance_id in &instance_ids {
            let instance = tx.instance(*instance_id)?;
            if instance.has_payments() {
                return Err(LedgerError::conflict(format!(
                    "template {} has approved payments and cannot be deleted",
                    name
                )));
            }
            let referenced = !tx.allocations_for_instance(*instance_id).is_empty()
                || tx.receipts.values().any(|r| r.target_instance == Some(*instance_id));
            if referenced {
                return Err(LedgerError::conflict(format!(
                    "template {} is referenced by payment receipts and cannot be deleted",
                    name
                )));
            }
        }

        for instance_id in &instance_ids {
            tx.instances.remove(instance_id);
        }
        tx.discounts.retain(|_, d| !instance_ids.contains(&d.instance_id));
        tx.templates.remove(&id);
        Ok(instance_ids.len())
    }

    fn instance_ids(tx: &Transaction, template_id: TemplateId) -> Vec<InstanceId> {
        tx.instances_for_template(template_id).iter().map(|i| i.id).collect()
    }
}
