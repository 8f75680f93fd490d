use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::store::{LedgerTables, Transaction};
use crate::types::{ChargeStatus, InstanceId, PolicyId};

use super::{SurchargeApplication, SurchargePolicy};

/// whether a policy may run today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyReadiness {
    Ready,
    Inactive,
    OutsideWindow,
    /// recurring policy applied too recently
    WaitingUntil(NaiveDate),
}

/// outcome of running one policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurchargeRunReport {
    pub policy_id: PolicyId,
    pub run_date: NaiveDate,
    pub readiness: PolicyReadiness,
    pub applied: Vec<SurchargeApplication>,
    /// matching instances already surcharged in the current window
    pub skipped: usize,
    pub failures: Vec<LedgerError>,
}

impl SurchargeRunReport {
    pub fn new(policy_id: PolicyId, run_date: NaiveDate, readiness: PolicyReadiness) -> Self {
        Self {
            policy_id,
            run_date,
            readiness,
            applied: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn total_applied(&self) -> crate::decimal::Money {
        self.applied.iter().map(|a| a.amount).sum()
    }
}

/// evaluates surcharge policies against overdue instances
pub struct SurchargeEngine;

impl SurchargeEngine {
    /// policy-level gate: active, in window and, for recurring policies,
    /// at least `frequency_days` since the policy last applied anywhere
    pub fn readiness(tables: &LedgerTables, policy: &SurchargePolicy, today: NaiveDate) -> PolicyReadiness {
        if !policy.active {
            return PolicyReadiness::Inactive;
        }
        if !policy.is_within_window(today) {
            return PolicyReadiness::OutsideWindow;
        }
        if policy.recurring {
            if let (Some(last), Some(frequency)) = (tables.last_application_date(policy.id), policy.frequency_days) {
                let next = last + Duration::days(i64::from(frequency));
                if today < next {
                    return PolicyReadiness::WaitingUntil(next);
                }
            }
        }
        PolicyReadiness::Ready
    }

    /// has this policy already surcharged the instance in its current window
    pub fn already_applied(
        tables: &LedgerTables,
        policy: &SurchargePolicy,
        instance_id: InstanceId,
        today: NaiveDate,
    ) -> bool {
        let applications = tables.applications_for(policy.id, instance_id);
        match (policy.recurring, policy.frequency_days) {
            (true, Some(frequency)) => applications
                .iter()
                .any(|a| (today - a.applied_on).num_days() < i64::from(frequency)),
            _ => !applications.is_empty(),
        }
    }

    /// matching instances split into (to apply, already applied count)
    pub fn candidates(tables: &LedgerTables, policy: &SurchargePolicy, today: NaiveDate) -> (Vec<InstanceId>, usize) {
        let mut eligible = Vec::new();
        let mut skipped = 0;
        for instance in tables.instances.values() {
            if !policy.matches(instance, today) {
                continue;
            }
            if Self::already_applied(tables, policy, instance.id, today) {
                skipped += 1;
            } else {
                eligible.push(instance.id);
            }
        }
        (eligible, skipped)
    }

    /// apply one policy to one instance inside the caller's transaction
    pub fn apply(
        tx: &mut Transaction,
        policy_id: PolicyId,
        instance_id: InstanceId,
        today: NaiveDate,
    ) -> Result<SurchargeApplication> {
        let now = tx.now();
        let policy = tx.policy(policy_id)?.clone();

        // eligibility is re-checked against the staged state
        let instance = tx.instance(instance_id)?;
        if !policy.matches(instance, today) {
            return Err(LedgerError::validation(format!(
                "charge {} is not eligible for surcharge {}",
                instance_id, policy.name
            )));
        }
        if Self::already_applied(tx, &policy, instance_id, today) {
            return Err(LedgerError::conflict(format!(
                "surcharge {} already applied to charge {} in this window",
                policy.name, instance_id
            )));
        }

        let amount = policy.compute_amount(instance);
        let base_amount = policy.base_amount(instance);
        if !amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "surcharge {} computes to {} for charge {}",
                policy.name, amount, instance_id
            )));
        }

        let instance = tx.instance_mut(instance_id)?;
        instance.add_surcharge(amount)?;
        let (unit_id, balance_after) = (instance.unit_id, instance.balance);

        let application = SurchargeApplication {
            id: Uuid::new_v4(),
            policy_id,
            instance_id,
            unit_id,
            amount,
            base_amount,
            balance_after,
            applied_on: today,
            applied_at: now,
        };
        tx.applications.insert(application.id, application.clone());
        tx.emit(LedgerEvent::SurchargeApplied {
            policy_id,
            instance_id,
            unit_id,
            amount,
            new_balance: balance_after,
            timestamp: now,
        });
        Ok(application)
    }

    /// pending instances with a balance whose due date (plus grace) has passed
    pub fn overdue_candidates(tables: &LedgerTables, today: NaiveDate, grace_days: u32) -> Vec<InstanceId> {
        tables
            .instances
            .values()
            .filter(|i| {
                i.status == ChargeStatus::Pending
                    && i.balance.is_positive()
                    && i.days_overdue(today) > i64::from(grace_days)
            })
            .map(|i| i.id)
            .collect()
    }

    /// flip the given instances to overdue
    pub fn mark_overdue(tx: &mut Transaction, ids: &[InstanceId]) -> Result<usize> {
        let now = tx.now();
        let mut marked = 0;
        for id in ids {
            let instance = tx.instance_mut(*id)?;
            if instance.status != ChargeStatus::Pending {
                continue;
            }
            instance.status = ChargeStatus::Overdue;
            let (instance_id, unit_id, balance) = (instance.id, instance.unit_id, instance.balance);
            marked += 1;
            tx.emit(LedgerEvent::ChargeOverdue {
                instance_id,
                unit_id,
                balance,
                timestamp: now,
            });
        }
        Ok(marked)
    }
}
