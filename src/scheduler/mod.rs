//! daily batch jobs: charge regeneration and surcharge application.
//!
//! every item runs in its own transaction; a failing item is recorded in
//! the report and the batch moves on.
pub mod regeneration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::UnitDirectory;
use crate::config::LedgerConfig;
use crate::errors::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::store::{Committed, LedgerStore};
use crate::surcharges::{PolicyReadiness, SurchargeEngine, SurchargeRunReport};
use crate::types::{PolicyId, TemplateId};

pub use regeneration::{RegeneratedCycle, Regenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJob {
    ChargeRegeneration,
    SurchargeApplication,
}

impl BatchJob {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchJob::ChargeRegeneration => "charge_regeneration",
            BatchJob::SurchargeApplication => "surcharge_application",
        }
    }
}

/// successes and isolated failures of one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub job: BatchJob,
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub succeeded: Vec<Uuid>,
    /// each entry is a `LedgerError::BatchItem`
    pub failed: Vec<LedgerError>,
}

impl BatchReport {
    pub fn new(job: BatchJob, started_at: DateTime<Utc>) -> Self {
        Self {
            job,
            run_date: started_at.date_naive(),
            started_at,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn record_success(&mut self, item_id: Uuid) {
        self.succeeded.push(item_id);
    }

    pub fn record_failure(&mut self, item_id: Uuid, error: LedgerError) {
        warn!(job = self.job.as_str(), item = %item_id, error = %error, "batch item failed");
        self.failed.push(LedgerError::batch_item(item_id, error));
    }

    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// one-line summary for administrators
    pub fn summary(&self) -> String {
        format!(
            "{} on {}: {} succeeded, {} failed",
            self.job.as_str(),
            self.run_date,
            self.succeeded.len(),
            self.failed.len()
        )
    }
}

/// a batch report plus per-item results and the events its commits produced
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub report: BatchReport,
    pub items: Vec<T>,
    pub events: Vec<LedgerEvent>,
}

/// runs the daily jobs against a store
pub struct RecurrenceScheduler<'a> {
    store: &'a mut LedgerStore,
    directory: &'a dyn UnitDirectory,
    config: &'a LedgerConfig,
}

impl<'a> RecurrenceScheduler<'a> {
    pub fn new(store: &'a mut LedgerStore, directory: &'a dyn UnitDirectory, config: &'a LedgerConfig) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    /// generate the next cycle of one master
    pub fn regenerate_template(&mut self, master_id: TemplateId, now: DateTime<Utc>) -> Result<Committed<RegeneratedCycle>> {
        let regenerator = Regenerator::new(self.directory, self.config.regeneration.skip_inactive_units);
        let today = now.date_naive();
        self.store
            .transaction(now, |tx| regenerator.regenerate(tx, master_id, today))
    }

    /// regenerate every master due today, one transaction each
    pub fn run_regeneration(&mut self, now: DateTime<Utc>) -> BatchOutcome<RegeneratedCycle> {
        let today = now.date_naive();
        let mut outcome = BatchOutcome {
            report: BatchReport::new(BatchJob::ChargeRegeneration, now),
            items: Vec::new(),
            events: Vec::new(),
        };

        for master_id in Regenerator::due_templates(self.store.tables(), today) {
            match self.regenerate_template(master_id, now) {
                Ok(committed) => {
                    outcome.report.record_success(master_id);
                    outcome.events.extend(committed.events);
                    outcome.items.push(committed.value);
                }
                Err(e) => outcome.report.record_failure(master_id, e),
            }
        }

        info!(
            processed = outcome.report.processed(),
            failed = outcome.report.failed.len(),
            "charge regeneration finished"
        );
        outcome
    }

    /// flip past-due pending charges to overdue
    pub fn mark_overdue(&mut self, now: DateTime<Utc>) -> Result<Committed<usize>> {
        let ids = SurchargeEngine::overdue_candidates(
            self.store.tables(),
            now.date_naive(),
            self.config.surcharges.grace_days,
        );
        self.store.transaction(now, |tx| SurchargeEngine::mark_overdue(tx, &ids))
    }

    /// apply one policy to every eligible instance, one transaction per instance
    pub fn run_policy(&mut self, policy_id: PolicyId, now: DateTime<Utc>) -> Result<(SurchargeRunReport, Vec<LedgerEvent>)> {
        let today = now.date_naive();
        let policy = self.store.tables().policy(policy_id)?.clone();
        let readiness = SurchargeEngine::readiness(self.store.tables(), &policy, today);
        let mut report = SurchargeRunReport::new(policy_id, today, readiness);
        let mut events = Vec::new();
        if readiness != PolicyReadiness::Ready {
            info!(policy = %policy.name, readiness = ?readiness, "surcharge policy not run");
            return Ok((report, events));
        }

        let (eligible, skipped) = SurchargeEngine::candidates(self.store.tables(), &policy, today);
        report.skipped = skipped;
        for instance_id in eligible {
            match self
                .store
                .transaction(now, |tx| SurchargeEngine::apply(tx, policy_id, instance_id, today))
            {
                Ok(committed) => {
                    events.extend(committed.events);
                    report.applied.push(committed.value);
                }
                Err(e) => {
                    warn!(policy = %policy.name, instance = %instance_id, error = %e, "surcharge not applied");
                    report.failures.push(LedgerError::batch_item(instance_id, e));
                }
            }
        }

        info!(
            policy = %policy.name,
            applied = report.applied.len(),
            skipped = report.skipped,
            failed = report.failures.len(),
            "surcharge policy run"
        );
        Ok((report, events))
    }

    /// run every active policy whose validity window includes today
    pub fn run_surcharges(&mut self, now: DateTime<Utc>) -> BatchOutcome<SurchargeRunReport> {
        let today = now.date_naive();
        let mut outcome = BatchOutcome {
            report: BatchReport::new(BatchJob::SurchargeApplication, now),
            items: Vec::new(),
            events: Vec::new(),
        };

        if self.config.surcharges.mark_overdue_before_run {
            match self.mark_overdue(now) {
                Ok(committed) => outcome.events.extend(committed.events),
                Err(e) => warn!(error = %e, "marking overdue charges failed"),
            }
        }

        let policies: Vec<PolicyId> = self
            .store
            .tables()
            .policies
            .values()
            .filter(|p| p.is_runnable(today))
            .map(|p| p.id)
            .collect();

        for policy_id in policies {
            match self.run_policy(policy_id, now) {
                Ok((run, events)) => {
                    for application in &run.applied {
                        outcome.report.record_success(application.instance_id);
                    }
                    outcome.report.failed.extend(run.failures.iter().cloned());
                    outcome.events.extend(events);
                    outcome.items.push(run);
                }
                Err(e) => outcome.report.record_failure(policy_id, e),
            }
        }

        info!(
            policies = outcome.items.len(),
            applied = outcome.report.succeeded.len(),
            failed = outcome.report.failed.len(),
            "surcharge batch finished"
        );
        outcome
    }
}
