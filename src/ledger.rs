use std::sync::Arc;

use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::charges::{
    ChargeInstance, ChargeIssuer, ChargeTemplate, Discount, DiscountRequest, IssueChargeRequest, IssuedCharges,
    TemplateUpdate,
};
use crate::collaborators::{
    Notification, NotificationService, Recipient, ReceiptDocumentGenerator, UnitDirectory,
};
use crate::collaborators::notification::DispatchSummary;
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::payments::{
    AllocationStrategy, ApprovalOutcome, ApprovalWorkflow, ManualPaymentRequest, PaymentAllocation,
    PaymentAllocator, PaymentReceipt, ResidentReceiptRequest, UnitCreditBalance,
};
use crate::scheduler::{BatchReport, RecurrenceScheduler, RegeneratedCycle};
use crate::store::{Committed, LedgerStore};
use crate::surcharges::{SurchargePolicy, SurchargePolicyRequest, SurchargeRunReport};
use crate::types::{
    owner_of_record, InstanceId, PaymentMethod, PolicyId, ReceiptId, ReceiptStatus, TemplateId, UnitId,
};

/// everything the ledger knows about one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatement {
    pub unit_id: UnitId,
    /// ordered by due date
    pub instances: Vec<ChargeInstance>,
    pub receipts: Vec<PaymentReceipt>,
    pub total_outstanding: Money,
    pub credit: Money,
}

/// reports of one daily scheduler pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRun {
    pub regeneration: BatchReport,
    pub surcharges: BatchReport,
    pub surcharge_runs: Vec<SurchargeRunReport>,
}

/// the charge and payment ledger of one community
pub struct Ledger {
    config: LedgerConfig,
    store: LedgerStore,
    directory: Arc<dyn UnitDirectory>,
    documents: Arc<dyn ReceiptDocumentGenerator>,
    notifications: NotificationService,
}

impl Ledger {
    pub fn new(
        config: LedgerConfig,
        directory: Arc<dyn UnitDirectory>,
        documents: Arc<dyn ReceiptDocumentGenerator>,
        notifications: NotificationService,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: LedgerStore::new(),
            directory,
            documents,
            notifications,
        })
    }

    /// resume from a previously persisted store
    pub fn with_store(mut self, store: LedgerStore) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationService {
        &mut self.notifications
    }

    pub fn snapshot_json(&self) -> Result<String> {
        self.store.snapshot_json()
    }

    // charge issuance

    /// create a template and fan it out to every unit in its scope
    #[instrument(skip(self, request, time), fields(name = %request.name, amount = %request.amount))]
    pub fn issue_charges(&mut self, request: IssueChargeRequest, time: &SafeTimeProvider) -> Result<IssuedCharges> {
        let now = time.now();
        let today = now.date_naive();
        request.validate(today)?;

        let units = request.scope.resolve(self.directory.as_ref())?;
        let discounts = request.discounts.clone();
        let template = request.into_template(today, now);

        let committed = self
            .store
            .transaction(now, |tx| ChargeIssuer::fan_out(tx, template, &units, &discounts))?;
        info!(
            template_id = %committed.value.template.id,
            instances = committed.value.instances.len(),
            "charges issued"
        );
        Ok(self.publish(committed))
    }

    #[instrument(skip(self, update, time))]
    pub fn update_template(
        &mut self,
        template_id: TemplateId,
        update: TemplateUpdate,
        time: &SafeTimeProvider,
    ) -> Result<ChargeTemplate> {
        let committed = self
            .store
            .transaction(time.now(), |tx| ChargeIssuer::update_template(tx, template_id, &update))?;
        Ok(self.publish(committed))
    }

    /// cancel a template, cascading to every unpaid instance
    #[instrument(skip(self, time))]
    pub fn cancel_template(&mut self, template_id: TemplateId, time: &SafeTimeProvider) -> Result<usize> {
        let committed = self
            .store
            .transaction(time.now(), |tx| ChargeIssuer::cancel_template(tx, template_id))?;
        info!(cancelled = committed.value, "template cancelled");
        Ok(self.publish(committed))
    }

    #[instrument(skip(self, time))]
    pub fn delete_template(&mut self, template_id: TemplateId, time: &SafeTimeProvider) -> Result<usize> {
        let committed = self
            .store
            .transaction(time.now(), |tx| ChargeIssuer::delete_template(tx, template_id))?;
        info!(removed = committed.value, "template deleted");
        Ok(self.publish(committed))
    }

    #[instrument(skip(self, request, time))]
    pub fn apply_discount(
        &mut self,
        instance_id: InstanceId,
        request: DiscountRequest,
        time: &SafeTimeProvider,
    ) -> Result<Discount> {
        let committed = self
            .store
            .transaction(time.now(), |tx| ChargeIssuer::apply_discount(tx, instance_id, &request))?;
        Ok(self.publish(committed))
    }

    // payments

    /// a resident reports a payment against one of their unit's charges
    #[instrument(skip(self, request, time), fields(resident = %request.resident_id, amount = %request.amount))]
    pub fn submit_receipt(&mut self, request: ResidentReceiptRequest, time: &SafeTimeProvider) -> Result<PaymentReceipt> {
        let now = time.now();
        let resident = self
            .directory
            .resident(request.resident_id)
            .ok_or_else(|| LedgerError::not_found("resident", request.resident_id))?;
        if !resident.active {
            return Err(LedgerError::validation(format!("resident {} is not active", resident.name)));
        }
        if !request.amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "payment amount must be positive, got {}",
                request.amount
            )));
        }

        let prefix = self.config.amounts.folio_prefix.clone();
        let committed = self.store.transaction(now, |tx| {
            let instance = tx.instance(request.instance_id)?;
            if instance.unit_id != resident.unit_id {
                return Err(LedgerError::validation(format!(
                    "charge {} does not belong to the resident's unit",
                    instance.id
                )));
            }
            if !instance.status.is_open() {
                return Err(LedgerError::validation(format!(
                    "charge {} is {:?} and cannot take payments",
                    instance.id, instance.status
                )));
            }
            if request.amount > instance.balance {
                return Err(LedgerError::allocation_exceeds_balance(
                    instance.id,
                    request.amount,
                    instance.balance,
                ));
            }

            let folio = tx.next_folio(&prefix, now.date_naive());
            let receipt = PaymentReceipt {
                id: Uuid::new_v4(),
                folio,
                unit_id: resident.unit_id,
                resident_id: Some(resident.id),
                target_instance: Some(request.instance_id),
                total: request.amount,
                credited_amount: Money::ZERO,
                payment_date: request.payment_date,
                method: request.method,
                bank: request.bank.clone(),
                evidence: request.evidence.clone(),
                notes: request.notes.clone(),
                status: ReceiptStatus::Pending,
                submitted_by: resident.id.to_string(),
                submitted_at: now,
                reviewed_by: None,
                reviewed_at: None,
                rejection_reason: None,
                document: None,
            };
            tx.receipts.insert(receipt.id, receipt.clone());
            tx.emit(LedgerEvent::ReceiptSubmitted {
                receipt_id: receipt.id,
                folio: receipt.folio.clone(),
                unit_id: receipt.unit_id,
                amount: receipt.total,
                timestamp: now,
            });
            Ok(receipt)
        })?;
        info!(folio = %committed.value.folio, "receipt submitted");
        Ok(self.publish(committed))
    }

    /// an administrator records a payment for a unit; allocations are
    /// planned now and applied when the receipt is approved
    #[instrument(skip(self, request, time), fields(unit = %request.unit_id, amount = %request.amount))]
    pub fn record_manual_payment(
        &mut self,
        request: ManualPaymentRequest,
        time: &SafeTimeProvider,
    ) -> Result<PaymentReceipt> {
        let now = time.now();
        self.directory
            .unit(request.unit_id)
            .ok_or_else(|| LedgerError::not_found("unit", request.unit_id))?;
        if request.recorded_by.trim().is_empty() {
            return Err(LedgerError::validation("manual payments need the recording administrator"));
        }
        let residents = self.directory.active_residents(request.unit_id);
        let owner = owner_of_record(&residents).map(|r| r.id);

        let allocator = PaymentAllocator::new(self.config.amounts.epsilon);
        let prefix = self.config.amounts.folio_prefix.clone();
        let committed = self.store.transaction(now, |tx| {
            let plan = match &request.strategy {
                AllocationStrategy::Manual(lines) => allocator.manual(tx, request.unit_id, request.amount, lines)?,
                AllocationStrategy::OldestFirst => allocator.oldest_first(tx, request.unit_id, request.amount)?,
            };

            let folio = tx.next_folio(&prefix, now.date_naive());
            let receipt = PaymentReceipt {
                id: Uuid::new_v4(),
                folio,
                unit_id: request.unit_id,
                resident_id: owner,
                target_instance: None,
                total: request.amount,
                credited_amount: plan.leftover,
                payment_date: request.payment_date,
                method: request.method,
                bank: request.bank.clone(),
                evidence: None,
                notes: request.notes.clone(),
                status: ReceiptStatus::Pending,
                submitted_by: request.recorded_by.clone(),
                submitted_at: now,
                reviewed_by: None,
                reviewed_at: None,
                rejection_reason: None,
                document: None,
            };
            for allocation in plan.into_allocations(receipt.id, &request.recorded_by, now) {
                tx.allocations.insert(allocation.id, allocation);
            }
            tx.receipts.insert(receipt.id, receipt.clone());
            tx.emit(LedgerEvent::ReceiptSubmitted {
                receipt_id: receipt.id,
                folio: receipt.folio.clone(),
                unit_id: receipt.unit_id,
                amount: receipt.total,
                timestamp: now,
            });
            Ok(receipt)
        })?;
        info!(
            folio = %committed.value.folio,
            credited = %committed.value.credited_amount,
            "manual payment recorded"
        );
        Ok(self.publish(committed))
    }

    /// approve a pending receipt; balances, credit and the official document
    /// commit together or not at all
    #[instrument(skip(self, time))]
    pub fn approve_receipt(
        &mut self,
        receipt_id: ReceiptId,
        approver: &str,
        time: &SafeTimeProvider,
    ) -> Result<ApprovalOutcome> {
        let workflow = ApprovalWorkflow::new(self.documents.as_ref(), self.config.amounts.epsilon);
        let committed = self
            .store
            .transaction(time.now(), |tx| workflow.approve(tx, receipt_id, approver))?;
        info!(
            folio = %committed.value.receipt.folio,
            paid = committed.value.paid_instances.len(),
            "receipt approved"
        );
        Ok(self.publish(committed))
    }

    #[instrument(skip(self, time))]
    pub fn reject_receipt(
        &mut self,
        receipt_id: ReceiptId,
        reviewer: &str,
        reason: &str,
        time: &SafeTimeProvider,
    ) -> Result<PaymentReceipt> {
        let workflow = ApprovalWorkflow::new(self.documents.as_ref(), self.config.amounts.epsilon);
        let committed = self
            .store
            .transaction(time.now(), |tx| workflow.reject(tx, receipt_id, reviewer, reason))?;
        info!(folio = %committed.value.folio, "receipt rejected");
        Ok(self.publish(committed))
    }

    /// spend a unit's credit balance on its oldest outstanding charges
    #[instrument(skip(self, time))]
    pub fn apply_unit_credit(
        &mut self,
        unit_id: UnitId,
        administrator: &str,
        time: &SafeTimeProvider,
    ) -> Result<ApprovalOutcome> {
        let now = time.now();
        let available = self.unit_credit(unit_id);
        if !available.is_positive() {
            return Err(LedgerError::validation(format!("unit {} has no credit to apply", unit_id)));
        }

        let epsilon = self.config.amounts.epsilon;
        let allocator = PaymentAllocator::new(epsilon);
        let workflow = ApprovalWorkflow::without_documents(epsilon);
        let prefix = self.config.amounts.folio_prefix.clone();
        let committed = self.store.transaction(now, |tx| {
            let plan = allocator.oldest_first(tx, unit_id, available)?;
            let spent = plan.allocated();
            if !spent.is_positive() {
                return Err(LedgerError::validation(format!(
                    "unit {} has no outstanding charges",
                    unit_id
                )));
            }

            let folio = tx.next_folio(&prefix, now.date_naive());
            let receipt = PaymentReceipt {
                id: Uuid::new_v4(),
                folio,
                unit_id,
                resident_id: None,
                target_instance: None,
                total: spent,
                credited_amount: Money::ZERO,
                payment_date: now.date_naive(),
                method: PaymentMethod::Credit,
                bank: Default::default(),
                evidence: None,
                notes: Some("applied from unit credit".to_string()),
                status: ReceiptStatus::Pending,
                submitted_by: administrator.to_string(),
                submitted_at: now,
                reviewed_by: None,
                reviewed_at: None,
                rejection_reason: None,
                document: None,
            };
            for allocation in plan.into_allocations(receipt.id, administrator, now) {
                tx.allocations.insert(allocation.id, allocation);
            }
            tx.receipts.insert(receipt.id, receipt.clone());
            tx.credit_mut(unit_id, now).withdraw(receipt.id, spent, now)?;

            workflow.approve(tx, receipt.id, administrator)
        })?;
        info!(spent = %committed.value.receipt.total, "unit credit applied");
        Ok(self.publish(committed))
    }

    // surcharges

    #[instrument(skip(self, request, time), fields(name = %request.name))]
    pub fn create_surcharge_policy(
        &mut self,
        request: SurchargePolicyRequest,
        time: &SafeTimeProvider,
    ) -> Result<SurchargePolicy> {
        let now = time.now();
        let policy = request.into_policy(now);
        policy.validate()?;
        let committed = self.store.transaction(now, |tx| {
            tx.policies.insert(policy.id, policy.clone());
            Ok(policy)
        })?;
        Ok(self.publish(committed))
    }

    pub fn set_policy_active(
        &mut self,
        policy_id: PolicyId,
        active: bool,
        time: &SafeTimeProvider,
    ) -> Result<SurchargePolicy> {
        let committed = self.store.transaction(time.now(), |tx| {
            let policy = tx.policy_mut(policy_id)?;
            policy.active = active;
            Ok(policy.clone())
        })?;
        Ok(self.publish(committed))
    }

    /// flip past-due pending charges to overdue
    #[instrument(skip(self, time))]
    pub fn mark_overdue(&mut self, time: &SafeTimeProvider) -> Result<usize> {
        let committed = self.scheduler().mark_overdue(time.now())?;
        info!(marked = committed.value, "overdue charges marked");
        Ok(self.publish(committed))
    }

    /// apply one policy now
    #[instrument(skip(self, time))]
    pub fn run_surcharge_policy(&mut self, policy_id: PolicyId, time: &SafeTimeProvider) -> Result<SurchargeRunReport> {
        let (report, events) = self.scheduler().run_policy(policy_id, time.now())?;
        self.dispatch(&events);
        Ok(report)
    }

    // recurrence

    #[instrument(skip(self, time))]
    pub fn regenerate_template(&mut self, template_id: TemplateId, time: &SafeTimeProvider) -> Result<RegeneratedCycle> {
        let committed = self.scheduler().regenerate_template(template_id, time.now())?;
        Ok(self.publish(committed))
    }

    /// regeneration batch; the summary goes to the administrators
    #[instrument(skip(self, time))]
    pub fn run_regeneration(&mut self, time: &SafeTimeProvider) -> BatchReport {
        let outcome = self.scheduler().run_regeneration(time.now());
        self.dispatch(&outcome.events);
        self.notify_administrators(&outcome.report);
        outcome.report
    }

    #[instrument(skip(self, time))]
    pub fn run_surcharge_batch(&mut self, time: &SafeTimeProvider) -> (BatchReport, Vec<SurchargeRunReport>) {
        let outcome = self.scheduler().run_surcharges(time.now());
        self.dispatch(&outcome.events);
        (outcome.report, outcome.items)
    }

    /// the daily pass: regeneration first, then surcharges
    pub fn run_daily(&mut self, time: &SafeTimeProvider) -> DailyRun {
        let regeneration = self.run_regeneration(time);
        let (surcharges, surcharge_runs) = self.run_surcharge_batch(time);
        info!(
            regenerated = regeneration.succeeded.len(),
            surcharged = surcharges.succeeded.len(),
            failures = regeneration.failed.len() + surcharges.failed.len(),
            "daily ledger batch finished"
        );
        DailyRun {
            regeneration,
            surcharges,
            surcharge_runs,
        }
    }

    /// daily pass with system time
    pub fn run_daily_now(&mut self) -> DailyRun {
        let time = SafeTimeProvider::new(hourglass_rs::TimeSource::System);
        self.run_daily(&time)
    }

    // queries

    pub fn template(&self, template_id: TemplateId) -> Result<&ChargeTemplate> {
        self.store.tables().template(template_id)
    }

    pub fn instance(&self, instance_id: InstanceId) -> Result<&ChargeInstance> {
        self.store.tables().instance(instance_id)
    }

    pub fn receipt(&self, receipt_id: ReceiptId) -> Result<&PaymentReceipt> {
        self.store.tables().receipt(receipt_id)
    }

    pub fn receipts_for_unit(&self, unit_id: UnitId) -> Vec<&PaymentReceipt> {
        self.store.tables().receipts_for_unit(unit_id)
    }

    pub fn allocations_for_receipt(&self, receipt_id: ReceiptId) -> Vec<PaymentAllocation> {
        self.store.tables().allocations_for_receipt(receipt_id)
    }

    /// open charges of a unit, oldest due first
    pub fn outstanding_for_unit(&self, unit_id: UnitId) -> Vec<&ChargeInstance> {
        self.store.tables().outstanding_for_unit(unit_id)
    }

    pub fn unit_credit(&self, unit_id: UnitId) -> Money {
        self.store.tables().credit(unit_id).map_or(Money::ZERO, |c| c.balance)
    }

    pub fn credit_history(&self, unit_id: UnitId) -> Option<&UnitCreditBalance> {
        self.store.tables().credit(unit_id)
    }

    pub fn account_statement(&self, unit_id: UnitId) -> AccountStatement {
        let tables = self.store.tables();
        let instances: Vec<ChargeInstance> = tables.instances_for_unit(unit_id).into_iter().cloned().collect();
        let total_outstanding = tables.outstanding_for_unit(unit_id).iter().map(|i| i.balance).sum();
        AccountStatement {
            unit_id,
            instances,
            receipts: tables.receipts_for_unit(unit_id).into_iter().cloned().collect(),
            total_outstanding,
            credit: self.unit_credit(unit_id),
        }
    }

    // internals

    fn scheduler(&mut self) -> RecurrenceScheduler<'_> {
        RecurrenceScheduler::new(&mut self.store, self.directory.as_ref(), &self.config)
    }

    /// hand the outbox of a committed transaction to the notification service
    fn publish<T>(&mut self, committed: Committed<T>) -> T {
        self.dispatch(&committed.events);
        committed.value
    }

    fn dispatch(&mut self, events: &[LedgerEvent]) -> DispatchSummary {
        let notifications: Vec<Notification> = events
            .iter()
            .flat_map(|e| e.notifications(self.directory.as_ref(), &self.config.notifications))
            .collect();
        if notifications.is_empty() {
            return DispatchSummary::default();
        }
        let summary = self.notifications.dispatch_all(&notifications);
        if summary.failed > 0 || summary.skipped > 0 {
            warn!(
                delivered = summary.delivered,
                failed = summary.failed,
                skipped = summary.skipped,
                "some notifications were not delivered"
            );
        }
        summary
    }

    fn notify_administrators(&mut self, report: &BatchReport) {
        if !self.config.notifications.enabled {
            return;
        }
        let failures: Vec<String> = report.failed.iter().map(|e| e.to_string()).collect();
        let notifications: Vec<Notification> = self
            .config
            .notifications
            .admin_recipients
            .iter()
            .map(|admin| {
                Notification::new(
                    Recipient::Administrator(admin.clone()),
                    "Ledger batch summary",
                    report.summary(),
                    json!({
                        "job": report.job.as_str(),
                        "run_date": report.run_date,
                        "succeeded": report.succeeded,
                        "failures": failures,
                    }),
                )
            })
            .collect();
        self.notifications.dispatch_all(&notifications);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{FailingDocumentGenerator, InMemoryDirectory, RecordingSender, StaticDocumentGenerator};
    use crate::charges::ChargeScope;
    use crate::payments::{AllocationLine, BankDetails};
    use crate::surcharges::SurchargeKind;
    use crate::types::{ChargeStatus, DiscountType, RecurrencePeriod};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;

    struct Fixture {
        ledger: Ledger,
        directory: Arc<InMemoryDirectory>,
        sender: Arc<RecordingSender>,
        time: SafeTimeProvider,
        units: Vec<UnitId>,
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn fixture_with(units: usize, documents: Arc<dyn ReceiptDocumentGenerator>) -> Fixture {
        let directory = Arc::new(InMemoryDirectory::new());
        let registered = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let units: Vec<UnitId> = (0..units)
            .map(|i| {
                let unit = directory.add_unit("Calle Roble", &format!("{}", i + 1));
                directory.add_resident(unit, &format!("Residente {}", i + 1), registered);
                unit
            })
            .collect();
        let sender = Arc::new(RecordingSender::new());
        let ledger = Ledger::new(
            LedgerConfig::default(),
            directory.clone(),
            documents,
            NotificationService::started(sender.clone()),
        )
        .unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));
        Fixture {
            ledger,
            directory,
            sender,
            time,
            units,
        }
    }

    fn fixture(units: usize) -> Fixture {
        fixture_with(units, Arc::new(StaticDocumentGenerator::new("https://docs.example.com/receipts")))
    }

    fn charge(name: &str, amount: i64, due: NaiveDate, scope: ChargeScope) -> IssueChargeRequest {
        IssueChargeRequest {
            name: name.to_string(),
            category: "maintenance".to_string(),
            amount: Money::from_major(amount),
            issue_date: None,
            due_date: due,
            recurrence: None,
            next_generation_date: None,
            scope,
            created_by: "admin".to_string(),
            discounts: vec![],
        }
    }

    fn manual_payment(unit_id: UnitId, amount: i64, strategy: AllocationStrategy) -> ManualPaymentRequest {
        ManualPaymentRequest {
            unit_id,
            amount: Money::from_major(amount),
            payment_date: date(2, 1),
            method: PaymentMethod::Transfer,
            bank: BankDetails::default(),
            strategy,
            recorded_by: "admin".to_string(),
            notes: None,
        }
    }

    fn resident_of(f: &Fixture, unit: UnitId) -> crate::types::ResidentId {
        f.directory.active_residents(unit)[0].id
    }

    fn resident_payment(
        directory: &InMemoryDirectory,
        unit: UnitId,
        instance_id: InstanceId,
        amount: Money,
    ) -> ResidentReceiptRequest {
        ResidentReceiptRequest {
            resident_id: directory.active_residents(unit)[0].id,
            instance_id,
            amount,
            payment_date: date(1, 15),
            method: PaymentMethod::Transfer,
            bank: BankDetails {
                bank: Some("BBVA".to_string()),
                reference: Some("0042".to_string()),
                account_last_digits: None,
            },
            evidence: Some("uploads/comprobante.jpg".to_string()),
            notes: None,
        }
    }

    #[test]
    fn test_issue_to_all_units() {
        let mut f = fixture(10);
        let issued = f
            .ledger
            .issue_charges(charge("Mantenimiento Enero", 500, date(1, 31), ChargeScope::All), &f.time)
            .unwrap();

        assert_eq!(issued.instances.len(), 10);
        for id in &issued.instances {
            assert_eq!(f.ledger.instance(*id).unwrap().balance, Money::from_major(500));
        }
        assert_eq!(f.sender.sent().len(), 10);
    }

    #[test]
    fn test_issue_unknown_scope_fails_cleanly() {
        let mut f = fixture(2);
        let result = f.ledger.issue_charges(
            charge("Cuota", 100, date(1, 31), ChargeScope::Units(vec![Uuid::new_v4()])),
            &f.time,
        );

        assert!(matches!(result, Err(LedgerError::Validation { .. })));
        assert!(f.ledger.store().tables().templates.is_empty());
        assert!(f.sender.sent().is_empty());
    }

    #[test]
    fn test_resident_pays_exact_balance() {
        let mut f = fixture(1);
        let unit = f.units[0];
        let issued = f
            .ledger
            .issue_charges(charge("Mantenimiento Enero", 500, date(1, 31), ChargeScope::All), &f.time)
            .unwrap();
        let instance_id = issued.instances[0];

        let receipt = f
            .ledger
            .submit_receipt(resident_payment(&f.directory, unit, instance_id, Money::from_major(500)), &f.time)
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Pending);
        assert!(receipt.folio.starts_with("REC-20240101-"));

        let outcome = f.ledger.approve_receipt(receipt.id, "admin", &f.time).unwrap();

        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(outcome.allocations[0].amount, Money::from_major(500));
        assert_eq!(outcome.paid_instances, vec![instance_id]);
        let instance = f.ledger.instance(instance_id).unwrap();
        assert_eq!(instance.balance, Money::ZERO);
        assert_eq!(instance.status, ChargeStatus::Paid);

        let stored = f.ledger.receipt(receipt.id).unwrap();
        assert_eq!(stored.status, ReceiptStatus::Approved);
        assert!(stored.document.is_some());

        let resident = resident_of(&f, unit);
        let to_resident = f.sender.sent_to(&Recipient::Resident(resident));
        assert!(to_resident.iter().any(|n| n.title == "Payment approved"));
    }

    #[test]
    fn test_resident_receipt_validation() {
        let mut f = fixture(2);
        let issued = f
            .ledger
            .issue_charges(charge("Cuota", 300, date(1, 31), ChargeScope::All), &f.time)
            .unwrap();
        let own = f.ledger.instance(issued.instances[0]).unwrap().clone();
        let foreign = f.ledger.instance(issued.instances[1]).unwrap().clone();

        let too_much = f
            .ledger
            .submit_receipt(resident_payment(&f.directory, own.unit_id, own.id, Money::from_major(301)), &f.time);
        assert!(matches!(too_much, Err(LedgerError::Validation { .. })));

        let wrong_unit = resident_payment(&f.directory, own.unit_id, foreign.id, Money::from_major(100));
        let result = f.ledger.submit_receipt(wrong_unit, &f.time);
        assert!(matches!(result, Err(LedgerError::Validation { .. })));

        let moved_out = resident_of(&f, own.unit_id);
        f.directory.set_resident_active(moved_out, false);
        let mut inactive = resident_payment(&f.directory, foreign.unit_id, own.id, Money::from_major(100));
        inactive.resident_id = moved_out;
        assert!(f.ledger.submit_receipt(inactive, &f.time).is_err());
        assert!(f.ledger.store().tables().receipts.is_empty());
    }

    #[test]
    fn test_oldest_first_manual_payment() {
        let mut f = fixture(1);
        let unit = f.units[0];
        let older = f
            .ledger
            .issue_charges(charge("Enero", 400, date(1, 31), ChargeScope::Units(vec![unit])), &f.time)
            .unwrap()
            .instances[0];
        let newer = f
            .ledger
            .issue_charges(charge("Febrero", 500, date(2, 29), ChargeScope::Units(vec![unit])), &f.time)
            .unwrap()
            .instances[0];

        let receipt = f
            .ledger
            .record_manual_payment(manual_payment(unit, 700, AllocationStrategy::OldestFirst), &f.time)
            .unwrap();
        assert_eq!(receipt.credited_amount, Money::ZERO);
        assert_eq!(f.ledger.allocations_for_receipt(receipt.id).len(), 2);

        // nothing moves until approval
        assert_eq!(f.ledger.instance(older).unwrap().balance, Money::from_major(400));

        f.ledger.approve_receipt(receipt.id, "admin", &f.time).unwrap();

        assert_eq!(f.ledger.instance(older).unwrap().balance, Money::ZERO);
        assert_eq!(f.ledger.instance(older).unwrap().status, ChargeStatus::Paid);
        assert_eq!(f.ledger.instance(newer).unwrap().balance, Money::from_major(200));
        assert_eq!(f.ledger.unit_credit(unit), Money::ZERO);
    }

    #[test]
    fn test_overpayment_becomes_credit_and_is_spent_later() {
        let mut f = fixture(1);
        let unit = f.units[0];
        f.ledger
            .issue_charges(charge("Enero", 400, date(1, 31), ChargeScope::All), &f.time)
            .unwrap();

        let receipt = f
            .ledger
            .record_manual_payment(manual_payment(unit, 550, AllocationStrategy::OldestFirst), &f.time)
            .unwrap();
        assert_eq!(receipt.credited_amount, Money::from_major(150));
        assert_eq!(f.ledger.unit_credit(unit), Money::ZERO);

        let outcome = f.ledger.approve_receipt(receipt.id, "admin", &f.time).unwrap();
        assert_eq!(outcome.credit_posted, Money::from_major(150));
        assert_eq!(f.ledger.unit_credit(unit), Money::from_major(150));

        let february = f
            .ledger
            .issue_charges(charge("Febrero", 100, date(2, 29), ChargeScope::All), &f.time)
            .unwrap()
            .instances[0];
        let spent = f.ledger.apply_unit_credit(unit, "admin", &f.time).unwrap();

        assert_eq!(spent.receipt.method, PaymentMethod::Credit);
        assert_eq!(spent.receipt.total, Money::from_major(100));
        assert!(spent.receipt.document.is_none());
        assert_eq!(f.ledger.instance(february).unwrap().status, ChargeStatus::Paid);
        assert_eq!(f.ledger.unit_credit(unit), Money::from_major(50));
        assert_eq!(f.ledger.credit_history(unit).unwrap().movements.len(), 2);

        // nothing left to pay
        assert!(f.ledger.apply_unit_credit(unit, "admin", &f.time).is_err());
        assert_eq!(f.ledger.unit_credit(unit), Money::from_major(50));
    }

    #[test]
    fn test_stale_allocation_rolls_back_approval() {
        let mut f = fixture(1);
        let unit = f.units[0];
        let instance_id = f
            .ledger
            .issue_charges(charge("Enero", 400, date(1, 31), ChargeScope::All), &f.time)
            .unwrap()
            .instances[0];

        let receipt = f
            .ledger
            .record_manual_payment(
                manual_payment(
                    unit,
                    400,
                    AllocationStrategy::Manual(vec![AllocationLine {
                        instance_id,
                        amount: Money::from_major(400),
                    }]),
                ),
                &f.time,
            )
            .unwrap();

        // the balance drops below the planned allocation before approval
        f.ledger
            .apply_discount(
                instance_id,
                DiscountRequest {
                    kind: DiscountType::Fixed,
                    value: dec!(50),
                    reason: "convenio".to_string(),
                    applied_by: "admin".to_string(),
                },
                &f.time,
            )
            .unwrap();

        let result = f.ledger.approve_receipt(receipt.id, "admin", &f.time);
        assert!(matches!(result, Err(LedgerError::Validation { .. })));

        let instance = f.ledger.instance(instance_id).unwrap();
        assert_eq!(instance.balance, Money::from_major(350));
        assert_eq!(instance.paid_amount, Money::ZERO);
        assert_eq!(f.ledger.receipt(receipt.id).unwrap().status, ReceiptStatus::Pending);
    }

    #[test]
    fn test_document_failure_aborts_approval() {
        let mut f = fixture_with(1, Arc::new(FailingDocumentGenerator));
        let unit = f.units[0];
        let instance_id = f
            .ledger
            .issue_charges(charge("Enero", 500, date(1, 31), ChargeScope::All), &f.time)
            .unwrap()
            .instances[0];
        let receipt = f
            .ledger
            .submit_receipt(resident_payment(&f.directory, unit, instance_id, Money::from_major(500)), &f.time)
            .unwrap();

        let result = f.ledger.approve_receipt(receipt.id, "admin", &f.time);

        assert!(matches!(result, Err(LedgerError::TransactionAborted { .. })));
        assert_eq!(f.ledger.instance(instance_id).unwrap().balance, Money::from_major(500));
        assert_eq!(f.ledger.receipt(receipt.id).unwrap().status, ReceiptStatus::Pending);
        assert!(f.ledger.allocations_for_receipt(receipt.id).is_empty());
    }

    #[test]
    fn test_notification_failure_keeps_commit() {
        let mut f = fixture(3);
        f.sender.set_failing(true);

        let issued = f
            .ledger
            .issue_charges(charge("Enero", 500, date(1, 31), ChargeScope::All), &f.time)
            .unwrap();

        assert_eq!(issued.instances.len(), 3);
        assert_eq!(f.ledger.store().tables().instances.len(), 3);
        assert_eq!(f.ledger.notifications().failed_count(), 3);
    }

    #[test]
    fn test_reject_then_decide_again() {
        let mut f = fixture(1);
        let unit = f.units[0];
        let instance_id = f
            .ledger
            .issue_charges(charge("Enero", 500, date(1, 31), ChargeScope::All), &f.time)
            .unwrap()
            .instances[0];
        let receipt = f
            .ledger
            .submit_receipt(resident_payment(&f.directory, unit, instance_id, Money::from_major(200)), &f.time)
            .unwrap();

        assert!(f.ledger.reject_receipt(receipt.id, "admin", "  ", &f.time).is_err());
        let rejected = f
            .ledger
            .reject_receipt(receipt.id, "admin", "comprobante ilegible", &f.time)
            .unwrap();
        assert_eq!(rejected.status, ReceiptStatus::Rejected);

        let again = f.ledger.approve_receipt(receipt.id, "admin", &f.time);
        assert!(matches!(again, Err(LedgerError::Conflict { .. })));
        assert_eq!(f.ledger.instance(instance_id).unwrap().balance, Money::from_major(500));
    }

    #[test]
    fn test_surcharge_on_overdue_balance() {
        let mut f = fixture(1);
        let instance_id = f
            .ledger
            .issue_charges(charge("Enero", 200, date(1, 31), ChargeScope::All), &f.time)
            .unwrap()
            .instances[0];
        let policy = f
            .ledger
            .create_surcharge_policy(
                SurchargePolicyRequest {
                    name: "Recargo 5%".to_string(),
                    kind: SurchargeKind::PercentOfBalance,
                    value: dec!(5),
                    min_debt: Money::from_major(100),
                    categories: vec!["maintenance".to_string()],
                    filters: vec![],
                    recurring: false,
                    frequency_days: None,
                    valid_from: date(1, 1),
                    valid_until: None,
                    created_by: "admin".to_string(),
                },
                &f.time,
            )
            .unwrap();

        f.time.test_control().unwrap().advance(Duration::days(31));
        assert_eq!(f.ledger.mark_overdue(&f.time).unwrap(), 1);

        let report = f.ledger.run_surcharge_policy(policy.id, &f.time).unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].amount, Money::from_major(10));
        assert_eq!(f.ledger.instance(instance_id).unwrap().balance, Money::from_major(210));

        // non-recurring: a second run skips the instance
        let rerun = f.ledger.run_surcharge_policy(policy.id, &f.time).unwrap();
        assert!(rerun.applied.is_empty());
        assert_eq!(rerun.skipped, 1);

        f.ledger.set_policy_active(policy.id, false, &f.time).unwrap();
        let inactive = f.ledger.run_surcharge_policy(policy.id, &f.time).unwrap();
        assert_eq!(inactive.readiness, crate::surcharges::PolicyReadiness::Inactive);
    }

    #[test]
    fn test_daily_run_regenerates_month_end() {
        let mut f = fixture(2);
        let mut request = charge("Mantenimiento", 500, date(1, 31), ChargeScope::All);
        request.recurrence = Some(RecurrencePeriod::Monthly);
        request.next_generation_date = Some(date(1, 31));
        let master = f.ledger.issue_charges(request, &f.time).unwrap().template.id;

        f.time.test_control().unwrap().advance(Duration::days(31));
        let run = f.ledger.run_daily(&f.time);

        assert_eq!(run.regeneration.succeeded, vec![master]);
        let stored = f.ledger.template(master).unwrap();
        assert_eq!(stored.next_generation_date, Some(date(2, 29)));
        let cycle_id = stored.last_cycle_template.unwrap();
        assert_eq!(f.ledger.template(cycle_id).unwrap().due_date, date(2, 29));
        assert_eq!(f.ledger.store().tables().instances_for_template(cycle_id).len(), 2);

        // same-day rerun is a no-op
        let templates = f.ledger.store().tables().templates.len();
        let rerun = f.ledger.run_daily(&f.time);
        assert!(rerun.regeneration.succeeded.is_empty());
        assert_eq!(f.ledger.store().tables().templates.len(), templates);
    }

    #[test]
    fn test_batch_summary_reaches_administrators() {
        let directory = Arc::new(InMemoryDirectory::new());
        let sender = Arc::new(RecordingSender::new());
        let mut config = LedgerConfig::default();
        config.notifications.admin_recipients = vec!["tesoreria".to_string()];
        let mut ledger = Ledger::new(
            config,
            directory,
            Arc::new(StaticDocumentGenerator::new("https://docs.example.com")),
            NotificationService::started(sender.clone()),
        )
        .unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 2, 1, 6, 0, 0).unwrap()));

        let report = ledger.run_regeneration(&time);
        assert_eq!(report.processed(), 0);

        let admin = sender.sent_to(&Recipient::Administrator("tesoreria".to_string()));
        assert_eq!(admin.len(), 1);
        assert_eq!(admin[0].message, "charge_regeneration on 2024-02-01: 0 succeeded, 0 failed");
    }

    #[test]
    fn test_account_statement_and_snapshot() {
        let mut f = fixture(1);
        let unit = f.units[0];
        f.ledger
            .issue_charges(charge("Enero", 400, date(1, 31), ChargeScope::All), &f.time)
            .unwrap();
        f.ledger
            .issue_charges(charge("Febrero", 500, date(2, 29), ChargeScope::All), &f.time)
            .unwrap();
        let receipt = f
            .ledger
            .record_manual_payment(manual_payment(unit, 100, AllocationStrategy::OldestFirst), &f.time)
            .unwrap();

        let statement = f.ledger.account_statement(unit);
        assert_eq!(statement.instances.len(), 2);
        assert_eq!(statement.instances[0].name, "Enero");
        assert_eq!(statement.receipts.len(), 1);
        assert_eq!(statement.total_outstanding, Money::from_major(900));
        assert_eq!(statement.credit, Money::ZERO);

        let json = f.ledger.snapshot_json().unwrap();
        let restored = LedgerStore::from_snapshot_json(&json).unwrap();
        assert_eq!(restored.tables(), f.ledger.store().tables());
        assert!(restored.tables().receipt(receipt.id).is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = LedgerConfig::default();
        config.amounts.folio_prefix = "R-E".to_string();
        let result = Ledger::new(
            config,
            Arc::new(InMemoryDirectory::new()),
            Arc::new(FailingDocumentGenerator),
            NotificationService::started(Arc::new(RecordingSender::new())),
        );
        assert!(matches!(result, Err(LedgerError::Configuration { .. })));
    }
}
