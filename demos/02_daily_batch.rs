/// daily batch - recurring maintenance and late fees across three months
use std::sync::Arc;

use community_ledger_rs::chrono::{Duration, NaiveDate, TimeZone, Utc};
use community_ledger_rs::{
    ChargeScope, Decimal, InMemoryDirectory, IssueChargeRequest, Ledger, LedgerConfig, Money,
    NotificationService, RecordingSender, RecurrencePeriod, SafeTimeProvider, StaticDocumentGenerator,
    SurchargeFilter, SurchargeKind, SurchargePolicyRequest, TimeSource,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let directory = Arc::new(InMemoryDirectory::new());
    for n in 1..=3 {
        let unit = directory.add_unit("Torre A", &format!("10{}", n));
        directory.add_resident(unit, &format!("Depto 10{}", n), Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
    }

    let mut config = LedgerConfig::default();
    config.notifications.admin_recipients = vec!["administracion".to_string()];
    let sender = Arc::new(RecordingSender::new());
    let mut ledger = Ledger::new(
        config,
        directory,
        Arc::new(StaticDocumentGenerator::new("https://docs.example.com/receipts")),
        NotificationService::started(sender.clone()),
    )?;

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap()));
    let controller = time.test_control().unwrap();

    let master = ledger.issue_charges(
        IssueChargeRequest {
            name: "Mantenimiento".to_string(),
            category: "maintenance".to_string(),
            amount: Money::from_major(500),
            issue_date: None,
            due_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            recurrence: Some(RecurrencePeriod::Monthly),
            next_generation_date: Some(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
            scope: ChargeScope::All,
            created_by: "admin".to_string(),
            discounts: vec![],
        },
        &time,
    )?;

    ledger.create_surcharge_policy(
        SurchargePolicyRequest {
            name: "Recargo mensual 5%".to_string(),
            kind: SurchargeKind::PercentOfBalance,
            value: Decimal::from(5),
            min_debt: Money::from_major(100),
            categories: vec!["maintenance".to_string()],
            filters: vec![SurchargeFilter::DaysOverdueGreaterThan(0)],
            recurring: true,
            frequency_days: Some(30),
            valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            valid_until: None,
            created_by: "admin".to_string(),
        },
        &time,
    )?;

    // run the daily batch every day for three months
    for _ in 0..90 {
        controller.advance(Duration::days(1));
        let run = ledger.run_daily(&time);
        if !run.regeneration.succeeded.is_empty() || !run.surcharges.succeeded.is_empty() {
            println!(
                "{}: {} | {}",
                run.regeneration.run_date,
                run.regeneration.summary(),
                run.surcharges.summary()
            );
        }
    }

    let template = ledger.template(master.template.id)?;
    println!(
        "master next generation {:?}, last cycle due {:?}",
        template.next_generation_date, template.last_cycle_due_date
    );
    println!("notifications sent: {}", sender.sent().len());
    Ok(())
}
