/// monthly billing - issue a charge to every unit and look at one account
use std::sync::Arc;

use community_ledger_rs::chrono::{NaiveDate, TimeZone, Utc};
use community_ledger_rs::{
    ChargeScope, InMemoryDirectory, IssueChargeRequest, Ledger, LedgerConfig, Money, NotificationService,
    RecordingSender, SafeTimeProvider, StaticDocumentGenerator, TimeSource,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ten houses on two streets, one resident each
    let directory = Arc::new(InMemoryDirectory::new());
    let registered = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let mut units = Vec::new();
    for (street, count) in [("Calle Roble", 6), ("Calle Pino", 4)] {
        for n in 1..=count {
            let unit = directory.add_unit(street, &n.to_string());
            directory.add_resident(unit, &format!("{} {}", street, n), registered);
            units.push(unit);
        }
    }

    let sender = Arc::new(RecordingSender::new());
    let mut ledger = Ledger::new(
        LedgerConfig::default(),
        directory,
        Arc::new(StaticDocumentGenerator::new("https://docs.example.com/receipts")),
        NotificationService::started(sender.clone()),
    )?;
    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));

    let issued = ledger.issue_charges(
        IssueChargeRequest {
            name: "Mantenimiento Enero".to_string(),
            category: "maintenance".to_string(),
            amount: Money::from_major(500),
            issue_date: None,
            due_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            recurrence: None,
            next_generation_date: None,
            scope: ChargeScope::All,
            created_by: "admin".to_string(),
            discounts: vec![],
        },
        &time,
    )?;
    println!("issued {} charges, {} notifications sent", issued.instances.len(), sender.sent().len());

    // pool fee only for one street
    ledger.issue_charges(
        IssueChargeRequest {
            name: "Alberca".to_string(),
            category: "amenities".to_string(),
            amount: Money::from_major(150),
            issue_date: None,
            due_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            recurrence: None,
            next_generation_date: None,
            scope: ChargeScope::Streets(vec!["Calle Pino".to_string()]),
            created_by: "admin".to_string(),
            discounts: vec![],
        },
        &time,
    )?;

    let statement = ledger.account_statement(units[9]);
    println!("{}", serde_json::to_string_pretty(&statement)?);

    Ok(())
}
