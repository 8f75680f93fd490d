/// payment approval - resident receipt, admin payment with surplus, credit reuse
use std::sync::Arc;

use community_ledger_rs::chrono::{NaiveDate, TimeZone, Utc};
use community_ledger_rs::{
    AllocationStrategy, BankDetails, ChargeScope, InMemoryDirectory, IssueChargeRequest, Ledger, LedgerConfig,
    ManualPaymentRequest, Money, NotificationService, PaymentMethod, RecordingSender, ResidentReceiptRequest,
    SafeTimeProvider, StaticDocumentGenerator, TimeSource,
};
use tracing_subscriber::EnvFilter;

fn charge(name: &str, amount: i64, due: NaiveDate) -> IssueChargeRequest {
    IssueChargeRequest {
        name: name.to_string(),
        category: "maintenance".to_string(),
        amount: Money::from_major(amount),
        issue_date: None,
        due_date: due,
        recurrence: None,
        next_generation_date: None,
        scope: ChargeScope::All,
        created_by: "admin".to_string(),
        discounts: vec![],
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let directory = Arc::new(InMemoryDirectory::new());
    let unit = directory.add_unit("Calle Roble", "12");
    let resident = directory.add_resident(unit, "Ana", Utc.with_ymd_and_hms(2022, 3, 1, 0, 0, 0).unwrap());

    let mut ledger = Ledger::new(
        LedgerConfig::default(),
        directory,
        Arc::new(StaticDocumentGenerator::new("https://docs.example.com/receipts")),
        NotificationService::started(Arc::new(RecordingSender::new())),
    )?;
    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap()));

    let january = ledger.issue_charges(charge("Enero", 400, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()), &time)?;
    ledger.issue_charges(charge("Febrero", 500, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()), &time)?;

    // resident reports a partial transfer for january
    let receipt = ledger.submit_receipt(
        ResidentReceiptRequest {
            resident_id: resident,
            instance_id: january.instances[0],
            amount: Money::from_major(150),
            payment_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            method: PaymentMethod::Transfer,
            bank: BankDetails {
                bank: Some("Banorte".to_string()),
                reference: Some("TRX-88123".to_string()),
                account_last_digits: Some("4410".to_string()),
            },
            evidence: Some("uploads/ana-enero.jpg".to_string()),
            notes: None,
        },
        &time,
    )?;
    let approved = ledger.approve_receipt(receipt.id, "tesoreria", &time)?;
    println!(
        "{} approved, document at {}",
        approved.receipt.folio,
        approved.receipt.document.map(|d| d.url).unwrap_or_default()
    );

    // cash at the office covering everything with change left over
    let cash = ledger.record_manual_payment(
        ManualPaymentRequest {
            unit_id: unit,
            amount: Money::from_major(800),
            payment_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            method: PaymentMethod::Cash,
            bank: BankDetails::default(),
            strategy: AllocationStrategy::OldestFirst,
            recorded_by: "tesoreria".to_string(),
            notes: Some("pago en caseta".to_string()),
        },
        &time,
    )?;
    ledger.approve_receipt(cash.id, "tesoreria", &time)?;
    println!("credit after cash payment: {}", ledger.unit_credit(unit));

    // march arrives and the credit pays part of it
    ledger.issue_charges(charge("Marzo", 500, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()), &time)?;
    let spent = ledger.apply_unit_credit(unit, "tesoreria", &time)?;
    println!("credit receipt {} for {}", spent.receipt.folio, spent.receipt.total);

    println!("{}", serde_json::to_string_pretty(&ledger.account_statement(unit))?);
    Ok(())
}
