pub mod charges;
pub mod collaborators;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod payments;
pub mod scheduler;
pub mod store;
pub mod surcharges;
pub mod types;

// re-export key types
pub use charges::{
    compute_balance, compute_final_amount, ChargeInstance, ChargeIssuer, ChargeScope, ChargeTemplate,
    Discount, DiscountRequest, IssueChargeRequest, IssuedCharges, TemplateUpdate,
};
pub use collaborators::{
    FailingDocumentGenerator, InMemoryDirectory, Notification, NotificationSender, NotificationService,
    ReceiptDocument, ReceiptDocumentGenerator, Recipient, RecordingSender, ServiceState,
    StaticDocumentGenerator, UnitDirectory,
};
pub use config::LedgerConfig;
pub use decimal::{Money, Percentage};
pub use errors::{CollaboratorError, LedgerError, Result};
pub use events::{LedgerEvent, Outbox};
pub use ledger::{AccountStatement, DailyRun, Ledger};
pub use payments::{
    AllocationLine, AllocationStrategy, ApprovalOutcome, BankDetails, ManualPaymentRequest,
    PaymentAllocation, PaymentAllocator, PaymentReceipt, ResidentReceiptRequest, UnitCreditBalance,
};
pub use scheduler::{BatchJob, BatchReport, RecurrenceScheduler, RegeneratedCycle};
pub use store::{LedgerStore, LedgerTables, Transaction};
pub use surcharges::{
    PolicyReadiness, SurchargeApplication, SurchargeEngine, SurchargeFilter, SurchargeKind,
    SurchargePolicy, SurchargePolicyRequest, SurchargeRunReport,
};
pub use types::{
    owner_of_record, AllocationKind, ChargeStatus, DiscountType, PaymentMethod, RecurrencePeriod,
    ReceiptStatus, Resident, TemplateStatus, Unit,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
