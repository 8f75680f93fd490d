use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
    },

    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        reason: String,
    },

    #[error("batch item {item_id} failed: {source}")]
    BatchItem {
        item_id: Uuid,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("invalid configuration: {message}")]
    Configuration {
        message: String,
    },

    #[error("persistence error: {message}")]
    Persistence {
        message: String,
    },
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        LedgerError::Conflict {
            message: message.into(),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        LedgerError::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// wrap a failure of one batch item
    pub fn batch_item(item_id: Uuid, source: LedgerError) -> Self {
        LedgerError::BatchItem {
            item_id,
            source: Box::new(source),
        }
    }

    pub(crate) fn allocation_exceeds_balance(instance_id: Uuid, allocated: Money, balance: Money) -> Self {
        LedgerError::validation(format!(
            "allocation of {} exceeds balance {} of charge {}",
            allocated, balance, instance_id
        ))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// failure reported by an external collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}
