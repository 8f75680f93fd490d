use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};

/// ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub amounts: AmountConfig,
    pub notifications: NotificationConfig,
    pub surcharges: SurchargeConfig,
    pub regeneration: RegenerationConfig,
}

/// amount comparison and receipt numbering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountConfig {
    /// tolerance when matching allocation sums against receipt totals
    pub epsilon: Money,
    /// prefix of generated receipt folios
    pub folio_prefix: String,
}

/// which ledger events produce notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub notify_on_issue: bool,
    pub notify_on_approval: bool,
    pub notify_on_rejection: bool,
    pub notify_on_surcharge: bool,
    /// recipients of batch summaries
    pub admin_recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurchargeConfig {
    /// flip pending instances past due to overdue before the surcharge batch
    pub mark_overdue_before_run: bool,
    /// days after the due date before an instance counts as overdue
    pub grace_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenerationConfig {
    /// drop units that became inactive from explicit scopes instead of failing
    pub skip_inactive_units: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            amounts: AmountConfig::default(),
            notifications: NotificationConfig::default(),
            surcharges: SurchargeConfig::default(),
            regeneration: RegenerationConfig::default(),
        }
    }
}

impl Default for AmountConfig {
    fn default() -> Self {
        Self {
            epsilon: Money::EPSILON,
            folio_prefix: "REC".to_string(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_on_issue: true,
            notify_on_approval: true,
            notify_on_rejection: true,
            notify_on_surcharge: true,
            admin_recipients: Vec::new(),
        }
    }
}

impl Default for SurchargeConfig {
    fn default() -> Self {
        Self {
            mark_overdue_before_run: true,
            grace_days: 0,
        }
    }
}

impl Default for RegenerationConfig {
    fn default() -> Self {
        Self {
            skip_inactive_units: true,
        }
    }
}

impl LedgerConfig {
    /// parse configuration from json, missing sections fall back to defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LedgerConfig =
            serde_json::from_str(json).map_err(|e| LedgerError::Configuration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// configuration without any notifications, useful for imports and tests
    pub fn silent() -> Self {
        let mut config = Self::default();
        config.notifications.enabled = false;
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.amounts.epsilon.is_negative() {
            return Err(LedgerError::Configuration {
                message: format!("epsilon must not be negative, got {}", self.amounts.epsilon),
            });
        }
        if self.amounts.epsilon > Money::ONE {
            return Err(LedgerError::Configuration {
                message: format!("epsilon {} is larger than one currency unit", self.amounts.epsilon),
            });
        }
        let prefix = self.amounts.folio_prefix.trim();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LedgerError::Configuration {
                message: format!("folio prefix must be alphanumeric, got {:?}", self.amounts.folio_prefix),
            });
        }
        if self.notifications.admin_recipients.iter().any(|r| r.trim().is_empty()) {
            return Err(LedgerError::Configuration {
                message: "administrator recipients must not be blank".to_string(),
            });
        }
        Ok(())
    }
}
