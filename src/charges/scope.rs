use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::collaborators::UnitDirectory;
use crate::errors::{LedgerError, Result};
use crate::types::{Unit, UnitId};

/// which units a template fans out to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "targets", rename_all = "snake_case")]
pub enum ChargeScope {
    /// every active unit at issue time
    All,
    /// an explicit list of units
    Units(Vec<UnitId>),
    /// every active unit under the given streets or towers
    Streets(Vec<String>),
}

impl ChargeScope {
    /// resolve to the concrete, de-duplicated set of active units
    pub fn resolve(&self, directory: &dyn UnitDirectory) -> Result<Vec<Unit>> {
        let units = match self {
            ChargeScope::All => directory.active_units(),
            ChargeScope::Units(ids) => {
                if ids.is_empty() {
                    return Err(LedgerError::validation("unit scope lists no units"));
                }
                let mut units = Vec::with_capacity(ids.len());
                for id in ids {
                    let unit = directory
                        .unit(*id)
                        .ok_or_else(|| LedgerError::validation(format!("unknown unit {}", id)))?;
                    if !unit.active {
                        return Err(LedgerError::validation(format!(
                            "unit {} {} is not active",
                            unit.street, unit.number
                        )));
                    }
                    units.push(unit);
                }
                units
            }
            ChargeScope::Streets(streets) => {
                if streets.is_empty() {
                    return Err(LedgerError::validation("street scope lists no streets"));
                }
                let mut units = Vec::new();
                for street in streets {
                    let on_street = directory.active_units_on_street(street);
                    if on_street.is_empty() {
                        return Err(LedgerError::validation(format!(
                            "unknown street or tower {:?}",
                            street
                        )));
                    }
                    units.extend(on_street);
                }
                units
            }
        };

        let mut seen = BTreeSet::new();
        let units: Vec<Unit> = units.into_iter().filter(|u| seen.insert(u.id)).collect();

        if units.is_empty() {
            return Err(LedgerError::validation("scope resolves to no active units"));
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryDirectory;
    use uuid::Uuid;

    fn directory() -> (InMemoryDirectory, Vec<UnitId>) {
        let directory = InMemoryDirectory::new();
        let ids = vec![
            directory.add_unit("Calle Roble", "1"),
            directory.add_unit("Calle Roble", "2"),
            directory.add_unit("Torre Norte", "101"),
        ];
        (directory, ids)
    }

    #[test]
    fn test_all_uses_active_units() {
        let (directory, ids) = directory();
        directory.set_unit_active(ids[2], false);

        let units = ChargeScope::All.resolve(&directory).unwrap();
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn test_explicit_units_deduplicated() {
        let (directory, ids) = directory();
        let scope = ChargeScope::Units(vec![ids[0], ids[1], ids[0]]);

        let units = scope.resolve(&directory).unwrap();
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn test_unknown_or_inactive_unit_rejected() {
        let (directory, ids) = directory();

        let unknown = ChargeScope::Units(vec![ids[0], Uuid::new_v4()]);
        assert!(matches!(unknown.resolve(&directory), Err(LedgerError::Validation { .. })));

        directory.set_unit_active(ids[1], false);
        let inactive = ChargeScope::Units(vec![ids[1]]);
        assert!(matches!(inactive.resolve(&directory), Err(LedgerError::Validation { .. })));
    }

    #[test]
    fn test_streets_scope() {
        let (directory, _) = directory();

        let roble = ChargeScope::Streets(vec!["Calle Roble".to_string()]);
        assert_eq!(roble.resolve(&directory).unwrap().len(), 2);

        let both = ChargeScope::Streets(vec!["Calle Roble".to_string(), "Torre Norte".to_string()]);
        assert_eq!(both.resolve(&directory).unwrap().len(), 3);

        let missing = ChargeScope::Streets(vec!["Calle Pino".to_string()]);
        assert!(missing.resolve(&directory).is_err());
    }

    #[test]
    fn test_empty_scopes_rejected() {
        let (directory, _) = directory();
        assert!(ChargeScope::Units(vec![]).resolve(&directory).is_err());
        assert!(ChargeScope::Streets(vec![]).resolve(&directory).is_err());

        let empty_directory = InMemoryDirectory::new();
        assert!(ChargeScope::All.resolve(&empty_directory).is_err());
    }
}
