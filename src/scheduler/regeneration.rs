use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::charges::{ChargeIssuer, ChargeScope, ChargeTemplate};
use crate::collaborators::UnitDirectory;
use crate::errors::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::store::{LedgerTables, Transaction};
use crate::types::{InstanceId, TemplateId, TemplateStatus, Unit};

/// one generated cycle of a recurring master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegeneratedCycle {
    pub master_id: TemplateId,
    pub cycle_template: ChargeTemplate,
    pub instances: Vec<InstanceId>,
    pub next_generation_date: NaiveDate,
}

/// produces the next cycle of recurring templates
pub struct Regenerator<'a> {
    directory: &'a dyn UnitDirectory,
    skip_inactive_units: bool,
}

impl<'a> Regenerator<'a> {
    pub fn new(directory: &'a dyn UnitDirectory, skip_inactive_units: bool) -> Self {
        Self {
            directory,
            skip_inactive_units,
        }
    }

    /// recurring masters whose generation date has arrived
    pub fn due_templates(tables: &LedgerTables, today: NaiveDate) -> Vec<TemplateId> {
        tables
            .templates
            .values()
            .filter(|t| t.is_due_for_generation(today))
            .map(|t| t.id)
            .collect()
    }

    /// units the next cycle fans out to: a fresh query for `All`, otherwise
    /// the units billed by the previous cycle
    pub fn cycle_units(&self, tables: &LedgerTables, master: &ChargeTemplate) -> Result<Vec<Unit>> {
        if master.scope == ChargeScope::All {
            return master.scope.resolve(self.directory);
        }

        let previous = master.last_cycle_template.unwrap_or(master.id);
        let mut seen = BTreeSet::new();
        let mut units = Vec::new();
        for instance in tables.instances_for_template(previous) {
            if !seen.insert(instance.unit_id) {
                continue;
            }
            match self.directory.unit(instance.unit_id) {
                Some(unit) if unit.active || !self.skip_inactive_units => units.push(unit),
                Some(unit) => debug!(unit = %unit.id, "inactive unit dropped from cycle"),
                None => debug!(unit = %instance.unit_id, "unknown unit dropped from cycle"),
            }
        }

        if units.is_empty() {
            return Err(LedgerError::validation(format!(
                "previous cycle of {} left no units to bill",
                master.name
            )));
        }
        Ok(units)
    }

    /// generate one cycle and advance the master, inside the caller's transaction
    pub fn regenerate(&self, tx: &mut Transaction, master_id: TemplateId, today: NaiveDate) -> Result<RegeneratedCycle> {
        let now = tx.now();
        let master = tx.template(master_id)?.clone();
        if !master.is_due_for_generation(today) {
            return Err(LedgerError::conflict(format!(
                "template {} is not due for generation on {}",
                master.name, today
            )));
        }
        let (period, scheduled) = match (master.recurrence, master.next_generation_date) {
            (Some(period), Some(scheduled)) => (period, scheduled),
            _ => {
                return Err(LedgerError::validation(format!(
                    "template {} has no recurrence schedule",
                    master.name
                )))
            }
        };

        // missed periods collapse into this one cycle; due and generation
        // dates step together so later cycles stay on schedule
        let mut generation_date = scheduled;
        let mut due_date = period.advance(master.current_cycle_due_date(), master.due_anchor_day);
        loop {
            let following = period.advance(generation_date, master.generation_anchor_day);
            if following > today {
                break;
            }
            generation_date = following;
            due_date = period.advance(due_date, master.due_anchor_day);
        }
        let next_generation_date = period.advance(generation_date, master.generation_anchor_day);

        let cycle = tx
            .templates
            .values()
            .filter(|t| t.parent_template == Some(master.id))
            .map(|t| t.cycle)
            .max()
            .unwrap_or(0)
            + 1;

        let units = self.cycle_units(tx, &master)?;
        let child = ChargeTemplate {
            id: Uuid::new_v4(),
            name: master.name.clone(),
            category: master.category.clone(),
            amount: master.amount,
            issue_date: generation_date.min(due_date),
            due_date,
            recurrence: None,
            next_generation_date: None,
            scope: master.scope.clone(),
            status: TemplateStatus::Active,
            created_by: master.created_by.clone(),
            created_at: now,
            parent_template: Some(master.id),
            cycle,
            due_anchor_day: master.due_anchor_day,
            generation_anchor_day: master.generation_anchor_day,
            last_cycle_due_date: None,
            last_cycle_template: None,
        };
        let issued = ChargeIssuer::fan_out(tx, child, &units, &[])?;

        let stored = tx.template_mut(master_id)?;
        stored.next_generation_date = Some(next_generation_date);
        stored.last_cycle_due_date = Some(due_date);
        stored.last_cycle_template = Some(issued.template.id);

        tx.emit(LedgerEvent::TemplateRegenerated {
            master_id,
            cycle_template_id: issued.template.id,
            cycle,
            next_generation_date,
            timestamp: now,
        });

        Ok(RegeneratedCycle {
            master_id,
            cycle_template: issued.template,
            instances: issued.instances,
            next_generation_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charges::IssueChargeRequest;
    use crate::collaborators::InMemoryDirectory;
    use crate::decimal::Money;
    use crate::store::LedgerStore;
    use crate::types::RecurrencePeriod;
    use chrono::{DateTime, TimeZone, Utc};

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn at(day: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&day.and_hms_opt(2, 0, 0).unwrap())
    }

    fn monthly(scope: ChargeScope) -> IssueChargeRequest {
        IssueChargeRequest {
            name: "Mantenimiento".to_string(),
            category: "maintenance".to_string(),
            amount: Money::from_major(500),
            issue_date: Some(date(1, 1)),
            due_date: date(1, 31),
            recurrence: Some(RecurrencePeriod::Monthly),
            next_generation_date: Some(date(1, 31)),
            scope,
            created_by: "admin".to_string(),
            discounts: vec![],
        }
    }

    fn seed(store: &mut LedgerStore, directory: &InMemoryDirectory, request: IssueChargeRequest) -> TemplateId {
        let units = request.scope.resolve(directory).unwrap();
        let template = request.into_template(date(1, 1), at(date(1, 1)));
        store
            .transaction(at(date(1, 1)), |tx| ChargeIssuer::fan_out(tx, template, &units, &[]))
            .unwrap()
            .value
            .template
            .id
    }

    fn run(store: &mut LedgerStore, directory: &InMemoryDirectory, master: TemplateId, today: NaiveDate) -> Result<RegeneratedCycle> {
        let regenerator = Regenerator::new(directory, true);
        store
            .transaction(at(today), |tx| regenerator.regenerate(tx, master, today))
            .map(|c| c.value)
    }

    #[test]
    fn test_month_end_cycle() {
        let directory = InMemoryDirectory::new();
        directory.add_unit("Calle Roble", "1");
        directory.add_unit("Calle Roble", "2");
        let mut store = LedgerStore::new();
        let master = seed(&mut store, &directory, monthly(ChargeScope::All));

        let cycle = run(&mut store, &directory, master, date(2, 1)).unwrap();

        assert_eq!(cycle.cycle_template.due_date, date(2, 29));
        assert_eq!(cycle.cycle_template.cycle, 1);
        assert_eq!(cycle.cycle_template.parent_template, Some(master));
        assert!(cycle.cycle_template.recurrence.is_none());
        assert_eq!(cycle.instances.len(), 2);
        assert_eq!(cycle.next_generation_date, date(2, 29));

        let stored = store.tables().template(master).unwrap();
        assert_eq!(stored.next_generation_date, Some(date(2, 29)));
        assert_eq!(stored.last_cycle_due_date, Some(date(2, 29)));

        // following cycle goes back to the 31st
        let third = run(&mut store, &directory, master, date(2, 29)).unwrap();
        assert_eq!(third.cycle_template.due_date, date(3, 31));
        assert_eq!(third.cycle_template.cycle, 2);
        assert_eq!(third.next_generation_date, date(3, 31));
    }

    #[test]
    fn test_same_day_rerun_is_rejected() {
        let directory = InMemoryDirectory::new();
        directory.add_unit("Calle Roble", "1");
        let mut store = LedgerStore::new();
        let master = seed(&mut store, &directory, monthly(ChargeScope::All));

        run(&mut store, &directory, master, date(2, 1)).unwrap();
        assert!(Regenerator::due_templates(store.tables(), date(2, 1)).is_empty());

        let again = run(&mut store, &directory, master, date(2, 1));
        assert!(matches!(again, Err(LedgerError::Conflict { .. })));
        assert_eq!(store.tables().templates.len(), 2);
    }

    #[test]
    fn test_missed_periods_advance_past_today() {
        let directory = InMemoryDirectory::new();
        directory.add_unit("Calle Roble", "1");
        let mut store = LedgerStore::new();
        let master = seed(&mut store, &directory, monthly(ChargeScope::All));

        let cycle = run(&mut store, &directory, master, date(4, 10)).unwrap();
        assert_eq!(cycle.cycle_template.due_date, date(4, 30));
        assert_eq!(cycle.cycle_template.issue_date, date(3, 31));
        assert_eq!(cycle.next_generation_date, date(4, 30));
    }

    #[test]
    fn test_cycles_after_missed_periods_are_not_past_due() {
        let directory = InMemoryDirectory::new();
        directory.add_unit("Calle Roble", "1");
        let mut store = LedgerStore::new();
        let master = seed(&mut store, &directory, monthly(ChargeScope::All));

        for today in [date(4, 10), date(4, 30), date(5, 31)] {
            let cycle = run(&mut store, &directory, master, today).unwrap();
            assert!(
                cycle.cycle_template.due_date >= today,
                "cycle issued on {} is due {}",
                today,
                cycle.cycle_template.due_date
            );
        }

        let stored = store.tables().template(master).unwrap();
        assert_eq!(stored.last_cycle_due_date, Some(date(6, 30)));
        assert_eq!(stored.next_generation_date, Some(date(6, 30)));
    }

    #[test]
    fn test_explicit_scope_reuses_previous_units() {
        let directory = InMemoryDirectory::new();
        let first = directory.add_unit("Calle Roble", "1");
        let second = directory.add_unit("Calle Roble", "2");
        directory.add_unit("Calle Roble", "3");
        let mut store = LedgerStore::new();
        let master = seed(&mut store, &directory, monthly(ChargeScope::Units(vec![first, second])));

        directory.set_unit_active(second, false);
        let cycle = run(&mut store, &directory, master, date(2, 1)).unwrap();

        let billed: Vec<_> = cycle
            .instances
            .iter()
            .map(|id| store.tables().instance(*id).unwrap().unit_id)
            .collect();
        assert_eq!(billed, vec![first]);
    }

    #[test]
    fn test_failed_cycle_leaves_master_untouched() {
        let directory = InMemoryDirectory::new();
        let only = directory.add_unit("Calle Roble", "1");
        let mut store = LedgerStore::new();
        let master = seed(&mut store, &directory, monthly(ChargeScope::Units(vec![only])));

        directory.set_unit_active(only, false);
        let result = run(&mut store, &directory, master, date(2, 1));

        assert!(matches!(result, Err(LedgerError::Validation { .. })));
        let stored = store.tables().template(master).unwrap();
        assert_eq!(stored.next_generation_date, Some(date(1, 31)));
        assert_eq!(store.tables().templates.len(), 1);
    }
}
