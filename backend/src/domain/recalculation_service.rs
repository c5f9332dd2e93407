//! Cascading recalculation after an admin purchase edit.
//!
//! Moving a purchase's meter reading (or token count) invalidates the
//! contribution attached to it and the contribution attached to the next
//! purchase, whose consumption baseline just moved. Both are recomputed
//! and re-checked against the token-availability rule before anything is
//! written; a violation anywhere aborts the whole edit with no partial
//! state. Every mutation is reported to the audit collaborator as a
//! structured before/after payload.

use anyhow::{anyhow, Result};
use log::info;
use shared::AuditRecord;
use std::sync::Arc;

use crate::domain::chronology_service::{self, ChronologyConfig, ReadingCandidate};
use crate::domain::commands::EditPurchaseCommand;
use crate::domain::ledger_rules_service;
use crate::domain::models::{TokenPurchase, UserContribution};
use crate::domain::snapshot::{LedgerSnapshot, ValidationScope};
use crate::domain::violation::{LedgerError, LedgerViolation};
use crate::storage::Connection;

/// Everything a completed cascade produced.
#[derive(Debug, Clone)]
pub struct CascadeResult {
    pub purchase: TokenPurchase,
    pub updated_contributions: Vec<UserContribution>,
    /// Before/after payloads for the audit collaborator
    pub audit: Vec<AuditRecord>,
}

const EDIT_TRIGGER: &str = "admin_purchase_edit";

#[derive(Clone)]
pub struct RecalculationService<C: Connection> {
    connection: Arc<C>,
    reading_repository: C::ReadingRepository,
    purchase_repository: C::PurchaseRepository,
    contribution_repository: C::ContributionRepository,
    chronology_config: ChronologyConfig,
}

impl<C: Connection> RecalculationService<C> {
    pub fn new(connection: Arc<C>, chronology_config: ChronologyConfig) -> Self {
        Self {
            reading_repository: connection.create_reading_repository(),
            purchase_repository: connection.create_purchase_repository(),
            contribution_repository: connection.create_contribution_repository(),
            connection,
            chronology_config,
        }
    }

    /// Apply a purchase edit and its dependent-contribution cascade
    /// atomically: all rows are validated against a fresh snapshot, then
    /// written together, or the whole edit is rejected.
    pub fn apply_purchase_edit(&self, command: EditPurchaseCommand) -> Result<CascadeResult, LedgerError> {
        let snapshot = LedgerSnapshot::load(
            &self.reading_repository,
            &self.purchase_repository,
            &self.contribution_repository,
        )?;

        let original = snapshot
            .purchase(&command.purchase_id)
            .ok_or_else(|| LedgerViolation::PurchaseNotFound {
                purchase_id: command.purchase_id.clone(),
            })?
            .clone();

        ledger_rules_service::check_purchase_mutable(
            &command.purchase_id,
            &snapshot,
            command.admin_override,
        )?;

        let mut edited = original.clone();
        if let Some(new_reading) = command.new_meter_reading {
            edited.meter_reading = new_reading;
        }
        if let Some(new_tokens) = command.new_total_tokens {
            edited.total_tokens = new_tokens;
        }
        if edited == original {
            return Err(LedgerError::Storage(anyhow!(
                "edit for purchase {} changes nothing",
                command.purchase_id
            )));
        }

        // Validate everything downstream against the post-edit sequence
        let mut projected = snapshot.clone();
        if let Some(slot) = projected.purchases.iter_mut().find(|p| p.id == edited.id) {
            *slot = edited.clone();
        }

        chronology_service::validate_reading(
            &ReadingCandidate::purchase_linked(
                edited.meter_reading,
                edited.purchase_date.date_naive(),
            )
            .excluding(edited.id.clone()),
            &projected,
            &ValidationScope::GlobalMeter,
            &self.chronology_config,
        )?;

        let mut updated_contributions = Vec::new();
        let mut audit = vec![AuditRecord {
            entity: "token_purchase".to_string(),
            entity_id: original.id.clone(),
            old_values: serde_json::to_value(&original).map_err(anyhow::Error::from)?,
            new_values: serde_json::to_value(&edited).map_err(anyhow::Error::from)?,
            trigger: EDIT_TRIGGER.to_string(),
        }];

        // (a) The contribution attached to the edited purchase: reading
        // synced to the new value, consumption re-derived from it.
        if let Some(own) = projected.contribution_for_purchase(&edited.id) {
            let own = own.clone();
            let tokens = ledger_rules_service::check_token_availability(
                &edited.id,
                edited.meter_reading,
                Some(&own.id),
                &projected,
            )
            .map_err(|source| LedgerViolation::CascadeViolation {
                purchase_id: edited.id.clone(),
                contribution_id: own.id.clone(),
                source: Box::new(source),
            })?;

            let mut updated = own.clone();
            updated.meter_reading = edited.meter_reading;
            updated.tokens_consumed = tokens;
            audit.push(contribution_audit(&own, &updated)?);
            updated_contributions.push(updated);
        }

        // (b) The next purchase's contribution: its baseline moved.
        if let Some(next) = projected.next_purchase(&edited.id).cloned() {
            if let Some(next_contribution) = projected.contribution_for_purchase(&next.id) {
                let next_contribution = next_contribution.clone();
                let tokens = ledger_rules_service::check_token_availability(
                    &next.id,
                    next_contribution.meter_reading,
                    Some(&next_contribution.id),
                    &projected,
                )
                .map_err(|source| LedgerViolation::CascadeViolation {
                    purchase_id: next.id.clone(),
                    contribution_id: next_contribution.id.clone(),
                    source: Box::new(source),
                })?;

                let mut updated = next_contribution.clone();
                updated.tokens_consumed = tokens;
                audit.push(contribution_audit(&next_contribution, &updated)?);
                updated_contributions.push(updated);
            }
        }

        self.connection
            .apply_purchase_edit(&edited, &updated_contributions)?;

        info!(
            "Purchase {} edited; {} dependent contribution(s) recalculated",
            edited.id,
            updated_contributions.len()
        );
        Ok(CascadeResult { purchase: edited, updated_contributions, audit })
    }
}

fn contribution_audit(old: &UserContribution, new: &UserContribution) -> Result<AuditRecord> {
    Ok(AuditRecord {
        entity: "user_contribution".to_string(),
        entity_id: old.id.clone(),
        old_values: serde_json::to_value(old)?,
        new_values: serde_json::to_value(new)?,
        trigger: EDIT_TRIGGER.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{TokenPurchase, UserContribution};
    use crate::storage::{Connection as _, ContributionStorage, CsvConnection, PurchaseStorage};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn purchase(id: &str, tokens: Decimal, meter: Decimal, date: &str, seq: i64) -> TokenPurchase {
        TokenPurchase {
            id: id.to_string(),
            total_tokens: tokens,
            total_payment: dec!(100),
            meter_reading: meter,
            purchase_date: Utc
                .from_utc_datetime(&format!("{}T09:00:00", date).parse().unwrap()),
            is_emergency: false,
            created_by: "alice".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
            receipt: None,
        }
    }

    fn contribution(id: &str, purchase_id: &str, meter: Decimal, tokens: Decimal) -> UserContribution {
        UserContribution {
            id: id.to_string(),
            purchase_id: purchase_id.to_string(),
            user_id: "alice".to_string(),
            contribution_amount: dec!(50),
            meter_reading: meter,
            tokens_consumed: tokens,
            created_at: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        }
    }

    fn seeded_service() -> (RecalculationService<CsvConnection>, Arc<CsvConnection>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let connection = Arc::new(CsvConnection::new(temp_dir.path()).unwrap());
        let purchases = connection.create_purchase_repository();
        let contributions = connection.create_contribution_repository();

        // p1 funded at 5200, p2 funded at 5900 (baseline 5000)
        purchases.store_purchase(&purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1)).unwrap();
        purchases.store_purchase(&purchase("p2", dec!(800), dec!(6000), "2024-02-01", 2)).unwrap();
        contributions.store_contribution(&contribution("c1", "p1", dec!(5200), dec!(200))).unwrap();
        contributions.store_contribution(&contribution("c2", "p2", dec!(5900), dec!(900))).unwrap();

        let service = RecalculationService::new(connection.clone(), ChronologyConfig::default());
        (service, connection, temp_dir)
    }

    #[test]
    fn edit_recomputes_own_and_next_contributions() {
        let (service, connection, _guard) = seeded_service();

        let result = service
            .apply_purchase_edit(EditPurchaseCommand {
                purchase_id: "p1".to_string(),
                new_meter_reading: Some(dec!(5100)),
                new_total_tokens: None,
                admin_override: true,
            })
            .unwrap();

        assert_eq!(result.purchase.meter_reading, dec!(5100));
        assert_eq!(result.updated_contributions.len(), 2);

        let contributions = connection.create_contribution_repository();
        let own = contributions.get_contribution("c1").unwrap().unwrap();
        // Synced to the new reading; first purchase draws on itself: 5100 - 5100
        assert_eq!(own.meter_reading, dec!(5100));
        assert_eq!(own.tokens_consumed, Decimal::ZERO);

        let next = contributions.get_contribution("c2").unwrap().unwrap();
        // Baseline moved from 5000 to 5100: 5900 - 5100
        assert_eq!(next.tokens_consumed, dec!(800));
        assert_eq!(next.meter_reading, dec!(5900));

        // One audit payload per mutated row
        assert_eq!(result.audit.len(), 3);
        assert!(result.audit.iter().all(|a| a.trigger == "admin_purchase_edit"));
    }

    #[test]
    fn cascade_violation_aborts_without_partial_writes() {
        let (service, connection, _guard) = seeded_service();

        // Shrinking p1 to 500 tokens leaves c2's 800-token draw unsatisfiable
        let error = service
            .apply_purchase_edit(EditPurchaseCommand {
                purchase_id: "p1".to_string(),
                new_meter_reading: None,
                new_total_tokens: Some(dec!(500)),
                admin_override: true,
            })
            .unwrap_err();

        match error.violation() {
            Some(LedgerViolation::CascadeViolation { contribution_id, source, .. }) => {
                assert_eq!(contribution_id, "c2");
                assert!(matches!(
                    source.as_ref(),
                    LedgerViolation::TokensExceedAvailable { .. }
                ));
            }
            other => panic!("expected cascade violation, got {:?}", other),
        }

        // Nothing was written
        let purchases = connection.create_purchase_repository();
        assert_eq!(purchases.get_purchase("p1").unwrap().unwrap().total_tokens, dec!(1000));
        let contributions = connection.create_contribution_repository();
        assert_eq!(contributions.get_contribution("c2").unwrap().unwrap().tokens_consumed, dec!(900));
    }

    #[test]
    fn non_admin_cannot_edit_funded_purchase() {
        let (service, _connection, _guard) = seeded_service();
        let error = service
            .apply_purchase_edit(EditPurchaseCommand {
                purchase_id: "p1".to_string(),
                new_meter_reading: Some(dec!(5100)),
                new_total_tokens: None,
                admin_override: false,
            })
            .unwrap_err();
        assert!(matches!(
            error.violation(),
            Some(LedgerViolation::PurchaseHasContribution { .. })
        ));
    }

    #[test]
    fn chronology_still_binds_the_new_reading() {
        let (service, _connection, _guard) = seeded_service();
        // p1 cannot move above p2's reading of 6000
        let error = service
            .apply_purchase_edit(EditPurchaseCommand {
                purchase_id: "p1".to_string(),
                new_meter_reading: Some(dec!(6500)),
                new_total_tokens: None,
                admin_override: true,
            })
            .unwrap_err();
        assert!(matches!(
            error.violation(),
            Some(LedgerViolation::ReadingAboveNext { .. })
        ));
    }
}
