//! Write-path orchestration for the token ledger.
//!
//! Every operation is validate-then-write: read a fresh snapshot, run
//! the chronology and constraint rules purely against it, and only then
//! persist through the storage collaborator. Rejections come back as
//! structured `LedgerViolation`s, never as crashes.

use anyhow::{bail, Result};
use chrono::Utc;
use log::info;
use rust_decimal::Decimal;
use shared::{ImportReport, ReceiptMatch, ReceiptRow};
use std::io::Read;
use std::sync::Arc;

use crate::domain::chronology_service::{self, ChronologyConfig, ReadingCandidate};
use crate::domain::commands::{
    CreateContributionCommand, CreatePurchaseCommand, CreateReadingCommand, DeletePurchaseCommand,
    EditPurchaseCommand,
};
use crate::domain::ledger_rules_service;
use crate::domain::models::{MeterReading, ReceiptData, TokenPurchase, UserContribution};
use crate::domain::recalculation_service::{CascadeResult, RecalculationService};
use crate::domain::receipt_import;
use crate::domain::receipt_matcher;
use crate::domain::snapshot::{LedgerSnapshot, ValidationScope};
use crate::domain::violation::{LedgerError, LedgerViolation};
use crate::storage::{Connection, ContributionStorage, PurchaseStorage, ReadingStorage};

pub struct LedgerService<C: Connection> {
    reading_repository: C::ReadingRepository,
    purchase_repository: C::PurchaseRepository,
    contribution_repository: C::ContributionRepository,
    recalculation_service: RecalculationService<C>,
    chronology_config: ChronologyConfig,
}

impl<C: Connection> LedgerService<C> {
    pub fn new(connection: Arc<C>, chronology_config: ChronologyConfig) -> Self {
        Self {
            reading_repository: connection.create_reading_repository(),
            purchase_repository: connection.create_purchase_repository(),
            contribution_repository: connection.create_contribution_repository(),
            recalculation_service: RecalculationService::new(
                connection.clone(),
                chronology_config.clone(),
            ),
            chronology_config,
        }
    }

    fn load_snapshot(&self) -> Result<LedgerSnapshot> {
        LedgerSnapshot::load(
            &self.reading_repository,
            &self.purchase_repository,
            &self.contribution_repository,
        )
    }

    fn require_positive(field: &str, value: Decimal) -> Result<(), LedgerViolation> {
        if value <= Decimal::ZERO {
            return Err(LedgerViolation::NonPositiveValue {
                field: field.to_string(),
                value,
            });
        }
        Ok(())
    }

    /// Record a standalone meter reading.
    pub fn create_reading(&self, command: CreateReadingCommand) -> Result<MeterReading, LedgerError> {
        if command.reading < Decimal::ZERO {
            return Err(LedgerViolation::NonPositiveValue {
                field: "reading".to_string(),
                value: command.reading,
            }
            .into());
        }

        let snapshot = self.load_snapshot()?;
        chronology_service::validate_reading(
            &ReadingCandidate::standalone(command.reading, command.reading_date),
            &snapshot,
            &ValidationScope::GlobalMeter,
            &self.chronology_config,
        )?;

        let reading = MeterReading {
            id: MeterReading::generate_id(),
            user_id: command.user_id,
            reading: command.reading,
            reading_date: command.reading_date,
            notes: command.notes,
            created_at: Utc::now(),
        };
        self.reading_repository.store_reading(&reading)?;
        info!("Recorded reading {} ({} on {})", reading.id, reading.reading, reading.reading_date);
        Ok(reading)
    }

    /// Record a token purchase.
    pub fn create_purchase(&self, command: CreatePurchaseCommand) -> Result<TokenPurchase, LedgerError> {
        Self::require_positive("total_tokens", command.total_tokens)?;
        Self::require_positive("total_payment", command.total_payment)?;
        if command.meter_reading < Decimal::ZERO {
            return Err(LedgerViolation::NonPositiveValue {
                field: "meter_reading".to_string(),
                value: command.meter_reading,
            }
            .into());
        }

        let snapshot = self.load_snapshot()?;
        ledger_rules_service::check_sequential_order(
            command.purchase_date,
            &snapshot,
            command.admin_override,
        )?;
        chronology_service::validate_reading(
            &ReadingCandidate::purchase_linked(
                command.meter_reading,
                command.purchase_date.date_naive(),
            ),
            &snapshot,
            &ValidationScope::GlobalMeter,
            &self.chronology_config,
        )?;

        let purchase = TokenPurchase {
            id: TokenPurchase::generate_id(),
            total_tokens: command.total_tokens,
            total_payment: command.total_payment,
            meter_reading: command.meter_reading,
            purchase_date: command.purchase_date,
            is_emergency: command.is_emergency,
            created_by: command.created_by,
            created_at: Utc::now(),
            receipt: None,
        };
        self.purchase_repository.store_purchase(&purchase)?;
        info!(
            "Recorded purchase {} ({} tokens for {})",
            purchase.id, purchase.total_tokens, purchase.total_payment
        );
        Ok(purchase)
    }

    /// Record the single contribution against a purchase. The tokens
    /// consumed are derived from the supplied meter reading, never taken
    /// from the caller.
    pub fn create_contribution(
        &self,
        command: CreateContributionCommand,
    ) -> Result<UserContribution, LedgerError> {
        Self::require_positive("contribution_amount", command.contribution_amount)?;

        let snapshot = self.load_snapshot()?;
        if snapshot.purchase(&command.purchase_id).is_none() {
            return Err(LedgerViolation::PurchaseNotFound {
                purchase_id: command.purchase_id,
            }
            .into());
        }
        ledger_rules_service::check_single_contribution(&command.purchase_id, &snapshot)?;
        chronology_service::validate_reading(
            &ReadingCandidate::standalone(command.meter_reading, command.reading_date),
            &snapshot,
            &ValidationScope::GlobalMeter,
            &self.chronology_config,
        )?;
        let tokens_consumed = ledger_rules_service::check_token_availability(
            &command.purchase_id,
            command.meter_reading,
            None,
            &snapshot,
        )?;

        let contribution = UserContribution {
            id: UserContribution::generate_id(),
            purchase_id: command.purchase_id,
            user_id: command.user_id,
            contribution_amount: command.contribution_amount,
            meter_reading: command.meter_reading,
            tokens_consumed,
            created_at: Utc::now(),
        };
        self.contribution_repository.store_contribution(&contribution)?;
        info!(
            "Recorded contribution {} against purchase {} ({} tokens consumed)",
            contribution.id, contribution.purchase_id, contribution.tokens_consumed
        );
        Ok(contribution)
    }

    /// Delete the latest purchase, subject to the deletion rule.
    pub fn delete_purchase(&self, command: DeletePurchaseCommand) -> Result<(), LedgerError> {
        let snapshot = self.load_snapshot()?;
        ledger_rules_service::check_deletion(
            &command.purchase_id,
            &snapshot,
            command.admin_override,
        )?;
        self.purchase_repository.delete_purchase(&command.purchase_id)?;
        info!("Deleted purchase {}", command.purchase_id);
        Ok(())
    }

    /// Admin edit of a purchase, cascading through dependent contributions.
    pub fn edit_purchase(&self, command: EditPurchaseCommand) -> Result<CascadeResult, LedgerError> {
        self.recalculation_service.apply_purchase_edit(command)
    }

    /// Parse a receipt export and fuzzy-match its rows against the
    /// unreceipted purchases. Attaching confirmed matches is a separate
    /// step so medium/low matches can be reviewed first.
    pub fn import_receipts<R: Read>(&self, reader: R) -> Result<(ImportReport, Vec<ReceiptMatch>)> {
        let report = receipt_import::parse_receipt_rows(reader)?;
        let purchases = self.purchase_repository.list_purchases_chronological()?;
        let matches = receipt_matcher::match_all(&report.rows, &purchases);
        Ok((report, matches))
    }

    /// Attach an imported receipt row to a purchase.
    pub fn attach_receipt(&self, purchase_id: &str, row: &ReceiptRow) -> Result<ReceiptData> {
        if let Err(message) = receipt_import::validate_row(row) {
            bail!("receipt row rejected: {}", message);
        }
        let receipt = ReceiptData {
            id: ReceiptData::generate_id(),
            purchase_id: Some(purchase_id.to_string()),
            kwh_purchased: row.kwh_purchased,
            energy_cost: row.energy_cost,
            debt: row.debt,
            rea_levy: row.rea_levy,
            vat: row.vat,
            total_amount: row.total_amount,
            transaction_datetime: row.transaction_datetime,
            token_number: row.token_number.clone(),
            account_number: row.account_number.clone(),
        };
        self.purchase_repository.attach_receipt(purchase_id, &receipt)?;
        info!("Attached receipt {} to purchase {}", receipt.id, purchase_id);
        Ok(receipt)
    }
}
