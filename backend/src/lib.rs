//! # Shared-Meter Token Ledger Backend
//!
//! Consistency and cost-allocation engine for a prepaid electricity meter
//! shared by multiple households. The backend:
//! - Validates meter readings against global chronology before they land
//! - Enforces the purchase/contribution constraints of the token ledger
//! - Allocates true costs and tracks per-user running balances
//! - Reconciles internal payments against official utility receipts
//! - Cascades recalculation through dependent rows after admin edits
//!
//! All state lives in the storage layer; services re-read a fresh snapshot
//! for every validation.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

pub mod domain;
pub mod storage;

pub use storage::csv::CsvConnection;

/// Main backend struct that orchestrates all services
pub struct Backend {
    pub ledger_service: domain::LedgerService<CsvConnection>,
    pub chronology_service: domain::ChronologyService<CsvConnection>,
    pub ledger_rules_service: domain::LedgerRulesService<CsvConnection>,
    pub cost_service: domain::CostService<CsvConnection>,
    pub reconciliation_service: domain::ReconciliationService<CsvConnection>,
    pub recalculation_service: domain::RecalculationService<CsvConnection>,
}

impl Backend {
    /// Create a new backend instance with all services over one data directory
    pub fn new(data_directory: &Path) -> Result<Self> {
        Self::with_config(data_directory, domain::ChronologyConfig::default())
    }

    /// Create a backend with a non-default chronology configuration, e.g.
    /// with the consumption-anomaly hard check switched on.
    pub fn with_config(
        data_directory: &Path,
        chronology_config: domain::ChronologyConfig,
    ) -> Result<Self> {
        let csv_conn = Arc::new(CsvConnection::new(data_directory)?);

        Ok(Backend {
            ledger_service: domain::LedgerService::new(csv_conn.clone(), chronology_config.clone()),
            chronology_service: domain::ChronologyService::new(
                csv_conn.clone(),
                chronology_config.clone(),
            ),
            ledger_rules_service: domain::LedgerRulesService::new(csv_conn.clone()),
            cost_service: domain::CostService::new(csv_conn.clone()),
            reconciliation_service: domain::ReconciliationService::new(csv_conn.clone()),
            recalculation_service: domain::RecalculationService::new(csv_conn, chronology_config),
        })
    }
}
