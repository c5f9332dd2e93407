//! Domain layer: validation rules, cost allocation, reconciliation and
//! the write-path services that tie them to storage.

pub mod chronology_service;
pub mod commands;
pub mod cost_service;
pub mod ledger_rules_service;
pub mod ledger_service;
pub mod models;
pub mod recalculation_service;
pub mod receipt_import;
pub mod receipt_matcher;
pub mod reconciliation_service;
pub mod snapshot;
pub mod violation;

pub use chronology_service::{ChronologyConfig, ChronologyService, ReadingCandidate};
pub use commands::{
    CreateContributionCommand, CreatePurchaseCommand, CreateReadingCommand, DeletePurchaseCommand,
    EditPurchaseCommand,
};
pub use cost_service::CostService;
pub use ledger_rules_service::LedgerRulesService;
pub use ledger_service::LedgerService;
pub use recalculation_service::{CascadeResult, RecalculationService};
pub use reconciliation_service::ReconciliationService;
pub use snapshot::{LedgerSnapshot, ValidationScope};
pub use violation::{LedgerError, LedgerViolation, ValidationOutcome};
