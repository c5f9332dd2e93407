//! Validation rejection taxonomy.
//!
//! Every rejection is a value, never a panic: each variant carries the
//! conflicting ledger entry so the caller can explain the rejection to an
//! end user. Storage failures travel separately through `anyhow`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::ValidationSummary;
use thiserror::Error;

/// A user-correctable rejection of a proposed ledger write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerViolation {
    #[error("meter reading {candidate} must be at least {highest}, the highest reading already recorded on {date} ({conflicting_id})")]
    ReadingBelowSameDate {
        candidate: Decimal,
        highest: Decimal,
        date: NaiveDate,
        conflicting_id: String,
    },

    #[error("meter reading {candidate} must be at least {prior}, the most recent reading before it ({conflicting_id} on {prior_date})")]
    ReadingBelowPrior {
        candidate: Decimal,
        prior: Decimal,
        prior_date: NaiveDate,
        conflicting_id: String,
    },

    #[error("meter reading {candidate} cannot exceed {next}, the next chronological reading ({conflicting_id} on {next_date})")]
    ReadingAboveNext {
        candidate: Decimal,
        next: Decimal,
        next_date: NaiveDate,
        conflicting_id: String,
    },

    #[error("meter reading {candidate} exceeds {ceiling}, the cumulative tokens ever purchased as of {date}")]
    ReadingExceedsPurchasedTokens {
        candidate: Decimal,
        ceiling: Decimal,
        date: NaiveDate,
    },

    #[error("implied consumption of {daily_rate} kWh/day is anomalously high (threshold {threshold} kWh/day)")]
    AnomalousConsumption { daily_rate: Decimal, threshold: Decimal },

    #[error("purchase {purchase_id} already has contribution {contribution_id}")]
    DuplicateContribution {
        purchase_id: String,
        contribution_id: String,
    },

    #[error("purchase {purchase_id} cannot be modified: contribution {contribution_id} already references it")]
    PurchaseHasContribution {
        purchase_id: String,
        contribution_id: String,
    },

    #[error("contribution would consume {requested} tokens but only {available} remain from purchase {previous_purchase_id}")]
    TokensExceedAvailable {
        requested: Decimal,
        available: Decimal,
        previous_purchase_id: String,
    },

    #[error("purchase {purchase_id} dated {purchase_date} still needs a contribution before a new purchase can be recorded")]
    PreviousPurchaseUnfunded {
        purchase_id: String,
        purchase_date: NaiveDate,
    },

    #[error("only the latest purchase may be deleted; {purchase_id} is not the latest ({latest_id} is)")]
    NotLatestPurchase {
        purchase_id: String,
        latest_id: String,
    },

    #[error("purchase {purchase_id} was not found")]
    PurchaseNotFound { purchase_id: String },

    #[error("value must be positive: {field} was {value}")]
    NonPositiveValue { field: String, value: Decimal },

    #[error("editing purchase {purchase_id} would break contribution {contribution_id}: {source}")]
    CascadeViolation {
        purchase_id: String,
        contribution_id: String,
        #[source]
        source: Box<LedgerViolation>,
    },
}

impl LedgerViolation {
    /// Collapse to the `{valid, error?}` shape handed to collaborators.
    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary::rejected(self.to_string())
    }
}

/// Outcome of a check-only validation call: either valid, or rejected
/// with the specific violation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub violation: Option<LedgerViolation>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self { valid: true, violation: None }
    }

    pub fn rejected(violation: LedgerViolation) -> Self {
        Self { valid: false, violation: Some(violation) }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn summary(&self) -> ValidationSummary {
        match &self.violation {
            Some(v) => v.summary(),
            None => ValidationSummary::ok(),
        }
    }
}

impl From<Result<(), LedgerViolation>> for ValidationOutcome {
    fn from(result: Result<(), LedgerViolation>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(v) => Self::rejected(v),
        }
    }
}

/// Error type for write-path service operations: either a structured
/// rejection the caller should surface to the user, or a storage failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Rejected(#[from] LedgerViolation),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    /// The violation, if this error is a validation rejection.
    pub fn violation(&self) -> Option<&LedgerViolation> {
        match self {
            LedgerError::Rejected(v) => Some(v),
            LedgerError::Storage(_) => None,
        }
    }
}
