//! # Storage Traits
//!
//! Storage abstraction for the ledger. The domain layer validates against
//! fresh snapshots read through these traits and never holds long-lived
//! in-memory ledger state, so any backend providing read-committed
//! isolation can sit underneath.

use anyhow::Result;

use crate::domain::models::{MeterReading, ReceiptData, TokenPurchase, UserContribution};

/// Interface for standalone meter-reading storage operations.
pub trait ReadingStorage: Send + Sync {
    /// Store a new reading
    fn store_reading(&self, reading: &MeterReading) -> Result<()>;

    /// Retrieve a specific reading by ID
    fn get_reading(&self, reading_id: &str) -> Result<Option<MeterReading>>;

    /// List all readings ordered by (reading_date, created_at) ascending
    fn list_readings_chronological(&self) -> Result<Vec<MeterReading>>;

    /// Delete a reading by ID. Returns true if it existed.
    fn delete_reading(&self, reading_id: &str) -> Result<bool>;
}

/// Interface for token-purchase storage operations.
pub trait PurchaseStorage: Send + Sync {
    /// Store a new purchase
    fn store_purchase(&self, purchase: &TokenPurchase) -> Result<()>;

    /// Retrieve a specific purchase by ID, receipt joined in if present
    fn get_purchase(&self, purchase_id: &str) -> Result<Option<TokenPurchase>>;

    /// List all purchases ordered by (purchase_date, created_at) ascending
    fn list_purchases_chronological(&self) -> Result<Vec<TokenPurchase>>;

    /// Update an existing purchase in place
    fn update_purchase(&self, purchase: &TokenPurchase) -> Result<()>;

    /// Delete a purchase by ID. Returns true if it existed.
    fn delete_purchase(&self, purchase_id: &str) -> Result<bool>;

    /// Attach official receipt data to a purchase
    fn attach_receipt(&self, purchase_id: &str, receipt: &ReceiptData) -> Result<()>;
}

/// Interface for user-contribution storage operations.
pub trait ContributionStorage: Send + Sync {
    /// Store a new contribution
    fn store_contribution(&self, contribution: &UserContribution) -> Result<()>;

    /// Retrieve a specific contribution by ID
    fn get_contribution(&self, contribution_id: &str) -> Result<Option<UserContribution>>;

    /// The single contribution referencing a purchase, if any
    fn get_contribution_for_purchase(&self, purchase_id: &str) -> Result<Option<UserContribution>>;

    /// All contributions for one user
    fn list_contributions_for_user(&self, user_id: &str) -> Result<Vec<UserContribution>>;

    /// All contributions in the ledger
    fn list_contributions(&self) -> Result<Vec<UserContribution>>;

    /// Update an existing contribution in place
    fn update_contribution(&self, contribution: &UserContribution) -> Result<()>;
}

/// Factory trait for storage connections.
///
/// Abstracts the concrete backend (CSV files, SQL, ...) behind repository
/// factories, plus the one multi-row write the cascade needs to be atomic.
pub trait Connection: Send + Sync + Clone {
    type ReadingRepository: ReadingStorage;
    type PurchaseRepository: PurchaseStorage;
    type ContributionRepository: ContributionStorage;

    fn create_reading_repository(&self) -> Self::ReadingRepository;
    fn create_purchase_repository(&self) -> Self::PurchaseRepository;
    fn create_contribution_repository(&self) -> Self::ContributionRepository;

    /// Apply an admin purchase edit together with its recomputed
    /// contributions as one write: either everything lands or nothing does.
    fn apply_purchase_edit(
        &self,
        purchase: &TokenPurchase,
        contributions: &[UserContribution],
    ) -> Result<()>;
}
