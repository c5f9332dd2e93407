use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::domain::models::{TokenPurchase, UserContribution};
use crate::storage::traits::{Connection, ContributionStorage, PurchaseStorage};

use super::{ContributionRepository, PurchaseRepository, ReadingRepository};

pub(crate) const READINGS_HEADER: &[&str] =
    &["id", "user_id", "reading", "reading_date", "notes", "created_at"];
pub(crate) const PURCHASES_HEADER: &[&str] = &[
    "id",
    "total_tokens",
    "total_payment",
    "meter_reading",
    "purchase_date",
    "is_emergency",
    "created_by",
    "created_at",
];
pub(crate) const CONTRIBUTIONS_HEADER: &[&str] = &[
    "id",
    "purchase_id",
    "user_id",
    "contribution_amount",
    "meter_reading",
    "tokens_consumed",
    "created_at",
];
pub(crate) const RECEIPTS_HEADER: &[&str] = &[
    "id",
    "purchase_id",
    "kwh_purchased",
    "energy_cost",
    "debt",
    "rea_levy",
    "vat",
    "total_amount",
    "transaction_datetime",
    "token_number",
    "account_number",
];

/// CSV-backed storage connection: a base directory holding one file per
/// ledger aggregate.
#[derive(Debug, Clone)]
pub struct CsvConnection {
    base_directory: PathBuf,
}

impl CsvConnection {
    pub fn new(base_directory: impl AsRef<Path>) -> Result<Self> {
        let base_directory = base_directory.as_ref().to_path_buf();
        fs::create_dir_all(&base_directory)?;
        Ok(Self { base_directory })
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub(crate) fn readings_file_path(&self) -> PathBuf {
        self.base_directory.join("readings.csv")
    }

    pub(crate) fn purchases_file_path(&self) -> PathBuf {
        self.base_directory.join("purchases.csv")
    }

    pub(crate) fn contributions_file_path(&self) -> PathBuf {
        self.base_directory.join("contributions.csv")
    }

    pub(crate) fn receipts_file_path(&self) -> PathBuf {
        self.base_directory.join("receipts.csv")
    }

    /// Create the file with its header row if it does not exist yet.
    pub(crate) fn ensure_file_exists(&self, path: &Path, header: &[&str]) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(header)?;
        writer.flush()?;
        Ok(())
    }
}

impl Connection for CsvConnection {
    type ReadingRepository = ReadingRepository;
    type PurchaseRepository = PurchaseRepository;
    type ContributionRepository = ContributionRepository;

    fn create_reading_repository(&self) -> ReadingRepository {
        ReadingRepository::new(self.clone())
    }

    fn create_purchase_repository(&self) -> PurchaseRepository {
        PurchaseRepository::new(self.clone())
    }

    fn create_contribution_repository(&self) -> ContributionRepository {
        ContributionRepository::new(self.clone())
    }

    fn apply_purchase_edit(
        &self,
        purchase: &TokenPurchase,
        contributions: &[UserContribution],
    ) -> Result<()> {
        // Callers validate the full cascade before this point, so both
        // rewrites operate on already-consistent rows.
        let purchase_repository = self.create_purchase_repository();
        let contribution_repository = self.create_contribution_repository();

        purchase_repository.update_purchase(purchase)?;
        for contribution in contributions {
            contribution_repository.update_contribution(contribution)?;
        }
        Ok(())
    }
}
