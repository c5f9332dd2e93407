use anyhow::{anyhow, Result};
use csv::{Reader, Writer};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter};

use crate::domain::models::UserContribution;
use crate::storage::traits::ContributionStorage;

use super::connection::{CsvConnection, CONTRIBUTIONS_HEADER};
use super::reading_repository::{parse_decimal, parse_timestamp};

/// CSV-based user-contribution repository.
#[derive(Debug, Clone)]
pub struct ContributionRepository {
    connection: CsvConnection,
}

impl ContributionRepository {
    pub fn new(connection: CsvConnection) -> Self {
        Self { connection }
    }

    fn read_all(&self) -> Result<Vec<UserContribution>> {
        let path = self.connection.contributions_file_path();
        self.connection.ensure_file_exists(&path, CONTRIBUTIONS_HEADER)?;

        let file = File::open(&path)?;
        let mut csv_reader = Reader::from_reader(BufReader::new(file));

        let mut contributions = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            contributions.push(UserContribution {
                id: record.get(0).unwrap_or("").to_string(),
                purchase_id: record.get(1).unwrap_or("").to_string(),
                user_id: record.get(2).unwrap_or("").to_string(),
                contribution_amount: parse_decimal(record.get(3).unwrap_or("0")),
                meter_reading: parse_decimal(record.get(4).unwrap_or("0")),
                tokens_consumed: parse_decimal(record.get(5).unwrap_or("0")),
                created_at: parse_timestamp(record.get(6).unwrap_or("")),
            });
        }
        Ok(contributions)
    }

    fn write_all(&self, contributions: &[UserContribution]) -> Result<()> {
        let path = self.connection.contributions_file_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut csv_writer = Writer::from_writer(BufWriter::new(file));

        csv_writer.write_record(CONTRIBUTIONS_HEADER)?;
        for contribution in contributions {
            csv_writer.write_record(&[
                contribution.id.as_str(),
                contribution.purchase_id.as_str(),
                contribution.user_id.as_str(),
                &contribution.contribution_amount.to_string(),
                &contribution.meter_reading.to_string(),
                &contribution.tokens_consumed.to_string(),
                &contribution.created_at.to_rfc3339(),
            ])?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

impl ContributionStorage for ContributionRepository {
    fn store_contribution(&self, contribution: &UserContribution) -> Result<()> {
        let mut contributions = self.read_all()?;
        contributions.push(contribution.clone());
        self.write_all(&contributions)
    }

    fn get_contribution(&self, contribution_id: &str) -> Result<Option<UserContribution>> {
        Ok(self.read_all()?.into_iter().find(|c| c.id == contribution_id))
    }

    fn get_contribution_for_purchase(&self, purchase_id: &str) -> Result<Option<UserContribution>> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|c| c.purchase_id == purchase_id))
    }

    fn list_contributions_for_user(&self, user_id: &str) -> Result<Vec<UserContribution>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|c| c.user_id == user_id)
            .collect())
    }

    fn list_contributions(&self) -> Result<Vec<UserContribution>> {
        self.read_all()
    }

    fn update_contribution(&self, contribution: &UserContribution) -> Result<()> {
        let mut contributions = self.read_all()?;
        let slot = contributions
            .iter_mut()
            .find(|c| c.id == contribution.id)
            .ok_or_else(|| anyhow!("contribution {} not found for update", contribution.id))?;
        *slot = contribution.clone();
        self.write_all(&contributions)
    }
}
