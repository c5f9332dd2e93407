use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use csv::{Reader, Writer};
use log::warn;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter};

use crate::domain::models::{ReceiptData, TokenPurchase};
use crate::storage::traits::PurchaseStorage;

use super::connection::{CsvConnection, PURCHASES_HEADER, RECEIPTS_HEADER};
use super::reading_repository::{parse_decimal, parse_timestamp};

const RECEIPT_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// CSV-based token-purchase repository.
///
/// Receipts live in their own file keyed by purchase ID and are joined
/// onto purchases at read time, so a purchase row never changes when a
/// receipt is attached later.
#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    connection: CsvConnection,
}

impl PurchaseRepository {
    pub fn new(connection: CsvConnection) -> Self {
        Self { connection }
    }

    fn read_purchases(&self) -> Result<Vec<TokenPurchase>> {
        let path = self.connection.purchases_file_path();
        self.connection.ensure_file_exists(&path, PURCHASES_HEADER)?;

        let file = File::open(&path)?;
        let mut csv_reader = Reader::from_reader(BufReader::new(file));

        let mut receipts = self.read_receipts()?;
        let mut by_purchase: HashMap<String, ReceiptData> = HashMap::new();
        for receipt in receipts.drain(..) {
            if let Some(purchase_id) = receipt.purchase_id.clone() {
                by_purchase.insert(purchase_id, receipt);
            }
        }

        let mut purchases = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            let id = record.get(0).unwrap_or("").to_string();
            let receipt = by_purchase.remove(&id);
            purchases.push(TokenPurchase {
                id,
                total_tokens: parse_decimal(record.get(1).unwrap_or("0")),
                total_payment: parse_decimal(record.get(2).unwrap_or("0")),
                meter_reading: parse_decimal(record.get(3).unwrap_or("0")),
                purchase_date: parse_timestamp(record.get(4).unwrap_or("")),
                is_emergency: record.get(5).unwrap_or("false") == "true",
                created_by: record.get(6).unwrap_or("").to_string(),
                created_at: parse_timestamp(record.get(7).unwrap_or("")),
                receipt,
            });
        }
        Ok(purchases)
    }

    fn write_purchases(&self, purchases: &[TokenPurchase]) -> Result<()> {
        let path = self.connection.purchases_file_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut csv_writer = Writer::from_writer(BufWriter::new(file));

        csv_writer.write_record(PURCHASES_HEADER)?;
        for purchase in purchases {
            csv_writer.write_record(&[
                purchase.id.as_str(),
                &purchase.total_tokens.to_string(),
                &purchase.total_payment.to_string(),
                &purchase.meter_reading.to_string(),
                &purchase.purchase_date.to_rfc3339(),
                if purchase.is_emergency { "true" } else { "false" },
                purchase.created_by.as_str(),
                &purchase.created_at.to_rfc3339(),
            ])?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    fn read_receipts(&self) -> Result<Vec<ReceiptData>> {
        let path = self.connection.receipts_file_path();
        self.connection.ensure_file_exists(&path, RECEIPTS_HEADER)?;

        let file = File::open(&path)?;
        let mut csv_reader = Reader::from_reader(BufReader::new(file));

        let mut receipts = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            let purchase_id = record.get(1).unwrap_or("").to_string();
            let token_number = record.get(9).unwrap_or("").to_string();
            let account_number = record.get(10).unwrap_or("").to_string();
            receipts.push(ReceiptData {
                id: record.get(0).unwrap_or("").to_string(),
                purchase_id: if purchase_id.is_empty() { None } else { Some(purchase_id) },
                kwh_purchased: parse_decimal(record.get(2).unwrap_or("0")),
                energy_cost: parse_decimal(record.get(3).unwrap_or("0")),
                debt: parse_decimal(record.get(4).unwrap_or("0")),
                rea_levy: parse_decimal(record.get(5).unwrap_or("0")),
                vat: parse_decimal(record.get(6).unwrap_or("0")),
                total_amount: parse_decimal(record.get(7).unwrap_or("0")),
                transaction_datetime: parse_receipt_datetime(record.get(8).unwrap_or("")),
                token_number: if token_number.is_empty() { None } else { Some(token_number) },
                account_number: if account_number.is_empty() { None } else { Some(account_number) },
            });
        }
        Ok(receipts)
    }

    fn write_receipts(&self, receipts: &[ReceiptData]) -> Result<()> {
        let path = self.connection.receipts_file_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut csv_writer = Writer::from_writer(BufWriter::new(file));

        csv_writer.write_record(RECEIPTS_HEADER)?;
        for receipt in receipts {
            csv_writer.write_record(&[
                receipt.id.as_str(),
                receipt.purchase_id.as_deref().unwrap_or(""),
                &receipt.kwh_purchased.to_string(),
                &receipt.energy_cost.to_string(),
                &receipt.debt.to_string(),
                &receipt.rea_levy.to_string(),
                &receipt.vat.to_string(),
                &receipt.total_amount.to_string(),
                &receipt
                    .transaction_datetime
                    .format(RECEIPT_DATETIME_FORMAT)
                    .to_string(),
                receipt.token_number.as_deref().unwrap_or(""),
                receipt.account_number.as_deref().unwrap_or(""),
            ])?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

impl PurchaseStorage for PurchaseRepository {
    fn store_purchase(&self, purchase: &TokenPurchase) -> Result<()> {
        let mut purchases = self.read_purchases()?;
        purchases.push(purchase.clone());
        self.write_purchases(&purchases)?;
        if let Some(receipt) = &purchase.receipt {
            self.attach_receipt(&purchase.id, receipt)?;
        }
        Ok(())
    }

    fn get_purchase(&self, purchase_id: &str) -> Result<Option<TokenPurchase>> {
        Ok(self.read_purchases()?.into_iter().find(|p| p.id == purchase_id))
    }

    fn list_purchases_chronological(&self) -> Result<Vec<TokenPurchase>> {
        let mut purchases = self.read_purchases()?;
        purchases.sort_by(|a, b| {
            a.purchase_date
                .cmp(&b.purchase_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(purchases)
    }

    fn update_purchase(&self, purchase: &TokenPurchase) -> Result<()> {
        let mut purchases = self.read_purchases()?;
        let slot = purchases
            .iter_mut()
            .find(|p| p.id == purchase.id)
            .ok_or_else(|| anyhow!("purchase {} not found for update", purchase.id))?;
        *slot = purchase.clone();
        self.write_purchases(&purchases)
    }

    fn delete_purchase(&self, purchase_id: &str) -> Result<bool> {
        let mut purchases = self.read_purchases()?;
        let before = purchases.len();
        purchases.retain(|p| p.id != purchase_id);
        if purchases.len() == before {
            return Ok(false);
        }
        self.write_purchases(&purchases)?;

        let mut receipts = self.read_receipts()?;
        receipts.retain(|r| r.purchase_id.as_deref() != Some(purchase_id));
        self.write_receipts(&receipts)?;
        Ok(true)
    }

    fn attach_receipt(&self, purchase_id: &str, receipt: &ReceiptData) -> Result<()> {
        let mut receipts = self.read_receipts()?;
        // One receipt per purchase: replace any existing row
        receipts.retain(|r| r.purchase_id.as_deref() != Some(purchase_id));
        let mut receipt = receipt.clone();
        receipt.purchase_id = Some(purchase_id.to_string());
        receipts.push(receipt);
        self.write_receipts(&receipts)
    }
}

fn parse_receipt_datetime(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, RECEIPT_DATETIME_FORMAT).unwrap_or_else(|_| {
        warn!("Failed to parse receipt datetime '{}', using epoch as fallback", value);
        chrono::DateTime::from_timestamp(0, 0).unwrap().naive_utc()
    })
}
