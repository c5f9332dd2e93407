use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use csv::{Reader, Writer};
use log::warn;
use rust_decimal::Decimal;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter};

use crate::domain::models::MeterReading;
use crate::storage::traits::ReadingStorage;

use super::connection::{CsvConnection, READINGS_HEADER};

/// CSV-based meter-reading repository.
#[derive(Debug, Clone)]
pub struct ReadingRepository {
    connection: CsvConnection,
}

impl ReadingRepository {
    pub fn new(connection: CsvConnection) -> Self {
        Self { connection }
    }

    fn read_all(&self) -> Result<Vec<MeterReading>> {
        let path = self.connection.readings_file_path();
        self.connection.ensure_file_exists(&path, READINGS_HEADER)?;

        let file = File::open(&path)?;
        let mut csv_reader = Reader::from_reader(BufReader::new(file));

        let mut readings = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            let notes = record.get(4).unwrap_or("").to_string();
            readings.push(MeterReading {
                id: record.get(0).unwrap_or("").to_string(),
                user_id: record.get(1).unwrap_or("").to_string(),
                reading: parse_decimal(record.get(2).unwrap_or("0")),
                reading_date: parse_date(record.get(3).unwrap_or("")),
                notes: if notes.is_empty() { None } else { Some(notes) },
                created_at: parse_timestamp(record.get(5).unwrap_or("")),
            });
        }
        Ok(readings)
    }

    fn write_all(&self, readings: &[MeterReading]) -> Result<()> {
        let path = self.connection.readings_file_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut csv_writer = Writer::from_writer(BufWriter::new(file));

        csv_writer.write_record(READINGS_HEADER)?;
        for reading in readings {
            csv_writer.write_record(&[
                reading.id.as_str(),
                reading.user_id.as_str(),
                &reading.reading.to_string(),
                &reading.reading_date.format("%Y-%m-%d").to_string(),
                reading.notes.as_deref().unwrap_or(""),
                &reading.created_at.to_rfc3339(),
            ])?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

impl ReadingStorage for ReadingRepository {
    fn store_reading(&self, reading: &MeterReading) -> Result<()> {
        let mut readings = self.read_all()?;
        readings.push(reading.clone());
        self.write_all(&readings)
    }

    fn get_reading(&self, reading_id: &str) -> Result<Option<MeterReading>> {
        Ok(self.read_all()?.into_iter().find(|r| r.id == reading_id))
    }

    fn list_readings_chronological(&self) -> Result<Vec<MeterReading>> {
        let mut readings = self.read_all()?;
        readings.sort_by(|a, b| {
            a.reading_date
                .cmp(&b.reading_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(readings)
    }

    fn delete_reading(&self, reading_id: &str) -> Result<bool> {
        let mut readings = self.read_all()?;
        let before = readings.len();
        readings.retain(|r| r.id != reading_id);
        if readings.len() == before {
            return Ok(false);
        }
        self.write_all(&readings)?;
        Ok(true)
    }
}

pub(crate) fn parse_decimal(value: &str) -> Decimal {
    value.parse::<Decimal>().unwrap_or_else(|_| {
        if !value.is_empty() {
            warn!("Failed to parse decimal '{}', defaulting to 0", value);
        }
        Decimal::ZERO
    })
}

pub(crate) fn parse_date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap_or_else(|_| {
        warn!("Failed to parse date '{}', using epoch date as fallback", value);
        NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
    })
}

pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            warn!("Failed to parse timestamp '{}', using current time as fallback", value);
            Utc::now()
        })
}
