//! # CSV Storage Module
//!
//! File-based storage backend for the ledger. The domain layer is fully
//! storage-agnostic; this backend keeps one CSV file per aggregate and
//! rewrites whole files on mutation, which keeps every read a full fresh
//! snapshot of durable state.
//!
//! ## File layout
//!
//! ```text
//! readings.csv       id,user_id,reading,reading_date,notes,created_at
//! purchases.csv      id,total_tokens,total_payment,meter_reading,purchase_date,is_emergency,created_by,created_at
//! contributions.csv  id,purchase_id,user_id,contribution_amount,meter_reading,tokens_consumed,created_at
//! receipts.csv       id,purchase_id,kwh_purchased,energy_cost,debt,rea_levy,vat,total_amount,transaction_datetime,token_number,account_number
//! ```

pub mod connection;
pub mod contribution_repository;
pub mod purchase_repository;
pub mod reading_repository;

pub use connection::CsvConnection;
pub use contribution_repository::ContributionRepository;
pub use purchase_repository::PurchaseRepository;
pub use reading_repository::ReadingRepository;
