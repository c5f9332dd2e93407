//! Storage layer: repository traits plus the CSV backend.

pub mod csv;
pub mod traits;

pub use csv::CsvConnection;
pub use traits::{Connection, ContributionStorage, PurchaseStorage, ReadingStorage};
