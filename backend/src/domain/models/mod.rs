//! Domain models for the shared-meter token ledger.

pub mod contribution;
pub mod meter_reading;
pub mod purchase;
pub mod reading_point;
pub mod receipt;

pub use contribution::UserContribution;
pub use meter_reading::MeterReading;
pub use purchase::TokenPurchase;
pub use reading_point::{ReadingPoint, ReadingSource};
pub use receipt::ReceiptData;
