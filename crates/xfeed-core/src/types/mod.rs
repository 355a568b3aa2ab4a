//! Core data types, enums, and canonical market data records.

pub mod enums;
pub mod market_data;
pub mod symbol;

pub use enums::*;
pub use market_data::*;
pub use symbol::*;
