pub mod errors;
pub mod ledger;
pub mod value_objects;

pub use errors::*;
pub use ledger::{StockConfig, StockLedger};
pub use value_objects::*;
