pub mod ledger;
pub mod table;
pub mod transaction;

pub use ledger::{Ledger, LedgerEntry};
pub use table::TableName;
pub use transaction::with_transaction;
