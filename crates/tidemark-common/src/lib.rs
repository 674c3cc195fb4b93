pub mod error;
pub mod types;

pub use error::{Divergence, Error, Result};
pub use types::{Direction, Mode};
