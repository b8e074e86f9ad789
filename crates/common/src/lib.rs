pub mod error;
pub mod traits;
pub mod types;
pub mod utils;

pub use error::{ForestError, Result};
pub use traits::{NodeStore, WriteBatch};
