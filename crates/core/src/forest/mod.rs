//! Nested-interval block forest.
//!
//! Space 0 holds the connected forest, every other space one orphan subtree
//! waiting for its parent. [`Organizer`] moves subtrees between spaces and
//! prunes them, [`Verifier`] rolls connected blocks into the chain table.

pub mod chain_index;
pub mod difficulty;
pub mod organizer;
pub mod span_index;
pub mod txn;
pub mod verifier;

pub use chain_index::ChainIndex;
pub use difficulty::{CompactWork, DifficultyCalculator};
pub use organizer::{DeleteReport, MergeReport, Organizer};
pub use span_index::SpanIndex;
pub use txn::ForestTxn;
pub use verifier::{Verifier, VerifyReport, WorkVerifier};
