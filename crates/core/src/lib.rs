pub mod barrier;
pub mod blockchain;
pub mod config;
pub mod events;
pub mod forest;
pub mod metrics;

// Re-export commonly used types
pub use barrier::{PassReport, ReorgBarrier, ReorgPass, TimerOutcome, Trigger};
pub use blockchain::{Admission, BlockForest, ForestReorganizer};
pub use config::{BarrierConfig, ThicketConfig};
pub use events::{EventPublisher, ForestEvent};
pub use forest::{
    ChainIndex, CompactWork, DeleteReport, DifficultyCalculator, ForestTxn, MergeReport, Organizer, SpanIndex,
    Verifier, VerifyReport, WorkVerifier,
};
pub use metrics::ForestMetrics;
