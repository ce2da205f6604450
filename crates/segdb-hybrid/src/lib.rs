//! Hybrid retrieval over per-tenant generations of a vector and a lexical index.

pub mod coordinator;
pub mod fusion;
pub mod generation;
pub mod tenant;

pub use coordinator::{IndexCoordinator, IndexListing, IndexState, RecoveryOutcome};
pub use fusion::{merge, FusionRanker, FusionWeights, DEFAULT_RRF_K};
pub use generation::{CancelToken, Generation, IndexStats};
pub use tenant::TenantHandle;
