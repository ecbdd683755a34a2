mod identity_locks;
mod ingestion_service;
mod normalize_error;
mod normalizer;
mod payload;
mod reconciler;
mod snapshot;
mod sweeper;
mod timeouts;
mod topic;

pub use identity_locks::*;
pub use ingestion_service::*;
pub use normalize_error::*;
pub use normalizer::*;
pub use payload::*;
pub use reconciler::*;
pub use snapshot::*;
pub use sweeper::*;
pub use timeouts::*;
pub use topic::*;
