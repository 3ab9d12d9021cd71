//! Rich presence mirror.

pub mod normalize;
pub mod synchronizer;

pub use synchronizer::PresenceSynchronizer;
