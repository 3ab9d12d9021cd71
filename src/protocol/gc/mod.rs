//! Game Coordinator protocol tunnelled through the CM session.

pub mod envelope;
pub mod messages;

pub use envelope::GcMessage;
