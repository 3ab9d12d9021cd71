//! Steam wire protocols.

pub mod cm;
pub mod gc;
pub mod packets;
