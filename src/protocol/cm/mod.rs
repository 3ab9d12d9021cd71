//! Connection manager transport and message bodies.

pub mod connector;
pub mod keyvalues;
pub mod messages;

pub use connector::{connect_to_cm, new_cm_connection, CmConnection};
pub use keyvalues::parse_binary_kv;
