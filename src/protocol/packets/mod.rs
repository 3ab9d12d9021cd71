//! Packet definitions and codecs.

pub mod codec;
pub mod emsg;

pub use codec::*;
