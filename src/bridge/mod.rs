//! Process wiring: channels between the session and the workers, the event
//! dispatcher and the periodic job scheduler.
//!
//! ## Module Structure
//!
//! - `channels`: Communication channel structures
//! - `dispatcher`: Routes network events to presence and friend handling
//! - `scheduler`: Named, cancellable periodic jobs

pub mod channels;
pub mod dispatcher;
pub mod scheduler;

pub use channels::ChannelBundle;
pub use dispatcher::EventDispatcher;
pub use scheduler::Scheduler;
