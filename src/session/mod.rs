//! Steam session: connection supervision, credentials and the shared
//! handle other components use to talk to Steam.

pub mod context;
pub mod credentials;
pub mod guard;
pub mod supervisor;

pub use context::SessionContext;
pub use credentials::CredentialStore;
pub use supervisor::{SessionSettings, SessionSupervisor};
