//! Session lifecycle management and event dispatch.
//!
//! [`LifecycleController`] is the entry point; the other modules are its
//! collaborators and are public so the daemon and tests can reach them.

pub mod dispatch;
pub mod fingerprint;
pub mod lifecycle;
pub mod locks;
pub mod media;
pub mod paths;
pub mod records;
pub mod registry;
pub mod validator;
pub mod webhook;

pub use lifecycle::{
    CreateOutcome, FlushReport, LifecycleController, RestoreReport, SessionStatus, SessionSummary,
};
pub use records::{SessionRecord, SessionStore};
pub use registry::{SessionHandle, SessionRegistry, SessionUpdate};
pub use validator::{HealthValidator, Validation};
