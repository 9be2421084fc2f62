//! tidegate-admin: the admin service that ties the engine, the runtime
//! sets and the scheduler together.
//!
//! [`AdminService`] implements [`tidegate_state::DomainReconciler`], so the
//! cluster coordinator and the peer router talk to it without knowing the
//! row type of each domain.

pub mod error;
pub mod runtime;
pub mod service;

pub use error::{AdminError, AdminResult};
pub use runtime::{GeneralDomains, GeneralRuntime};
pub use service::AdminService;
