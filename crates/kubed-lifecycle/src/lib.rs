//! kubed-lifecycle — what the shell does with a cluster.
//!
//! [`Session`] ties the environment table, the process table, the manifest
//! generator and a [`kubed_gateway::ClusterGateway`] together and implements
//! launch, kill, ps and context switching on top of them. [`prepull`] runs
//! the one-time image bootstrap.

pub mod error;
pub mod invocation;
pub mod prepull;
pub mod session;

pub use error::{LifecycleError, LifecycleResult};
pub use invocation::Invocation;
pub use prepull::{PrepullOutcome, prepull};
pub use session::Session;
