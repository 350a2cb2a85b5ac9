//! Auth session capability
//!
//! The authentication provider is external; the engine only consumes a
//! user identity and the session lifecycle.

pub mod session;

pub use session::{AuthSession, LocalSession, UserId};
