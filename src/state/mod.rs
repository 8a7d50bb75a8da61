//! State management module.
//!
//! Contains the Matrix (shared relay state), the session registry and the
//! per-connection lifecycle state.

mod machine;
mod matrix;
mod session;
mod uid;

pub use machine::ConnectionState;
pub use matrix::Matrix;
pub use session::SessionRegistry;
pub use uid::{ConnId, ConnIdGenerator};

#[cfg(test)]
pub(crate) use matrix::test_support;
