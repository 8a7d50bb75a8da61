//! Relay services.
//!
//! Each service operates on the shared [`Matrix`](crate::state::Matrix) and
//! produces pushes into connection queues. Handlers decide *who* may invoke
//! them; services decide *what* happens.

pub mod delivery;
pub mod presence;
pub mod typing;
