//! Security module for parley.
//!
//! Provides credential hashing and verification for identities.

pub mod password;

pub use password::{CredentialError, Credentials};
