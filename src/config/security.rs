//! Credential hashing configuration.

use serde::Deserialize;

/// Argon2 cost parameters used when hashing new credentials.
///
/// Verification always uses the parameters embedded in the stored hash, so
/// changing these only affects identities created or backfilled afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Memory cost in KiB.
    #[serde(default = "default_memory_kib")]
    pub argon2_memory_kib: u32,
    /// Number of passes.
    #[serde(default = "default_iterations")]
    pub argon2_iterations: u32,
    /// Degree of parallelism.
    #[serde(default = "default_parallelism")]
    pub argon2_parallelism: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_kib: default_memory_kib(),
            argon2_iterations: default_iterations(),
            argon2_parallelism: default_parallelism(),
        }
    }
}

fn default_memory_kib() -> u32 {
    argon2::Params::DEFAULT_M_COST
}

fn default_iterations() -> u32 {
    argon2::Params::DEFAULT_T_COST
}

fn default_parallelism() -> u32 {
    argon2::Params::DEFAULT_P_COST
}
