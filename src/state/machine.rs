//! Per-connection lifecycle state.
//!
//! ```text
//!              join                   ok
//! Anonymous ───────► Authenticating ──────► Bound
//!     ▲                    │                  │
//!     └───── rejected ─────┘                  │
//!     ▲                                       │
//!     └──────────────── leave ────────────────┘
//!
//! any state ──── disconnect ────► Closed
//! ```
//!
//! `Authenticating` only exists while a `join` is being processed; intents of
//! one connection are handled sequentially, so no other intent can observe it.

/// Lifecycle state of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Open, no identity bound.
    #[default]
    Anonymous,
    /// A `join` for `name` is in flight.
    Authenticating { name: String },
    /// Bound to identity `name` in the session registry.
    Bound { name: String },
    /// Transport closed. Terminal.
    Closed,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound identity name, if any.
    #[inline]
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Bound { name } => Some(name),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Enter `Authenticating`. Only valid from `Anonymous`.
    pub fn begin_join(&mut self, name: &str) -> bool {
        if matches!(self, Self::Anonymous) {
            *self = Self::Authenticating {
                name: name.to_string(),
            };
            true
        } else {
            false
        }
    }

    /// Resolve an in-flight join: `Bound` on success, back to `Anonymous` otherwise.
    pub fn finish_join(&mut self, admitted: bool) {
        if let Self::Authenticating { name } = self {
            *self = if admitted {
                Self::Bound {
                    name: std::mem::take(name),
                }
            } else {
                Self::Anonymous
            };
        }
    }

    /// Leave a bound session. Returns the released name; `None` from any other state.
    pub fn leave(&mut self) -> Option<String> {
        match std::mem::take(self) {
            Self::Bound { name } => Some(name),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Transition to `Closed`, returning the identity that was bound, if any.
    pub fn close(&mut self) -> Option<String> {
        match std::mem::replace(self, Self::Closed) {
            Self::Bound { name } => Some(name),
            _ => None,
        }
    }
}
