//! Network subsystem.
//!
//! # Data Flow
//! ```text
//! redirected client
//!     → addr.rs (pick a reachable bind address)
//!     → listener.rs (port-range bind, accept, session per connection)
//!     → session subsystem (both legs)
//! ```

pub mod addr;
pub mod listener;

pub use listener::{ListenerError, SessionListener};
