//! Protocol-aware reverse proxy between storage clients and a backend pool.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod session;
pub mod tls;
pub mod wire;

pub use config::ProxyConfig;
pub use lifecycle::Shutdown;
pub use net::SessionListener;
pub use tls::TlsGate;
