//! # parley-server
//!
//! Chat server speaking NPLT over TCP, with file downloads over RDT.
//!
//! The binary in `main.rs` is a thin wrapper; everything it runs lives here
//! so integration tests can start a server on loopback ports.

pub mod collaborators;
pub mod config;
pub mod registry;
pub mod server;
pub mod session;
pub mod transfer;

pub use collaborators::Collaborators;
pub use config::ServerConfig;
pub use registry::{Registry, RegistrySnapshot};
pub use server::{run_server, sweep_timeouts, Server, ServerHandle};
pub use session::{Session, SessionState};
pub use transfer::TransferRoute;
