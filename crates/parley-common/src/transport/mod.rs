//! Transport components for parley
//!
//! - [`rdt`]: reliable file delivery over UDP (sender/receiver sessions plus
//!   the socket-owning server and client)
//! - [`shutdown`]: watch-based shutdown signalling shared by every loop

pub mod rdt;
pub mod shutdown;

pub use rdt::{RdtClient, RdtConfig, RdtServer};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
