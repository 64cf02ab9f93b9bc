//! # parley-client
//!
//! Client side of the parley chat service: an NPLT connection to the
//! server, an RDT endpoint for downloads, and an event stream describing
//! everything the server sends.

pub mod client;
pub mod config;
pub mod download;
pub mod events;

pub use client::{connect_with_retry, NpltClient};
pub use config::ClientConfig;
pub use download::{save_download, Downloads};
pub use events::ClientEvent;
