//! foldershare
//!
//! Shared-folder file server and client over a small framed TCP protocol:
//! list, upload, download and delete files in one flat directory.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod logging;
pub mod model;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod server;
pub mod session;
pub mod transfer;

pub use client::Client;
pub use error::{Error, Result};
pub use model::FileEntry;
pub use server::Server;
