mod auth;
mod client;
mod diff;
mod error;
mod logger;
mod pending;
mod protocol;
mod retry;
mod types;

pub use auth::TokenManager;
pub use client::{ClientConfig, DeviceClient, DeviceClientBuilder};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use protocol::DEFAULT_BASE_URL;
pub use types::*;
