pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod identity;
pub mod login;
pub mod platform;
#[cfg(feature = "server")]
pub mod server;
pub mod sso;

pub use error::{Error, Result};
