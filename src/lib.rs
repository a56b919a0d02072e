//! Serves git repositories over smart HTTP and SSH.
//!
//! Both transports hand the pack negotiation to the native `git` pack
//! programs through [`pack::PackRelay`], streaming bytes in both directions.

pub mod access;
pub mod config;
pub mod error;
pub mod http_handler;
pub mod logging;
pub mod pack;
pub mod ssh_handler;

pub use access::{AccessPolicy, RootedAccess};
pub use config::Config;
pub use error::{ConfigError, RelayError, ServerError};
pub use pack::{encode_advertisement, PackRelay, PackService, RelayStream};
