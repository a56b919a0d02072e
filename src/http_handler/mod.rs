//! Smart HTTP transport.

pub mod handler;
pub mod server;
pub mod structs;

pub use server::{create_router, serve};
pub use structs::{HttpError, HttpState};
