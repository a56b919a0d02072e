//! Smart pack-protocol relay.

pub mod advertisement;
pub mod chunks;
pub mod handler;
pub mod service;

pub use advertisement::encode_advertisement;
pub use chunks::{ChunkReader, DEFAULT_CHUNK_SIZE};
pub use handler::{
    ssh_pack_exchange, InboundStream, PackRelay, RelayResult, RelayStream, NEGOTIATION_SENTINEL,
};
pub use service::PackService;
