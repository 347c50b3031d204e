pub mod classify;
pub mod proxy;
pub mod registry;

pub use classify::{classify, Chunk, ChunkKind, DtlsContentType, DtlsHandshakeType};
pub use proxy::{Filter, VnetProxy};
pub use registry::{get_or_create_proxy, new_registry, remove_proxy, VnetRegistry};
