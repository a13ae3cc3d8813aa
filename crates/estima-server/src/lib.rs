pub mod client;
pub mod config;
pub mod protocol;
pub mod router;
pub mod server;
pub mod storage;
pub mod sweeper;

pub use client::ClientRegistry;
pub use config::ServerConfig;
pub use protocol::{ConnectionContext, InboundEnvelope, InboundEvent, Outbound};
pub use router::EventRouter;
pub use server::{start, ServerHandle};
pub use storage::{DiskFileStore, FileStore, StoreError};
