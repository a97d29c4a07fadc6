//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 server driving the Sarpras queues: start, step, status and
//! clear per queue kind, plus the automatic backup trigger and settings.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
