//! # planpoker
//!
//! A planning poker server: participants join a shared room, cast hidden
//! votes, and reveal them together.
//!
//! The server process is stateless. Sessions, rooms, and room snapshots
//! live in a shared [`StateStore`](planpoker_store::StateStore), so any
//! number of server nodes can sit behind one load balancer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use planpoker::prelude::*;
//!
//! # async fn run() -> Result<(), PlanpokerError> {
//! let server = PlanpokerServerBuilder::new()
//!     .bind("127.0.0.1:50051")
//!     .build(Arc::new(MemoryStore::new()))
//!     .await?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use error::PlanpokerError;
pub use server::{PlanpokerServer, PlanpokerServerBuilder};

/// Everything needed to run a server or talk its protocol.
pub mod prelude {
    pub use crate::{ConfigError, PlanpokerError, PlanpokerServer, PlanpokerServerBuilder, ServerConfig};
    pub use planpoker_protocol::{
        Ballot, Codec, EndReason, EntryId, Envelope, JsonCodec, LoginId, Point, Request,
        Response, RoomId, RoomState, Session, Snapshot,
    };
    pub use planpoker_room::{RoomConfig, RoomError};
    pub use planpoker_session::{SessionConfig, SessionError};
    #[cfg(feature = "redis")]
    pub use planpoker_store::RedisStore;
    pub use planpoker_store::{MemoryStore, StateStore, StoreError};
}
