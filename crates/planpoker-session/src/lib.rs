//! Login sessions for planpoker.
//!
//! A session binds a login id to a secret session id. It is created on
//! first login, renewed (sliding TTL) on every later login that presents
//! the right secret or none at all, and rejected when a client presents a
//! different secret.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server handler (above)  ← Login / Logout requests
//!     ↕
//! Session layer (this crate)  ← issuance, renewal, mismatch detection
//!     ↕
//! Shared state store (below)  ← one string key per login id, with TTL
//! ```
//!
//! Sessions are not consulted by the room layer: login ids are opaque and
//! there is no identity verification.

mod config;
mod error;
mod manager;

pub use config::SessionConfig;
pub use error::SessionError;
pub use manager::SessionManager;
