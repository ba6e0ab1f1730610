//! # Drawing-Board Server Library
//!
//! Server backing a real-time collaborative drawing-board application.
//! Authenticated users own named boards; a board accumulates an ordered
//! history of drawing elements (point sets, lines, text, images) that can
//! be undone, cleared, and replayed to the requesting client.
//!
//! ## Architecture
//!
//! One lightweight tokio task per accepted TCP connection. Workers share
//! no per-connection state except through the [`registry::ClientRegistry`],
//! whose single reader/writer lock is the only cross-worker
//! synchronization point. Frames from one connection are processed
//! strictly in arrival order, which is what the chunk-reassembly protocol
//! relies on.
//!
//! ## Module Organization
//!
//! - [`conn`] — frame-level I/O on a single stream with idle-timeout
//!   deadlines refreshed on every successful transfer.
//! - [`registry`] — thread-safe map from connection id to session state
//!   (authenticated user, selected board, reassembly buffers).
//! - [`router`] — the session state machine: dispatches frames by action
//!   code and decides when a connection must be torn down.
//! - [`server`] — accept loop, worker tracking, cooperative shutdown.
//! - [`storage`] — the persistence contract the router consumes, plus an
//!   in-memory implementation.
//! - [`auth`] — credential-verification seam around the wire-compatible
//!   byte-for-byte password comparison.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::auth::ExactMatchVerifier;
//! use server::registry::ClientRegistry;
//! use server::router::Router;
//! use server::server::{Server, ShutdownHandle};
//! use server::storage::{MemoryStorage, Storage};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(ClientRegistry::new());
//!     let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
//!     let handle = ShutdownHandle::new();
//!     let router = Arc::new(Router::new(
//!         registry,
//!         storage,
//!         Box::new(ExactMatchVerifier),
//!         handle.clone(),
//!     ));
//!
//!     let server = Server::new(router, handle, Duration::from_secs(15 * 60));
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod conn;
pub mod registry;
pub mod router;
pub mod server;
pub mod storage;
