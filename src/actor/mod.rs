//! Actor system for hot reload.
//!
//! Message-passing concurrency for watch mode:
//!
//! ```text
//! FsActor --> ReloadActor
//! (watch)     (re-derive)
//! ```
//!
//! # Module Structure
//!
//! - `messages` - Message types for inter-actor communication
//! - `fs` - File system watcher with debouncing
//! - `reload` - Applies reload policy to the application context
//! - `coordinator` - Wires up and runs actors

pub mod coordinator;
pub mod fs;
pub mod messages;
pub mod reload;

pub use coordinator::Coordinator;
