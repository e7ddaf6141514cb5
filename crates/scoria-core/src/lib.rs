//! # Scoria Core
//!
//! Foundational traits, types, and abstractions for the Scoria GPU
//! execution engine.
//!
//! This crate provides the type-system foundations shared by the command
//! recording and batching machinery:
//!
//! - Strongly typed handles for opaque device objects
//! - Completion events marking points in the submitted-work timeline
//! - The device-abstraction seams implemented by platform backends
//! - Error handling and engine configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      scoria-core                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Traits    │  │   Types     │  │     Error           │  │
//! │  │  (Device,   │  │ (Handles,   │  │   Handling          │  │
//! │  │   Queue)    │  │  Barriers)  │  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod config;
pub mod error;
pub mod event;
pub mod trace;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use config::BatchingConfig;
pub use error::{Error, Result};
pub use event::CompletionEvent;
pub use trace::{LogTrace, NullTrace, TraceSink};
pub use traits::*;
pub use types::*;
