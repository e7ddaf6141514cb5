//! # Scoria Command System
//!
//! Command recording, batching, and submission for the Scoria execution
//! engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Command Submission Pipeline                   │
//! │                                                                   │
//! │  caller threads          background worker                        │
//! │  ┌────────────┐   swap   ┌──────────────┐    ┌───────────────┐    │
//! │  │   Write    │─────────▶│   Command    │───▶│ CommandQueue  │    │
//! │  │   Batch    │          │   Recorder   │    │ (fence/submit)│    │
//! │  │ (enqueue)  │          │ (open list)  │    └───────┬───────┘    │
//! │  └────────────┘          └──────┬───────┘            │            │
//! │                                 │              ┌─────▼──────┐     │
//! │                          ┌──────▼────────┐     │   Device   │     │
//! │                          │ AllocatorRing │     │  (backend) │     │
//! │                          │ DescriptorPool│     └────────────┘     │
//! │                          └───────────────┘                        │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Submission Flow
//!
//! 1. Caller threads enqueue operations into the write batch and receive a
//!    predicted completion event
//! 2. The worker swaps batches when the flush policy fires and replays the
//!    drained batch into the recorder's open command list
//! 3. Flushing closes the list, submits it, recycles it, and reopens a
//!    fresh one so the recorder is always ready
//! 4. The fence reaching an event's value marks that work complete

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod context;
pub mod descriptor;
pub mod queue;
pub mod recorder;
pub mod ring;
pub mod testing;

// Re-exports
pub use batch::BatchedCommand;
pub use context::ExecutionContext;
pub use descriptor::DescriptorPool;
pub use queue::CommandQueue;
pub use recorder::CommandRecorder;
pub use ring::AllocatorRing;
