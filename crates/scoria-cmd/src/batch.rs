//! # Work Batching
//!
//! The shared producer/consumer state and the background worker that
//! drains batched operations into the command recorder.
//!
//! Producers append to the write batch under one mutex and immediately
//! receive a predicted completion event. The worker swaps the write batch
//! with its own spare vector under the same lock, then replays the drained
//! batch without holding it. Only the worker swaps, so the write batch is
//! append-only between swaps and predicted events stay valid.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use scoria_core::{
    BatchingConfig, BufferHandle, CompletionEvent, DescriptorHeapId, Error, ResourceBarrier,
    ResourceState,
};
use scoria_core::traits::{BindingTable, Dispatchable};

use crate::recorder::{CommandRecorder, FILL_PATTERN_WINDOW};

// =============================================================================
// BATCHED COMMANDS
// =============================================================================

/// One queued operation with value-owned arguments
///
/// Caller-owned buffers (pattern bytes, barrier slices) are deep-copied at
/// enqueue time because their lifetime is not guaranteed past the call.
pub enum BatchedCommand {
    /// Buffer-region copy
    CopyBufferRegion {
        /// Destination buffer
        dst: BufferHandle,
        /// Destination byte offset
        dst_offset: u64,
        /// State the destination is currently in
        dst_state: ResourceState,
        /// Source buffer
        src: BufferHandle,
        /// Source byte offset
        src_offset: u64,
        /// State the source is currently in
        src_state: ResourceState,
        /// Bytes to copy
        byte_count: u64,
    },
    /// Pattern fill (pattern deep-copied, at most the 16-byte window)
    FillBufferWithPattern {
        /// Destination buffer
        dst: BufferHandle,
        /// Destination byte offset
        dst_offset: u64,
        /// Bytes to fill
        dst_size_in_bytes: u64,
        /// Owned copy of the caller's pattern
        pattern: ArrayVec<u8, FILL_PATTERN_WINDOW>,
    },
    /// Operator initialization dispatch
    InitializeOperator {
        /// The operator initializer
        initializer: Arc<dyn Dispatchable>,
        /// Bindings, moved into the batch
        bindings: Box<dyn BindingTable>,
        /// Heap the bindings live in
        heap: DescriptorHeapId,
    },
    /// Operator execution dispatch
    ExecuteOperator {
        /// The compiled operator
        op: Arc<dyn Dispatchable>,
        /// Bindings, moved into the batch
        bindings: Box<dyn BindingTable>,
        /// Heap the bindings live in
        heap: DescriptorHeapId,
    },
    /// Caller-supplied barriers (deep-copied)
    ResourceBarrier {
        /// Owned copy of the caller's barrier list
        barriers: Vec<ResourceBarrier>,
    },
    /// UAV barrier over all resources
    UavBarrier,
}

// =============================================================================
// SHARED STATE
// =============================================================================

/// State guarded by the batching mutex
pub(crate) struct BatchState {
    /// Batch currently accepting entries
    pub write_batch: Vec<BatchedCommand>,
    /// Event the next flush will carry
    pub next_flush_event: CompletionEvent,
    /// Explicit flush pending
    pub flush_requested: bool,
    /// Terminal shutdown flag
    pub exit_requested: bool,
    /// Flush failure awaiting pickup by the front-end
    pub pending_error: Option<Error>,
}

/// Mutex plus condvar shared between the front-end and the worker
pub(crate) struct SharedState {
    pub state: Mutex<BatchState>,
    /// Signaled on every enqueue, flush request, and exit
    pub work_enqueued: Condvar,
}

impl SharedState {
    pub fn new(next_flush_event: CompletionEvent) -> Self {
        Self {
            state: Mutex::new(BatchState {
                write_batch: Vec::new(),
                next_flush_event,
                flush_requested: false,
                exit_requested: false,
                pending_error: None,
            }),
            work_enqueued: Condvar::new(),
        }
    }

    /// Lock the batch state, continuing through poisoning.
    ///
    /// A producer that panicked mid-enqueue must not wedge every other
    /// producer; the state it guards stays structurally valid.
    pub fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// WORKER LOOP
// =============================================================================

/// Drain batches into the recorder until exit is requested.
///
/// The flush policy fires when a flush was explicitly requested, the batch
/// reached the size threshold, or the time threshold elapsed since the last
/// flush. The goal is to balance feeding the GPU while the CPU is still
/// producing commands against the fixed overhead of many small submissions.
pub(crate) fn worker_loop(
    shared: Arc<SharedState>,
    mut recorder: CommandRecorder,
    config: BatchingConfig,
) {
    let mut pending: Vec<BatchedCommand> = Vec::new();
    let mut last_flush = Instant::now();

    loop {
        let elapsed_us = last_flush.elapsed().as_micros() as u64;

        let mut state = shared.lock();
        if state.exit_requested {
            break;
        }

        if state.write_batch.is_empty() {
            // Wait for new work to be batched.
            let guard = shared
                .work_enqueued
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            drop(guard);
            continue;
        }

        let flush = state.flush_requested
            || state.write_batch.len() >= config.batch_flush_size as usize
            || elapsed_us >= config.batch_flush_time_us;

        if !flush {
            // Thresholds unmet: sleep until the time threshold could fire
            // or another enqueue/flush/exit wakes us.
            let remaining =
                Duration::from_micros(config.batch_flush_time_us.saturating_sub(elapsed_us));
            let (guard, _timeout) = shared
                .work_enqueued
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            drop(guard);
            continue;
        }

        // Swap roles: producers resume on the (cleared) spare vector while
        // this iteration drains what they wrote so far.
        core::mem::swap(&mut state.write_batch, &mut pending);
        state.next_flush_event.fence_value += 1;
        state.flush_requested = false;
        drop(state);

        // Replay in enqueue order: later operations may depend on resource
        // states established by earlier ones.
        for command in pending.drain(..) {
            replay(&mut recorder, command);
        }

        if let Err(err) = recorder.flush() {
            log::warn!("batched flush failed: {err}");
            shared.lock().pending_error = Some(err);
        }
        last_flush = Instant::now();
    }

    log::debug!("execution context worker exiting");
}

fn replay(recorder: &mut CommandRecorder, command: BatchedCommand) {
    match command {
        BatchedCommand::CopyBufferRegion {
            dst,
            dst_offset,
            dst_state,
            src,
            src_offset,
            src_state,
            byte_count,
        } => {
            recorder.copy_buffer_region(
                dst, dst_offset, dst_state, src, src_offset, src_state, byte_count,
            );
        }
        BatchedCommand::FillBufferWithPattern {
            dst,
            dst_offset,
            dst_size_in_bytes,
            pattern,
        } => {
            recorder.fill_buffer_with_pattern(dst, dst_offset, dst_size_in_bytes, &pattern);
        }
        BatchedCommand::InitializeOperator {
            initializer,
            bindings,
            heap,
        } => {
            recorder.initialize_operator(initializer.as_ref(), bindings.as_ref(), heap);
        }
        BatchedCommand::ExecuteOperator { op, bindings, heap } => {
            recorder.execute_operator(op.as_ref(), bindings.as_ref(), heap);
        }
        BatchedCommand::ResourceBarrier { barriers } => {
            recorder.resource_barrier(&barriers);
        }
        BatchedCommand::UavBarrier => {
            recorder.uav_barrier();
        }
    }
}
