//! # Execution Context
//!
//! The public, multi-producer face of the engine.
//!
//! Any number of threads may call the recording operations concurrently.
//! Each call appends to the write batch under the shared mutex and returns
//! a predicted completion event without touching the device; the background
//! worker turns batches into real submissions.

use std::sync::Arc;
use std::thread;

use arrayvec::ArrayVec;
use scoria_core::{
    BatchingConfig, BufferHandle, CompletionEvent, DescriptorHeapId, Device, Error,
    ResourceBarrier, ResourceState, Result, TraceSink,
};
use scoria_core::traits::{BindingTable, Dispatchable, SubmitQueue};

use crate::batch::{worker_loop, BatchedCommand, SharedState};
use crate::recorder::{CommandRecorder, FILL_PATTERN_WINDOW};

// =============================================================================
// EXECUTION CONTEXT
// =============================================================================

/// Batching execution context over one command queue
///
/// Owns the shared batching state; the command recorder lives on a detached
/// background thread. Dropping the context requests worker exit without
/// waiting for in-flight GPU work, so teardown never blocks.
pub struct ExecutionContext {
    shared: Arc<SharedState>,
}

impl ExecutionContext {
    /// Create a context and start its background worker
    ///
    /// The recorder (and with it the first open command list) is
    /// constructed up front so construction fails eagerly if the device
    /// cannot supply command objects.
    pub fn new(
        device: Arc<dyn Device>,
        queue: Box<dyn SubmitQueue>,
        config: BatchingConfig,
        tracing: Arc<dyn TraceSink>,
    ) -> Result<Self> {
        let recorder = CommandRecorder::new(device, queue, Arc::clone(&tracing))?;
        tracing.context_created();

        // The next flush will carry the first fence value after whatever
        // the queue has already seen.
        let next_flush_event = recorder.current_completion_event().next();
        let shared = Arc::new(SharedState::new(next_flush_event));

        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("scoria-batch".into())
            .spawn(move || worker_loop(worker_shared, recorder, config))
            .map_err(|_| Error::OutOfMemory)?;
        // The join handle is dropped: the worker is detached and owns the
        // recorder, so teardown never waits on it.

        log::debug!(
            "execution context started (flush size {}, flush time {}us)",
            config.batch_flush_size,
            config.batch_flush_time_us
        );
        Ok(Self { shared })
    }

    /// Create a context with flush thresholds read from the environment
    ///
    /// See [`BatchingConfig::from_env`] for the variables consulted.
    pub fn from_env(
        device: Arc<dyn Device>,
        queue: Box<dyn SubmitQueue>,
        tracing: Arc<dyn TraceSink>,
    ) -> Result<Self> {
        Self::new(device, queue, BatchingConfig::from_env(), tracing)
    }

    // =========================================================================
    // RECORDING OPERATIONS
    // =========================================================================

    /// Enqueue a buffer-region copy
    #[allow(clippy::too_many_arguments)]
    pub fn copy_buffer_region(
        &self,
        dst: BufferHandle,
        dst_offset: u64,
        dst_state: ResourceState,
        src: BufferHandle,
        src_offset: u64,
        src_state: ResourceState,
        byte_count: u64,
    ) -> CompletionEvent {
        self.enqueue(BatchedCommand::CopyBufferRegion {
            dst,
            dst_offset,
            dst_state,
            src,
            src_offset,
            src_state,
            byte_count,
        })
    }

    /// Enqueue a pattern fill
    ///
    /// The pattern is copied, so the slice only needs to live for this
    /// call. Fails fast with `InvalidParameter` if the pattern does not
    /// evenly divide the 16-byte clear window or the destination offset or
    /// size is not 4-byte aligned; nothing is enqueued in that case.
    pub fn fill_buffer_with_pattern(
        &self,
        dst: BufferHandle,
        dst_offset: u64,
        dst_size_in_bytes: u64,
        pattern: &[u8],
    ) -> Result<CompletionEvent> {
        if pattern.len() > FILL_PATTERN_WINDOW
            || (!pattern.is_empty() && FILL_PATTERN_WINDOW % pattern.len() != 0)
        {
            return Err(Error::InvalidParameter);
        }
        if dst_offset % 4 != 0 || dst_size_in_bytes % 4 != 0 {
            return Err(Error::InvalidParameter);
        }

        let mut owned: ArrayVec<u8, FILL_PATTERN_WINDOW> = ArrayVec::new();
        owned.try_extend_from_slice(pattern)
            .map_err(|_| Error::InvalidParameter)?;

        Ok(self.enqueue(BatchedCommand::FillBufferWithPattern {
            dst,
            dst_offset,
            dst_size_in_bytes,
            pattern: owned,
        }))
    }

    /// Enqueue an operator initialization dispatch
    pub fn initialize_operator(
        &self,
        initializer: Arc<dyn Dispatchable>,
        bindings: Box<dyn BindingTable>,
        heap: DescriptorHeapId,
    ) -> CompletionEvent {
        self.enqueue(BatchedCommand::InitializeOperator {
            initializer,
            bindings,
            heap,
        })
    }

    /// Enqueue an operator execution dispatch
    pub fn execute_operator(
        &self,
        op: Arc<dyn Dispatchable>,
        bindings: Box<dyn BindingTable>,
        heap: DescriptorHeapId,
    ) -> CompletionEvent {
        self.enqueue(BatchedCommand::ExecuteOperator { op, bindings, heap })
    }

    /// Enqueue caller-supplied barriers
    ///
    /// The list is copied, so it only needs to live for this call.
    pub fn resource_barrier(&self, barriers: &[ResourceBarrier]) -> CompletionEvent {
        self.enqueue(BatchedCommand::ResourceBarrier {
            barriers: barriers.to_vec(),
        })
    }

    /// Enqueue a UAV barrier over all resources
    pub fn uav_barrier(&self) -> CompletionEvent {
        self.enqueue(BatchedCommand::UavBarrier)
    }

    // =========================================================================
    // FLUSH AND STATUS
    // =========================================================================

    /// Request an explicit flush of everything batched so far
    ///
    /// Returns the event the pending batch will carry, or the previous
    /// event if nothing is batched. A failure posted by the worker since
    /// the last call is returned instead (once for recoverable errors;
    /// device removal is re-posted by every subsequent worker flush).
    pub fn flush(&self) -> Result<CompletionEvent> {
        let mut state = self.shared.lock();

        if let Some(err) = state.pending_error.take() {
            return Err(err);
        }

        let mut event = state.next_flush_event;
        if state.write_batch.is_empty() {
            // Nothing pending: already complete at the previous value.
            event.fence_value -= 1;
        }

        state.flush_requested = true;
        drop(state);
        self.shared.work_enqueued.notify_all();
        Ok(event)
    }

    /// Event that completes once everything enqueued so far has executed
    pub fn current_completion_event(&self) -> CompletionEvent {
        let state = self.shared.lock();
        let mut event = state.next_flush_event;
        if state.write_batch.is_empty() {
            event.fence_value -= 1;
        }
        event
    }

    fn enqueue(&self, command: BatchedCommand) -> CompletionEvent {
        let mut state = self.shared.lock();
        state.write_batch.push(command);
        let event = state.next_flush_event;
        drop(state);
        // The write batch is append-only until the worker swaps, so the
        // predicted event covers this entry as well.
        self.shared.work_enqueued.notify_all();
        event
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // Request exit and detach: never block a destructor on the GPU.
        let mut state = self.shared.lock();
        state.exit_requested = true;
        drop(state);
        self.shared.work_enqueued.notify_all();
        log::debug!("execution context dropped");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SoftwareDevice;
    use scoria_core::{NullTrace, QueueType};

    fn context_with_config(config: BatchingConfig) -> (Arc<SoftwareDevice>, ExecutionContext) {
        let device = Arc::new(SoftwareDevice::new());
        let queue = device.create_queue(QueueType::Compute);
        let context = ExecutionContext::new(
            Arc::clone(&device) as Arc<dyn Device>,
            queue,
            config,
            Arc::new(NullTrace),
        )
        .unwrap();
        (device, context)
    }

    #[test]
    fn test_fill_validation_fails_fast() {
        let (_device, context) = context_with_config(BatchingConfig::default());
        let dst = BufferHandle::new(1);

        // 3 does not divide 16.
        assert_eq!(
            context.fill_buffer_with_pattern(dst, 0, 16, &[1, 2, 3]),
            Err(Error::InvalidParameter)
        );
        // Oversized pattern.
        assert_eq!(
            context.fill_buffer_with_pattern(dst, 0, 16, &[0; 17]),
            Err(Error::InvalidParameter)
        );
        // Misaligned offset and size.
        assert_eq!(
            context.fill_buffer_with_pattern(dst, 2, 16, &[0xFF]),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            context.fill_buffer_with_pattern(dst, 0, 10, &[0xFF]),
            Err(Error::InvalidParameter)
        );
        // Nothing was enqueued by the rejected calls.
        assert_eq!(context.current_completion_event().fence_value, 0);
    }

    #[test]
    fn test_predicted_event_constant_within_batch_window() {
        // Thresholds high enough that nothing flushes during the test.
        let (_device, context) = context_with_config(BatchingConfig {
            batch_flush_size: 1_000,
            batch_flush_time_us: 60_000_000,
        });
        let first = context.uav_barrier();
        let second = context.uav_barrier();
        assert_eq!(first, second);
        assert_eq!(context.current_completion_event(), first);
    }

    #[test]
    fn test_empty_context_event_is_previous_value() {
        let (_device, context) = context_with_config(BatchingConfig::default());
        // Nothing enqueued: the context is complete at the value before
        // the next flush event.
        assert_eq!(context.current_completion_event().fence_value, 0);
    }
}
