//! # Command Recorder
//!
//! The single-threaded execution core: records operations into the
//! currently open command list and turns batches into submissions.
//!
//! Exactly one command list is open at any time (except during the brief
//! close/reopen transition inside a flush). Recording calls never return
//! errors; failures are absorbed into the recorder's status and surfaced by
//! [`CommandRecorder::flush`].

use std::collections::VecDeque;
use std::sync::Arc;

use arrayvec::ArrayVec;
use scoria_core::{
    BufferHandle, CompletionEvent, DescriptorHeapFlags, DescriptorHeapId, Device, Error,
    QueueType, ResourceBarrier, ResourceState, Result, TraceSink,
};
use scoria_core::traits::{BindingTable, CommandList, Dispatchable, SubmitQueue};

use crate::descriptor::{DescriptorPool, DEFAULT_HEAP_CAPACITY};
use crate::queue::CommandQueue;
use crate::ring::AllocatorRing;

/// Fixed width of the clear window used by pattern fills
pub const FILL_PATTERN_WINDOW: usize = 16;

// =============================================================================
// COMMAND RECORDER
// =============================================================================

/// Records GPU operations and flushes them to the queue
///
/// Owned by the batching worker; unit tests drive it directly. All state is
/// single-threaded by construction, so no locking happens here.
pub struct CommandRecorder {
    device: Arc<dyn Device>,
    queue: CommandQueue,
    descriptors: DescriptorPool,
    allocators: AllocatorRing,
    current_list: Option<Box<dyn CommandList>>,
    /// Closed lists eligible for reset and reuse
    cached_lists: VecDeque<Box<dyn CommandList>>,
    /// Heap bound on the current list, to skip redundant rebinds
    current_heap: Option<DescriptorHeapId>,
    /// Operations recorded into the current list since the last flush
    operations_recorded: u32,
    /// Sticky error state; `DeviceRemoved` is never cleared
    status: Result<()>,
    tracing: Arc<dyn TraceSink>,
}

impl CommandRecorder {
    /// Create a recorder and open its first command list
    pub fn new(
        device: Arc<dyn Device>,
        raw_queue: Box<dyn SubmitQueue>,
        tracing: Arc<dyn TraceSink>,
    ) -> Result<Self> {
        let queue = CommandQueue::new(raw_queue);
        let descriptors = DescriptorPool::new(Arc::clone(&device), DEFAULT_HEAP_CAPACITY);
        let allocators = AllocatorRing::new(
            device.as_ref(),
            queue.queue_type(),
            queue.current_completion_event(),
        )?;

        let mut recorder = Self {
            device,
            queue,
            descriptors,
            allocators,
            current_list: None,
            cached_lists: VecDeque::new(),
            current_heap: None,
            operations_recorded: 0,
            status: Ok(()),
            tracing,
        };
        recorder.open_command_list()?;
        Ok(recorder)
    }

    /// Queue kind this recorder records for
    pub fn queue_type(&self) -> QueueType {
        self.queue.queue_type()
    }

    /// Event that completes once everything recorded so far has executed
    ///
    /// If operations are pending unflushed, the *next* fence value is the
    /// one that will signal their completion.
    pub fn current_completion_event(&self) -> CompletionEvent {
        let mut event = self.queue.current_completion_event();
        if self.operations_recorded != 0 {
            event.fence_value += 1;
        }
        event
    }

    // =========================================================================
    // RECORDING OPERATIONS
    // =========================================================================

    /// Record a buffer-region copy with the state transitions it needs
    #[allow(clippy::too_many_arguments)]
    pub fn copy_buffer_region(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        dst_state: ResourceState,
        src: BufferHandle,
        src_offset: u64,
        src_state: ResourceState,
        byte_count: u64,
    ) -> CompletionEvent {
        if self.status.is_err() {
            return self.current_completion_event();
        }
        self.tracing.copy_buffer_region();

        let Some(list) = self.current_list.as_mut() else {
            return self.current_completion_event();
        };

        let mut barriers: ArrayVec<ResourceBarrier, 3> = ArrayVec::new();
        if !dst_state.contains(ResourceState::COPY_DEST) {
            barriers.push(ResourceBarrier::Transition {
                resource: dst,
                before: dst_state,
                after: ResourceState::COPY_DEST,
            });
        }
        if !src_state.contains(ResourceState::COPY_SOURCE) {
            barriers.push(ResourceBarrier::Transition {
                resource: src,
                before: src_state,
                after: ResourceState::COPY_SOURCE,
            });
        }
        if !barriers.is_empty() {
            list.resource_barrier(&barriers);
        }

        list.copy_buffer_region(dst, dst_offset, src, src_offset, byte_count);

        // Restore the original states, then order this write against later
        // reuse of the destination memory within the same command list.
        for barrier in &mut barriers {
            if let ResourceBarrier::Transition { before, after, .. } = barrier {
                core::mem::swap(before, after);
            }
        }
        barriers.push(ResourceBarrier::aliasing_all());
        list.resource_barrier(&barriers);

        self.on_command_recorded();
        self.current_completion_event()
    }

    /// Record a pattern fill over a raw unordered-access view
    ///
    /// The pattern is replicated across a fixed 16-byte window; an empty
    /// pattern clears to zero. The destination offset and size must be
    /// 4-byte aligned and the pattern length must divide the window evenly
    /// (validated by the front-end; debug-asserted here).
    pub fn fill_buffer_with_pattern(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        dst_size_in_bytes: u64,
        pattern: &[u8],
    ) -> CompletionEvent {
        if self.status.is_err() {
            return self.current_completion_event();
        }
        self.tracing.fill_buffer_with_pattern();

        if let Err(err) = self.record_fill(dst, dst_offset, dst_size_in_bytes, pattern) {
            self.status = Err(err);
        }
        self.current_completion_event()
    }

    fn record_fill(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        dst_size_in_bytes: u64,
        pattern: &[u8],
    ) -> Result<()> {
        debug_assert!(pattern.len() <= FILL_PATTERN_WINDOW);
        debug_assert!(pattern.is_empty() || FILL_PATTERN_WINDOW % pattern.len() == 0);
        debug_assert_eq!(dst_offset % 4, 0);
        debug_assert_eq!(dst_size_in_bytes % 4, 0);

        let mut window = [0u8; FILL_PATTERN_WINDOW];
        if !pattern.is_empty() {
            for (index, byte) in window.iter_mut().enumerate() {
                *byte = pattern[index % pattern.len()];
            }
        }
        let pattern_words: [u32; 4] = bytemuck::cast(window);

        // The slots are consumed by the submission the next flush produces.
        let available_after = self.queue.next_completion_event();
        let cpu_range =
            self.descriptors
                .alloc_descriptors(1, available_after, DescriptorHeapFlags::empty())?;
        let gpu_range = self.descriptors.alloc_descriptors(
            1,
            available_after,
            DescriptorHeapFlags::SHADER_VISIBLE,
        )?;

        let first_element = (dst_offset / 4) as u32;
        let element_count = (dst_size_in_bytes / 4) as u32;
        self.device
            .create_raw_buffer_view(dst, first_element, element_count, &cpu_range)?;
        self.device
            .create_raw_buffer_view(dst, first_element, element_count, &gpu_range)?;

        self.set_descriptor_heap(gpu_range.heap);
        let Some(list) = self.current_list.as_mut() else {
            return Err(Error::InvalidState);
        };
        list.clear_unordered_access_view(gpu_range, cpu_range, dst, pattern_words);
        list.resource_barrier(&[
            ResourceBarrier::uav_all(),
            ResourceBarrier::aliasing_all(),
        ]);

        self.on_command_recorded();
        Ok(())
    }

    /// Record an operator initialization dispatch
    ///
    /// Barriers are only needed when the initializer writes device memory,
    /// i.e. it declares persistent or temporary resources.
    pub fn initialize_operator(
        &mut self,
        initializer: &dyn Dispatchable,
        bindings: &dyn BindingTable,
        heap: DescriptorHeapId,
    ) -> CompletionEvent {
        if self.status.is_err() {
            return self.current_completion_event();
        }

        self.set_descriptor_heap(heap);
        let Some(list) = self.current_list.as_mut() else {
            return self.current_completion_event();
        };
        list.record_dispatch(initializer, bindings);

        let props = initializer.binding_properties();
        if props.persistent_resource_size > 0 || props.temporary_resource_size > 0 {
            list.resource_barrier(&[
                ResourceBarrier::uav_all(),
                ResourceBarrier::aliasing_all(),
            ]);
        }

        self.on_command_recorded();
        self.current_completion_event()
    }

    /// Record an operator execution dispatch; always barriers its outputs
    pub fn execute_operator(
        &mut self,
        op: &dyn Dispatchable,
        bindings: &dyn BindingTable,
        heap: DescriptorHeapId,
    ) -> CompletionEvent {
        if self.status.is_err() {
            return self.current_completion_event();
        }

        self.set_descriptor_heap(heap);
        let Some(list) = self.current_list.as_mut() else {
            return self.current_completion_event();
        };
        list.record_dispatch(op, bindings);
        list.resource_barrier(&[
            ResourceBarrier::uav_all(),
            ResourceBarrier::aliasing_all(),
        ]);

        self.on_command_recorded();
        self.current_completion_event()
    }

    /// Record caller-supplied barriers verbatim
    pub fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) -> CompletionEvent {
        if self.status.is_err() {
            return self.current_completion_event();
        }
        let Some(list) = self.current_list.as_mut() else {
            return self.current_completion_event();
        };
        list.resource_barrier(barriers);
        self.on_command_recorded();
        self.current_completion_event()
    }

    /// Record a UAV barrier over all resources
    pub fn uav_barrier(&mut self) -> CompletionEvent {
        if self.status.is_err() {
            return self.current_completion_event();
        }
        let Some(list) = self.current_list.as_mut() else {
            return self.current_completion_event();
        };
        list.resource_barrier(&[ResourceBarrier::uav_all()]);
        self.on_command_recorded();
        self.current_completion_event()
    }

    // =========================================================================
    // FLUSH
    // =========================================================================

    /// Close, submit, and reopen.
    ///
    /// A pending error is reported here: once for `OutOfMemory` (the status
    /// clears so later work can proceed), forever for `DeviceRemoved`.
    /// With nothing recorded this is a no-op returning the current event.
    pub fn flush(&mut self) -> Result<CompletionEvent> {
        self.tracing.flush();

        if let Err(err) = self.status {
            if !err.is_permanent() {
                self.status = Ok(());
            }
            return Err(err);
        }

        if self.operations_recorded == 0 {
            // Nothing to flush
            return Ok(self.current_completion_event());
        }

        self.close_and_execute();

        if let Err(err) = self.status {
            if !err.is_permanent() {
                self.status = Ok(());
            }
            return Err(err);
        }

        self.descriptors.trim(self.queue.completed_value());
        Ok(self.current_completion_event())
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn set_descriptor_heap(&mut self, heap: DescriptorHeapId) {
        debug_assert!(self.status.is_ok());

        if heap.is_null() || self.current_heap == Some(heap) {
            return;
        }
        self.current_heap = Some(heap);
        if let Some(list) = self.current_list.as_mut() {
            list.set_descriptor_heaps(heap);
        }
    }

    fn on_command_recorded(&mut self) {
        debug_assert!(self.status.is_ok());
        self.operations_recorded += 1;
    }

    fn close_and_execute(&mut self) {
        if self.status.is_err() {
            return;
        }

        if let Some(mut list) = self.current_list.take() {
            match list.close() {
                Ok(()) => {
                    if self.operations_recorded != 0 {
                        if let Err(err) = self.queue.execute_command_lists(list.as_mut()) {
                            self.status = Err(err);
                        }
                    }
                    if self.status.is_ok() {
                        self.cached_lists.push_back(list);
                    }
                }
                // OOM while closing is recoverable; anything else sticks
                // until the removal check below classifies it.
                Err(err) => self.status = Err(err),
            }
        }

        self.operations_recorded = 0;
        // The heap must be rebound on the next list.
        self.current_heap = None;

        // Fail early if something horrifying happened to the device.
        if self.status != Err(Error::DeviceRemoved) {
            if let Err(err) = self.device.removal_reason() {
                log::warn!("device removal detected after close: {err}");
                self.status = Err(err);
            }
        }

        // Always keep a command list in the opened state, unless the
        // device is gone for good.
        if self.status != Err(Error::DeviceRemoved) && self.current_list.is_none() {
            if let Err(err) = self.open_command_list() {
                self.status = Err(err);
            }
        }
    }

    fn open_command_list(&mut self) -> Result<()> {
        debug_assert!(self.current_heap.is_none());

        let allocator = self.allocators.current_allocator();
        let list = match self.cached_lists.pop_front() {
            Some(mut list) => {
                list.reset(allocator)?;
                list
            }
            None => self
                .device
                .create_command_list(self.queue.queue_type(), allocator)?,
        };
        self.current_list = Some(list);

        // The current allocator becomes eligible for reset once the list
        // just opened from it completes execution.
        self.allocators
            .advance(self.queue.next_completion_event(), &self.queue)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DeviceCall, SoftwareDevice, TestBindings, TestOperator};
    use scoria_core::NullTrace;

    fn recorder_with_device() -> (Arc<SoftwareDevice>, CommandRecorder) {
        let device = Arc::new(SoftwareDevice::new());
        let queue = device.create_queue(QueueType::Compute);
        let recorder = CommandRecorder::new(
            Arc::clone(&device) as Arc<dyn Device>,
            queue,
            Arc::new(NullTrace),
        )
        .unwrap();
        (device, recorder)
    }

    #[test]
    fn test_copy_inserts_transitions_only_when_needed() {
        let (device, mut recorder) = recorder_with_device();
        let dst = BufferHandle::new(1);
        let src = BufferHandle::new(2);

        // Both already in the right states: no transition barriers at all.
        recorder.copy_buffer_region(
            dst,
            0,
            ResourceState::COPY_DEST,
            src,
            0,
            ResourceState::COPY_SOURCE,
            64,
        );
        recorder.flush().unwrap();

        let transitions = device
            .log()
            .commands
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    DeviceCall::Barrier(barriers)
                        if barriers.iter().any(|b| matches!(b, ResourceBarrier::Transition { .. }))
                )
            })
            .count();
        assert_eq!(transitions, 0);

        // Common-state resources get transitioned in and back out.
        recorder.copy_buffer_region(
            dst,
            0,
            ResourceState::empty(),
            src,
            0,
            ResourceState::empty(),
            64,
        );
        recorder.flush().unwrap();

        let log = device.log();
        let barrier_sets: Vec<_> = log
            .commands
            .iter()
            .filter_map(|call| match call {
                DeviceCall::Barrier(barriers) => Some(barriers.clone()),
                _ => None,
            })
            .collect();
        // One transition set before the copy, one restore set after.
        assert!(barrier_sets.iter().any(|set| set.contains(
            &ResourceBarrier::Transition {
                resource: dst,
                before: ResourceState::empty(),
                after: ResourceState::COPY_DEST,
            }
        )));
        assert!(barrier_sets.iter().any(|set| set.contains(
            &ResourceBarrier::Transition {
                resource: dst,
                before: ResourceState::COPY_DEST,
                after: ResourceState::empty(),
            }
        )));
    }

    #[test]
    fn test_copy_always_ends_with_aliasing_barrier() {
        let (device, mut recorder) = recorder_with_device();
        recorder.copy_buffer_region(
            BufferHandle::new(1),
            0,
            ResourceState::COPY_DEST,
            BufferHandle::new(2),
            0,
            ResourceState::COPY_SOURCE,
            16,
        );
        recorder.flush().unwrap();

        let log = device.log();
        let last_barrier = log
            .commands
            .iter()
            .rev()
            .find_map(|call| match call {
                DeviceCall::Barrier(barriers) => Some(barriers.clone()),
                _ => None,
            })
            .unwrap();
        assert!(last_barrier.contains(&ResourceBarrier::aliasing_all()));
    }

    #[test]
    fn test_fill_pattern_replication() {
        let (device, mut recorder) = recorder_with_device();
        let dst = BufferHandle::new(1);

        recorder.fill_buffer_with_pattern(dst, 0, 32, &[0xAB]);
        recorder.fill_buffer_with_pattern(dst, 0, 16, &[0x04, 0x03, 0x02, 0x01]);
        recorder.fill_buffer_with_pattern(dst, 0, 16, &[]);
        recorder.flush().unwrap();

        let log = device.log();
        let clears: Vec<[u32; 4]> = log
            .commands
            .iter()
            .filter_map(|call| match call {
                DeviceCall::ClearUav { pattern, .. } => Some(*pattern),
                _ => None,
            })
            .collect();
        assert_eq!(clears.len(), 3);
        // 1-byte pattern fills every byte of the window.
        assert_eq!(clears[0], [0xABAB_ABAB; 4]);
        // 4-byte pattern repeats four times (little-endian words).
        assert_eq!(clears[1], [0x0102_0304; 4]);
        // Empty pattern clears to zero.
        assert_eq!(clears[2], [0; 4]);
    }

    #[test]
    fn test_fill_allocates_cpu_and_gpu_descriptors_tagged_next_event() {
        let (device, mut recorder) = recorder_with_device();
        recorder.fill_buffer_with_pattern(BufferHandle::new(1), 0, 16, &[0xFF]);

        let log = device.log();
        // Two raw buffer views: CPU-visible staging plus shader-visible.
        assert_eq!(log.views.len(), 2);
        // One submission has happened after flush, none before.
        assert_eq!(log.submissions, 0);
        drop(log);

        recorder.flush().unwrap();
        assert_eq!(device.log().submissions, 1);
    }

    #[test]
    fn test_operator_init_barriers_follow_binding_properties() {
        let (device, mut recorder) = recorder_with_device();
        let heap = DescriptorHeapId::new(77);
        let bindings = TestBindings::default();

        let barrier_count = |device: &SoftwareDevice| {
            device
                .log()
                .commands
                .iter()
                .filter(|call| matches!(call, DeviceCall::Barrier(_)))
                .count()
        };

        // No persistent or temporary resources: dispatch without barriers.
        let stateless = TestOperator::new("stateless", 0, 0);
        recorder.initialize_operator(&stateless, &bindings, heap);
        recorder.flush().unwrap();
        assert_eq!(barrier_count(&device), 0);

        // Persistent state present: completion barriers follow the dispatch.
        let stateful = TestOperator::new("stateful", 128, 0);
        recorder.initialize_operator(&stateful, &bindings, heap);
        recorder.flush().unwrap();
        assert_eq!(barrier_count(&device), 1);

        // Execution always barriers.
        recorder.execute_operator(&stateless, &bindings, heap);
        recorder.flush().unwrap();
        assert_eq!(barrier_count(&device), 2);
    }

    #[test]
    fn test_descriptor_heap_rebind_is_cached() {
        let (device, mut recorder) = recorder_with_device();
        let heap = DescriptorHeapId::new(5);
        let other = DescriptorHeapId::new(6);
        let bindings = TestBindings::default();
        let op = TestOperator::new("op", 0, 0);

        let set_count = |device: &SoftwareDevice| {
            device
                .log()
                .commands
                .iter()
                .filter(|call| matches!(call, DeviceCall::SetHeap(_)))
                .count()
        };

        recorder.execute_operator(&op, &bindings, heap);
        recorder.execute_operator(&op, &bindings, heap);
        recorder.execute_operator(&op, &bindings, other);
        recorder.flush().unwrap();
        assert_eq!(set_count(&device), 2);

        // After a flush the heap must be rebound on the fresh list.
        recorder.execute_operator(&op, &bindings, other);
        recorder.flush().unwrap();
        assert_eq!(set_count(&device), 3);
    }

    #[test]
    fn test_predicted_events_increment_by_one_per_flush() {
        let (_device, mut recorder) = recorder_with_device();
        let dst = BufferHandle::new(1);
        let src = BufferHandle::new(2);

        assert_eq!(recorder.current_completion_event().fence_value, 0);

        let predicted = recorder.copy_buffer_region(
            dst,
            0,
            ResourceState::COPY_DEST,
            src,
            0,
            ResourceState::COPY_SOURCE,
            4,
        );
        assert_eq!(predicted.fence_value, 1);

        // More work in the same window predicts the same event.
        let predicted = recorder.uav_barrier();
        assert_eq!(predicted.fence_value, 1);

        let flushed = recorder.flush().unwrap();
        assert_eq!(flushed.fence_value, 1);

        // Next recorded operation lands in the next submission.
        let predicted = recorder.uav_barrier();
        assert_eq!(predicted.fence_value, 2);
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let (device, mut recorder) = recorder_with_device();
        let before = recorder.current_completion_event();
        let flushed = recorder.flush().unwrap();
        assert_eq!(flushed, before);
        assert_eq!(device.log().submissions, 0);
        assert_eq!(device.log().list_closes, 0);
    }

    #[test]
    fn test_oom_on_close_reported_once_then_cleared() {
        let (device, mut recorder) = recorder_with_device();
        recorder.uav_barrier();

        device.fail_next_close();
        assert_eq!(recorder.flush(), Err(Error::OutOfMemory));

        // The cause resolved: the next flush succeeds again.
        recorder.uav_barrier();
        assert!(recorder.flush().is_ok());
    }

    #[test]
    fn test_device_removal_is_sticky() {
        let (device, mut recorder) = recorder_with_device();
        recorder.uav_barrier();
        device.remove_device();

        assert_eq!(recorder.flush(), Err(Error::DeviceRemoved));
        // Recording short-circuits and flushes keep reporting removal.
        recorder.uav_barrier();
        assert_eq!(recorder.flush(), Err(Error::DeviceRemoved));
        assert_eq!(recorder.flush(), Err(Error::DeviceRemoved));
    }

    #[test]
    fn test_command_lists_are_recycled() {
        let (device, mut recorder) = recorder_with_device();
        for _ in 0..3 {
            recorder.uav_barrier();
            recorder.flush().unwrap();
        }
        // The closed list goes straight back into the cache, so every
        // reopen resets it instead of creating a new one.
        assert_eq!(device.log().lists_created, 1);
        assert_eq!(device.log().list_resets, 3);
    }
}
