//! # Software Device Backend
//!
//! A fully in-memory [`Device`] implementation that records every call it
//! receives. Used by this crate's tests and available to downstream crates
//! for driving the engine without hardware.
//!
//! The software fence completes instantly on signal, so submitted work is
//! always "done" from the engine's point of view; tests that need an
//! unreached event inject fence values directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scoria_core::{
    BindingProperties, BufferHandle, CommandAllocatorId, DescriptorHeapFlags, DescriptorHeapId,
    DescriptorRange, Device, Error, QueueType, ResourceBarrier, Result,
};
use scoria_core::traits::{
    BindingTable, CommandAllocator, CommandList, DescriptorHeap, Dispatchable, SubmitQueue,
};

// =============================================================================
// DEVICE LOG
// =============================================================================

/// One call recorded by the software backend, in device order
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// Resource barriers recorded on a list
    Barrier(Vec<ResourceBarrier>),
    /// Buffer-region copy
    Copy {
        /// Destination buffer
        dst: BufferHandle,
        /// Destination byte offset
        dst_offset: u64,
        /// Source buffer
        src: BufferHandle,
        /// Source byte offset
        src_offset: u64,
        /// Bytes copied
        byte_count: u64,
    },
    /// Pattern clear through a raw UAV
    ClearUav {
        /// Destination buffer
        dst: BufferHandle,
        /// Expanded 16-byte pattern as words
        pattern: [u32; 4],
    },
    /// Descriptor heap bound
    SetHeap(DescriptorHeapId),
    /// Operator dispatch
    Dispatch {
        /// `Dispatchable::name()` of the operator
        name: &'static str,
    },
}

/// Everything the software backend has observed
#[derive(Debug, Default)]
pub struct DeviceLog {
    /// Commands in the order the device would execute them (a list's
    /// commands land here when it is closed, not at record time)
    pub commands: Vec<DeviceCall>,
    /// Number of command-list submissions
    pub submissions: u64,
    /// Number of command-list closes
    pub list_closes: u64,
    /// Number of command-list resets
    pub list_resets: u64,
    /// Number of command lists created
    pub lists_created: u64,
    /// Number of allocator resets
    pub allocator_resets: u64,
    /// Raw buffer views written into descriptor slots
    pub views: Vec<(BufferHandle, DescriptorRange)>,
    /// Fence values the engine blocked on
    pub fence_waits: Vec<u64>,
    /// Largest fence value signaled so far
    pub signaled_value: u64,
}

// =============================================================================
// SOFTWARE DEVICE
// =============================================================================

/// In-memory device recording every call for inspection
pub struct SoftwareDevice {
    log: Arc<Mutex<DeviceLog>>,
    next_id: AtomicU64,
    fault: Arc<Mutex<FaultState>>,
    /// Completed fence value; shared with queues created from this device
    completed: Arc<AtomicU64>,
}

#[derive(Default)]
struct FaultState {
    fail_next_close: bool,
    device_removed: bool,
}

impl SoftwareDevice {
    /// Create a healthy software device
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(DeviceLog::default())),
            next_id: AtomicU64::new(1),
            fault: Arc::new(Mutex::new(FaultState::default())),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Inspect everything recorded so far
    pub fn log(&self) -> MutexGuard<'_, DeviceLog> {
        lock(&self.log)
    }

    /// Create a submit queue backed by this device's fence
    pub fn create_queue(&self, queue_type: QueueType) -> Box<dyn SubmitQueue> {
        Box::new(SoftwareQueue {
            queue_type,
            log: Arc::clone(&self.log),
            completed: Arc::clone(&self.completed),
        })
    }

    /// Make the next command-list close fail with `OutOfMemory`
    pub fn fail_next_close(&self) {
        lock(&self.fault).fail_next_close = true;
    }

    /// Simulate device loss: `removal_reason` reports `DeviceRemoved`
    /// from now on
    pub fn remove_device(&self) {
        lock(&self.fault).device_removed = true;
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Device for SoftwareDevice {
    fn create_command_allocator(
        &self,
        _queue_type: QueueType,
    ) -> Result<Box<dyn CommandAllocator>> {
        Ok(Box::new(SoftwareAllocator {
            id: CommandAllocatorId::new(self.alloc_id()),
            log: Arc::clone(&self.log),
        }))
    }

    fn create_command_list(
        &self,
        _queue_type: QueueType,
        _allocator: &dyn CommandAllocator,
    ) -> Result<Box<dyn CommandList>> {
        lock(&self.log).lists_created += 1;
        Ok(Box::new(SoftwareList {
            commands: Vec::new(),
            log: Arc::clone(&self.log),
            fault: Arc::clone(&self.fault),
        }))
    }

    fn create_descriptor_heap(
        &self,
        capacity: u32,
        _flags: DescriptorHeapFlags,
    ) -> Result<Box<dyn DescriptorHeap>> {
        Ok(Box::new(SoftwareHeap {
            id: DescriptorHeapId::new(self.alloc_id()),
            capacity,
        }))
    }

    fn create_raw_buffer_view(
        &self,
        buffer: BufferHandle,
        _first_element: u32,
        _element_count: u32,
        target: &DescriptorRange,
    ) -> Result<()> {
        lock(&self.log).views.push((buffer, *target));
        Ok(())
    }

    fn removal_reason(&self) -> Result<()> {
        if lock(&self.fault).device_removed {
            Err(Error::DeviceRemoved)
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// SOFTWARE QUEUE
// =============================================================================

struct SoftwareQueue {
    queue_type: QueueType,
    log: Arc<Mutex<DeviceLog>>,
    completed: Arc<AtomicU64>,
}

impl SubmitQueue for SoftwareQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn execute_command_lists(&mut self, list: &mut dyn CommandList) -> Result<()> {
        // The recorder only ever submits lists it created from this
        // device, so the downcast-free handoff happens inside close():
        // SoftwareList moved its commands into the log staging area.
        let _ = list;
        let mut log = lock(&self.log);
        log.submissions += 1;
        Ok(())
    }

    fn signal(&mut self, value: u64) -> Result<()> {
        // The software GPU completes instantly.
        self.completed.store(value, Ordering::SeqCst);
        lock(&self.log).signaled_value = value;
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn wait_for_value(&self, value: u64) -> Result<()> {
        let mut log = lock(&self.log);
        log.fence_waits.push(value);
        drop(log);
        // Model the GPU catching up rather than blocking the test.
        if self.completed.load(Ordering::SeqCst) < value {
            self.completed.store(value, Ordering::SeqCst);
        }
        Ok(())
    }
}

// =============================================================================
// SOFTWARE COMMAND OBJECTS
// =============================================================================

struct SoftwareAllocator {
    id: CommandAllocatorId,
    log: Arc<Mutex<DeviceLog>>,
}

impl CommandAllocator for SoftwareAllocator {
    fn id(&self) -> CommandAllocatorId {
        self.id
    }

    fn reset(&mut self) -> Result<()> {
        lock(&self.log).allocator_resets += 1;
        Ok(())
    }
}

struct SoftwareHeap {
    id: DescriptorHeapId,
    capacity: u32,
}

impl DescriptorHeap for SoftwareHeap {
    fn id(&self) -> DescriptorHeapId {
        self.id
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }
}

struct SoftwareList {
    commands: Vec<DeviceCall>,
    log: Arc<Mutex<DeviceLog>>,
    fault: Arc<Mutex<FaultState>>,
}

impl CommandList for SoftwareList {
    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        self.commands.push(DeviceCall::Barrier(barriers.to_vec()));
    }

    fn copy_buffer_region(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        src: BufferHandle,
        src_offset: u64,
        byte_count: u64,
    ) {
        self.commands.push(DeviceCall::Copy {
            dst,
            dst_offset,
            src,
            src_offset,
            byte_count,
        });
    }

    fn clear_unordered_access_view(
        &mut self,
        _gpu_range: DescriptorRange,
        _cpu_range: DescriptorRange,
        dst: BufferHandle,
        pattern: [u32; 4],
    ) {
        self.commands.push(DeviceCall::ClearUav { dst, pattern });
    }

    fn set_descriptor_heaps(&mut self, heap: DescriptorHeapId) {
        self.commands.push(DeviceCall::SetHeap(heap));
    }

    fn record_dispatch(&mut self, dispatchable: &dyn Dispatchable, _bindings: &dyn BindingTable) {
        self.commands.push(DeviceCall::Dispatch {
            name: dispatchable.name(),
        });
    }

    fn close(&mut self) -> Result<()> {
        {
            let mut fault = lock(&self.fault);
            if fault.fail_next_close {
                fault.fail_next_close = false;
                self.commands.clear();
                return Err(Error::OutOfMemory);
            }
        }
        let mut log = lock(&self.log);
        log.list_closes += 1;
        log.commands.append(&mut self.commands);
        Ok(())
    }

    fn reset(&mut self, _allocator: &dyn CommandAllocator) -> Result<()> {
        self.commands.clear();
        lock(&self.log).list_resets += 1;
        Ok(())
    }
}

// =============================================================================
// TEST OPERATORS
// =============================================================================

/// Dispatchable with configurable binding properties
pub struct TestOperator {
    name: &'static str,
    properties: BindingProperties,
}

impl TestOperator {
    /// Create an operator declaring the given resource sizes
    pub fn new(name: &'static str, persistent: u64, temporary: u64) -> Self {
        Self {
            name,
            properties: BindingProperties {
                persistent_resource_size: persistent,
                temporary_resource_size: temporary,
                descriptor_count: 1,
            },
        }
    }
}

impl Dispatchable for TestOperator {
    fn binding_properties(&self) -> BindingProperties {
        self.properties
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Binding table over a fixed descriptor range
#[derive(Default)]
pub struct TestBindings {
    range: DescriptorRange,
}

impl BindingTable for TestBindings {
    fn descriptor_range(&self) -> DescriptorRange {
        self.range
    }
}
