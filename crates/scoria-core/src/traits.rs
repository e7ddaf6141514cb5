//! # Scoria Core Traits
//!
//! The seams between the engine and its platform backend.
//!
//! The engine never creates device objects itself; it consumes them through
//! these traits. Backends are runtime-pluggable, so every seam is a dyn-safe
//! trait object rather than a generic parameter.
//!
//! ## Trait Hierarchy
//!
//! ```text
//! Device
//!    │
//!    ├── CommandAllocator ──┐
//!    │                      ├── CommandList (recording surface)
//!    ├── DescriptorHeap ────┘
//!    │
//!    └── SubmitQueue (submission + fence)
//!
//! Dispatchable + BindingTable (operator seam, owned by the compiler layer)
//! ```

use crate::error::Result;
use crate::types::*;

// =============================================================================
// DEVICE TRAIT
// =============================================================================

/// Factory and health interface of the platform device
pub trait Device: Send + Sync {
    /// Create backing memory for command lists of the given queue type
    fn create_command_allocator(
        &self,
        queue_type: QueueType,
    ) -> Result<Box<dyn CommandAllocator>>;

    /// Create a command list in the open (recording) state
    fn create_command_list(
        &self,
        queue_type: QueueType,
        allocator: &dyn CommandAllocator,
    ) -> Result<Box<dyn CommandList>>;

    /// Create a descriptor heap with `capacity` binding-table slots
    fn create_descriptor_heap(
        &self,
        capacity: u32,
        flags: DescriptorHeapFlags,
    ) -> Result<Box<dyn DescriptorHeap>>;

    /// Write a raw (typeless, 4-byte element) buffer view into a
    /// descriptor slot.
    ///
    /// `first_element` and `element_count` are in 4-byte units.
    fn create_raw_buffer_view(
        &self,
        buffer: BufferHandle,
        first_element: u32,
        element_count: u32,
        target: &DescriptorRange,
    ) -> Result<()>;

    /// Query device health.
    ///
    /// Returns `Ok(())` while the device is usable and
    /// `Err(Error::DeviceRemoved)` once it has been lost. Checked after
    /// every command-list close.
    fn removal_reason(&self) -> Result<()>;
}

// =============================================================================
// COMMAND ALLOCATOR TRAIT
// =============================================================================

/// Backing memory for recorded command lists
///
/// An allocator must not be reset until the GPU has finished consuming
/// every command list built from it; the allocator ring enforces this with
/// completion-event tags.
pub trait CommandAllocator: Send {
    /// Stable identifier for backend-side association
    fn id(&self) -> CommandAllocatorId;

    /// Reclaim all memory recorded through this allocator
    fn reset(&mut self) -> Result<()>;
}

// =============================================================================
// COMMAND LIST TRAIT
// =============================================================================

/// An open command buffer accepting recorded operations
///
/// Recording calls are infallible; errors are deferred to [`close`], which
/// is where real command-list APIs surface them. A closed list becomes
/// recordable again through [`reset`] with a safe-to-reuse allocator.
///
/// [`close`]: CommandList::close
/// [`reset`]: CommandList::reset
pub trait CommandList: Send {
    /// Record a set of resource barriers
    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]);

    /// Record a buffer-region copy
    fn copy_buffer_region(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        src: BufferHandle,
        src_offset: u64,
        byte_count: u64,
    );

    /// Record a 16-byte-pattern clear through a raw unordered-access view
    ///
    /// `gpu_range` must be shader visible; `cpu_range` is the CPU-visible
    /// staging copy of the same view.
    fn clear_unordered_access_view(
        &mut self,
        gpu_range: DescriptorRange,
        cpu_range: DescriptorRange,
        dst: BufferHandle,
        pattern: [u32; 4],
    );

    /// Bind a descriptor heap for subsequent dispatches
    fn set_descriptor_heaps(&mut self, heap: DescriptorHeapId);

    /// Record an operator dispatch through its binding table
    fn record_dispatch(&mut self, dispatchable: &dyn Dispatchable, bindings: &dyn BindingTable);

    /// Close the list, making it submittable.
    ///
    /// Deferred recording errors surface here; `Error::OutOfMemory` means
    /// the backing store was exhausted while recording.
    fn close(&mut self) -> Result<()>;

    /// Reopen a closed list for recording against `allocator`
    fn reset(&mut self, allocator: &dyn CommandAllocator) -> Result<()>;
}

// =============================================================================
// DESCRIPTOR HEAP TRAIT
// =============================================================================

/// A heap of binding-table slots
pub trait DescriptorHeap: Send {
    /// Stable identifier used when binding the heap on a command list
    fn id(&self) -> DescriptorHeapId;

    /// Number of slots in the heap
    fn capacity(&self) -> u32;
}

// =============================================================================
// SUBMIT QUEUE TRAIT
// =============================================================================

/// Raw submission endpoint plus its fence, provided by the platform
///
/// The engine's queue wrapper layers the monotonic completion-event counter
/// on top; backends only execute, signal, and report fence progress.
pub trait SubmitQueue: Send {
    /// Queue kind (determines the command-list type recorded for it)
    fn queue_type(&self) -> QueueType;

    /// Submit a closed command list for execution
    fn execute_command_lists(&mut self, list: &mut dyn CommandList) -> Result<()>;

    /// Signal the queue's fence with `value` once prior work completes
    fn signal(&mut self, value: u64) -> Result<()>;

    /// Largest fence value the GPU has reached
    fn completed_value(&self) -> u64;

    /// Block the calling thread until the fence reaches `value`
    fn wait_for_value(&self, value: u64) -> Result<()>;
}

// =============================================================================
// OPERATOR SEAM
// =============================================================================

/// A compiled device program or operator initializer that can be dispatched
///
/// Produced by the compute-graph compiler layer; opaque to the engine
/// beyond its declared resource requirements.
pub trait Dispatchable: Send + Sync {
    /// Resource requirements of this dispatch
    fn binding_properties(&self) -> BindingProperties;

    /// Name for tracing
    fn name(&self) -> &'static str {
        "dispatch"
    }
}

/// Bindings (inputs, outputs, scratch) for one dispatch
///
/// Built by the caller over a descriptor range and moved into the batch;
/// the engine only threads it through to [`CommandList::record_dispatch`].
pub trait BindingTable: Send {
    /// Descriptor range this table was written into
    fn descriptor_range(&self) -> DescriptorRange;
}
