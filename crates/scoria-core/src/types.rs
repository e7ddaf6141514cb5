//! # Scoria Core Types
//!
//! Fundamental type definitions used across the engine.
//!
//! These types provide:
//! - Strong typing for opaque device objects (buffers, heaps, allocators)
//! - Resource state and barrier descriptions for hazard tracking
//! - Descriptor range bookkeeping for binding-table slots

use core::fmt;

// =============================================================================
// HANDLE TYPES
// =============================================================================

/// Opaque handle to a device resource
///
/// Handles are type-safe wrappers that prevent mixing different resource
/// types. The engine never dereferences a handle; backends resolve them.
#[repr(transparent)]
pub struct Handle<T> {
    id: u64,
    _marker: core::marker::PhantomData<T>,
}

// Manual impls: the marker parameter is phantom, so no `T` bounds apply.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> core::hash::Hash for Handle<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> Handle<T> {
    /// Create a new handle
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            _marker: core::marker::PhantomData,
        }
    }

    /// Create a null handle
    #[inline]
    pub const fn null() -> Self {
        Self::new(0)
    }

    /// Get the raw ID
    #[inline]
    pub const fn id(self) -> u64 {
        self.id
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.id == 0
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handle<{}>(0x{:x})",
            core::any::type_name::<T>(),
            self.id
        )
    }
}

// Marker types for handles
/// Marker for buffer handles
pub struct BufferMarker;
/// Marker for descriptor heap handles
pub struct DescriptorHeapMarker;
/// Marker for command allocator handles
pub struct CommandAllocatorMarker;

/// Handle to a GPU buffer resource
pub type BufferHandle = Handle<BufferMarker>;
/// Handle to a descriptor heap
pub type DescriptorHeapId = Handle<DescriptorHeapMarker>;
/// Handle to a command allocator
pub type CommandAllocatorId = Handle<CommandAllocatorMarker>;

// =============================================================================
// QUEUE TYPE
// =============================================================================

/// Kind of command queue a command list targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Graphics queue (accepts all command types)
    Graphics,
    /// Compute queue
    Compute,
    /// Copy (DMA) queue
    Copy,
}

// =============================================================================
// RESOURCE STATE
// =============================================================================

bitflags::bitflags! {
    /// Logical state of a buffer resource on the GPU timeline
    ///
    /// The empty set is the common state. Transition barriers move a
    /// resource between states; an operation that requires a state the
    /// resource is not in must be preceded by a transition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceState: u32 {
        /// Readable and writable through unordered-access views
        const UNORDERED_ACCESS = 1 << 0;
        /// Source of a copy operation
        const COPY_SOURCE = 1 << 1;
        /// Destination of a copy operation
        const COPY_DEST = 1 << 2;
        /// Readable as a shader resource
        const SHADER_RESOURCE = 1 << 3;
    }
}

// =============================================================================
// RESOURCE BARRIERS
// =============================================================================

/// A synchronization instruction ordering GPU operations on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    /// Transition a resource from one state to another
    Transition {
        /// Resource whose state changes
        resource: BufferHandle,
        /// State before the barrier
        before: ResourceState,
        /// State after the barrier
        after: ResourceState,
    },
    /// Order all unordered-access writes before subsequent accesses.
    ///
    /// `None` applies to all UAV accesses on the queue.
    Uav {
        /// Specific resource, or `None` for all
        resource: Option<BufferHandle>,
    },
    /// Order reuse of physical memory between aliased resources.
    ///
    /// `None`/`None` orders against all placed resources.
    Aliasing {
        /// Resource previously occupying the memory
        before: Option<BufferHandle>,
        /// Resource about to occupy the memory
        after: Option<BufferHandle>,
    },
}

impl ResourceBarrier {
    /// UAV barrier over all resources
    #[inline]
    pub const fn uav_all() -> Self {
        Self::Uav { resource: None }
    }

    /// Aliasing barrier over all placed resources
    #[inline]
    pub const fn aliasing_all() -> Self {
        Self::Aliasing {
            before: None,
            after: None,
        }
    }
}

// =============================================================================
// DESCRIPTOR TYPES
// =============================================================================

bitflags::bitflags! {
    /// Descriptor heap creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptorHeapFlags: u32 {
        /// Heap is visible to shaders (GPU-addressable binding tables)
        const SHADER_VISIBLE = 1 << 0;
    }
}

/// A contiguous run of binding-table slots within one descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorRange {
    /// Heap the range lives in
    pub heap: DescriptorHeapId,
    /// First slot index
    pub base_index: u32,
    /// Number of slots
    pub count: u32,
}

// =============================================================================
// OPERATOR BINDING PROPERTIES
// =============================================================================

/// Resource requirements declared by a dispatchable operator
///
/// An operator with nonzero persistent or temporary size writes to device
/// memory during initialization and therefore needs completion barriers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingProperties {
    /// Bytes of persistent resource the operator owns after initialization
    pub persistent_resource_size: u64,
    /// Bytes of scratch the operator needs during execution
    pub temporary_resource_size: u64,
    /// Binding-table slots the operator requires
    pub descriptor_count: u32,
}

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(BufferHandle: Send, Sync, Copy);
static_assertions::assert_impl_all!(ResourceBarrier: Send, Sync, Copy);
static_assertions::assert_impl_all!(DescriptorRange: Send, Sync, Copy);

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_null() {
        let h = BufferHandle::null();
        assert!(h.is_null());
        assert!(!BufferHandle::new(1).is_null());
    }

    #[test]
    fn test_resource_state_common() {
        let common = ResourceState::empty();
        assert!(!common.contains(ResourceState::COPY_DEST));
    }

    #[test]
    fn test_barrier_constructors() {
        assert_eq!(
            ResourceBarrier::uav_all(),
            ResourceBarrier::Uav { resource: None }
        );
        assert!(matches!(
            ResourceBarrier::aliasing_all(),
            ResourceBarrier::Aliasing {
                before: None,
                after: None
            }
        ));
    }
}
