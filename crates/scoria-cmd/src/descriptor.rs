//! # Descriptor Pool
//!
//! GPU-visible binding-table slots allocated per recorded operation and
//! reclaimed once their associated completion event has passed.

use std::sync::Arc;

use scoria_core::{
    CompletionEvent, DescriptorHeapFlags, DescriptorRange, Device, Error, Result,
};
use scoria_core::traits::DescriptorHeap;

/// Slot count of newly created heaps, unless a single request needs more
pub const DEFAULT_HEAP_CAPACITY: u32 = 2048;

// =============================================================================
// HEAP SLAB
// =============================================================================

/// One heap plus its bump-allocation state
struct HeapSlab {
    heap: Box<dyn DescriptorHeap>,
    flags: DescriptorHeapFlags,
    capacity: u32,
    /// First free slot
    head: u32,
    /// Latest completion event among outstanding ranges
    available_after: CompletionEvent,
}

impl HeapSlab {
    fn try_alloc(
        &mut self,
        count: u32,
        available_after: CompletionEvent,
    ) -> Option<DescriptorRange> {
        if self.head.checked_add(count)? > self.capacity {
            return None;
        }
        let range = DescriptorRange {
            heap: self.heap.id(),
            base_index: self.head,
            count,
        };
        self.head += count;
        self.available_after = self.available_after.max(available_after);
        Some(range)
    }
}

// =============================================================================
// DESCRIPTOR POOL
// =============================================================================

/// Pool of descriptor heaps with event-tagged reclamation
///
/// Ranges are bump-allocated first-fit out of heaps with matching flags;
/// when no heap has space a new one is created. A heap's slots are only
/// rewound once the GPU has passed the latest completion event tagged onto
/// any of its ranges, so a range is never recycled while a submission may
/// still read it.
pub struct DescriptorPool {
    device: Arc<dyn Device>,
    heaps: Vec<HeapSlab>,
    initial_capacity: u32,
}

impl DescriptorPool {
    /// Create an empty pool
    pub fn new(device: Arc<dyn Device>, initial_capacity: u32) -> Self {
        Self {
            device,
            heaps: Vec::new(),
            initial_capacity,
        }
    }

    /// Allocate `count` contiguous slots tagged with `available_after`
    ///
    /// `available_after` must be the completion event of the submission
    /// that will consume the slots (the queue's *next* event at record
    /// time).
    pub fn alloc_descriptors(
        &mut self,
        count: u32,
        available_after: CompletionEvent,
        flags: DescriptorHeapFlags,
    ) -> Result<DescriptorRange> {
        if count == 0 {
            return Err(Error::InvalidParameter);
        }

        for slab in &mut self.heaps {
            if slab.flags == flags {
                if let Some(range) = slab.try_alloc(count, available_after) {
                    return Ok(range);
                }
            }
        }

        let capacity = self.initial_capacity.max(count);
        let heap = self.device.create_descriptor_heap(capacity, flags)?;
        let mut slab = HeapSlab {
            heap,
            flags,
            capacity,
            head: 0,
            available_after,
        };
        let range = slab
            .try_alloc(count, available_after)
            .ok_or(Error::OutOfMemory)?;
        self.heaps.push(slab);
        Ok(range)
    }

    /// Rewind heaps whose outstanding work the GPU has finished
    ///
    /// `completed_value` is the queue fence's completed value.
    pub fn trim(&mut self, completed_value: u64) {
        for slab in &mut self.heaps {
            if slab.head > 0 && slab.available_after.is_signaled_by(completed_value) {
                slab.head = 0;
            }
        }
    }

    /// Number of heaps currently owned by the pool
    pub fn heap_count(&self) -> usize {
        self.heaps.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SoftwareDevice;

    fn pool_with_capacity(capacity: u32) -> DescriptorPool {
        let device: Arc<dyn Device> = Arc::new(SoftwareDevice::new());
        DescriptorPool::new(device, capacity)
    }

    #[test]
    fn test_ranges_are_contiguous_within_heap() {
        let mut pool = pool_with_capacity(8);
        let event = CompletionEvent::new(1);
        let a = pool
            .alloc_descriptors(2, event, DescriptorHeapFlags::empty())
            .unwrap();
        let b = pool
            .alloc_descriptors(2, event, DescriptorHeapFlags::empty())
            .unwrap();
        assert_eq!(a.heap, b.heap);
        assert_eq!(a.base_index, 0);
        assert_eq!(b.base_index, 2);
    }

    #[test]
    fn test_flags_segregate_heaps() {
        let mut pool = pool_with_capacity(8);
        let event = CompletionEvent::new(1);
        let cpu = pool
            .alloc_descriptors(1, event, DescriptorHeapFlags::empty())
            .unwrap();
        let gpu = pool
            .alloc_descriptors(1, event, DescriptorHeapFlags::SHADER_VISIBLE)
            .unwrap();
        assert_ne!(cpu.heap, gpu.heap);
        assert_eq!(pool.heap_count(), 2);
    }

    #[test]
    fn test_full_heap_grows_pool() {
        let mut pool = pool_with_capacity(2);
        let event = CompletionEvent::new(1);
        pool.alloc_descriptors(2, event, DescriptorHeapFlags::empty())
            .unwrap();
        pool.alloc_descriptors(1, event, DescriptorHeapFlags::empty())
            .unwrap();
        assert_eq!(pool.heap_count(), 2);
    }

    #[test]
    fn test_oversized_request_gets_dedicated_capacity() {
        let mut pool = pool_with_capacity(2);
        let range = pool
            .alloc_descriptors(16, CompletionEvent::new(1), DescriptorHeapFlags::empty())
            .unwrap();
        assert_eq!(range.count, 16);
    }

    #[test]
    fn test_trim_respects_completion_event() {
        let mut pool = pool_with_capacity(4);
        pool.alloc_descriptors(4, CompletionEvent::new(3), DescriptorHeapFlags::empty())
            .unwrap();

        // The GPU has only reached 2: slots must not be recycled.
        pool.trim(2);
        let grown = pool
            .alloc_descriptors(1, CompletionEvent::new(4), DescriptorHeapFlags::empty())
            .unwrap();
        assert_eq!(pool.heap_count(), 2);

        // Once the event has passed, the first heap rewinds and is reused.
        pool.trim(3);
        let recycled = pool
            .alloc_descriptors(1, CompletionEvent::new(5), DescriptorHeapFlags::empty())
            .unwrap();
        assert_eq!(recycled.base_index, 0);
        assert_ne!(grown.heap, recycled.heap);
        assert_eq!(pool.heap_count(), 2);
    }
}
