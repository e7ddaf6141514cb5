//! # Command Allocator Ring
//!
//! Fixed pool of command allocators recycled against the queue timeline.

use scoria_core::{CompletionEvent, Device, QueueType, Result};
use scoria_core::traits::CommandAllocator;

use crate::queue::CommandQueue;

/// Number of allocators in the ring: one open, one in flight, one spare
pub const ALLOCATOR_RING_SIZE: usize = 3;

// =============================================================================
// RING SLOT
// =============================================================================

struct RingSlot {
    allocator: Box<dyn CommandAllocator>,
    /// Event after which this allocator's memory may be reclaimed
    available_after: CompletionEvent,
}

// =============================================================================
// ALLOCATOR RING
// =============================================================================

/// Circular pool of command allocators
///
/// The ring advances one slot per command-list open. Each retired slot is
/// tagged with the completion event of the submission that will consume its
/// command list; re-entering a slot blocks until that event has been
/// reached, then resets the allocator.
pub struct AllocatorRing {
    slots: Vec<RingSlot>,
    current: usize,
}

impl AllocatorRing {
    /// Create a ring of [`ALLOCATOR_RING_SIZE`] allocators
    ///
    /// All slots start tagged with `initial_event`, which must already have
    /// been reached (typically the queue's current completion event at
    /// construction).
    pub fn new(
        device: &dyn Device,
        queue_type: QueueType,
        initial_event: CompletionEvent,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(ALLOCATOR_RING_SIZE);
        for _ in 0..ALLOCATOR_RING_SIZE {
            slots.push(RingSlot {
                allocator: device.create_command_allocator(queue_type)?,
                available_after: initial_event,
            });
        }
        Ok(Self { slots, current: 0 })
    }

    /// Allocator backing the command list currently being opened
    pub fn current_allocator(&self) -> &dyn CommandAllocator {
        self.slots[self.current].allocator.as_ref()
    }

    /// Retire the current slot and step to the next one.
    ///
    /// `in_flight_until` is the completion event of the submission that
    /// will consume the list just opened from the current allocator. If the
    /// next slot's tag has not been reached by the GPU, this blocks on the
    /// queue fence before resetting that allocator.
    pub fn advance(
        &mut self,
        in_flight_until: CompletionEvent,
        queue: &CommandQueue,
    ) -> Result<()> {
        self.slots[self.current].available_after = in_flight_until;
        self.current = (self.current + 1) % self.slots.len();

        let slot = &mut self.slots[self.current];
        if !slot.available_after.is_signaled_by(queue.completed_value()) {
            queue.wait_for_value(slot.available_after.fence_value)?;
        }
        slot.allocator.reset()?;
        Ok(())
    }

    /// Event tag of the slot that will be entered by the next advance
    pub fn next_slot_available_after(&self) -> CompletionEvent {
        self.slots[(self.current + 1) % self.slots.len()].available_after
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SoftwareDevice;
    use scoria_core::SubmitQueue;

    #[test]
    fn test_ring_cycles_through_slots() {
        let device = SoftwareDevice::new();
        let queue = CommandQueue::new(device.create_queue(QueueType::Compute));
        let mut ring =
            AllocatorRing::new(&device, QueueType::Compute, CompletionEvent::new(0)).unwrap();

        let first = ring.current_allocator().id();
        ring.advance(CompletionEvent::new(1), &queue).unwrap();
        assert_ne!(ring.current_allocator().id(), first);

        // A full cycle returns to the first allocator.
        ring.advance(CompletionEvent::new(2), &queue).unwrap();
        ring.advance(CompletionEvent::new(3), &queue).unwrap();
        assert_eq!(ring.current_allocator().id(), first);
    }

    #[test]
    fn test_ring_waits_for_unreached_event() {
        let device = SoftwareDevice::new();
        let raw = device.create_queue(QueueType::Compute);
        let queue = CommandQueue::new(raw);
        let mut ring =
            AllocatorRing::new(&device, QueueType::Compute, CompletionEvent::new(0)).unwrap();

        // Tag every slot with future events, then cycle back into the first.
        ring.advance(CompletionEvent::new(5), &queue).unwrap();
        ring.advance(CompletionEvent::new(6), &queue).unwrap();
        ring.advance(CompletionEvent::new(7), &queue).unwrap();

        // Re-entering the slot tagged 5 must have waited for fence value 5.
        assert!(device.log().fence_waits.contains(&5));
        // Every re-entered slot's allocator was reset.
        assert_eq!(device.log().allocator_resets, 3);
    }

    #[test]
    fn test_no_wait_when_event_already_reached() {
        let device = SoftwareDevice::new();
        let mut raw = device.create_queue(QueueType::Compute);
        raw.signal(10).unwrap();
        let queue = CommandQueue::new(raw);
        let mut ring =
            AllocatorRing::new(&device, QueueType::Compute, CompletionEvent::new(0)).unwrap();

        ring.advance(CompletionEvent::new(1), &queue).unwrap();
        assert!(device.log().fence_waits.is_empty());
    }
}
