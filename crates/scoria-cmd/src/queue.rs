//! # Command Queue Wrapper
//!
//! Owns the fence counter and the submission call for one queue.

use scoria_core::{CompletionEvent, QueueType, Result, SubmitQueue};
use scoria_core::traits::CommandList;

// =============================================================================
// COMMAND QUEUE
// =============================================================================

/// A submit queue paired with its monotonic completion-event counter
///
/// Every submission signals the queue's fence with the next counter value,
/// so completion events map 1:1 onto submissions. `current` is the event of
/// the most recent submission; `next` is the event the next submission will
/// carry. No method here blocks on the GPU.
pub struct CommandQueue {
    inner: Box<dyn SubmitQueue>,
    /// Fence value the next submission will signal
    next_fence_value: u64,
}

impl CommandQueue {
    /// Wrap a raw submit queue
    ///
    /// The counter starts at 1, leaving event 0 as "nothing submitted yet".
    pub fn new(inner: Box<dyn SubmitQueue>) -> Self {
        Self {
            inner,
            next_fence_value: 1,
        }
    }

    /// Queue kind, which fixes the command-list type recorded for it
    pub fn queue_type(&self) -> QueueType {
        self.inner.queue_type()
    }

    /// Event of the most recent submission
    pub fn current_completion_event(&self) -> CompletionEvent {
        CompletionEvent::new(self.next_fence_value - 1)
    }

    /// Event the next submission will carry
    pub fn next_completion_event(&self) -> CompletionEvent {
        CompletionEvent::new(self.next_fence_value)
    }

    /// Submit a closed command list and advance the timeline
    pub fn execute_command_lists(&mut self, list: &mut dyn CommandList) -> Result<()> {
        self.inner.execute_command_lists(list)?;
        self.inner.signal(self.next_fence_value)?;
        self.next_fence_value += 1;
        Ok(())
    }

    /// Largest fence value the GPU has reached
    pub fn completed_value(&self) -> u64 {
        self.inner.completed_value()
    }

    /// Block until the fence reaches `value`
    pub fn wait_for_value(&self, value: u64) -> Result<()> {
        self.inner.wait_for_value(value)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SoftwareDevice;
    use scoria_core::Device;

    #[test]
    fn test_event_values_advance_per_submission() {
        let device = SoftwareDevice::new();
        let mut queue = CommandQueue::new(device.create_queue(QueueType::Compute));

        assert_eq!(queue.current_completion_event().fence_value, 0);
        assert_eq!(queue.next_completion_event().fence_value, 1);

        let allocator = device.create_command_allocator(QueueType::Compute).unwrap();
        let mut list = device
            .create_command_list(QueueType::Compute, allocator.as_ref())
            .unwrap();
        list.close().unwrap();
        queue.execute_command_lists(list.as_mut()).unwrap();

        assert_eq!(queue.current_completion_event().fence_value, 1);
        assert_eq!(queue.next_completion_event().fence_value, 2);
        // The software fence completes instantly on signal.
        assert_eq!(queue.completed_value(), 1);
    }
}
