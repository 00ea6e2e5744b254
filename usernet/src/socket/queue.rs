//! Fairness between interactive and bulk flows.
//!
//! Every packet produced for the guest is counted against its flow. A flow that keeps producing
//! while the guest has not yet drained any of it is considered bulk and moved to the batch queue,
//! so that interactive flows are not stuck behind it. The flow returns to the fast queue once the
//! guest drained everything it had queued.

/// The output queue a flow's packets are placed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueClass {
    /// Interactive, served first.
    Fast,
    /// Bulk transfer.
    Batch,
}

/// Queue accounting of one flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shaping {
    /// Packets queued towards the guest and not yet drained.
    queued: u32,
    /// Packets queued in a row since the queue was last empty.
    consecutive: u32,
    batch: bool,
}

impl Shaping {
    /// The queue that new packets of the flow go to.
    pub fn class(&self) -> QueueClass {
        if self.batch {
            QueueClass::Batch
        } else {
            QueueClass::Fast
        }
    }

    /// Packets queued and not yet drained.
    pub fn queued(&self) -> u32 {
        self.queued
    }

    /// Packets queued in a row.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Account one packet queued towards the guest.
    ///
    /// Returns `true` if this packet moved the flow to the batch queue. A threshold of zero
    /// disables the downgrade.
    pub fn enqueue(&mut self, downgrade_after: u32) -> bool {
        self.queued = self.queued.saturating_add(1);
        self.consecutive = self.consecutive.saturating_add(1);
        let downgrade = !self.batch
            && downgrade_after > 0
            && self.consecutive >= downgrade_after;
        if downgrade {
            self.batch = true;
        }
        downgrade
    }

    /// Account packets drained by the guest.
    ///
    /// Returns `true` if the flow was upgraded back to the fast queue.
    pub fn dequeue(&mut self, count: u32) -> bool {
        self.queued = self.queued.saturating_sub(count);
        if self.queued > 0 {
            return false;
        }
        self.consecutive = 0;
        core::mem::replace(&mut self.batch, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_at_threshold() {
        let mut shaping = Shaping::default();
        for _ in 0..9 {
            assert!(!shaping.enqueue(10));
        }
        assert_eq!(shaping.class(), QueueClass::Fast);
        assert!(shaping.enqueue(10));
        assert_eq!(shaping.class(), QueueClass::Batch);
        // Only reported once.
        assert!(!shaping.enqueue(10));
        assert_eq!(shaping.queued(), 11);
    }

    #[test]
    fn upgrade_when_drained() {
        let mut shaping = Shaping::default();
        for _ in 0..12 {
            shaping.enqueue(10);
        }
        assert!(!shaping.dequeue(11));
        assert_eq!(shaping.class(), QueueClass::Batch);
        assert!(shaping.dequeue(1));
        assert_eq!(shaping.class(), QueueClass::Fast);
        assert_eq!(shaping.consecutive(), 0);
    }

    #[test]
    fn zero_disables() {
        let mut shaping = Shaping::default();
        for _ in 0..100 {
            assert!(!shaping.enqueue(0));
        }
        assert_eq!(shaping.class(), QueueClass::Fast);
    }
}
