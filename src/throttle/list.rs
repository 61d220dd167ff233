use tracing::trace;

use super::rate::RateMeter;
use crate::poll::PollSurface;

/// Span of the per-node smoothed rate meter, in seconds.
const NODE_RATE_SPAN: u64 = 30;

/// Per-node quota a leaf may accumulate between refills.
const NODE_QUOTA_WINDOW: u32 = 128 << 10;

/// Quota handed to a freshly inserted node.
const NODE_INITIAL_QUOTA: u32 = 30 << 10;

/// Activation callback: re-arms the owning connection's poll interest when
/// new quota arrives for a deactivated node.
pub type ActivateSlot = Box<dyn FnMut(&mut dyn PollSurface)>;

/// A per-connection leaf of one throttle tree.
///
/// The node's slot in the controller holds its quota and activation state;
/// the node itself carries the connection's smoothed rate for this
/// direction, which request pipelining consumes.
pub struct ThrottleNode {
    id: usize,
    rate: RateMeter,
}

impl ThrottleNode {
    /// Smoothed byte-per-second rate of this node's direction.
    pub fn rate(&mut self) -> u32 {
        self.rate.rate()
    }
}

struct Slot {
    quota: u32,
    active: bool,
    activate: ActivateSlot,
}

/// One of the two global throttle trees (upload or download).
///
/// Members are either *active* (holding quota, eligible for I/O) or
/// *deactivated* (quota exhausted; their activation callback fires when
/// [`ThrottleList::refill`] hands out new quota). An unlimited list keeps
/// the membership discipline but never runs out of quota.
pub struct ThrottleList {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    members: usize,
    limited: bool,
    rate: RateMeter,
}

impl ThrottleList {
    /// Creates a list that never exhausts quota.
    pub fn unlimited() -> Self {
        Self::build(false)
    }

    /// Creates a list with per-tick quota discipline; quota arrives through
    /// [`ThrottleList::refill`].
    pub fn limited() -> Self {
        Self::build(true)
    }

    fn build(limited: bool) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            members: 0,
            limited,
            rate: RateMeter::new(NODE_RATE_SPAN),
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limited
    }

    /// Number of member nodes.
    pub fn len(&self) -> usize {
        self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members == 0
    }

    /// Registers a new leaf. The node starts active with its initial quota.
    pub fn insert(&mut self, activate: ActivateSlot) -> ThrottleNode {
        let slot = Slot {
            quota: NODE_INITIAL_QUOTA,
            active: true,
            activate,
        };

        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        self.members += 1;
        ThrottleNode {
            id,
            rate: RateMeter::new(NODE_RATE_SPAN),
        }
    }

    /// Removes a leaf permanently. Safe to call on an already-erased node.
    pub fn erase(&mut self, node: &ThrottleNode) {
        if let Some(slot) = self.slots.get_mut(node.id) {
            if slot.take().is_some() {
                self.members -= 1;
                self.free.push(node.id);
            }
        }
    }

    /// Whether the node is currently a member of this list.
    pub fn is_throttled(&self, node: &ThrottleNode) -> bool {
        matches!(self.slots.get(node.id), Some(Some(_)))
    }

    /// Remaining byte budget for the current tick.
    pub fn node_quota(&self, node: &ThrottleNode) -> u32 {
        if !self.limited {
            return u32::MAX;
        }
        match self.slots.get(node.id) {
            Some(Some(slot)) => slot.quota,
            _ => 0,
        }
    }

    /// Debits `bytes` from the node's budget and feeds both rate meters.
    /// `bytes` must not exceed the node's quota.
    pub fn node_used(&mut self, node: &mut ThrottleNode, bytes: u32) {
        if bytes == 0 {
            return;
        }

        if self.limited {
            if let Some(Some(slot)) = self.slots.get_mut(node.id) {
                debug_assert!(bytes <= slot.quota);
                slot.quota = slot.quota.saturating_sub(bytes);
            }
        }

        node.rate.insert(bytes);
        self.rate.insert(bytes);
    }

    /// Removes the node from the ready list; its activation callback fires
    /// on the next refill that hands it quota.
    pub fn node_deactivate(&mut self, node: &ThrottleNode) {
        if let Some(Some(slot)) = self.slots.get_mut(node.id) {
            slot.active = false;
        }
    }

    /// Whether the node is on the ready list.
    pub fn node_is_active(&self, node: &ThrottleNode) -> bool {
        matches!(self.slots.get(node.id), Some(Some(slot)) if slot.active)
    }

    /// Distributes one tick's worth of quota evenly across members and
    /// reactivates deactivated nodes that received some, firing each
    /// activation callback exactly once.
    pub fn refill(&mut self, total: u32, poll: &mut dyn PollSurface) {
        if !self.limited || self.members == 0 {
            return;
        }

        let share = total / self.members as u32;
        if share == 0 {
            return;
        }

        let mut woken = 0usize;
        for entry in self.slots.iter_mut() {
            let Some(slot) = entry.as_mut() else {
                continue;
            };

            slot.quota = (slot.quota + share).min(NODE_QUOTA_WINDOW);

            if !slot.active && slot.quota > 0 {
                slot.active = true;
                (slot.activate)(poll);
                woken += 1;
            }
        }

        if woken > 0 {
            trace!(woken, "throttle refill reactivated nodes");
        }
    }

    /// Smoothed byte-per-second rate across all members.
    pub fn rate(&mut self) -> u32 {
        self.rate.rate()
    }
}
