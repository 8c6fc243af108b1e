//! Scheduler — interleaves quota turns by weighted round-robin.
//!
//! Each step picks the agent with the lowest taken/quota ratio among those
//! with turns left. The agent that just went is skipped while anyone else
//! still has quota, so no agent takes two turns in a row unless it is the
//! only one left.

use crate::allocator::Allocation;
use serde::{Deserialize, Serialize};
use tendril_core::types::AgentId;

/// One scheduled transport turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub agent: AgentId,
    /// Zero-based index of this turn among the agent's own turns.
    pub index: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    agent: AgentId,
    quota: u32,
    taken: u32,
}

impl Slot {
    fn remaining(&self) -> u32 {
        self.quota - self.taken
    }
}

/// Iterator over the turns of one cycle.
#[derive(Debug, Clone)]
pub struct WeightedRoundRobin {
    slots: Vec<Slot>,
    last: Option<usize>,
}

impl WeightedRoundRobin {
    pub fn new(allocation: &Allocation) -> Self {
        let slots = allocation
            .iter()
            .filter(|(_, q)| *q > 0)
            .map(|(agent, quota)| Slot {
                agent,
                quota,
                taken: 0,
            })
            .collect();
        Self { slots, last: None }
    }

    /// Whether slot `a` has a strictly lower taken/quota ratio than `b`.
    /// Cross-multiplied to stay in integers.
    fn lower_ratio(a: &Slot, b: &Slot) -> bool {
        (a.taken as u64) * (b.quota as u64) < (b.taken as u64) * (a.quota as u64)
    }
}

impl Iterator for WeightedRoundRobin {
    type Item = Turn;

    fn next(&mut self) -> Option<Turn> {
        let open = self.slots.iter().filter(|s| s.remaining() > 0).count();
        if open == 0 {
            return None;
        }

        let mut best: Option<usize> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.remaining() == 0 || (open > 1 && Some(i) == self.last) {
                continue;
            }
            // Slots are in agent id order, so strict comparison keeps ties
            // on the lowest id.
            match best {
                Some(b) if !Self::lower_ratio(slot, &self.slots[b]) => {}
                _ => best = Some(i),
            }
        }

        let i = best?;
        let slot = &mut self.slots[i];
        let turn = Turn {
            agent: slot.agent,
            index: slot.taken,
        };
        slot.taken += 1;
        self.last = Some(i);
        Some(turn)
    }
}

/// Full turn sequence for an allocation. Its length equals the budget.
pub fn schedule(allocation: &Allocation) -> Vec<Turn> {
    WeightedRoundRobin::new(allocation).collect()
}
