//! Lineage: the ordered call frames enclosing the current call tree position.
//!
//! A recorder carries one `Lineage`; entering a nested phase produces a child lineage
//! instead of mutating shared state, so concurrent branches never see each other's frames.
//!
//! The frame an event is emitted from is part of its lineage: `turn.started`, emitted on
//! entering the turn frame, carries `["turn"]`, and `hitl.suspended` carries
//! `["turn", "hitl"]`. Events sharing a lineage prefix belong to the same subtree.
//! Events at the top of the tree (session lifecycle) have an empty lineage.

use crate::event::Phase;

/// Ordered list of enclosing phase frames, root first, innermost last.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Lineage {
    frames: Vec<Phase>,
}

impl Lineage {
    /// Empty lineage (top of the call tree).
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns a new lineage with `phase` appended.
    pub fn child(&self, phase: Phase) -> Self {
        let mut frames = self.frames.clone();
        frames.push(phase);
        Self { frames }
    }

    pub fn depth(&self) -> u32 {
        u32::try_from(self.frames.len()).unwrap_or(u32::MAX)
    }

    /// Phase labels root first, e.g. `["turn", "hitl"]`.
    pub fn labels(&self) -> Vec<String> {
        self.frames.iter().map(|p| p.as_str().to_string()).collect()
    }

    pub fn innermost(&self) -> Option<Phase> {
        self.frames.last().copied()
    }
}
