//! Recovery budget for the bounded retry loop.

use std::fmt;

/// Counts recovery attempts against a configured maximum depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryBudget {
    used: u32,
    max_depth: u32,
}

impl RecoveryBudget {
    pub fn new(max_depth: u32) -> Self {
        Self { used: 0, max_depth }
    }

    /// Consume one attempt. Returns `false` once the budget is spent.
    pub fn try_consume(&mut self) -> bool {
        if self.used >= self.max_depth {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }
}

impl fmt::Display for RecoveryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.used, self.max_depth)
    }
}
