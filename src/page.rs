//! Page cursor over a source result set

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position and size of the next page to fetch
///
/// Owned by exactly one run loop and mutated in place as pages commit.
/// The offset never decreases within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    offset: u64,
    limit: u32,
}

impl PageRequest {
    /// Create a page request, rejecting a zero limit
    pub fn new(offset: u64, limit: u32) -> Option<Self> {
        (limit > 0).then_some(Self { offset, limit })
    }

    /// First page of a result set
    pub fn first(limit: u32) -> Option<Self> {
        Self::new(0, limit)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Skip past a fully committed page
    pub fn increment_page(&mut self) {
        self.offset += u64::from(self.limit);
    }

    /// Skip past a single record
    pub fn increment(&mut self) {
        self.offset += 1;
    }

    /// Advance past `consumed` committed records
    pub fn advance(&mut self, consumed: usize) {
        if consumed == self.limit as usize {
            self.increment_page();
        } else {
            self.offset += consumed as u64;
        }
    }
}

impl fmt::Display for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset={} limit={}", self.offset, self.limit)
    }
}
