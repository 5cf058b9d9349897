//! Paging parameters.

use serde::{Deserialize, Serialize};

/// Limit used when a caller asks for zero records.
pub const DEFAULT_PAGE_LIMIT: u64 = 20;
/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Skip/limit window over live records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: u64,
    #[serde(default)]
    pub limit: u64,
}

impl Page {
    pub fn new(skip: u64, limit: u64) -> Self {
        Self { skip, limit }
    }

    /// Apply the default and the upper bound to `limit`.
    pub fn normalized(self) -> Self {
        let limit = match self.limit {
            0 => DEFAULT_PAGE_LIMIT,
            l => l.min(MAX_PAGE_LIMIT),
        };
        Self {
            skip: self.skip,
            limit,
        }
    }
}
