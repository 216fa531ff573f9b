//! Vote target identifiers and backend receipts.

use serde::{Deserialize, Serialize};

use super::enums::TargetKind;

/// Identifies one votable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteTarget {
    pub kind: TargetKind,
    /// Backend identifier: a post/comment id, or the symbol for stock votes.
    pub id: String,
}

impl VoteTarget {
    pub fn post(id: &str) -> Self {
        Self { kind: TargetKind::Post, id: id.to_string() }
    }

    pub fn comment(id: &str) -> Self {
        Self { kind: TargetKind::Comment, id: id.to_string() }
    }

    pub fn stock(symbol: &str) -> Self {
        Self { kind: TargetKind::Stock, id: symbol.to_string() }
    }
}

impl std::fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Backend confirmation of a vote mutation.
///
/// Carries the authoritative post-mutation state, which may differ from the
/// requested value when other voters raced the same target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoteReceipt {
    /// The caller's vote as recorded by the backend: `-1`, `0`, or `1`.
    pub value: i8,

    /// Net score after the mutation.
    pub score: i64,

    #[serde(default)]
    pub upvotes: u32,

    #[serde(default)]
    pub downvotes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_display() {
        assert_eq!(VoteTarget::stock("AAPL").to_string(), "stock:AAPL");
        assert_eq!(VoteTarget::post("p42").to_string(), "post:p42");
    }
}
