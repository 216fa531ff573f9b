//! Enumerations used throughout the feed engine.
//!
//! Wire codes (`"US"`, `"IN"`, sort key names, target kind names) match the
//! backend's query-parameter and JSON conventions, so every enum that crosses
//! the HTTP boundary carries explicit serde renames.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Market regions
// ---------------------------------------------------------------------------

/// Market region a feed is scoped to.
///
/// Symbols are only unique within a region, so the region tags every quote
/// batch, bookmark set, and feed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Region {
    #[default]
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "IN")]
    India,
}

impl Region {
    /// Two-letter wire code used in query parameters.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::India => "IN",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Feed sort keys
// ---------------------------------------------------------------------------

/// Stable sort key for the community feed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedSortKey {
    /// Net community score, descending.
    #[default]
    Score,
    /// Comment volume, descending.
    Comments,
    /// Most recent activity first.
    Recent,
}

impl FeedSortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Score => "score",
            Self::Comments => "comments",
            Self::Recent => "recent",
        }
    }
}

impl std::fmt::Display for FeedSortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Vote targets and directions
// ---------------------------------------------------------------------------

/// Kind of entity a vote can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Post,
    Comment,
    Stock,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Stock => "stock",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The button a user pressed on a vote control.
///
/// Whether the press becomes a set or a clear is decided against the
/// currently visible value (pressing the active direction toggles it off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    /// Signed vote value this direction maps to when set.
    pub fn value(&self) -> i8 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_wire_codes() {
        assert_eq!(Region::Us.code(), "US");
        assert_eq!(Region::India.code(), "IN");
        assert_eq!(serde_json::to_string(&Region::India).unwrap(), "\"IN\"");
        let r: Region = serde_json::from_str("\"US\"").unwrap();
        assert_eq!(r, Region::Us);
    }

    #[test]
    fn sort_key_codes() {
        assert_eq!(FeedSortKey::Comments.as_str(), "comments");
        let s: FeedSortKey = serde_json::from_str("\"recent\"").unwrap();
        assert_eq!(s, FeedSortKey::Recent);
    }

    #[test]
    fn direction_values() {
        assert_eq!(VoteDirection::Up.value(), 1);
        assert_eq!(VoteDirection::Down.value(), -1);
    }
}
