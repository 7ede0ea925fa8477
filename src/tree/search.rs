//! # Signed Search-Index Encoding
//!
//! Node searches report their outcome as a single signed integer:
//!
//! - a match is the non-negative slot index
//! - a miss is `-(insertion_point + 1)`, where the insertion point is the
//!   index at which the key would be inserted to preserve order
//!
//! The tree walker above the node layer navigates on these encoded values
//! directly, so the helpers here are part of the public contract. Internally
//! the binary search produces a [`SearchOutcome`] and converts at the
//! boundary.

/// True if the search reported a miss (the value encodes an insertion point).
pub fn is_insertion_point(search_index: i32) -> bool {
    search_index < 0
}

/// Decodes an insertion point back to the index it encodes.
pub fn to_index(insertion_point: i32) -> i32 {
    -insertion_point - 1
}

/// Encodes an index as an insertion point.
pub fn to_insertion_point(index: i32) -> i32 {
    -(index + 1)
}

/// Index of the greatest key at or below the search key, or -1 if the search
/// key sorts below every key on the page.
pub fn to_minus_one_based_index(search_index: i32) -> i32 {
    if is_insertion_point(search_index) {
        let index = to_index(search_index);
        if index == 0 {
            -1
        } else {
            index - 1
        }
    } else {
        search_index
    }
}

/// True if the two search results resolve to adjacent minus-one-based slots.
pub fn is_preceding(left_index: i32, right_index: i32) -> bool {
    to_minus_one_based_index(right_index) - to_minus_one_based_index(left_index) == 1
}

/// Outcome of a binary search over the slot directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(usize),
    Miss(usize),
}

impl SearchOutcome {
    /// Converts to the signed public encoding.
    pub fn to_signed(self) -> i32 {
        match self {
            SearchOutcome::Found(index) => index as i32,
            SearchOutcome::Miss(insertion) => to_insertion_point(insertion as i32),
        }
    }

    pub fn from_signed(search_index: i32) -> Self {
        if is_insertion_point(search_index) {
            SearchOutcome::Miss(to_index(search_index) as usize)
        } else {
            SearchOutcome::Found(search_index as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_point_roundtrip() {
        for index in 0..10 {
            let encoded = to_insertion_point(index);
            assert!(is_insertion_point(encoded));
            assert_eq!(to_index(encoded), index);
        }
    }

    #[test]
    fn matches_are_not_insertion_points() {
        assert!(!is_insertion_point(0));
        assert!(!is_insertion_point(5));
        assert!(is_insertion_point(-1));
    }

    #[test]
    fn minus_one_based_conversion() {
        assert_eq!(to_minus_one_based_index(3), 3);
        assert_eq!(to_minus_one_based_index(to_insertion_point(0)), -1);
        assert_eq!(to_minus_one_based_index(to_insertion_point(1)), 0);
        assert_eq!(to_minus_one_based_index(to_insertion_point(7)), 6);
    }

    #[test]
    fn adjacent_insertion_points_are_preceding() {
        for i in 0..8 {
            assert!(is_preceding(to_insertion_point(i), to_insertion_point(i + 1)));
        }
        assert!(!is_preceding(to_insertion_point(2), to_insertion_point(2)));
        assert!(!is_preceding(to_insertion_point(2), to_insertion_point(4)));
    }

    #[test]
    fn match_and_following_insertion_point_are_preceding() {
        assert!(is_preceding(2, to_insertion_point(3)));
        assert!(is_preceding(to_insertion_point(3), 3));
    }

    #[test]
    fn outcome_signed_roundtrip() {
        assert_eq!(SearchOutcome::Found(4).to_signed(), 4);
        assert_eq!(SearchOutcome::Miss(0).to_signed(), -1);
        assert_eq!(SearchOutcome::Miss(3).to_signed(), -4);

        for outcome in [SearchOutcome::Found(2), SearchOutcome::Miss(5)] {
            assert_eq!(SearchOutcome::from_signed(outcome.to_signed()), outcome);
        }
    }
}
