//! Half-open effective-partition-key intervals
//!
//! Bounds are upper-case hex strings compared lexicographically. The full
//! key space is `["", "FF")`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{RoutingError, RoutingResult};

/// Inclusive lower bound of the key space
pub const MIN_EPK: &str = "";

/// Exclusive upper bound of the key space
pub const MAX_EPK: &str = "FF";

/// A half-open interval `[min, max)` over the effective-partition-key space
///
/// Identity is the interval itself: two ranges with the same bounds are the
/// same range, regardless of which physical partition served them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "WireRange", into = "WireRange")]
pub struct FeedRange {
    min: String,
    max: String,
}

impl FeedRange {
    /// Create a range, rejecting malformed or empty intervals
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> RoutingResult<Self> {
        let min = min.into();
        let max = max.into();
        validate_bound(&min)?;
        validate_bound(&max)?;
        if min >= max {
            return Err(RoutingError::EmptyRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// The whole key space
    pub fn full() -> Self {
        Self {
            min: MIN_EPK.to_string(),
            max: MAX_EPK.to_string(),
        }
    }

    pub fn min_inclusive(&self) -> &str {
        &self.min
    }

    pub fn max_exclusive(&self) -> &str {
        &self.max
    }

    /// Whether an effective partition key falls inside this range
    pub fn contains_key(&self, epk: &str) -> bool {
        self.min.as_str() <= epk && epk < self.max.as_str()
    }

    /// Whether `other` lies entirely inside this range
    pub fn contains(&self, other: &FeedRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Whether the two ranges share at least one key
    pub fn overlaps(&self, other: &FeedRange) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// The shared sub-interval, if any
    pub fn intersection(&self, other: &FeedRange) -> Option<FeedRange> {
        if !self.overlaps(other) {
            return None;
        }
        let min = std::cmp::max(&self.min, &other.min).clone();
        let max = std::cmp::min(&self.max, &other.max).clone();
        Some(FeedRange { min, max })
    }

    /// Span of a sorted, gap-free run of ranges
    ///
    /// Returns `None` if `ranges` is empty or has a gap or overlap.
    pub fn span_of(ranges: &[FeedRange]) -> Option<FeedRange> {
        let first = ranges.first()?;
        let last = ranges.last()?;
        if !is_contiguous(ranges) {
            return None;
        }
        Some(FeedRange {
            min: first.min.clone(),
            max: last.max.clone(),
        })
    }
}

impl fmt::Display for FeedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.min, self.max)
    }
}

/// Whether a sorted list of ranges is gap-free and non-overlapping
pub fn is_contiguous(ranges: &[FeedRange]) -> bool {
    ranges.windows(2).all(|pair| pair[0].max == pair[1].min)
}

/// Sort ranges by minimum and check that no two of them overlap
pub fn sort_disjoint(ranges: &[FeedRange]) -> RoutingResult<Vec<FeedRange>> {
    let mut sorted = ranges.to_vec();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0].max > pair[1].min {
            return Err(RoutingError::Overlapping {
                left: pair[0].to_string(),
                right: pair[1].to_string(),
            });
        }
    }
    Ok(sorted)
}

fn validate_bound(bound: &str) -> RoutingResult<()> {
    if bound.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)) {
        Ok(())
    } else {
        Err(RoutingError::InvalidBound(bound.to_string()))
    }
}

/// Serialized form carried inside continuation tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRange {
    min: String,
    max: String,
    #[serde(default = "default_true")]
    is_min_inclusive: bool,
    #[serde(default)]
    is_max_inclusive: bool,
}

fn default_true() -> bool {
    true
}

impl TryFrom<WireRange> for FeedRange {
    type Error = RoutingError;

    fn try_from(wire: WireRange) -> Result<Self, Self::Error> {
        if !wire.is_min_inclusive || wire.is_max_inclusive {
            return Err(RoutingError::InvalidBound(format!(
                "range [{},{}) must be min-inclusive and max-exclusive",
                wire.min, wire.max
            )));
        }
        FeedRange::new(wire.min, wire.max)
    }
}

impl From<FeedRange> for WireRange {
    fn from(range: FeedRange) -> Self {
        Self {
            min: range.min,
            max: range.max,
            is_min_inclusive: true,
            is_max_inclusive: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(min: &str, max: &str) -> FeedRange {
        FeedRange::new(min, max).unwrap()
    }

    #[test]
    fn test_rejects_empty_and_inverted() {
        assert!(matches!(
            FeedRange::new("AA", "AA"),
            Err(RoutingError::EmptyRange { .. })
        ));
        assert!(FeedRange::new("BB", "AA").is_err());
    }

    #[test]
    fn test_rejects_non_hex_bounds() {
        assert!(matches!(
            FeedRange::new("aa", "BB"),
            Err(RoutingError::InvalidBound(_))
        ));
    }

    #[test]
    fn test_containment_and_overlap() {
        let outer = r("AA", "EE");
        assert!(outer.contains(&r("BB", "CC")));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&r("BB", "FF")));

        assert!(outer.overlaps(&r("DD", "FF")));
        assert!(!outer.overlaps(&r("EE", "FF")));
        assert!(outer.contains_key("AA"));
        assert!(!outer.contains_key("EE"));
    }

    #[test]
    fn test_intersection() {
        let a = r("", "CC");
        let b = r("BB", "FF");
        assert_eq!(a.intersection(&b), Some(r("BB", "CC")));
        assert_eq!(a.intersection(&r("CC", "FF")), None);
    }

    #[test]
    fn test_span_of_requires_contiguity() {
        assert_eq!(
            FeedRange::span_of(&[r("", "AA"), r("AA", "BB")]),
            Some(r("", "BB"))
        );
        assert_eq!(FeedRange::span_of(&[r("", "AA"), r("BB", "CC")]), None);
        assert_eq!(FeedRange::span_of(&[]), None);
    }

    #[test]
    fn test_sort_disjoint_detects_overlap() {
        let sorted = sort_disjoint(&[r("BB", "FF"), r("", "BB")]).unwrap();
        assert_eq!(sorted[0], r("", "BB"));
        assert!(sort_disjoint(&[r("", "CC"), r("BB", "FF")]).is_err());
    }

    #[test]
    fn test_bounds_alongside_ord() {
        let left = r("", "80");
        let right = r("80", "FF");
        assert_eq!(left.min_inclusive(), "");
        assert_eq!(right.max_exclusive(), "FF");
        assert_eq!(left.clone().min(right.clone()), left);
        assert_eq!(left.clone().max(right.clone()), right);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(r("", "FF")).unwrap();
        assert_eq!(json["min"], "");
        assert_eq!(json["max"], "FF");
        assert_eq!(json["isMinInclusive"], true);
        assert_eq!(json["isMaxInclusive"], false);

        let back: FeedRange = serde_json::from_value(json).unwrap();
        assert_eq!(back, FeedRange::full());
    }

    #[test]
    fn test_wire_rejects_inclusive_max() {
        let json = serde_json::json!({
            "min": "AA", "max": "BB", "isMinInclusive": true, "isMaxInclusive": true
        });
        assert!(serde_json::from_value::<FeedRange>(json).is_err());
    }
}
