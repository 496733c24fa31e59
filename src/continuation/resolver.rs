//! Partition continuation resolver
//!
//! Maps previously issued per-range tokens onto the ranges that exist now.
//! Between issuing a token and resuming it, the collection may have split
//! (one old range is now several) or merged (several old ranges are now
//! one). Each token is classified against the current ranges:
//!
//! - **equal**: one current range has the token's exact bounds
//! - **split**: the token's range is exactly the union of two or more
//!   consecutive current ranges; the entry is keyed by the token's range
//!   and the producer discovers the split on its first fetch
//! - **merge**: the token's range lies strictly inside one current range;
//!   that range is carved into sub-intervals, one per token, and the
//!   uncovered gaps start fresh
//!
//! Anything else is a partial overlap and is refused.

use std::collections::BTreeMap;

use crate::routing::{sort_disjoint, FeedRange};

use super::errors::{ContinuationError, ContinuationResult};
use super::token::RangeScoped;

/// Result of mapping tokens onto the current topology
///
/// Every current key is covered by exactly one entry across the three
/// maps. A `None` value means the range starts from the beginning.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMapping<T> {
    /// Range groups before the active resumption point
    pub left: BTreeMap<FeedRange, Option<T>>,
    /// The range group holding the active resumption point
    pub target: BTreeMap<FeedRange, Option<T>>,
    /// Range groups after the active resumption point
    pub right: BTreeMap<FeedRange, Option<T>>,
}

impl<T> PartitionMapping<T> {
    /// Union interval of the target entries
    pub fn target_span(&self) -> Option<FeedRange> {
        let ranges: Vec<FeedRange> = self.target.keys().cloned().collect();
        FeedRange::span_of(&ranges)
    }

    /// All entries in key order
    pub fn entries(&self) -> impl Iterator<Item = (&FeedRange, &Option<T>)> {
        self.left
            .iter()
            .chain(self.target.iter())
            .chain(self.right.iter())
    }

    pub fn len(&self) -> usize {
        self.left.len() + self.target.len() + self.right.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How one token lands on the sorted current ranges
#[derive(Debug, Clone, Copy)]
enum Placement {
    /// Covers `ranges[first..=last]` exactly
    Span { first: usize, last: usize },
    /// Strictly inside `ranges[index]`
    Inside { index: usize },
}

struct Group<T> {
    entries: Vec<(FeedRange, Option<T>)>,
    tokens: Vec<usize>,
}

/// Resolve `tokens` against `current` ranges
///
/// The first token designates the active resumption point. Tokens must not
/// overlap each other, and each must be equal to, a union of, or contained
/// in the current ranges.
pub fn resolve<T>(current: &[FeedRange], tokens: &[T]) -> ContinuationResult<PartitionMapping<T>>
where
    T: RangeScoped + Clone,
{
    if current.is_empty() {
        return Err(ContinuationError::malformed("no current ranges to resume on"));
    }
    if tokens.is_empty() {
        return Err(ContinuationError::malformed("continuation carries no range tokens"));
    }

    let ranges = sort_disjoint(current)
        .map_err(|e| ContinuationError::malformed(format!("current ranges: {}", e)))?;
    let token_ranges: Vec<FeedRange> = tokens.iter().map(|t| t.range().clone()).collect();
    sort_disjoint(&token_ranges)
        .map_err(|e| ContinuationError::malformed(format!("continuation tokens: {}", e)))?;

    let mut span_owner: Vec<Option<usize>> = vec![None; ranges.len()];
    let mut inside: Vec<Vec<usize>> = vec![Vec::new(); ranges.len()];
    let mut placements = Vec::with_capacity(tokens.len());

    for (ti, token) in tokens.iter().enumerate() {
        let placement = place(&ranges, token.range())?;
        match placement {
            Placement::Span { first, last } => {
                for owner in &mut span_owner[first..=last] {
                    *owner = Some(ti);
                }
            }
            Placement::Inside { index } => inside[index].push(ti),
        }
        placements.push(placement);
    }

    let mut groups: Vec<Group<T>> = Vec::new();
    let mut i = 0;
    while i < ranges.len() {
        if let Some(ti) = span_owner[i] {
            let last = match placements[ti] {
                Placement::Span { last, .. } => last,
                Placement::Inside { index } => index,
            };
            groups.push(Group {
                entries: vec![(token_ranges[ti].clone(), Some(tokens[ti].clone()))],
                tokens: vec![ti],
            });
            i = last + 1;
            continue;
        }

        let range = &ranges[i];
        if inside[i].is_empty() {
            groups.push(Group {
                entries: vec![(range.clone(), None)],
                tokens: Vec::new(),
            });
        } else {
            groups.push(carve(range, &inside[i], tokens)?);
        }
        i += 1;
    }

    let target_group = groups
        .iter()
        .position(|g| g.tokens.contains(&0))
        .ok_or_else(|| ContinuationError::unreconcilable("active token was not placed"))?;

    let mut mapping = PartitionMapping {
        left: BTreeMap::new(),
        target: BTreeMap::new(),
        right: BTreeMap::new(),
    };
    for (gi, group) in groups.into_iter().enumerate() {
        let side = if gi < target_group {
            &mut mapping.left
        } else if gi == target_group {
            &mut mapping.target
        } else {
            &mut mapping.right
        };
        side.extend(group.entries);
    }
    Ok(mapping)
}

fn place(ranges: &[FeedRange], token_range: &FeedRange) -> ContinuationResult<Placement> {
    let overlapping: Vec<usize> = ranges
        .iter()
        .enumerate()
        .filter(|(_, r)| r.overlaps(token_range))
        .map(|(i, _)| i)
        .collect();

    let (first, last) = match (overlapping.first(), overlapping.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => {
            return Err(ContinuationError::unreconcilable(format!(
                "token range {} overlaps no current range",
                token_range
            )))
        }
    };

    let covered = &ranges[first..=last];
    let exact_union = covered[0].min_inclusive() == token_range.min_inclusive()
        && covered[covered.len() - 1].max_exclusive() == token_range.max_exclusive()
        && FeedRange::span_of(covered).is_some();
    if exact_union {
        return Ok(Placement::Span { first, last });
    }
    if first == last && ranges[first].contains(token_range) {
        return Ok(Placement::Inside { index: first });
    }
    Err(ContinuationError::unreconcilable(format!(
        "token range {} partially overlaps current ranges {}..{}",
        token_range, ranges[first], ranges[last]
    )))
}

/// Split a merged range into per-token sub-intervals plus fresh gaps
fn carve<T>(range: &FeedRange, members: &[usize], tokens: &[T]) -> ContinuationResult<Group<T>>
where
    T: RangeScoped + Clone,
{
    let mut members = members.to_vec();
    members.sort_by(|a, b| tokens[*a].range().cmp(tokens[*b].range()));

    let mut entries = Vec::new();
    let mut cursor = range.min_inclusive().to_string();
    for &ti in &members {
        let token_range = tokens[ti].range();
        if cursor.as_str() < token_range.min_inclusive() {
            entries.push((gap(&cursor, token_range.min_inclusive())?, None));
        }
        entries.push((token_range.clone(), Some(tokens[ti].clone())));
        cursor = token_range.max_exclusive().to_string();
    }
    if cursor.as_str() < range.max_exclusive() {
        entries.push((gap(&cursor, range.max_exclusive())?, None));
    }
    Ok(Group {
        entries,
        tokens: members,
    })
}

fn gap(min: &str, max: &str) -> ContinuationResult<FeedRange> {
    FeedRange::new(min, max).map_err(|e| ContinuationError::malformed(e.to_string()))
}
