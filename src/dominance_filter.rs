//! Containment/dominance filtering for long-read alignments.
//!
//! A long read accumulates many candidate alignments; most are fragments
//! of a stronger one. Candidates enter an interval set keyed by their
//! query span. A candidate is *covered* when some alive interval overlaps
//! at least half of its length and out-scores it by the score ratio; the
//! test runs in both directions as each interval arrives, so a weaker
//! interval that was alive earlier is evicted by a stronger newcomer.
//! Before any of that, short partial alignments that neither cover enough
//! of their reference nor anchor near a query end are dropped outright.

use crate::records::MatchRecord;

/// Filter thresholds. The defaults preserve the historical constants;
/// they are configuration, not tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct DominanceConfig {
    /// An interval must be overlapped by at least this fraction of its own
    /// length to be dominated.
    pub min_overlap: f64,
    /// The weaker interval survives unless its score falls below this
    /// fraction of the stronger one's.
    pub score_ratio: f64,
    /// Pre-filter: minimum fraction of the reference an alignment must
    /// cover...
    pub min_reference_coverage: f64,
    /// ...unless it starts or ends within this many bases of a query end.
    pub end_anchor: u32,
}

impl Default for DominanceConfig {
    fn default() -> Self {
        DominanceConfig {
            min_overlap: 0.5,
            score_ratio: 0.95,
            min_reference_coverage: 0.8,
            end_anchor: 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    begin: i64,
    end: i64,
    score: u32,
    /// Index into the candidate list.
    idx: usize,
    alive: bool,
}

impl Interval {
    fn length(&self) -> i64 {
        self.end - self.begin
    }

    fn overlap_with(&self, other: &Interval) -> i64 {
        let lo = self.begin.max(other.begin);
        let hi = self.end.min(other.end);
        (hi - lo).max(0)
    }
}

/// Interval set over the query axis, kept sorted by begin position.
#[derive(Debug, Default)]
struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    /// Insert `iv`, resolving dominance in both directions against every
    /// alive overlapping interval. Returns whether `iv` stayed alive.
    fn insert(&mut self, mut iv: Interval, config: &DominanceConfig) -> bool {
        for other in self.intervals.iter_mut().filter(|o| o.alive) {
            let overlap = iv.overlap_with(other);
            if overlap <= 0 {
                continue;
            }
            if overlap as f64 >= config.min_overlap * iv.length() as f64
                && (iv.score as f64) < config.score_ratio * other.score as f64
            {
                iv.alive = false;
            }
            if overlap as f64 >= config.min_overlap * other.length() as f64
                && (other.score as f64) < config.score_ratio * iv.score as f64
            {
                other.alive = false;
            }
        }
        let alive = iv.alive;
        let pos = self
            .intervals
            .partition_point(|o| o.begin <= iv.begin);
        self.intervals.insert(pos, iv);
        alive
    }

    fn surviving_indices(&self) -> Vec<usize> {
        self.intervals
            .iter()
            .filter(|iv| iv.alive)
            .map(|iv| iv.idx)
            .collect()
    }
}

/// Apply the pre-filter and dominance test to one query's matches,
/// returning the survivors in their original order.
pub fn filter_matches(
    matches: Vec<MatchRecord>,
    query_length: usize,
    config: &DominanceConfig,
) -> Vec<MatchRecord> {
    let mut set = IntervalSet::default();
    for (idx, m) in matches.iter().enumerate() {
        if !passes_prefilter(m, query_length, config) {
            continue;
        }
        let a = i64::from(m.translated_query_begin);
        let b = m.query_end;
        set.insert(
            Interval {
                begin: a.min(b),
                end: a.max(b),
                score: m.raw_score,
                idx,
                alive: true,
            },
            config,
        );
    }

    let mut keep = vec![false; matches.len()];
    for idx in set.surviving_indices() {
        keep[idx] = true;
    }
    matches
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| keep[*idx])
        .map(|(_, m)| m)
        .collect()
}

/// Short terminal/internal partial alignments are dropped before the
/// dominance test: keep an alignment only when it covers enough of its
/// reference or is anchored near either end of the query.
fn passes_prefilter(m: &MatchRecord, query_length: usize, config: &DominanceConfig) -> bool {
    if m.reference_coverage() >= config.min_reference_coverage {
        return true;
    }
    let anchor = i64::from(config.end_anchor);
    let a = i64::from(m.translated_query_begin);
    let b = m.query_end;
    let (begin, end) = (a.min(b), a.max(b));
    begin <= anchor || (query_length as i64 - end) <= anchor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{CombinedOp, EditOp};

    fn candidate(begin: u32, span: u32, score: u32, subject_length: i32) -> MatchRecord {
        MatchRecord {
            subject_id: 0,
            raw_score: score,
            query_begin: begin,
            subject_begin: 0,
            frame: 0,
            translated_query_begin: begin,
            query_end: i64::from(begin + span),
            subject_end: span,
            ops: vec![CombinedOp {
                op: EditOp::Match,
                count: span,
                letter: 0,
            }],
            len: span,
            identities: span,
            mismatches: 0,
            gap_openings: 0,
            gaps: 0,
            frame_shift_adjust: 0,
            subject_name: b"s".to_vec(),
            subject_length,
        }
    }

    #[test]
    fn dominated_interval_is_excluded() {
        // Full overlap, weaker score below the ratio
        let strong = candidate(0, 100, 1000, 100);
        let weak = candidate(10, 80, 900, 80);
        let out = filter_matches(vec![strong, weak], 120, &DominanceConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw_score, 1000);
    }

    #[test]
    fn disjoint_intervals_both_survive() {
        let a = candidate(0, 50, 1000, 50);
        let b = candidate(60, 50, 300, 50);
        let out = filter_matches(vec![a, b], 120, &DominanceConfig::default());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn later_stronger_interval_evicts_earlier_weaker() {
        let weak = candidate(0, 100, 500, 100);
        let strong = candidate(0, 100, 1000, 100);
        let out = filter_matches(vec![weak, strong], 120, &DominanceConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw_score, 1000);
    }

    #[test]
    fn close_scores_coexist() {
        let a = candidate(0, 100, 1000, 100);
        let b = candidate(0, 100, 980, 100);
        let out = filter_matches(vec![a, b], 120, &DominanceConfig::default());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn partial_alignment_without_anchor_dropped() {
        // Covers 40 of 100 reference bases, sits mid-query
        let m = candidate(50, 40, 700, 100);
        let out = filter_matches(vec![m], 200, &DominanceConfig::default());
        assert!(out.is_empty());
    }

    #[test]
    fn partial_alignment_at_query_end_kept() {
        // Same poor coverage, but anchored at the start of the query
        let m = candidate(0, 40, 700, 100);
        let out = filter_matches(vec![m], 200, &DominanceConfig::default());
        assert_eq!(out.len(), 1);
    }
}
