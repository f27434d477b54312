use crate::alignment::{Interval, ReadReport, Snv, NO_CALL};
use crate::codon::CodonTracker;
use crate::error::Error;
use crate::Result;
use rayon::prelude::*;
use std::collections::HashMap;

/// A count of molecules that start and stop at particular places on the reference,
/// answering "how many molecules wholly span this interval" queries.
///
/// Triangular table indexed first by the starting position and second by the span
/// length. Queries are O(reference-length^2) worst case; they run once per reported
/// variant signature, not per read.
#[derive(Debug)]
pub struct IntervalCounter {
    counts: Vec<Vec<u64>>,
}

impl IntervalCounter {
    pub fn new(ref_len: usize) -> Self {
        let counts = (0..ref_len)
            .map(|row_index| vec![0; ref_len - row_index + 1])
            .collect();
        IntervalCounter { counts }
    }

    pub fn add_count(&mut self, ref_start: usize, ref_end: usize) {
        self.counts[ref_start][ref_end - ref_start] += 1;
    }

    /// Number of recorded spans `(s, l)` with `s <= ref_start` and `s + l >= ref_end`.
    /// Bounds are signed so that flank-extended queries may poke past the reference.
    pub fn count_spanners(&self, ref_start: i64, ref_end: i64) -> u64 {
        let mut total = 0;
        for (row_index, row) in self.counts.iter().enumerate() {
            if row_index as i64 > ref_start {
                break;
            }
            let first_span = (ref_end - row_index as i64).max(0) as usize;
            if first_span < row.len() {
                total += row[first_span..].iter().sum::<u64>();
            }
        }
        total
    }
}

/// Observation count and coverage-breadth sum for one variant signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnvCollectionCount {
    pub count: u64,
    total_ref_coverage: u64,
}

impl SnvCollectionCount {
    pub fn mean_ref_coverage(&self) -> f64 {
        self.total_ref_coverage as f64 / self.count as f64
    }
}

/// Deduplicating map from a molecule's ordered SNV array (structural identity, quality
/// ignored) to its observation tally. Tens of millions of molecules funnel through the
/// single find-or-insert in [`VariantCounts::observe`].
#[derive(Debug, Default)]
pub struct VariantCounts {
    counts: HashMap<Vec<Snv>, SnvCollectionCount>,
}

impl VariantCounts {
    pub fn observe(&mut self, snvs: Vec<Snv>, ref_coverage: u64) {
        let entry = self.counts.entry(snvs).or_default();
        entry.count += 1;
        entry.total_ref_coverage += ref_coverage;
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Signatures observed at least `min_observations` times, in signature order
    /// (element-wise SNV order, then array length).
    pub fn sorted_entries(&self, min_observations: u64) -> Vec<(&[Snv], &SnvCollectionCount)> {
        let mut entries: Vec<(&[Snv], &SnvCollectionCount)> = self
            .counts
            .iter()
            .filter(|(_, entry)| entry.count >= min_observations)
            .map(|(snvs, entry)| (snvs.as_slice(), entry))
            .collect();
        entries.par_sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// Whole-run aggregation state: read and molecule category tallies, per-position
/// coverage, the coverage-length histogram, the span table, and the variant
/// signature counts.
#[derive(Debug)]
pub struct Tallies {
    pub n_reads_total: u64,
    pub n_reads_unmapped: u64,
    pub n_reads_low_quality: u64,
    pub n_total_base_calls: u64,

    // mutually exclusive molecule categories
    pub n_wild_type_molecules: u64,
    pub n_inconsistent_pairs: u64,
    pub n_insufficient_flank_molecules: u64,
    pub n_low_quality_variant_molecules: u64,
    pub n_called_variant_molecules: u64,

    pub ref_coverage: Vec<u64>,
    pub coverage_size_histogram: Vec<u64>,
    pub interval_counter: IntervalCounter,
    pub variant_counts: VariantCounts,
}

impl Tallies {
    pub fn new(ref_len: usize) -> Self {
        Tallies {
            n_reads_total: 0,
            n_reads_unmapped: 0,
            n_reads_low_quality: 0,
            n_total_base_calls: 0,
            n_wild_type_molecules: 0,
            n_inconsistent_pairs: 0,
            n_insufficient_flank_molecules: 0,
            n_low_quality_variant_molecules: 0,
            n_called_variant_molecules: 0,
            ref_coverage: vec![0; ref_len],
            coverage_size_histogram: vec![0; ref_len + 1],
            interval_counter: IntervalCounter::new(ref_len),
            variant_counts: VariantCounts::default(),
        }
    }

    pub fn total_molecules(&self) -> u64 {
        self.n_inconsistent_pairs
            + self.n_wild_type_molecules
            + self.n_insufficient_flank_molecules
            + self.n_low_quality_variant_molecules
            + self.n_called_variant_molecules
    }

    /// Folds one molecule report into the aggregation tables and classifies the
    /// molecule as exactly one of: inconsistent pair, wild type, low-quality variant,
    /// insufficient flank, or called variant.
    pub fn apply_report(
        &mut self,
        report: &ReadReport,
        tracker: &mut CodonTracker,
        min_q: u8,
        min_flanking_length: usize,
    ) -> Result<()> {
        let coverage_list = &report.ref_coverage;
        if coverage_list.is_empty() {
            return Ok(());
        }

        let mut coverage = 0;
        for interval in coverage_list {
            coverage += interval.size();
            for idx in interval.start..interval.end {
                self.ref_coverage[idx] += 1;
            }
        }
        self.coverage_size_histogram[coverage] += 1;

        let ref_start = coverage_list[0].start;
        let ref_end = coverage_list[coverage_list.len() - 1].end;
        self.interval_counter.add_count(ref_start, ref_end);

        match &report.snvs {
            None => self.n_inconsistent_pairs += 1,
            Some(snvs) if snvs.is_empty() => {
                self.n_wild_type_molecules += 1;
                if coverage_list.len() != 1 {
                    return Err(Error::Internal(
                        "expecting a single coverage interval for a wild-type molecule".into(),
                    ));
                }
                tracker.report_wild_codon_counts(coverage_list[0]);
            }
            Some(snvs) => {
                let low_quality = snvs.iter().any(|snv| {
                    snv.qual < min_q
                        || !matches!(snv.variant_call, NO_CALL | b'A' | b'C' | b'G' | b'T')
                });
                let min_flank = min_flanking_length as i64;
                if low_quality {
                    self.n_low_quality_variant_molecules += 1;
                } else if (ref_end as i64 - snvs[snvs.len() - 1].ref_index as i64) < min_flank
                    || (snvs[0].ref_index as i64 - ref_start as i64) < min_flank
                {
                    self.n_insufficient_flank_molecules += 1;
                } else {
                    self.n_called_variant_molecules += 1;
                    let total_coverage = Interval::new(ref_start, ref_end);
                    let variations = tracker.encode_snvs_as_codons(snvs)?;
                    tracker.report_variant_codon_counts(total_coverage, &variations);
                    self.variant_counts.observe(snvs.clone(), coverage as u64);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::ReadReport;

    #[test]
    fn spanners_cover_contained_queries() {
        let mut counter = IntervalCounter::new(100);
        counter.add_count(10, 60);
        assert_eq!(counter.count_spanners(10, 60), 1);
        assert_eq!(counter.count_spanners(20, 50), 1);
        assert_eq!(counter.count_spanners(9, 50), 0);
        assert_eq!(counter.count_spanners(20, 61), 0);
        assert_eq!(counter.count_spanners(70, 90), 0);
    }

    #[test]
    fn spanners_accumulate() {
        let mut counter = IntervalCounter::new(50);
        counter.add_count(0, 50);
        counter.add_count(5, 45);
        counter.add_count(5, 45);
        assert_eq!(counter.count_spanners(10, 40), 3);
        assert_eq!(counter.count_spanners(2, 40), 1);
    }

    #[test]
    fn out_of_range_queries_count_nothing() {
        let mut counter = IntervalCounter::new(20);
        counter.add_count(0, 20);
        assert_eq!(counter.count_spanners(-5, 10), 0);
        assert_eq!(counter.count_spanners(10, 25), 0);
    }

    #[test]
    fn repeated_signatures_share_one_entry() {
        let mut counts = VariantCounts::default();
        for qual in 30..40 {
            counts.observe(vec![Snv::new(7, b'A', b'C', qual)], 100);
        }
        assert_eq!(counts.len(), 1);
        let entries = counts.sorted_entries(0);
        assert_eq!(entries[0].1.count, 10);
        assert!((entries[0].1.mean_ref_coverage() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn entries_are_filtered_and_ordered() {
        let mut counts = VariantCounts::default();
        let rare = vec![Snv::new(3, b'A', b'C', 40)];
        let common = vec![Snv::new(1, b'T', b'G', 40)];
        let longer = vec![Snv::new(1, b'T', b'G', 40), Snv::new(5, b'C', b'T', 40)];
        counts.observe(rare.clone(), 10);
        for _ in 0..3 {
            counts.observe(common.clone(), 10);
            counts.observe(longer.clone(), 10);
        }
        let entries = counts.sorted_entries(2);
        assert_eq!(entries.len(), 2);
        // shorter-prefix-equal arrays order first
        assert_eq!(entries[0].0, common.as_slice());
        assert_eq!(entries[1].0, longer.as_slice());
    }

    fn tracker() -> CodonTracker {
        CodonTracker::new("1-9", b"ATGAAATAG").unwrap()
    }

    #[test]
    fn wild_type_report_is_tallied() {
        let mut tallies = Tallies::new(9);
        let mut tracker = tracker();
        let report = ReadReport::new(vec![Interval::new(0, 9)], vec![]);
        tallies.apply_report(&report, &mut tracker, 30, 0).unwrap();
        assert_eq!(tallies.n_wild_type_molecules, 1);
        assert_eq!(tallies.ref_coverage, vec![1; 9]);
        assert_eq!(tallies.coverage_size_histogram[9], 1);
        assert_eq!(tracker.codon_counts()[1][0x00], 1);
    }

    #[test]
    fn called_variant_report_is_tallied() {
        let mut tallies = Tallies::new(9);
        let mut tracker = tracker();
        let report = ReadReport::new(
            vec![Interval::new(0, 9)],
            vec![Snv::new(3, b'A', b'C', 40)],
        );
        tallies.apply_report(&report, &mut tracker, 30, 3).unwrap();
        assert_eq!(tallies.n_called_variant_molecules, 1);
        assert_eq!(tallies.variant_counts.len(), 1);
        assert_eq!(tracker.codon_counts()[1][0x10], 1);
    }

    #[test]
    fn low_quality_variant_is_not_counted() {
        let mut tallies = Tallies::new(9);
        let mut tracker = tracker();
        let report = ReadReport::new(
            vec![Interval::new(0, 9)],
            vec![Snv::new(3, b'A', b'C', 10)],
        );
        tallies.apply_report(&report, &mut tracker, 30, 0).unwrap();
        assert_eq!(tallies.n_low_quality_variant_molecules, 1);
        assert_eq!(tallies.variant_counts.len(), 0);
    }

    #[test]
    fn near_edge_variant_has_insufficient_flank() {
        let mut tallies = Tallies::new(9);
        let mut tracker = tracker();
        let report = ReadReport::new(
            vec![Interval::new(0, 9)],
            vec![Snv::new(1, b'T', b'C', 40)],
        );
        tallies.apply_report(&report, &mut tracker, 30, 3).unwrap();
        assert_eq!(tallies.n_insufficient_flank_molecules, 1);
    }

    #[test]
    fn inconsistent_pair_contributes_coverage_only() {
        let mut tallies = Tallies::new(9);
        let mut tracker = tracker();
        let report = ReadReport {
            ref_coverage: vec![Interval::new(0, 9)],
            snvs: None,
        };
        tallies.apply_report(&report, &mut tracker, 30, 0).unwrap();
        assert_eq!(tallies.n_inconsistent_pairs, 1);
        assert_eq!(tallies.ref_coverage[0], 1);
        assert_eq!(tallies.variant_counts.len(), 0);
    }
}
