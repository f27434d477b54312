use crate::error::Error;
use crate::Result;
use rust_htslib::bam;
use rust_htslib::bam::record::Cigar;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Sentinel base for the missing side of an indel call
pub const NO_CALL: u8 = b'-';
/// e.g., b'a' & UPPERCASE_MASK == b'A'
pub const UPPERCASE_MASK: u8 = 0xDF;

/// Half-open `[start, end)` interval of offsets on a single coordinate axis
/// (reference or read-local).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    /// The empty interval at the origin
    pub const EMPTY: Interval = Interval { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Interval { start, end }
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }
}

/// A single-base deviation from reference. Insertions carry [`NO_CALL`] as the
/// reference call, deletions carry it as the variant call.
///
/// Equality, ordering, and hashing depend only on `(ref_index, ref_call, variant_call)`;
/// the quality is auxiliary.
#[derive(Debug, Clone, Copy)]
pub struct Snv {
    pub ref_index: usize,
    pub ref_call: u8,
    pub variant_call: u8,
    pub qual: u8,
}

impl Snv {
    pub fn new(ref_index: usize, ref_call: u8, variant_call: u8, qual: u8) -> Self {
        Snv {
            ref_index,
            ref_call,
            variant_call,
            qual,
        }
    }
}

impl PartialEq for Snv {
    fn eq(&self, other: &Self) -> bool {
        self.ref_index == other.ref_index
            && self.ref_call == other.ref_call
            && self.variant_call == other.variant_call
    }
}

impl Eq for Snv {}

impl Hash for Snv {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ref_index.hash(state);
        self.ref_call.hash(state);
        self.variant_call.hash(state);
    }
}

impl Ord for Snv {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ref_index, self.ref_call, self.variant_call).cmp(&(
            other.ref_index,
            other.ref_call,
            other.variant_call,
        ))
    }
}

impl PartialOrd for Snv {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Snv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}>{}",
            self.ref_index + 1,
            self.ref_call as char,
            self.variant_call as char
        )
    }
}

/// The fields of one aligned read that the pipeline consumes. Mapping status, pairing,
/// cigar, calls, and qualities are copied out of the BAM record so the processing code
/// stays independent of the reader.
#[derive(Debug, Clone)]
pub struct ReadData {
    pub name: Vec<u8>,
    pub is_unmapped: bool,
    pub is_paired: bool,
    /// 0-based leftmost reference coordinate of the alignment
    pub start: i64,
    pub cigar: Vec<Cigar>,
    pub seq: Vec<u8>,
    pub quals: Vec<u8>,
}

impl ReadData {
    pub fn from_record(rec: &bam::Record) -> Self {
        ReadData {
            name: rec.qname().to_vec(),
            is_unmapped: rec.is_unmapped(),
            is_paired: rec.is_paired(),
            start: rec.pos() as i64,
            cigar: rec.cigar().iter().cloned().collect(),
            seq: rec.seq().as_bytes(),
            quals: rec.qual().to_vec(),
        }
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// The per-molecule result of diffing one read (or one reconciled pair) against the
/// reference: an ascending list of disjoint covered reference intervals, and the SNVs
/// within them. `snvs` is `None` for an inconsistent mate pair, which still contributes
/// coverage but no variant calls.
#[derive(Debug, Clone)]
pub struct ReadReport {
    pub ref_coverage: Vec<Interval>,
    pub snvs: Option<Vec<Snv>>,
}

impl ReadReport {
    pub fn new(ref_coverage: Vec<Interval>, snvs: Vec<Snv>) -> Self {
        ReadReport {
            ref_coverage,
            snvs: Some(snvs),
        }
    }

    /// Report of a read that produced no usable alignment (unmapped or fully trimmed)
    pub fn null_report() -> Self {
        ReadReport::new(Vec::new(), Vec::new())
    }
}

/// Outcome of reconciling the two mates of a molecule.
#[derive(Debug)]
pub enum Reconciled {
    /// One consistent molecule report (also covers the solo fallback when one mate had
    /// no coverage, and the inconsistent-pair case where `snvs` is absent)
    Combined(ReadReport),
    /// The mates cover disjoint reference ranges; apply both reports independently
    Disjoint(ReadReport, ReadReport),
}

enum AlignOp {
    Match,
    Insertion,
    Deletion,
    SoftClip,
}

fn classify(cigar: &Cigar) -> Result<(AlignOp, u32)> {
    match *cigar {
        Cigar::Match(len) | Cigar::Equal(len) | Cigar::Diff(len) => Ok((AlignOp::Match, len)),
        Cigar::Ins(len) => Ok((AlignOp::Insertion, len)),
        Cigar::Del(len) => Ok((AlignOp::Deletion, len)),
        Cigar::SoftClip(len) => Ok((AlignOp::SoftClip, len)),
        ref op => Err(Error::UnanticipatedCigarOperator(op.char())),
    }
}

/// Walks the read's cigar against the reference and reports covered reference intervals
/// plus base-level variations, restricted to the trimmed window `[trim.start, trim.end)`
/// of read-local indices.
///
/// Soft clips are treated as matches: a leading soft clip shifts the starting reference
/// index backward by the clip length so the clipped bases are compared in place.
pub fn analyze_alignment(read: &ReadData, trim: Interval, ref_seq: &[u8]) -> Result<ReadReport> {
    let mut ops = read.cigar.iter();
    let (mut op, mut op_count) = classify(ops.next().ok_or(Error::ExhaustedCigar)?)?;

    let mut ref_index = read.start;
    let mut read_index = 0;

    // pretend that soft-clips are matches
    if let AlignOp::SoftClip = op {
        ref_index -= i64::from(op_count);
    }

    let mut variations = Vec::new();
    let mut ref_coverage_list = Vec::new();
    let mut ref_coverage_begin: i64 = -1;
    let mut ref_coverage_end: i64 = -1;

    loop {
        if read_index >= trim.start && ref_index >= 0 {
            let ref_idx = ref_index as usize;
            if ref_coverage_begin == -1 {
                ref_coverage_begin = ref_index;
                ref_coverage_end = ref_index;
            }
            match op {
                AlignOp::Deletion => {
                    variations.push(Snv::new(
                        ref_idx,
                        ref_seq[ref_idx],
                        NO_CALL,
                        read.quals[read_index],
                    ));
                }
                AlignOp::Insertion => {
                    let call = read.seq[read_index] & UPPERCASE_MASK;
                    variations.push(Snv::new(ref_idx, NO_CALL, call, read.quals[read_index]));
                }
                AlignOp::Match | AlignOp::SoftClip => {
                    let call = read.seq[read_index] & UPPERCASE_MASK;
                    if call != ref_seq[ref_idx] {
                        variations.push(Snv::new(
                            ref_idx,
                            ref_seq[ref_idx],
                            call,
                            read.quals[read_index],
                        ));
                    }
                    if ref_index == ref_coverage_end {
                        ref_coverage_end += 1;
                    } else {
                        ref_coverage_list.push(Interval::new(
                            ref_coverage_begin as usize,
                            ref_coverage_end as usize,
                        ));
                        ref_coverage_begin = ref_index;
                        ref_coverage_end = ref_index + 1;
                    }
                }
            }
        }

        if !matches!(op, AlignOp::Deletion) {
            read_index += 1;
            if read_index == trim.end {
                break;
            }
        }

        if !matches!(op, AlignOp::Insertion) {
            ref_index += 1;
            if ref_index == ref_seq.len() as i64 {
                break;
            }
        }

        op_count -= 1;
        if op_count == 0 {
            let next = classify(ops.next().ok_or(Error::ExhaustedCigar)?)?;
            op = next.0;
            op_count = next.1;
        }
    }

    if ref_coverage_begin < ref_coverage_end {
        ref_coverage_list.push(Interval::new(
            ref_coverage_begin as usize,
            ref_coverage_end as usize,
        ));
    }

    Ok(ReadReport::new(ref_coverage_list, variations))
}

/// Merges the reports of a molecule's two mates.
///
/// Disjoint outer coverage bounds yield [`Reconciled::Disjoint`]; an overlap-zone SNV
/// present in only one mate (or differing between them) yields a combined report with
/// an absent variation list, the inconsistent-pair outcome.
pub fn combine_reports(report1: ReadReport, report2: ReadReport) -> Reconciled {
    if report1.ref_coverage.is_empty() {
        return Reconciled::Combined(report2);
    } else if report2.ref_coverage.is_empty() {
        return Reconciled::Combined(report1);
    }

    let coverage1 = &report1.ref_coverage;
    let coverage2 = &report2.ref_coverage;
    let overlap_start = coverage1[0].start.max(coverage2[0].start);
    let overlap_end = coverage1[coverage1.len() - 1]
        .end
        .min(coverage2[coverage2.len() - 1].end);
    if overlap_end < overlap_start {
        // disjoint reports can't be combined -- caller will apply them separately
        return Reconciled::Disjoint(report1, report2);
    }

    let combined_coverage = combine_intervals(coverage1, coverage2);
    let combined_snvs = combine_snvs(
        report1.snvs.as_deref().unwrap_or(&[]),
        report2.snvs.as_deref().unwrap_or(&[]),
        overlap_start,
        overlap_end,
    );
    Reconciled::Combined(ReadReport {
        ref_coverage: combined_coverage,
        snvs: combined_snvs,
    })
}

/// Standard sorted-interval-list union; touching or overlapping intervals coalesce.
fn combine_intervals(coverage1: &[Interval], coverage2: &[Interval]) -> Vec<Interval> {
    let mut combined = Vec::new();
    let mut iter1 = coverage1.iter();
    let mut iter2 = coverage2.iter();
    let mut interval1 = iter1.next();
    let mut interval2 = iter2.next();

    let mut cur = match (interval1, interval2) {
        (Some(&iv1), Some(&iv2)) if iv1.start < iv2.start => {
            interval1 = iter1.next();
            iv1
        }
        (_, Some(&iv2)) => {
            interval2 = iter2.next();
            iv2
        }
        (Some(&iv1), None) => {
            interval1 = iter1.next();
            iv1
        }
        (None, None) => return combined,
    };

    while interval1.is_some() || interval2.is_some() {
        let test = match (interval1, interval2) {
            (None, Some(&iv2)) => {
                interval2 = iter2.next();
                iv2
            }
            (Some(&iv1), None) => {
                interval1 = iter1.next();
                iv1
            }
            (Some(&iv1), Some(&iv2)) => {
                if iv1.start < iv2.start {
                    interval1 = iter1.next();
                    iv1
                } else {
                    interval2 = iter2.next();
                    iv2
                }
            }
            (None, None) => break,
        };
        if cur.end < test.start {
            combined.push(cur);
            cur = test;
        } else {
            cur = Interval::new(cur.start, cur.end.max(test.end));
        }
    }
    combined.push(cur);

    combined
}

/// Ordered two-way merge of the mates' SNV lists. Returns `None` (inconsistent pair)
/// when an SNV inside the overlap zone appears in exactly one list or differs between
/// them; identical SNVs keep the higher-quality copy.
fn combine_snvs(
    snvs1: &[Snv],
    snvs2: &[Snv],
    overlap_start: usize,
    overlap_end: usize,
) -> Option<Vec<Snv>> {
    let in_overlap = |ref_index: usize| ref_index >= overlap_start && ref_index < overlap_end;
    let mut combined = Vec::new();
    let mut iter1 = snvs1.iter();
    let mut iter2 = snvs2.iter();
    let mut snv1 = iter1.next();
    let mut snv2 = iter2.next();
    while snv1.is_some() || snv2.is_some() {
        let next = match (snv1, snv2) {
            (None, Some(&s2)) => {
                snv2 = iter2.next();
                if in_overlap(s2.ref_index) {
                    return None;
                }
                s2
            }
            (Some(&s1), None) => {
                snv1 = iter1.next();
                if in_overlap(s1.ref_index) {
                    return None;
                }
                s1
            }
            (Some(&s1), Some(&s2)) => {
                if s1.ref_index < s2.ref_index {
                    snv1 = iter1.next();
                    if in_overlap(s1.ref_index) {
                        return None;
                    }
                    s1
                } else if s2.ref_index < s1.ref_index {
                    snv2 = iter2.next();
                    if in_overlap(s2.ref_index) {
                        return None;
                    }
                    s2
                } else if s1 != s2 {
                    return None;
                } else {
                    snv1 = iter1.next();
                    snv2 = iter2.next();
                    if s1.qual > s2.qual {
                        s1
                    } else {
                        s2
                    }
                }
            }
            (None, None) => break,
        };
        combined.push(next);
    }
    Some(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: &[u8] = b"ATGAAATAG";

    fn read(start: i64, cigar: Vec<Cigar>, seq: &[u8], qual: u8) -> ReadData {
        ReadData {
            name: b"read".to_vec(),
            is_unmapped: false,
            is_paired: false,
            start,
            cigar,
            seq: seq.to_vec(),
            quals: vec![qual; seq.len()],
        }
    }

    fn full_trim(read: &ReadData) -> Interval {
        Interval::new(0, read.seq.len())
    }

    #[test]
    fn perfect_match_has_no_variations() {
        let read = read(0, vec![Cigar::Match(9)], REF, 40);
        let report = analyze_alignment(&read, full_trim(&read), REF).unwrap();
        assert_eq!(report.ref_coverage, vec![Interval::new(0, 9)]);
        assert_eq!(report.snvs, Some(vec![]));
    }

    #[test]
    fn mismatch_is_reported() {
        let read = read(0, vec![Cigar::Match(9)], b"ATGCAATAG", 40);
        let report = analyze_alignment(&read, full_trim(&read), REF).unwrap();
        assert_eq!(report.snvs, Some(vec![Snv::new(3, b'A', b'C', 40)]));
        assert_eq!(report.ref_coverage, vec![Interval::new(0, 9)]);
    }

    #[test]
    fn insertion_reports_no_call_reference() {
        // GG inserted after the third base; coverage stays contiguous
        let read = read(
            0,
            vec![Cigar::Match(3), Cigar::Ins(2), Cigar::Match(6)],
            b"ATGGGAAATAG",
            40,
        );
        let report = analyze_alignment(&read, full_trim(&read), REF).unwrap();
        assert_eq!(
            report.snvs,
            Some(vec![
                Snv::new(3, NO_CALL, b'G', 40),
                Snv::new(3, NO_CALL, b'G', 40),
            ])
        );
        assert_eq!(report.ref_coverage, vec![Interval::new(0, 9)]);
    }

    #[test]
    fn deletion_reports_no_call_variant_and_splits_coverage() {
        let read = read(
            0,
            vec![Cigar::Match(3), Cigar::Del(3), Cigar::Match(3)],
            b"ATGTAG",
            40,
        );
        let report = analyze_alignment(&read, full_trim(&read), REF).unwrap();
        assert_eq!(
            report.snvs,
            Some(vec![
                Snv::new(3, b'A', NO_CALL, 40),
                Snv::new(4, b'A', NO_CALL, 40),
                Snv::new(5, b'A', NO_CALL, 40),
            ])
        );
        assert_eq!(
            report.ref_coverage,
            vec![Interval::new(0, 3), Interval::new(6, 9)]
        );
    }

    #[test]
    fn leading_soft_clip_aligns_in_place() {
        // alignment starts at ref 2 but the 2 clipped bases match ref 0..2
        let read = read(2, vec![Cigar::SoftClip(2), Cigar::Match(7)], REF, 40);
        let report = analyze_alignment(&read, full_trim(&read), REF).unwrap();
        assert_eq!(report.ref_coverage, vec![Interval::new(0, 9)]);
        assert_eq!(report.snvs, Some(vec![]));
    }

    #[test]
    fn trim_window_restricts_recording() {
        let read = read(0, vec![Cigar::Match(9)], b"CTGAAATAC", 40);
        let report = analyze_alignment(&read, Interval::new(1, 8), REF).unwrap();
        // the mismatches at read indices 0 and 8 fall outside the window
        assert_eq!(report.snvs, Some(vec![]));
        assert_eq!(report.ref_coverage, vec![Interval::new(1, 8)]);
    }

    #[test]
    fn unanticipated_operator_is_fatal() {
        let read = read(
            0,
            vec![Cigar::Match(3), Cigar::RefSkip(3), Cigar::Match(3)],
            b"ATGTAG",
            40,
        );
        let result = analyze_alignment(&read, Interval::new(0, 6), REF);
        assert!(matches!(
            result,
            Err(Error::UnanticipatedCigarOperator('N'))
        ));
    }

    #[test]
    fn exhausted_cigar_is_fatal() {
        let read = read(0, vec![Cigar::Match(3)], b"ATGAAA", 40);
        let result = analyze_alignment(&read, Interval::new(0, 6), REF);
        assert!(matches!(result, Err(Error::ExhaustedCigar)));
    }

    fn report(intervals: &[(usize, usize)], snvs: Vec<Snv>) -> ReadReport {
        ReadReport::new(
            intervals
                .iter()
                .map(|&(s, e)| Interval::new(s, e))
                .collect(),
            snvs,
        )
    }

    #[test]
    fn disjoint_mates_are_applied_separately() {
        let report1 = report(&[(0, 10)], vec![]);
        let report2 = report(&[(20, 30)], vec![]);
        assert!(matches!(
            combine_reports(report1, report2),
            Reconciled::Disjoint(_, _)
        ));
    }

    #[test]
    fn empty_coverage_falls_back_to_other_mate() {
        let report1 = ReadReport::null_report();
        let report2 = report(&[(20, 30)], vec![Snv::new(25, b'A', b'C', 40)]);
        match combine_reports(report1, report2) {
            Reconciled::Combined(combined) => {
                assert_eq!(combined.ref_coverage, vec![Interval::new(20, 30)]);
                assert_eq!(combined.snvs.map(|s| s.len()), Some(1));
            }
            Reconciled::Disjoint(..) => panic!("expected solo fallback"),
        }
    }

    #[test]
    fn overlapping_mates_merge_coverage_and_snvs() {
        let snv = Snv::new(12, b'A', b'C', 30);
        let mut better = snv;
        better.qual = 42;
        let report1 = report(&[(0, 15)], vec![snv]);
        let report2 = report(&[(10, 25)], vec![better]);
        match combine_reports(report1, report2) {
            Reconciled::Combined(combined) => {
                assert_eq!(combined.ref_coverage, vec![Interval::new(0, 25)]);
                let snvs = combined.snvs.unwrap();
                assert_eq!(snvs, vec![snv]);
                assert_eq!(snvs[0].qual, 42);
            }
            Reconciled::Disjoint(..) => panic!("expected merged report"),
        }
    }

    #[test]
    fn lone_snv_in_overlap_is_inconsistent() {
        let report1 = report(&[(0, 15)], vec![Snv::new(12, b'A', b'C', 40)]);
        let report2 = report(&[(10, 25)], vec![]);
        match combine_reports(report1, report2) {
            Reconciled::Combined(combined) => {
                assert_eq!(combined.ref_coverage, vec![Interval::new(0, 25)]);
                assert!(combined.snvs.is_none());
            }
            Reconciled::Disjoint(..) => panic!("expected inconsistent-pair outcome"),
        }
    }

    #[test]
    fn conflicting_snvs_in_overlap_are_inconsistent() {
        let report1 = report(&[(0, 15)], vec![Snv::new(12, b'A', b'C', 40)]);
        let report2 = report(&[(10, 25)], vec![Snv::new(12, b'A', b'G', 40)]);
        match combine_reports(report1, report2) {
            Reconciled::Combined(combined) => assert!(combined.snvs.is_none()),
            Reconciled::Disjoint(..) => panic!("expected inconsistent-pair outcome"),
        }
    }

    #[test]
    fn snvs_outside_overlap_are_kept() {
        let report1 = report(&[(0, 15)], vec![Snv::new(2, b'T', b'G', 40)]);
        let report2 = report(&[(10, 25)], vec![Snv::new(20, b'A', b'C', 40)]);
        match combine_reports(report1, report2) {
            Reconciled::Combined(combined) => {
                assert_eq!(
                    combined.snvs,
                    Some(vec![Snv::new(2, b'T', b'G', 40), Snv::new(20, b'A', b'C', 40)])
                );
            }
            Reconciled::Disjoint(..) => panic!("expected merged report"),
        }
    }

    #[test]
    fn touching_intervals_coalesce() {
        let report1 = report(&[(0, 5), (7, 10)], vec![]);
        let report2 = report(&[(5, 7)], vec![]);
        match combine_reports(report1, report2) {
            Reconciled::Combined(combined) => {
                assert_eq!(combined.ref_coverage, vec![Interval::new(0, 10)]);
            }
            Reconciled::Disjoint(..) => panic!("expected merged report"),
        }
    }
}
