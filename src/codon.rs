use crate::alignment::{Interval, Snv, NO_CALL};
use crate::error::Error;
use crate::Result;
use log::warn;

/// Number of distinct 2-bit-packed codon values
pub const N_REGULAR_CODONS: usize = 64;
/// Count-table column for frame-preserving indels touching a codon
pub const FRAME_PRESERVING_INDEL_INDEX: usize = 64;
/// Count-table column for frame-shifting indels touching a codon
pub const FRAME_SHIFTING_INDEL_INDEX: usize = 65;
/// 64 codon values plus the two indel columns
pub const CODON_COUNT_ROW_SIZE: usize = 66;

const START_CODON: usize = 0x0E; // ATG
const SENTINEL: usize = usize::MAX;

/// Base triplet for each packed codon value
pub const LABEL_FOR_CODON_VALUE: [&str; N_REGULAR_CODONS] = [
    "AAA", "AAC", "AAG", "AAT", "ACA", "ACC", "ACG", "ACT", "AGA", "AGC", "AGG", "AGT", "ATA",
    "ATC", "ATG", "ATT", "CAA", "CAC", "CAG", "CAT", "CCA", "CCC", "CCG", "CCT", "CGA", "CGC",
    "CGG", "CGT", "CTA", "CTC", "CTG", "CTT", "GAA", "GAC", "GAG", "GAT", "GCA", "GCC", "GCG",
    "GCT", "GGA", "GGC", "GGG", "GGT", "GTA", "GTC", "GTG", "GTT", "TAA", "TAC", "TAG", "TAT",
    "TCA", "TCC", "TCG", "TCT", "TGA", "TGC", "TGG", "TGT", "TTA", "TTC", "TTG", "TTT",
];

/// Checks if the packed codon value is one of TAA, TAG, or TGA
pub fn is_stop(codon_value: usize) -> bool {
    const STOP_OCH: usize = 0x30;
    const STOP_AMB: usize = 0x32;
    const STOP_OPA: usize = 0x38;
    codon_value == STOP_OCH || codon_value == STOP_AMB || codon_value == STOP_OPA
}

fn base_value(base: u8) -> usize {
    match base {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        _ => unreachable!("non-ACGT base reached codon encoding"),
    }
}

/// One codon-level deviation from the reference ORF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodonVariation {
    /// An indel whose net length is not a multiple of 3.
    ///
    /// Consumed by the counting stage (frame-shifting column priority) but never
    /// produced by [`CodonTracker::encode_snvs_as_codons`]; a known gap inherited
    /// from the upstream analysis.
    Frameshift { codon_id: usize },
    /// A whole inserted codon
    Insertion { codon_id: usize, codon_value: usize },
    /// A whole deleted codon
    Deletion { codon_id: usize },
    /// A codon whose value differs from the reference
    Modification { codon_id: usize, codon_value: usize },
}

impl CodonVariation {
    pub fn codon_id(&self) -> usize {
        match *self {
            CodonVariation::Frameshift { codon_id }
            | CodonVariation::Insertion { codon_id, .. }
            | CodonVariation::Deletion { codon_id }
            | CodonVariation::Modification { codon_id, .. } => codon_id,
        }
    }

    pub fn is_frameshift(&self) -> bool {
        matches!(self, CodonVariation::Frameshift { .. })
    }
}

/// The ORF/codon model: exon intervals, the packed reference codon values, and the
/// per-codon observation count table.
#[derive(Debug)]
pub struct CodonTracker {
    ref_seq: Vec<u8>,
    exon_list: Vec<Interval>,
    codon_counts: Vec<[u64; CODON_COUNT_ROW_SIZE]>,
    ref_codon_values: Vec<usize>,
}

impl CodonTracker {
    /// Parses the 1-based, inclusive ORF coordinate pairs and builds the reference
    /// codon table. Fails on malformed coordinates, an ORF length not divisible by 3,
    /// or an internal stop codon; warns when the ORF does not start with ATG or does
    /// not end with a stop.
    pub fn new(orf_coords: &str, ref_seq: &[u8]) -> Result<Self> {
        let exon_list = parse_exons(orf_coords)?;
        if let Some(exon) = exon_list
            .iter()
            .find(|exon| exon.start != SENTINEL && exon.end > ref_seq.len())
        {
            return Err(Error::BadOrfCoords(format!(
                "exon {}-{} extends past the end of the reference",
                exon.start + 1,
                exon.end
            )));
        }

        let n_codons = exon_list.iter().map(Interval::size).sum::<usize>() / 3;
        let codon_counts = vec![[0u64; CODON_COUNT_ROW_SIZE]; n_codons];
        let ref_codon_values = parse_reference_into_codons(ref_seq, &exon_list)?;

        Ok(CodonTracker {
            ref_seq: ref_seq.to_vec(),
            exon_list,
            codon_counts,
            ref_codon_values,
        })
    }

    pub fn ref_codon_values(&self) -> &[usize] {
        &self.ref_codon_values
    }

    pub fn codon_counts(&self) -> &[[u64; CODON_COUNT_ROW_SIZE]] {
        &self.codon_counts
    }

    /// Maps an ascending SNV list onto codon-level variations.
    ///
    /// Walks codon-by-codon from the first exonic SNV, rebuilding the running codon
    /// value base-by-base. Deletions lag and insertions lead the reference by one
    /// position each; three consecutive of either complete a whole deleted or inserted
    /// codon. Encoding ends early at a stop codon or at either end of the ORF.
    pub fn encode_snvs_as_codons(&self, snvs: &[Snv]) -> Result<Vec<CodonVariation>> {
        let mut variations = Vec::new();
        let mut snv_iter = snvs.iter();
        let mut snv = self.next_exonic_snv(&mut snv_iter);

        while let Some(cur_snv) = snv {
            let mut ref_index = cur_snv.ref_index;

            let mut exon_idx = 0;
            while self.exon_list[exon_idx].end < ref_index {
                exon_idx += 1;
            }
            if self.exon_list[exon_idx].start > ref_index {
                return Err(Error::Internal(
                    "can't find current exon, even though ref_index should be exonic".into(),
                ));
            }

            let mut codon_id = self.exonic_base_count(ref_index);
            let mut codon_phase = codon_id % 3;
            codon_id /= 3;

            let mut codon_value = self.ref_codon_values[codon_id];
            if codon_phase == 0 {
                codon_value = 0;
            } else if codon_phase == 1 {
                codon_value >>= 4;
            } else {
                codon_value >>= 2;
            }

            let mut lead_lag = 0i32;
            loop {
                let mut codon_value_altered = false;
                let mut bump_ref_index = false;
                match snv {
                    Some(s) if s.ref_index == ref_index => {
                        if s.variant_call == NO_CALL {
                            lead_lag -= 1;
                            if lead_lag == -3 {
                                variations.push(CodonVariation::Deletion { codon_id });
                                codon_id += 1;
                                if codon_id == self.ref_codon_values.len() {
                                    return Ok(variations);
                                }
                                lead_lag = 0;
                            }
                            bump_ref_index = true;
                        } else if s.ref_call == NO_CALL {
                            lead_lag += 1;
                            codon_value = (codon_value << 2) | base_value(s.variant_call);
                            codon_value_altered = true;
                        } else {
                            codon_value = (codon_value << 2) | base_value(s.variant_call);
                            codon_value_altered = true;
                            bump_ref_index = true;
                        }
                        snv = self.next_exonic_snv(&mut snv_iter);
                    }
                    _ => {
                        codon_value = (codon_value << 2) | base_value(self.ref_seq[ref_index]);
                        codon_value_altered = true;
                        bump_ref_index = true;
                    }
                }

                if bump_ref_index {
                    ref_index += 1;
                    if ref_index == self.exon_list[exon_idx].end {
                        exon_idx += 1;
                        let next_exon = self.exon_list[exon_idx];
                        if next_exon.start != SENTINEL {
                            ref_index = next_exon.start;
                        }
                    }
                    if ref_index == self.ref_seq.len() {
                        return Ok(variations);
                    }
                }

                if codon_value_altered {
                    codon_phase += 1;
                    if codon_phase == 3 {
                        let inserted = lead_lag == 3;
                        if inserted {
                            variations.push(CodonVariation::Insertion {
                                codon_id,
                                codon_value,
                            });
                            lead_lag = 0;
                        } else if codon_value != self.ref_codon_values[codon_id] {
                            variations.push(CodonVariation::Modification {
                                codon_id,
                                codon_value,
                            });
                        }
                        if is_stop(codon_value) {
                            return Ok(variations);
                        }
                        // an inserted codon consumes no reference codon
                        if !inserted {
                            codon_id += 1;
                            if codon_id == self.ref_codon_values.len() {
                                return Ok(variations);
                            }
                        }
                        codon_phase = 0;
                        codon_value = 0;
                    }
                }

                if lead_lag == 0 && codon_phase == 0 {
                    break;
                }
            }
        }

        Ok(variations)
    }

    /// Bumps the reference-value column of every codon wholly contained in the
    /// coverage interval.
    pub fn report_wild_codon_counts(&mut self, ref_coverage: Interval) {
        let starting_codon_id = (self.exonic_base_count(ref_coverage.start) + 2) / 3;
        let ending_codon_id = self.exonic_base_count(ref_coverage.end) / 3;
        for codon_id in starting_codon_id..ending_codon_id {
            self.codon_counts[codon_id][self.ref_codon_values[codon_id]] += 1;
        }
    }

    /// Bumps, for every codon wholly contained in the coverage interval, either its
    /// observed-value column or one of the two indel columns (at most one per codon;
    /// frame-shifting takes priority over frame-preserving).
    pub fn report_variant_codon_counts(
        &mut self,
        ref_coverage: Interval,
        variant_codons: &[CodonVariation],
    ) {
        let starting_codon_id = (self.exonic_base_count(ref_coverage.start) + 2) / 3;
        let ending_codon_id = self.exonic_base_count(ref_coverage.end) / 3;
        let mut variant_iter = variant_codons.iter();
        let mut variation = variant_iter.next();
        for codon_id in starting_codon_id..ending_codon_id {
            while let Some(v) = variation {
                if v.codon_id() < codon_id {
                    variation = variant_iter.next();
                } else {
                    break;
                }
            }
            match variation {
                Some(v) if v.codon_id() == codon_id => {
                    let mut indel_column = None;
                    while let Some(v) = variation {
                        if v.codon_id() != codon_id {
                            break;
                        }
                        match *v {
                            CodonVariation::Frameshift { .. } => {
                                indel_column = Some(FRAME_SHIFTING_INDEL_INDEX);
                            }
                            CodonVariation::Deletion { .. }
                            | CodonVariation::Insertion { .. } => {
                                if indel_column.is_none() {
                                    indel_column = Some(FRAME_PRESERVING_INDEL_INDEX);
                                }
                            }
                            CodonVariation::Modification { codon_value, .. } => {
                                self.codon_counts[codon_id][codon_value] += 1;
                            }
                        }
                        variation = variant_iter.next();
                    }
                    if let Some(column) = indel_column {
                        self.codon_counts[codon_id][column] += 1;
                    }
                }
                _ => {
                    self.codon_counts[codon_id][self.ref_codon_values[codon_id]] += 1;
                }
            }
        }
    }

    fn next_exonic_snv(&self, iter: &mut std::slice::Iter<'_, Snv>) -> Option<Snv> {
        iter.find(|snv| self.is_exonic(snv.ref_index)).copied()
    }

    fn is_exonic(&self, ref_index: usize) -> bool {
        for exon in &self.exon_list {
            if exon.start > ref_index {
                return false;
            }
            if exon.end > ref_index {
                return true;
            }
        }
        false
    }

    /// Number of exonic bases preceding the reference position
    fn exonic_base_count(&self, ref_index: usize) -> usize {
        let mut base_count = 0;
        for exon in &self.exon_list {
            if ref_index >= exon.end {
                base_count += exon.size();
            } else {
                if ref_index > exon.start {
                    base_count += ref_index - exon.start;
                }
                break;
            }
        }
        base_count
    }
}

/// Converts the 1-based, inclusive ORF coordinate pairs into 0-based, half-open exon
/// intervals, validated for sortedness and whole-codon total length, with a terminal
/// sentinel interval.
fn parse_exons(orf_coords: &str) -> Result<Vec<Interval>> {
    let mut exon_list = Vec::new();
    for coord_pair in orf_coords.split(',') {
        let coords: Vec<&str> = coord_pair.split('-').collect();
        if coords.len() != 2 {
            return Err(Error::BadOrfCoords(format!(
                "can't interpret ORF as a list of coordinate pairs: {}",
                orf_coords
            )));
        }
        let start: usize = coords[0].parse().map_err(|_| {
            Error::BadOrfCoords(format!("can't interpret ORF coords as integers: {}", orf_coords))
        })?;
        if start < 1 {
            return Err(Error::BadOrfCoords(
                "coordinates of ORF are 1-based".to_string(),
            ));
        }
        let end: usize = coords[1].parse().map_err(|_| {
            Error::BadOrfCoords(format!("can't interpret ORF coords as integers: {}", orf_coords))
        })?;
        if end < start {
            return Err(Error::BadOrfCoords(format!(
                "found ORF end coordinate less than start: {}",
                orf_coords
            )));
        }
        // convert 1-based, inclusive intervals to 0-based, half-open
        exon_list.push(Interval::new(start - 1, end));
    }
    for idx in 1..exon_list.len() {
        if exon_list[idx - 1].end >= exon_list[idx].start {
            return Err(Error::BadOrfCoords(format!(
                "ORF coordinates are not sorted: {}",
                orf_coords
            )));
        }
    }

    let orf_len: usize = exon_list.iter().map(Interval::size).sum();
    if orf_len % 3 != 0 {
        return Err(Error::OrfLength);
    }

    // 0-length sentinel at the end of the list
    exon_list.push(Interval {
        start: SENTINEL,
        end: SENTINEL,
    });

    Ok(exon_list)
}

/// Packs the exonic reference bases into codon values, in exon order (a codon may span
/// an exon/intron junction).
fn parse_reference_into_codons(ref_seq: &[u8], exon_list: &[Interval]) -> Result<Vec<usize>> {
    let n_codons = exon_list.iter().map(Interval::size).sum::<usize>() / 3;
    let mut ref_codon_values = vec![0; n_codons];
    let mut codon_id = 0;
    let mut codon_phase = 0;
    let mut codon_value = 0;
    for exon in exon_list.iter().filter(|exon| exon.start != SENTINEL) {
        for ref_index in exon.start..exon.end {
            codon_value = (codon_value << 2) | base_value(ref_seq[ref_index]);
            codon_phase += 1;
            if codon_phase == 3 {
                if is_stop(codon_value) && codon_id != n_codons - 1 {
                    return Err(Error::UpstreamStop(ref_index + 1));
                }
                ref_codon_values[codon_id] = codon_value;
                codon_value = 0;
                codon_phase = 0;
                codon_id += 1;
            }
        }
    }

    if ref_codon_values[0] != START_CODON {
        warn!("Your ORF does not start with the expected ATG codon.");
    }
    if !is_stop(ref_codon_values[n_codons - 1]) {
        warn!("Your ORF does not end with the expected stop codon.");
    }

    Ok(ref_codon_values)
}

#[cfg(test)]
mod tests {
    use super::*;

    // codons ATG, AAA, TAG
    const REF: &[u8] = b"ATGAAATAG";

    fn tracker() -> CodonTracker {
        CodonTracker::new("1-9", REF).unwrap()
    }

    #[test]
    fn reference_codon_values() {
        let tracker = tracker();
        assert_eq!(tracker.ref_codon_values(), &[0x0E, 0x00, 0x32]);
    }

    #[test]
    fn malformed_orf_is_rejected() {
        assert!(matches!(
            CodonTracker::new("1-9,abc", REF),
            Err(Error::BadOrfCoords(_))
        ));
        assert!(matches!(
            CodonTracker::new("5", REF),
            Err(Error::BadOrfCoords(_))
        ));
        assert!(matches!(
            CodonTracker::new("4-9,1-3", REF),
            Err(Error::BadOrfCoords(_))
        ));
    }

    #[test]
    fn orf_length_must_be_whole_codons() {
        assert!(matches!(
            CodonTracker::new("1-8", REF),
            Err(Error::OrfLength)
        ));
    }

    #[test]
    fn upstream_stop_is_fatal() {
        // TAA at codon 0 of a 2-codon ORF
        assert!(matches!(
            CodonTracker::new("1-6", b"TAAAAATAG"),
            Err(Error::UpstreamStop(3))
        ));
    }

    #[test]
    fn exonic_base_count_skips_introns() {
        let tracker = CodonTracker::new("1-3,7-9", b"ATGCCCTAGCCC").unwrap();
        assert_eq!(tracker.ref_codon_values(), &[0x0E, 0x32]);
        assert_eq!(tracker.exonic_base_count(0), 0);
        assert_eq!(tracker.exonic_base_count(3), 3);
        assert_eq!(tracker.exonic_base_count(6), 3);
        assert_eq!(tracker.exonic_base_count(8), 5);
        assert!(!tracker.is_exonic(4));
        assert!(tracker.is_exonic(7));
    }

    #[test]
    fn wild_type_read_encodes_to_nothing() {
        let mut tracker = tracker();
        let variations = tracker.encode_snvs_as_codons(&[]).unwrap();
        assert!(variations.is_empty());
        tracker.report_wild_codon_counts(Interval::new(0, 9));
        let counts = tracker.codon_counts();
        assert_eq!(counts[0][0x0E], 1);
        assert_eq!(counts[1][0x00], 1);
        assert_eq!(counts[2][0x32], 1);
        assert_eq!(counts.iter().flat_map(|row| row.iter()).sum::<u64>(), 3);
    }

    #[test]
    fn substitution_encodes_to_modification() {
        let mut tracker = tracker();
        let snvs = vec![Snv::new(3, b'A', b'C', 40)];
        let variations = tracker.encode_snvs_as_codons(&snvs).unwrap();
        // codon 1 becomes CAA
        assert_eq!(
            variations,
            vec![CodonVariation::Modification {
                codon_id: 1,
                codon_value: 0x10,
            }]
        );
        tracker.report_variant_codon_counts(Interval::new(0, 9), &variations);
        let counts = tracker.codon_counts();
        assert_eq!(counts[1][0x10], 1);
        assert_eq!(counts[1][0x00], 0);
        // the untouched codon 0 still gets its reference column bumped
        assert_eq!(counts[0][0x0E], 1);
    }

    #[test]
    fn whole_codon_deletion() {
        let tracker = tracker();
        let snvs = vec![
            Snv::new(3, b'A', NO_CALL, 40),
            Snv::new(4, b'A', NO_CALL, 40),
            Snv::new(5, b'A', NO_CALL, 40),
        ];
        let variations = tracker.encode_snvs_as_codons(&snvs).unwrap();
        assert_eq!(variations, vec![CodonVariation::Deletion { codon_id: 1 }]);
    }

    #[test]
    fn whole_codon_insertion() {
        let tracker = tracker();
        let snvs = vec![
            Snv::new(3, NO_CALL, b'G', 40),
            Snv::new(3, NO_CALL, b'G', 40),
            Snv::new(3, NO_CALL, b'G', 40),
        ];
        let variations = tracker.encode_snvs_as_codons(&snvs).unwrap();
        assert_eq!(
            variations,
            vec![CodonVariation::Insertion {
                codon_id: 1,
                codon_value: 0x2A,
            }]
        );
    }

    #[test]
    fn stop_codon_ends_encoding_early() {
        // ATG AAA CAA TAG; change codon 1 to TAA
        let tracker = CodonTracker::new("1-12", b"ATGAAACAATAG").unwrap();
        let snvs = vec![
            Snv::new(3, b'A', b'T', 40),
            Snv::new(6, b'C', b'G', 40),
        ];
        let variations = tracker.encode_snvs_as_codons(&snvs).unwrap();
        // encoding stops at the introduced TAA; codon 2 is never reached
        assert_eq!(
            variations,
            vec![CodonVariation::Modification {
                codon_id: 1,
                codon_value: 0x30,
            }]
        );
    }

    #[test]
    fn indel_goes_to_frame_preserving_column() {
        let mut tracker = tracker();
        let variations = vec![CodonVariation::Deletion { codon_id: 1 }];
        tracker.report_variant_codon_counts(Interval::new(0, 9), &variations);
        let counts = tracker.codon_counts();
        assert_eq!(counts[1][FRAME_PRESERVING_INDEL_INDEX], 1);
        assert_eq!(counts[1][FRAME_SHIFTING_INDEL_INDEX], 0);
    }

    #[test]
    fn frame_shifting_column_takes_priority() {
        let mut tracker = tracker();
        let variations = vec![
            CodonVariation::Deletion { codon_id: 1 },
            CodonVariation::Frameshift { codon_id: 1 },
        ];
        tracker.report_variant_codon_counts(Interval::new(0, 9), &variations);
        let counts = tracker.codon_counts();
        assert_eq!(counts[1][FRAME_SHIFTING_INDEL_INDEX], 1);
        assert_eq!(counts[1][FRAME_PRESERVING_INDEL_INDEX], 0);
    }

    #[test]
    fn partially_covered_codons_are_not_counted() {
        let mut tracker = tracker();
        tracker.report_wild_codon_counts(Interval::new(1, 8));
        let counts = tracker.codon_counts();
        assert_eq!(counts[0][0x0E], 0);
        assert_eq!(counts[1][0x00], 1);
        assert_eq!(counts[2][0x32], 0);
    }
}
