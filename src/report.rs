use crate::codon::{
    self, CodonTracker, CodonVariation, CODON_COUNT_ROW_SIZE, LABEL_FOR_CODON_VALUE,
    N_REGULAR_CODONS,
};
use crate::alignment::Snv;
use crate::counts::{SnvCollectionCount, Tallies};
use crate::Result;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Values shared by the output writers.
pub struct ReportConfig<'a> {
    pub output_file_prefix: &'a str,
    pub codon_translation: &'a [u8],
    pub min_length: usize,
    pub min_flanking_length: usize,
    pub min_variant_observations: u64,
}

/// Writes the eight delimited-text output artifacts.
pub fn write_all(config: &ReportConfig<'_>, tallies: &Tallies, tracker: &CodonTracker) -> Result<()> {
    let entries = tallies
        .variant_counts
        .sorted_entries(config.min_variant_observations);
    write_variant_counts(config, tallies, tracker, &entries)?;
    write_ref_coverage(config, tallies)?;
    write_codon_counts(config, tracker)?;
    write_codon_fractions(config, tracker)?;
    write_aa_counts(config, tracker)?;
    write_aa_fractions(config, tracker)?;
    write_read_counts(config, tallies)?;
    write_coverage_size_histogram(config, tallies)?;
    Ok(())
}

fn create(prefix: &str, suffix: &str) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(format!(
        "{}.{}",
        prefix, suffix
    ))?))
}

fn write_variant_counts(
    config: &ReportConfig<'_>,
    tallies: &Tallies,
    tracker: &CodonTracker,
    entries: &[(&[Snv], &SnvCollectionCount)],
) -> Result<()> {
    let mut writer = create(config.output_file_prefix, "variantCounts")?;
    let min_flank = config.min_flanking_length as i64;
    for (snvs, entry) in entries {
        let span_start = snvs[0].ref_index as i64 - min_flank;
        let span_end = snvs[snvs.len() - 1].ref_index as i64 + min_flank;
        let spanners = tallies.interval_counter.count_spanners(span_start, span_end);
        let total_qual: u64 = snvs.iter().map(|snv| u64::from(snv.qual)).sum();
        write!(
            writer,
            "{}\t{}\t{}\t{:.1}\t{}",
            entry.count,
            spanners,
            total_qual,
            entry.mean_ref_coverage(),
            snvs.len()
        )?;
        let mut sep = "\t";
        for snv in *snvs {
            write!(writer, "{}{}", sep, snv)?;
            sep = ", ";
        }
        describe_variants_as_codons(&mut writer, snvs, tracker, config.codon_translation)?;
        writeln!(writer)?;
    }
    Ok(())
}

/// Appends the codon-level and amino-acid-level annotation columns for one variant
/// signature to the current `.variantCounts` line.
fn describe_variants_as_codons(
    writer: &mut BufWriter<File>,
    snvs: &[Snv],
    tracker: &CodonTracker,
    translation: &[u8],
) -> Result<()> {
    let variations = tracker.encode_snvs_as_codons(snvs)?;
    let ref_codon_values = tracker.ref_codon_values();

    let n_variations = variations.iter().filter(|v| !v.is_frameshift()).count();
    write!(writer, "\t{}", n_variations)?;

    let mut sep = "\t";
    for variation in &variations {
        match *variation {
            CodonVariation::Frameshift { .. } => continue,
            CodonVariation::Insertion {
                codon_id,
                codon_value,
            } => write!(
                writer,
                "{}{}:--->{}",
                sep, codon_id, LABEL_FOR_CODON_VALUE[codon_value]
            )?,
            CodonVariation::Deletion { codon_id } => write!(
                writer,
                "{}{}:{}>---",
                sep, codon_id, LABEL_FOR_CODON_VALUE[ref_codon_values[codon_id]]
            )?,
            CodonVariation::Modification {
                codon_id,
                codon_value,
            } => write!(
                writer,
                "{}{}:{}>{}",
                sep,
                codon_id,
                LABEL_FOR_CODON_VALUE[ref_codon_values[codon_id]],
                LABEL_FOR_CODON_VALUE[codon_value]
            )?,
        }
        sep = ", ";
    }

    sep = "\t";
    for variation in &variations {
        match *variation {
            CodonVariation::Frameshift { .. } => continue,
            CodonVariation::Insertion { codon_value, .. } => {
                write!(writer, "{}I:->{}", sep, translation[codon_value] as char)?
            }
            CodonVariation::Deletion { codon_id } => write!(
                writer,
                "{}D:{}:-",
                sep, translation[ref_codon_values[codon_id]] as char
            )?,
            CodonVariation::Modification {
                codon_id,
                codon_value,
            } => {
                let from_aa = translation[ref_codon_values[codon_id]] as char;
                let to_aa = translation[codon_value] as char;
                let label = if from_aa == to_aa {
                    'S'
                } else if codon::is_stop(codon_value) {
                    'N'
                } else {
                    'M'
                };
                write!(writer, "{}{}:{}>{}", sep, label, from_aa, to_aa)?;
            }
        }
        sep = ", ";
    }
    Ok(())
}

fn write_ref_coverage(config: &ReportConfig<'_>, tallies: &Tallies) -> Result<()> {
    let mut writer = create(config.output_file_prefix, "refCoverage")?;
    writeln!(writer, "RefPos\tCoverage")?;
    for (idx, coverage) in tallies.ref_coverage.iter().enumerate() {
        writeln!(writer, "{}\t{}", idx + 1, coverage)?;
    }
    Ok(())
}

fn write_codon_counts(config: &ReportConfig<'_>, tracker: &CodonTracker) -> Result<()> {
    let mut writer = create(config.output_file_prefix, "codonCounts")?;
    for label in &LABEL_FOR_CODON_VALUE {
        write!(writer, "{}\t", label)?;
    }
    writeln!(writer, "NFS\tFS\tTotal")?;
    for row_counts in tracker.codon_counts() {
        let mut total = 0;
        for count in row_counts.iter() {
            write!(writer, "{}\t", count)?;
            total += count;
        }
        writeln!(writer, "{}", total)?;
    }
    Ok(())
}

fn write_codon_fractions(config: &ReportConfig<'_>, tracker: &CodonTracker) -> Result<()> {
    let mut writer = create(config.output_file_prefix, "codonFractions")?;
    write!(writer, "Codon")?;
    for label in &LABEL_FOR_CODON_VALUE {
        write!(writer, "   {}", label)?;
    }
    writeln!(writer, "   NFS    FS    Total")?;
    for (codon_id, row_counts) in tracker.codon_counts().iter().enumerate() {
        write!(writer, "{:5}", codon_id + 1)?;
        let total: u64 = row_counts.iter().sum();
        for count in row_counts.iter() {
            write!(writer, "{:6.2}", 100. * *count as f64 / total as f64)?;
        }
        writeln!(writer, "{:9}", total)?;
    }
    Ok(())
}

fn row_aa_counts(row_counts: &[u64; CODON_COUNT_ROW_SIZE], translation: &[u8]) -> BTreeMap<u8, u64> {
    let mut aa_counts = BTreeMap::new();
    for codon_value in 0..N_REGULAR_CODONS {
        *aa_counts.entry(translation[codon_value]).or_insert(0) += row_counts[codon_value];
    }
    aa_counts
}

fn write_aa_counts(config: &ReportConfig<'_>, tracker: &CodonTracker) -> Result<()> {
    let mut writer = create(config.output_file_prefix, "aaCounts")?;
    for (codon_id, row_counts) in tracker.codon_counts().iter().enumerate() {
        let aa_counts = row_aa_counts(row_counts, config.codon_translation);
        if codon_id == 0 {
            let mut prefix = "";
            for aa in aa_counts.keys() {
                write!(writer, "{}{}", prefix, *aa as char)?;
                prefix = "\t";
            }
            writeln!(writer)?;
        }
        let mut prefix = "";
        for count in aa_counts.values() {
            write!(writer, "{}{}", prefix, count)?;
            prefix = "\t";
        }
        writeln!(writer)?;
    }
    Ok(())
}

fn write_aa_fractions(config: &ReportConfig<'_>, tracker: &CodonTracker) -> Result<()> {
    let mut writer = create(config.output_file_prefix, "aaFractions")?;
    for (codon_id, row_counts) in tracker.codon_counts().iter().enumerate() {
        let aa_counts = row_aa_counts(row_counts, config.codon_translation);
        if codon_id == 0 {
            write!(writer, "Codon")?;
            for aa in aa_counts.keys() {
                write!(writer, "     {}", *aa as char)?;
            }
            writeln!(writer, "    Total")?;
        }
        write!(writer, "{:5}", codon_id + 1)?;
        let total: u64 = row_counts.iter().sum();
        for count in aa_counts.values() {
            write!(writer, "{:6.2}", 100. * *count as f64 / total as f64)?;
        }
        writeln!(writer, "{:9}", total)?;
    }
    Ok(())
}

fn write_read_counts(config: &ReportConfig<'_>, tallies: &Tallies) -> Result<()> {
    let mut writer = create(config.output_file_prefix, "readCounts")?;
    let n_reads = tallies.n_reads_total as f64;
    writeln!(writer, "Total Reads:\t{}", tallies.n_reads_total)?;
    writeln!(
        writer,
        "Unmapped Reads:\t{}\t{:.3}%",
        tallies.n_reads_unmapped,
        100. * tallies.n_reads_unmapped as f64 / n_reads
    )?;
    writeln!(
        writer,
        "LowQ Reads:\t{}\t{:.3}%",
        tallies.n_reads_low_quality,
        100. * tallies.n_reads_low_quality as f64 / n_reads
    )?;
    let n_molecules = tallies.total_molecules() as f64;
    writeln!(
        writer,
        "Number of inconsistent pair molecules:\t{}\t{:.3}%",
        tallies.n_inconsistent_pairs,
        100. * tallies.n_inconsistent_pairs as f64 / n_molecules
    )?;
    writeln!(
        writer,
        "Number of wild type molecules:\t{}\t{:.3}%",
        tallies.n_wild_type_molecules,
        100. * tallies.n_wild_type_molecules as f64 / n_molecules
    )?;
    writeln!(
        writer,
        "Number of insufficient flank molecules:\t{}\t{:.3}%",
        tallies.n_insufficient_flank_molecules,
        100. * tallies.n_insufficient_flank_molecules as f64 / n_molecules
    )?;
    writeln!(
        writer,
        "Number of low quality variation molecules:\t{}\t{:.3}%",
        tallies.n_low_quality_variant_molecules,
        100. * tallies.n_low_quality_variant_molecules as f64 / n_molecules
    )?;
    writeln!(
        writer,
        "Number of called variant molecules:\t{}\t{:.3}%",
        tallies.n_called_variant_molecules,
        100. * tallies.n_called_variant_molecules as f64 / n_molecules
    )?;
    let evaluated: u64 = tallies.ref_coverage.iter().sum();
    writeln!(
        writer,
        "Base calls evaluated for variants:\t{:.3}%",
        100. * evaluated as f64 / tallies.n_total_base_calls as f64
    )?;
    Ok(())
}

fn write_coverage_size_histogram(config: &ReportConfig<'_>, tallies: &Tallies) -> Result<()> {
    let mut writer = create(config.output_file_prefix, "coverageLengthCounts")?;
    for idx in config.min_length..tallies.coverage_size_histogram.len() {
        writeln!(writer, "{}\t{}", idx, tallies.coverage_size_histogram[idx])?;
    }
    Ok(())
}
