#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]
#![allow(dead_code, unused_variables)]

//! Processes aligned reads from a saturation mutagenesis (MITESeq) experiment into
//! codon-level variant frequency tables.
mod alignment;
mod cli;
mod codon;
mod counts;
mod error;
mod report;
mod trim;

use crate::alignment::{
    analyze_alignment, combine_reports, ReadData, ReadReport, Reconciled, UPPERCASE_MASK,
};
use crate::codon::{CodonTracker, N_REGULAR_CODONS};
use crate::counts::Tallies;
use crate::error::Error;
use crate::trim::calculate_trim;
use log::{info, warn};
use rust_htslib::{bam, bam::Read};
use structopt::StructOpt;

type Result<T> = std::result::Result<T, crate::error::Error>;

fn main() -> Result<()> {
    let opt = cli::SatMut::from_args();
    opt.set_logging();

    let translation = opt.codon_translation.as_bytes();
    if translation.len() != N_REGULAR_CODONS {
        return Err(Error::BadTranslation(translation.len()));
    }

    let ref_seq = read_reference(&opt.reference)?;
    let mut tracker = CodonTracker::new(&opt.orf_coords, &ref_seq)?;
    let mut tallies = Tallies::new(ref_seq.len());

    let mut bam = bam::Reader::from_path(&opt.bam)?;
    if opt.threads > 1 {
        bam.set_threads(opt.threads)?;
    }

    let mut stashed: Option<ReadData> = None;
    for r in bam.records() {
        let record = r?;
        if record.is_secondary() || record.is_supplementary() {
            continue;
        }
        let read = ReadData::from_record(&record);

        if !opt.paired_mode || !read.is_paired {
            let report = read_report(&mut tallies, &read, &opt, &ref_seq)
                .map_err(|e| read_error(&read, tallies.n_reads_total, e))?;
            tallies
                .apply_report(&report, &mut tracker, opt.min_q, opt.min_flanking_length)
                .map_err(|e| read_error(&read, tallies.n_reads_total, e))?;
            continue;
        }

        match stashed.take() {
            None => stashed = Some(read),
            Some(mate) if mate.name == read.name => {
                let report1 = read_report(&mut tallies, &mate, &opt, &ref_seq)
                    .map_err(|e| read_error(&mate, tallies.n_reads_total, e))?;
                let report2 = read_report(&mut tallies, &read, &opt, &ref_seq)
                    .map_err(|e| read_error(&read, tallies.n_reads_total, e))?;
                match combine_reports(report1, report2) {
                    Reconciled::Combined(combined) => tallies
                        .apply_report(&combined, &mut tracker, opt.min_q, opt.min_flanking_length)
                        .map_err(|e| read_error(&read, tallies.n_reads_total, e))?,
                    Reconciled::Disjoint(first, second) => {
                        tallies
                            .apply_report(&first, &mut tracker, opt.min_q, opt.min_flanking_length)
                            .map_err(|e| read_error(&mate, tallies.n_reads_total, e))?;
                        tallies
                            .apply_report(&second, &mut tracker, opt.min_q, opt.min_flanking_length)
                            .map_err(|e| read_error(&read, tallies.n_reads_total, e))?;
                    }
                }
            }
            Some(mate) => {
                warn!("Read {} has no mate.", mate.name_lossy());
                let report = read_report(&mut tallies, &mate, &opt, &ref_seq)
                    .map_err(|e| read_error(&mate, tallies.n_reads_total, e))?;
                tallies
                    .apply_report(&report, &mut tracker, opt.min_q, opt.min_flanking_length)
                    .map_err(|e| read_error(&mate, tallies.n_reads_total, e))?;
                stashed = Some(read);
            }
        }
    }

    if let Some(mate) = stashed {
        warn!("Read {} has no mate.", mate.name_lossy());
        let report = read_report(&mut tallies, &mate, &opt, &ref_seq)
            .map_err(|e| read_error(&mate, tallies.n_reads_total, e))?;
        tallies
            .apply_report(&report, &mut tracker, opt.min_q, opt.min_flanking_length)
            .map_err(|e| read_error(&mate, tallies.n_reads_total, e))?;
    }

    info!(
        "Processed {} reads into {} molecules with {} distinct variant signatures",
        tallies.n_reads_total,
        tallies.total_molecules(),
        tallies.variant_counts.len()
    );

    let config = report::ReportConfig {
        output_file_prefix: &opt.output_file_prefix,
        codon_translation: translation,
        min_length: opt.min_length,
        min_flanking_length: opt.min_flanking_length,
        min_variant_observations: opt.min_variant_observations,
    };
    report::write_all(&config, &tallies, &tracker)?;

    Ok(())
}

/// Tallies the read and diffs it against the reference; unmapped and wholly low-quality
/// reads get a null report.
fn read_report(
    tallies: &mut Tallies,
    read: &ReadData,
    opt: &cli::SatMut,
    ref_seq: &[u8],
) -> Result<ReadReport> {
    tallies.n_reads_total += 1;
    tallies.n_total_base_calls += read.seq.len() as u64;

    if read.is_unmapped {
        tallies.n_reads_unmapped += 1;
        return Ok(ReadReport::null_report());
    }

    let trim = calculate_trim(&read.quals, opt.min_q, opt.min_length);
    if trim.size() == 0 {
        tallies.n_reads_low_quality += 1;
        return Ok(ReadReport::null_report());
    }

    analyze_alignment(read, trim, ref_seq)
}

fn read_error(read: &ReadData, ordinal: u64, source: Error) -> Error {
    Error::ReadProcessing {
        name: read.name_lossy(),
        ordinal,
        source: Box::new(source),
    }
}

/// Reads the single-contig reference FASTA (optionally gzipped) and returns its
/// uppercased sequence.
fn read_reference(path: &std::path::Path) -> Result<Vec<u8>> {
    let (rdr, _) = niffler::from_path(path)?;
    let fasta_rdr = bio::io::fasta::Reader::new(rdr);
    let mut records = fasta_rdr.records();
    let record = match records.next() {
        Some(record) => record?,
        None => return Err(Error::MultiContigReference(0)),
    };
    let extra = records.count();
    if extra > 0 {
        return Err(Error::MultiContigReference(extra + 1));
    }

    let mut ref_seq = record.seq().to_vec();
    for base in ref_seq.iter_mut() {
        *base &= UPPERCASE_MASK;
        if !matches!(*base, b'A' | b'C' | b'G' | b'T') {
            return Err(Error::BadReferenceBase);
        }
    }
    Ok(ref_seq)
}
