use log::LevelFilter;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "satmut",
    about = "Processes aligned reads from a saturation mutagenesis (MITESeq) experiment into codon-level variant frequency tables"
)]
pub(crate) struct SatMut {
    /// Minimum quality score for analyzed portion of read
    #[structopt(long = "min-q", default_value = "30")]
    pub min_q: u8,
    /// Minimum size of high-quality portion of read
    #[structopt(long = "min-length", default_value = "15")]
    pub min_length: usize,
    /// Minimum number of wt calls flanking variant
    #[structopt(long = "min-flanking-length", default_value = "18")]
    pub min_flanking_length: usize,
    /// Reference indices of the ORF (1-based, inclusive), for example '134-180,214-238'
    #[structopt(long = "orf")]
    pub orf_coords: String,
    /// Minimum number of observations of reported variants
    #[structopt(long = "min-variant-obs", default_value = "0")]
    pub min_variant_observations: u64,
    /// Codon translation (a string of 64 amino acid codes, codon values in AAA..TTT order)
    #[structopt(
        long = "codon-translation",
        default_value = "KNKNTTTTRSRSIIMIQHQHPPPPRRRRLLLLEDEDAAAAGGGGVVVVZYZYSSSSZCWCLFLF"
    )]
    pub codon_translation: String,
    /// Output file prefix
    #[structopt(short = "O", long = "output-file-prefix")]
    pub output_file_prefix: String,
    /// Paired mode: reconcile consecutive mates of a pair into one molecule
    #[structopt(long = "paired-mode", parse(try_from_str), default_value = "true")]
    pub paired_mode: bool,
    /// Single-contig reference FASTA (optionally gzipped)
    #[structopt(short = "r", long = "reference", parse(from_os_str))]
    pub reference: PathBuf,
    /// Number of htslib decompression threads
    #[structopt(short = "t", long = "threads", default_value = "1")]
    pub threads: usize,
    /// Determines verbosity of the processing, can be specified multiple times -vvv
    #[structopt(short = "v", long = "verbosity", parse(from_occurrences))]
    pub verbosity: u8,
    /// Aligned reads (SAM/BAM/CRAM), primary lines only are analyzed
    #[structopt(parse(from_os_str))]
    pub bam: PathBuf,
}

impl SatMut {
    pub(crate) fn set_logging(&self) {
        let level = match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        env_logger::Builder::new().filter_level(level).init();
    }
}
