use thiserror::Error;

#[derive(Debug, Error)]
/// Errors of which the fatal ones indicate configuration problems or corrupt input data;
/// none of them are retried
pub enum Error {
    #[error("Could not perform file I/O")]
    /// Output file or reference read error
    Io(#[from] std::io::Error),
    #[error("Could not convert bytes as it is invalid UTF-8")]
    /// Data is not in UTF-8 format
    NotUtf8(#[from] std::string::FromUtf8Error),
    #[error("Could not read/process the BAM file")]
    /// Bam reading error
    Bam(#[from] rust_htslib::errors::Error),
    #[error("Could not read FASTA file")]
    /// Reference FASTA error
    Fasta(#[from] niffler::Error),
    #[error("Expecting a reference with a single contig, the supplied reference has {0} contigs")]
    /// More than one sequence in the reference FASTA
    MultiContigReference(usize),
    #[error("Reference sequence contains something other than A, C, G, and T")]
    /// Incorrect nucleotide in the reference
    BadReferenceBase,
    #[error("Bad ORF description: {0}")]
    /// Malformed `--orf` argument
    BadOrfCoords(String),
    #[error("ORF length must be divisible by 3")]
    /// Exon lengths do not sum to whole codons
    OrfLength,
    #[error("There is an upstream stop codon at reference index {0}")]
    /// A stop codon before the final codon of the ORF
    UpstreamStop(usize),
    #[error("Codon-translation string must contain exactly 64 characters, got {0}")]
    /// Malformed `--codon-translation` argument
    BadTranslation(usize),
    #[error("Unanticipated cigar operator: {0}")]
    /// A cigar operator other than M/=/X/I/D/S
    UnanticipatedCigarOperator(char),
    #[error("Unexpectedly exhausted cigar elements")]
    /// Cigar ran out before the trimmed read window was consumed
    ExhaustedCigar,
    #[error("Internal invariant violated: {0}")]
    /// Unexpected internal state
    Internal(String),
    #[error("Caught unexpected exception on read {ordinal}: {name}")]
    /// Wraps any failure while processing a single read with its identity
    ReadProcessing {
        /// Read name from the BAM record
        name: String,
        /// Ordinal index of the read in the input stream
        ordinal: u64,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },
}
