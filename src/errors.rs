//! Error types raised by the alignment scan and genotype calling core
//!

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Alignment can't be related to the loaded reference, the alignment is skipped
    #[error(
        "Malformed alignment '{read_name}' at chrom index {chrom_index} position {pos}: {reason}"
    )]
    MalformedAlignment {
        read_name: String,
        chrom_index: usize,
        pos: i64,
        reason: String,
    },

    /// Alignment stream violates the required coordinate sort order
    #[error(
        "Alignment input is not coordinate sorted: read '{read_name}' at {chrom}:{} follows a read at {prev_chrom}:{}",
        .pos + 1,
        .prev_pos + 1
    )]
    UnsortedStream {
        read_name: String,
        chrom: String,
        pos: i64,
        prev_chrom: String,
        prev_pos: i64,
    },

    #[error("No target regions could be resolved for scanning")]
    EmptyTargetSet,

    #[error("Unable to load reference sequence {chrom}:{start}-{end}: {reason}")]
    ReferenceLoad {
        chrom: String,
        start: i64,
        end: i64,
        reason: String,
    },

    #[error("Failed to read alignment record: {0}")]
    AlignmentRead(String),
}

impl ScanError {
    /// True for error conditions that should abort the entire run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScanError::MalformedAlignment { .. })
    }
}
