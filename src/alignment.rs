//! Alignment records and the filtered, sample-annotated alignment stream read from a bam file
//!

use rust_htslib::bam::record::Cigar;
use rust_htslib::bam::{self, Read};
use rust_htslib::htslib;
use serde::{Deserialize, Serialize};

use crate::allele::GenomeSpan;
use crate::errors::ScanError;
use crate::sample_naming::SampleResolver;

/// Report the reference span of a cigar segment
pub fn get_cigarseg_ref_offset(c: &Cigar) -> i64 {
    use Cigar::*;
    match c {
        Del(len) | RefSkip(len) | Diff(len) | Equal(len) | Match(len) => *len as i64,
        _ => 0,
    }
}

/// Report the read span of a cigar segment, hard clips are not counted
pub fn get_cigarseg_read_offset(c: &Cigar) -> usize {
    use Cigar::*;
    match c {
        Ins(len) | SoftClip(len) | Diff(len) | Equal(len) | Match(len) => *len as usize,
        _ => 0,
    }
}

/// A utility method to track ref and read positions while iterating through a cigar string
///
pub fn update_ref_and_read_pos(c: &Cigar, ref_pos: &mut i64, read_pos: &mut usize) {
    *ref_pos += get_cigarseg_ref_offset(c);
    *read_pos += get_cigarseg_read_offset(c);
}

/// Test if the alignment record should be skipped based on its flags
///
/// Unmapped, secondary, QC-fail and duplicate records are filtered out. Supplementary alignments
/// are kept.
///
pub fn filter_out_alignment_record(record: &bam::Record) -> bool {
    static FLAG_FILTER: u32 =
        htslib::BAM_FUNMAP | htslib::BAM_FSECONDARY | htslib::BAM_FQCFAIL | htslib::BAM_FDUP;

    ((record.flags() as u32) & FLAG_FILTER) != 0
}

/// A single read alignment, with everything required to extract its alleles
///
#[derive(Clone, Debug)]
pub struct Alignment {
    /// Unique among all alignments read in one scan
    pub id: u64,
    pub read_name: String,
    pub chrom_index: usize,

    /// Zero-indexed reference start position
    pub pos: i64,

    /// Zero-indexed reference end position (exclusive)
    pub end: i64,

    pub mapq: u8,
    pub cigar: Vec<Cigar>,

    /// Read bases, upper-case
    pub seq: Vec<u8>,

    /// Phred-scaled base qualities, empty if the record has no qualities
    pub qual: Vec<u8>,

    pub sample_index: usize,
}

impl Alignment {
    pub fn from_record(record: &bam::Record, id: u64, sample_index: usize) -> Result<Self, ScanError> {
        let read_name = String::from_utf8_lossy(record.qname()).to_string();
        if record.tid() < 0 {
            return Err(ScanError::MalformedAlignment {
                read_name,
                chrom_index: 0,
                pos: record.pos(),
                reason: "alignment has no reference sequence".to_string(),
            });
        }

        let cigar = record.cigar().iter().cloned().collect::<Vec<_>>();
        let mut end = record.pos();
        for c in cigar.iter() {
            end += get_cigarseg_ref_offset(c);
        }

        let seq = record.seq().as_bytes().to_ascii_uppercase();

        // htslib reports missing qualities as 0xff
        let qual = record.qual();
        let qual = if qual.first() == Some(&0xff) {
            Vec::new()
        } else {
            qual.to_vec()
        };

        Ok(Self {
            id,
            read_name,
            chrom_index: record.tid() as usize,
            pos: record.pos(),
            end,
            mapq: record.mapq(),
            cigar,
            seq,
            qual,
            sample_index,
        })
    }

    /// Base quality at read_pos, or 0 if qualities are not available
    pub fn base_qual(&self, read_pos: usize) -> u8 {
        self.qual.get(read_pos).copied().unwrap_or(0)
    }
}

impl GenomeSpan for Alignment {
    fn span_pos(&self) -> i64 {
        self.pos
    }

    fn span_len(&self) -> i64 {
        self.end - self.pos
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AlignmentSourceStats {
    pub records_read: usize,
    pub records_flag_filtered: usize,
    pub records_mapq_filtered: usize,

    /// Records from samples outside of a fixed sample list
    pub records_sample_filtered: usize,
}

/// Forward-only stream of alignments from a bam file, in file order
///
/// Records are filtered on flags, mapping quality and sample, and annotated with their sample
/// index.
/// Sort order is not checked here.
///
pub struct BamAlignmentSource {
    reader: bam::Reader,
    record: bam::Record,
    sample_resolver: SampleResolver,
    min_mapq: u8,
    next_id: u64,
    pub stats: AlignmentSourceStats,
}

impl BamAlignmentSource {
    pub fn new(reader: bam::Reader, sample_resolver: SampleResolver, min_mapq: u8) -> Self {
        Self {
            reader,
            record: bam::Record::new(),
            sample_resolver,
            min_mapq,
            next_id: 0,
            stats: AlignmentSourceStats::default(),
        }
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_resolver.samples.names
    }
}

impl Iterator for BamAlignmentSource {
    type Item = Result<Alignment, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read(&mut self.record) {
                None => return None,
                Some(Err(e)) => return Some(Err(ScanError::AlignmentRead(e.to_string()))),
                Some(Ok(())) => {}
            }
            self.stats.records_read += 1;

            if filter_out_alignment_record(&self.record) {
                self.stats.records_flag_filtered += 1;
                continue;
            }
            if self.record.mapq() < self.min_mapq {
                self.stats.records_mapq_filtered += 1;
                continue;
            }

            let Some(sample_index) = self.sample_resolver.resolve(&self.record) else {
                self.stats.records_sample_filtered += 1;
                continue;
            };
            let id = self.next_id;
            self.next_id += 1;
            return Some(Alignment::from_record(&self.record, id, sample_index));
        }
    }
}
