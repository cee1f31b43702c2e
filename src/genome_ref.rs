//! Reference sequence access for the scan
//!
//! The scan only ever asks for the reference span around the current target, so reference access
//! goes through the `ReferenceLoader` trait. Either the whole FASTA is held in memory, or spans are
//! fetched on demand from an indexed FASTA.
//!

use std::collections::HashMap;
use std::fs::File;

use bio::io::fasta;
use log::info;
use unwrap::unwrap;

use crate::errors::ScanError;
use crate::int_range::IntRange;

/// Convert all bases besides "ACGTN" to "N", after upper-casing
///
fn simplify_dna_bases(seq: &mut [u8]) {
    for c in seq.iter_mut() {
        *c = match c.to_ascii_uppercase() {
            x @ (b'A' | b'C' | b'G' | b'T' | b'N') => x,
            _ => b'N',
        };
    }
}

/// Source of reference sequence spans
///
pub trait ReferenceLoader {
    /// Return the reference bases for [start,end) on the named chromosome
    ///
    /// Fails if the region exceeds the sequence bounds
    ///
    fn load(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<u8>, ScanError>;

    /// Length of the named chromosome, if it is present in the reference
    fn chrom_length(&self, chrom: &str) -> Option<u64>;
}

fn check_load_bounds(chrom: &str, start: i64, end: i64, length: u64) -> Result<(), ScanError> {
    if start < 0 || end < start || end as u64 > length {
        return Err(ScanError::ReferenceLoad {
            chrom: chrom.to_string(),
            start,
            end,
            reason: format!("region exceeds sequence length {length}"),
        });
    }
    Ok(())
}

#[derive(Default)]
pub struct GenomeRef {
    /// A map from chrom name to chrom sequence
    pub chroms: HashMap<String, Vec<u8>>,
}

impl ReferenceLoader for GenomeRef {
    fn load(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<u8>, ScanError> {
        let seq = self
            .chroms
            .get(chrom)
            .ok_or_else(|| ScanError::ReferenceLoad {
                chrom: chrom.to_string(),
                start,
                end,
                reason: "sequence not found in reference".to_string(),
            })?;
        check_load_bounds(chrom, start, end, seq.len() as u64)?;
        Ok(seq[start as usize..end as usize].to_vec())
    }

    fn chrom_length(&self, chrom: &str) -> Option<u64> {
        self.chroms.get(chrom).map(|x| x.len() as u64)
    }
}

/// Read fasta file pointer into GenomeRef data structure
///
/// This method converts all input characters to upper-case, and any non-ACGTN base to N
///
pub fn get_genome_ref_from_fasta_fp(file: File) -> GenomeRef {
    let reader = fasta::Reader::new(file);

    let mut genome_ref = GenomeRef::default();

    for result in reader.records() {
        let record = unwrap!(result, "Error during fasta record parsing");
        let mut seq = record.seq().to_vec();
        simplify_dna_bases(&mut seq);
        genome_ref.chroms.insert(record.id().to_string(), seq);
    }
    genome_ref
}

/// Reference spans fetched on demand from a faidx-indexed FASTA file
///
pub struct IndexedFastaLoader {
    reader: fasta::IndexedReader<File>,
    chrom_lengths: HashMap<String, u64>,
}

impl IndexedFastaLoader {
    pub fn from_path(filename: &str) -> Self {
        let reader = unwrap!(
            fasta::IndexedReader::from_file(&filename),
            "Unable to open indexed reference fasta file: '{}'",
            filename,
        );
        let chrom_lengths = reader
            .index
            .sequences()
            .into_iter()
            .map(|x| (x.name, x.len))
            .collect();
        Self {
            reader,
            chrom_lengths,
        }
    }
}

impl ReferenceLoader for IndexedFastaLoader {
    fn load(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<u8>, ScanError> {
        let length = self
            .chrom_length(chrom)
            .ok_or_else(|| ScanError::ReferenceLoad {
                chrom: chrom.to_string(),
                start,
                end,
                reason: "sequence not found in reference index".to_string(),
            })?;
        check_load_bounds(chrom, start, end, length)?;

        let to_load_error = |e: std::io::Error| ScanError::ReferenceLoad {
            chrom: chrom.to_string(),
            start,
            end,
            reason: e.to_string(),
        };
        self.reader
            .fetch(chrom, start as u64, end as u64)
            .map_err(to_load_error)?;
        let mut seq = Vec::new();
        self.reader.read(&mut seq).map_err(to_load_error)?;
        simplify_dna_bases(&mut seq);
        Ok(seq)
    }

    fn chrom_length(&self, chrom: &str) -> Option<u64> {
        self.chrom_lengths.get(chrom).copied()
    }
}

/// Open the most suitable reference loader for the given FASTA file
///
/// An indexed loader is used when a '.fai' index is found next to the FASTA file, otherwise the
/// entire reference is read into memory.
///
pub fn get_reference_loader(filename: &str) -> Box<dyn ReferenceLoader> {
    let index_filename = format!("{filename}.fai");
    if std::path::Path::new(&index_filename).exists() {
        info!("Reading reference spans on demand from indexed fasta file '{filename}'");
        Box::new(IndexedFastaLoader::from_path(filename))
    } else {
        info!("Reading reference genome from file '{filename}'");
        let file = unwrap!(
            File::open(filename),
            "Unable to open reference fasta file: '{}'",
            filename,
        );
        Box::new(get_genome_ref_from_fasta_fp(file))
    }
}

/// The span of reference sequence currently loaded for the scan
///
#[derive(Clone, Debug)]
pub struct RefWindow {
    pub chrom_index: usize,
    pub range: IntRange,
    pub bases: Vec<u8>,
}

impl RefWindow {
    pub fn covers(&self, chrom_index: usize, range: &IntRange) -> bool {
        self.chrom_index == chrom_index && self.range.contains_range(range)
    }

    /// Reference base at pos, or None if pos is outside of the window
    pub fn base_at(&self, pos: i64) -> Option<u8> {
        if self.range.intersect_pos(pos) {
            Some(self.bases[(pos - self.range.start) as usize])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn test_get_genome_ref_from_fasta_fp() {
        let mut file = tempfile::tempfile().unwrap();

        let cname = "foo";
        let seq = "ACGTacgtRYN";
        writeln!(file, ">{cname}").unwrap();
        writeln!(file, "{seq}").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let result = get_genome_ref_from_fasta_fp(file);

        assert_eq!(result.chroms.len(), 1);
        assert_eq!(result.chroms["foo"], b"ACGTACGTNNN".to_vec());
        assert_eq!(result.chrom_length("foo"), Some(11));
    }

    #[test]
    fn test_genome_ref_load() {
        let mut genome_ref = GenomeRef::default();
        genome_ref
            .chroms
            .insert("chr1".to_string(), b"ACGTACGTAC".to_vec());

        assert_eq!(genome_ref.load("chr1", 2, 6).unwrap(), b"GTAC".to_vec());
        assert!(matches!(
            genome_ref.load("chr1", 8, 11),
            Err(ScanError::ReferenceLoad { .. })
        ));
        assert!(genome_ref.load("chr2", 0, 1).is_err());
    }

    #[test]
    fn test_ref_window() {
        let window = RefWindow {
            chrom_index: 1,
            range: IntRange::from_pair(10, 14),
            bases: b"ACGT".to_vec(),
        };
        assert_eq!(window.base_at(10), Some(b'A'));
        assert_eq!(window.base_at(13), Some(b'T'));
        assert_eq!(window.base_at(14), None);
        assert!(window.covers(1, &IntRange::from_pair(11, 14)));
        assert!(!window.covers(0, &IntRange::from_pair(11, 14)));
        assert!(!window.covers(1, &IntRange::from_pair(9, 12)));
    }
}
