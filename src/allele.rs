//! Allele observations and hypotheses, plus the window filter used to decide which alleles and
//! alignments are live at the current scan position
//!

use std::cmp::Ordering;
use std::fmt;

use strum::{Display, EnumCount};

#[derive(Clone, Copy, Debug, Display, EnumCount, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AlleleType {
    Reference,
    Substitution,
    Insertion,
    Deletion,
}

impl AlleleType {
    pub fn is_indel(&self) -> bool {
        matches!(self, AlleleType::Insertion | AlleleType::Deletion)
    }
}

/// Anything with a reference position and a reference span length
///
/// A zero length span is used for insertions, which sit between `pos - 1` and `pos`.
///
pub trait GenomeSpan {
    fn span_pos(&self) -> i64;
    fn span_len(&self) -> i64;

    fn span_end(&self) -> i64 {
        self.span_pos() + self.span_len()
    }
}

/// True if x intersects the half-open window [start, end)
///
/// A zero-length span is windowed by its position only.
///
pub fn within_window<T: GenomeSpan + ?Sized>(start: i64, end: i64, x: &T) -> bool {
    let pos = x.span_pos();
    let len = x.span_len();
    if len == 0 {
        pos >= start && pos < end
    } else {
        pos < end && pos + len > start
    }
}

/// A single allele observed in one alignment
///
/// Alleles are immutable once extracted from their alignment.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Allele {
    pub chrom_index: usize,

    /// Zero-indexed reference position of the allele's first reference base, or the reference
    /// position immediately following an insertion
    pub pos: i64,

    /// Reference span of the allele, 0 for insertions
    pub length: i64,

    pub allele_type: AlleleType,

    /// Read bases supporting the allele. For deletions this holds the deleted reference bases when
    /// they are known.
    pub bases: Vec<u8>,

    /// Phred-scaled base quality
    pub quality: u8,

    /// Mapping quality of the alignment the allele was extracted from
    pub map_quality: u8,

    pub sample_index: usize,

    /// Scan-unique id of the alignment this allele was extracted from
    pub alignment_id: u64,
}

impl Allele {
    pub fn key(&self) -> AlleleKey {
        AlleleKey {
            allele_type: self.allele_type,
            pos: self.pos,
            length: self.length,
            bases: self.bases.clone(),
        }
    }
}

impl GenomeSpan for Allele {
    fn span_pos(&self) -> i64 {
        self.pos
    }

    fn span_len(&self) -> i64 {
        self.length
    }
}

/// Order alleles by type only
///
/// This is intended for stable grouping of alleles, it does not reflect genomic order.
///
pub fn cmp_allele_type(a: &Allele, b: &Allele) -> Ordering {
    a.allele_type.cmp(&b.allele_type)
}

/// Identity of an allele hypothesis, independent of the read and sample it was observed in
///
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AlleleKey {
    pub allele_type: AlleleType,
    pub pos: i64,
    pub length: i64,
    pub bases: Vec<u8>,
}

impl AlleleKey {
    pub fn reference(pos: i64, ref_base: u8) -> Self {
        Self {
            allele_type: AlleleType::Reference,
            pos,
            length: 1,
            bases: vec![ref_base],
        }
    }

    pub fn is_reference(&self) -> bool {
        self.allele_type == AlleleType::Reference
    }

    /// True if the observed allele supports this hypothesis
    pub fn matches(&self, allele: &Allele) -> bool {
        self.allele_type == allele.allele_type
            && self.pos == allele.pos
            && self.length == allele.length
            && self.bases == allele.bases
    }
}

impl GenomeSpan for AlleleKey {
    fn span_pos(&self) -> i64 {
        self.pos
    }

    fn span_len(&self) -> i64 {
        self.length
    }
}

impl fmt::Display for AlleleKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bases = std::str::from_utf8(&self.bases).unwrap_or("?");
        match self.allele_type {
            AlleleType::Reference | AlleleType::Substitution => write!(f, "{bases}"),
            AlleleType::Insertion => write!(f, "+{bases}"),
            AlleleType::Deletion => {
                if self.bases.is_empty() {
                    write!(f, "-{}", self.length)
                } else {
                    write!(f, "-{bases}")
                }
            }
        }
    }
}

impl fmt::Debug for AlleleKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", self.allele_type, self.pos, self)
    }
}

/// Opaque handle to an allele stored in an `AlleleArena`
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AlleleId(usize);

/// Storage for all alleles extracted from the alignments currently in the scan window
///
/// Alignments and per-sample groups refer to alleles by id. Slots of removed alleles are reused.
///
#[derive(Default)]
pub struct AlleleArena {
    slots: Vec<Option<Allele>>,
    free: Vec<usize>,
    live_count: usize,
}

impl AlleleArena {
    pub fn insert(&mut self, allele: Allele) -> AlleleId {
        self.live_count += 1;
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(allele);
            AlleleId(index)
        } else {
            self.slots.push(Some(allele));
            AlleleId(self.slots.len() - 1)
        }
    }

    pub fn get(&self, id: AlleleId) -> Option<&Allele> {
        self.slots.get(id.0).and_then(|x| x.as_ref())
    }

    pub fn remove(&mut self, id: AlleleId) -> Option<Allele> {
        let allele = self.slots.get_mut(id.0).and_then(|x| x.take());
        if allele.is_some() {
            self.free.push(id.0);
            self.live_count -= 1;
        }
        allele
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live_count = 0;
    }
}

impl std::ops::Index<AlleleId> for AlleleArena {
    type Output = Allele;

    fn index(&self, id: AlleleId) -> &Allele {
        match self.get(id) {
            Some(x) => x,
            None => panic!("Reference to evicted allele {id:?}"),
        }
    }
}

#[cfg(test)]
pub(crate) fn get_test_allele(allele_type: AlleleType, pos: i64, length: i64, bases: &[u8]) -> Allele {
    Allele {
        chrom_index: 0,
        pos,
        length,
        allele_type,
        bases: bases.to_vec(),
        quality: 30,
        map_quality: 60,
        sample_index: 0,
        alignment_id: 0,
    }
}
