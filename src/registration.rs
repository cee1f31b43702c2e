//! Alignment registration and the queue of alignments overlapping the scan position
//!
//! Registration converts an alignment into the ordered list of alleles it supports. The queue
//! holds registered alignments in input order, and owns the arena storing all of their alleles.
//!

use std::collections::{BTreeMap, VecDeque};

use itertools::Itertools;
use rust_htslib::bam::record::Cigar;
use serde::{Deserialize, Serialize};

use crate::alignment::{Alignment, update_ref_and_read_pos};
use crate::allele::{Allele, AlleleArena, AlleleId, AlleleType, within_window};
use crate::errors::ScanError;
use crate::genome_ref::RefWindow;
use crate::int_range::IntRange;

/// Alleles observed at one site, grouped by sample index
pub type SampleGroups = BTreeMap<usize, Vec<AlleleId>>;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegistrationSettings {
    /// Base-level alleles below this quality are not emitted
    pub min_base_quality: u8,

    /// Mismatches are only counted at or above this base quality
    pub mismatch_base_quality: u8,

    /// Alignments with more counted mismatches are not registered
    pub max_mismatches: usize,

    /// Indels within this many reference bases of either alignment end are not emitted
    pub indel_exclusion_window: i64,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            min_base_quality: 20,
            mismatch_base_quality: 10,
            max_mismatches: 10,
            indel_exclusion_window: 0,
        }
    }
}

#[derive(Debug)]
pub struct RegisteredAlignment {
    pub alignment: Alignment,

    /// Alleles in alignment order
    pub alleles: Vec<AlleleId>,

    pub mismatch_count: usize,
}

fn malformed(alignment: &Alignment, reason: &str) -> ScanError {
    ScanError::MalformedAlignment {
        read_name: alignment.read_name.clone(),
        chrom_index: alignment.chrom_index,
        pos: alignment.pos,
        reason: reason.to_string(),
    }
}

/// Extract the ordered list of alleles supported by an alignment
///
/// Returns the alleles and the count of mismatched bases at or above the mismatch base quality.
/// Reference positions with an N base emit no allele and are never counted as mismatches.
///
/// The alignment's full reference span must be covered by `ref_window`.
///
pub fn extract_alleles(
    alignment: &Alignment,
    ref_window: &RefWindow,
    settings: &RegistrationSettings,
) -> Result<(Vec<Allele>, usize), ScanError> {
    if alignment.end <= alignment.pos {
        return Err(malformed(alignment, "alignment has no aligned reference bases"));
    }
    let span = IntRange::from_pair(alignment.pos, alignment.end);
    if !ref_window.covers(alignment.chrom_index, &span) {
        return Err(malformed(
            alignment,
            "alignment extends outside of the loaded reference window",
        ));
    }

    let new_allele = |pos: i64, length: i64, allele_type: AlleleType, bases: Vec<u8>, quality: u8| {
        Allele {
            chrom_index: alignment.chrom_index,
            pos,
            length,
            allele_type,
            bases,
            quality,
            map_quality: alignment.mapq,
            sample_index: alignment.sample_index,
            alignment_id: alignment.id,
        }
    };

    let is_indel_excluded = |start: i64, end: i64| {
        let window = settings.indel_exclusion_window;
        (start - alignment.pos) < window || (alignment.end - end) < window
    };

    let mut alleles = Vec::new();
    let mut mismatch_count = 0;
    let mut ref_pos = alignment.pos;
    let mut read_pos = 0;
    for c in alignment.cigar.iter() {
        match c {
            Cigar::Match(len) | Cigar::Equal(len) | Cigar::Diff(len) => {
                for offset in 0..*len as usize {
                    let pos = ref_pos + offset as i64;
                    let read_index = read_pos + offset;
                    let read_base = match alignment.seq.get(read_index) {
                        Some(&x) => x,
                        None => return Err(malformed(alignment, "cigar exceeds read length")),
                    };
                    if read_base == b'N' {
                        continue;
                    }

                    // Coverage of the full span is checked above
                    let ref_base = ref_window.base_at(pos).unwrap_or(b'N');
                    if ref_base == b'N' {
                        continue;
                    }
                    let quality = alignment.base_qual(read_index);
                    let allele_type = if read_base == ref_base {
                        AlleleType::Reference
                    } else {
                        if quality >= settings.mismatch_base_quality {
                            mismatch_count += 1;
                        }
                        AlleleType::Substitution
                    };
                    if quality >= settings.min_base_quality {
                        alleles.push(new_allele(pos, 1, allele_type, vec![read_base], quality));
                    }
                }
            }
            Cigar::Ins(len) => {
                let len = *len as usize;
                if read_pos + len > alignment.seq.len() {
                    return Err(malformed(alignment, "cigar exceeds read length"));
                }
                // An insertion anchored at the alignment end is never observed, because the
                // alignment is evicted before the scan reaches its position
                if ref_pos < alignment.end && !is_indel_excluded(ref_pos, ref_pos) {
                    let bases = alignment.seq[read_pos..read_pos + len].to_vec();
                    let quality = (read_pos..read_pos + len)
                        .map(|x| alignment.base_qual(x))
                        .min()
                        .unwrap_or(0);
                    alleles.push(new_allele(ref_pos, 0, AlleleType::Insertion, bases, quality));
                }
            }
            Cigar::Del(len) => {
                let len = *len as i64;
                if !is_indel_excluded(ref_pos, ref_pos + len) {
                    let bases = (ref_pos..ref_pos + len)
                        .filter_map(|x| ref_window.base_at(x))
                        .collect::<Vec<_>>();

                    // Deletion quality is taken from the flanking read bases
                    let quality = [read_pos.checked_sub(1), Some(read_pos)]
                        .into_iter()
                        .flatten()
                        .filter(|&x| x < alignment.seq.len())
                        .map(|x| alignment.base_qual(x))
                        .min()
                        .unwrap_or(0);
                    alleles.push(new_allele(ref_pos, len, AlleleType::Deletion, bases, quality));
                }
            }
            _ => {}
        }
        update_ref_and_read_pos(c, &mut ref_pos, &mut read_pos);
    }

    Ok((alleles, mismatch_count))
}

/// Register the alignment, storing its alleles in `arena`
///
pub fn register_alignment(
    alignment: Alignment,
    ref_window: &RefWindow,
    settings: &RegistrationSettings,
    arena: &mut AlleleArena,
) -> Result<RegisteredAlignment, ScanError> {
    let (alleles, mismatch_count) = extract_alleles(&alignment, ref_window, settings)?;
    let alleles = alleles.into_iter().map(|x| arena.insert(x)).collect();
    Ok(RegisteredAlignment {
        alignment,
        alleles,
        mismatch_count,
    })
}

/// Registered alignments overlapping the scan position, in input order
///
#[derive(Default)]
pub struct AlignmentQueue {
    alignments: VecDeque<RegisteredAlignment>,

    /// Alleles of all queued alignments which intersect the current scan position
    registered_alleles: Vec<AlleleId>,

    pub arena: AlleleArena,
}

impl AlignmentQueue {
    /// Register the alignment and append it to the queue
    ///
    /// Returns false if the alignment was registered but exceeded the mismatch limit, in which
    /// case it is not queued.
    ///
    pub fn register(
        &mut self,
        alignment: Alignment,
        ref_window: &RefWindow,
        settings: &RegistrationSettings,
    ) -> Result<bool, ScanError> {
        let registered = register_alignment(alignment, ref_window, settings, &mut self.arena)?;
        if registered.mismatch_count > settings.max_mismatches {
            self.release(&registered);
            return Ok(false);
        }
        debug_assert!(
            self.alignments
                .back()
                .is_none_or(|x| x.alignment.pos <= registered.alignment.pos)
        );
        self.alignments.push_back(registered);
        Ok(true)
    }

    fn release(&mut self, registered: &RegisteredAlignment) {
        for &id in registered.alleles.iter() {
            self.arena.remove(id);
        }
    }

    /// Remove all alignments ending at or before pos, and free their alleles
    ///
    pub fn evict_before(&mut self, pos: i64) {
        let mut kept = VecDeque::with_capacity(self.alignments.len());
        while let Some(registered) = self.alignments.pop_front() {
            if registered.alignment.end <= pos {
                self.release(&registered);
            } else {
                kept.push_back(registered);
            }
        }
        self.alignments = kept;
    }

    /// Rebuild the registered allele list for scan position pos
    ///
    /// Alignments which no longer overlap pos are evicted first.
    ///
    pub fn update_registered_alleles(&mut self, pos: i64) {
        self.evict_before(pos);
        let arena = &self.arena;
        self.registered_alleles = self
            .alignments
            .iter()
            .flat_map(|x| x.alleles.iter().copied())
            .filter(|&id| within_window(pos, pos + 1, &arena[id]))
            .collect();
    }

    pub fn registered_alleles(&self) -> &[AlleleId] {
        &self.registered_alleles
    }

    /// Group the observations at pos by sample
    ///
    /// Each alignment contributes at most one observation: an indel anchored at pos takes
    /// priority over the aligned base at pos. Observations follow queue order within a sample.
    ///
    pub fn get_sample_groups(&self, pos: i64) -> SampleGroups {
        let mut sample_groups = SampleGroups::new();
        let site_alleles = self
            .registered_alleles
            .iter()
            .copied()
            .filter(|&id| self.arena[id].pos == pos);
        for (_, alignment_alleles) in &site_alleles.chunk_by(|&id| self.arena[id].alignment_id) {
            let alignment_alleles = alignment_alleles.collect::<Vec<_>>();
            let selected = alignment_alleles
                .iter()
                .copied()
                .find(|&id| self.arena[id].allele_type.is_indel())
                .unwrap_or(alignment_alleles[0]);
            sample_groups
                .entry(self.arena[selected].sample_index)
                .or_default()
                .push(selected);
        }
        sample_groups
    }

    pub fn len(&self) -> usize {
        self.alignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alignments.is_empty()
    }

    pub fn clear(&mut self) {
        self.alignments.clear();
        self.registered_alleles.clear();
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::tests::get_test_alignment;

    fn get_test_ref_window() -> RefWindow {
        RefWindow {
            chrom_index: 0,
            range: IntRange::from_pair(0, 20),
            bases: b"ACGTACGTACGTACGTACGT".to_vec(),
        }
    }

    fn get_types(alleles: &[Allele]) -> Vec<(AlleleType, i64)> {
        alleles.iter().map(|x| (x.allele_type, x.pos)).collect()
    }

    #[test]
    fn test_extract_alleles() {
        use AlleleType::*;

        let ref_window = get_test_ref_window();
        let settings = RegistrationSettings::default();
        let alignment = get_test_alignment(
            b"r1\t0\tchr1\t3\t60\t4M2D3M1I2M\t*\t0\t0\tGTTCACGTTA\tIIIIIIIIII",
            0,
            0,
        );
        assert_eq!(alignment.end, 13);

        let (alleles, mismatch_count) = extract_alleles(&alignment, &ref_window, &settings).unwrap();
        assert_eq!(mismatch_count, 1);
        assert_eq!(
            get_types(&alleles),
            vec![
                (Reference, 2),
                (Reference, 3),
                (Substitution, 4),
                (Reference, 5),
                (Deletion, 6),
                (Reference, 8),
                (Reference, 9),
                (Reference, 10),
                (Insertion, 11),
                (Reference, 11),
                (Reference, 12),
            ]
        );
        assert_eq!(alleles[2].bases, b"T".to_vec());
        assert_eq!(alleles[4].length, 2);
        assert_eq!(alleles[4].bases, b"GT".to_vec());
        assert_eq!(alleles[4].quality, 40);
        assert_eq!(alleles[8].length, 0);
        assert_eq!(alleles[8].bases, b"T".to_vec());
    }

    #[test]
    fn test_extract_alleles_filters() {
        use AlleleType::*;

        let ref_window = get_test_ref_window();
        let settings = RegistrationSettings {
            indel_exclusion_window: 3,
            ..Default::default()
        };

        // Low quality mismatch is still counted, but not emitted. The insertion 2 bases from the
        // alignment end is excluded.
        let alignment = get_test_alignment(
            b"r1\t0\tchr1\t3\t60\t4M2D3M1I2M\t*\t0\t0\tGTTCACGTTA\tII+IIIIIII",
            0,
            0,
        );
        let (alleles, mismatch_count) = extract_alleles(&alignment, &ref_window, &settings).unwrap();
        assert_eq!(mismatch_count, 1);
        let types = get_types(&alleles);
        assert!(!types.contains(&(Substitution, 4)));
        assert!(!types.contains(&(Insertion, 11)));
        assert!(types.contains(&(Deletion, 6)));
    }

    #[test]
    fn test_extract_alleles_reference_n() {
        let ref_window = RefWindow {
            chrom_index: 0,
            range: IntRange::from_pair(0, 8),
            bases: b"ACNNACGT".to_vec(),
        };
        let settings = RegistrationSettings::default();
        let alignment =
            get_test_alignment(b"r1\t0\tchr1\t1\t60\t6M\t*\t0\t0\tACGTAC\tIIIIII", 0, 0);
        let (alleles, mismatch_count) = extract_alleles(&alignment, &ref_window, &settings).unwrap();
        assert_eq!(mismatch_count, 0);
        assert_eq!(
            get_types(&alleles),
            vec![
                (AlleleType::Reference, 0),
                (AlleleType::Reference, 1),
                (AlleleType::Reference, 4),
                (AlleleType::Reference, 5),
            ]
        );
    }

    #[test]
    fn test_extract_alleles_end_insertion() {
        let ref_window = get_test_ref_window();
        let settings = RegistrationSettings::default();
        let alignment =
            get_test_alignment(b"r1\t0\tchr1\t1\t60\t4M2I2S\t*\t0\t0\tACGTTTGG\tIIIIIIII", 0, 0);
        assert_eq!(alignment.end, 4);
        let (alleles, _) = extract_alleles(&alignment, &ref_window, &settings).unwrap();
        assert_eq!(alleles.len(), 4);
        assert!(alleles.iter().all(|x| x.allele_type == AlleleType::Reference));
    }

    #[test]
    fn test_extract_alleles_outside_window() {
        let ref_window = get_test_ref_window();
        let settings = RegistrationSettings::default();
        let alignment = get_test_alignment(
            b"r1\t0\tchr1\t18\t60\t4M\t*\t0\t0\tACGT\tIIII",
            0,
            0,
        );
        assert!(matches!(
            extract_alleles(&alignment, &ref_window, &settings),
            Err(ScanError::MalformedAlignment { .. })
        ));
    }

    #[test]
    fn test_queue_mismatch_limit() {
        let ref_window = get_test_ref_window();
        let settings = RegistrationSettings {
            max_mismatches: 1,
            ..Default::default()
        };
        let mut queue = AlignmentQueue::default();
        let alignment =
            get_test_alignment(b"r1\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII", 0, 0);
        assert!(queue.register(alignment, &ref_window, &settings).unwrap());
        let alignment =
            get_test_alignment(b"r2\t0\tchr1\t1\t60\t4M\t*\t0\t0\tTTTT\tIIII", 1, 0);
        assert!(!queue.register(alignment, &ref_window, &settings).unwrap());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.arena.len(), 4);
    }

    #[test]
    fn test_eviction() {
        let ref_window = get_test_ref_window();
        let settings = RegistrationSettings::default();
        let mut queue = AlignmentQueue::default();
        for (id, sam_line) in [
            b"r1\t0\tchr1\t1\t60\t4M\t*\t0\t0\tACGT\tIIII".as_slice(),
            b"r2\t0\tchr1\t2\t60\t2M3D2M\t*\t0\t0\tCGCG\tIIII".as_slice(),
            b"r3\t0\tchr1\t3\t60\t6M\t*\t0\t0\tGTACGT\tIIIIII".as_slice(),
        ]
        .into_iter()
        .enumerate()
        {
            let alignment = get_test_alignment(sam_line, id as u64, 0);
            queue.register(alignment, &ref_window, &settings).unwrap();
        }

        for pos in 0..12 {
            queue.update_registered_alleles(pos);
            for &id in queue.registered_alleles() {
                let allele = &queue.arena[id];
                assert!(allele.pos + allele.length > pos || (allele.length == 0 && allele.pos == pos));
                assert!(allele.pos <= pos);
            }
        }
        assert!(queue.is_empty());
        assert!(queue.arena.is_empty());
    }

    #[test]
    fn test_get_sample_groups() {
        let ref_window = get_test_ref_window();
        let settings = RegistrationSettings::default();
        let mut queue = AlignmentQueue::default();
        for (id, sample_index, sam_line) in [
            (0, 1, b"r1\t0\tchr1\t1\t60\t6M\t*\t0\t0\tACGAAC\tIIIIII".as_slice()),
            (1, 0, b"r2\t0\tchr1\t1\t60\t3M2I3M\t*\t0\t0\tACGTTTAC\tIIIIIIII".as_slice()),
            (2, 1, b"r3\t0\tchr1\t1\t60\t3M2D1M\t*\t0\t0\tACGC\tIIII".as_slice()),
        ] {
            let alignment = get_test_alignment(sam_line, id, sample_index);
            queue.register(alignment, &ref_window, &settings).unwrap();
        }

        queue.update_registered_alleles(3);
        let sample_groups = queue.get_sample_groups(3);
        assert_eq!(sample_groups.len(), 2);

        let types = |sample_index: usize| {
            sample_groups[&sample_index]
                .iter()
                .map(|&id| queue.arena[id].allele_type)
                .collect::<Vec<_>>()
        };
        assert_eq!(types(0), vec![AlleleType::Insertion]);
        assert_eq!(types(1), vec![AlleleType::Substitution, AlleleType::Deletion]);

        // Deletion spanning pos 4 is registered, but is not an observation at pos 4
        queue.update_registered_alleles(4);
        let sample_groups = queue.get_sample_groups(4);
        assert_eq!(sample_groups[&1].len(), 1);
        assert_eq!(
            queue
                .registered_alleles()
                .iter()
                .filter(|&&id| queue.arena[id].allele_type == AlleleType::Deletion)
                .count(),
            1
        );
    }
}
