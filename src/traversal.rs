//! Target traversal state machine
//!
//! The traversal advances a scan cursor over every position of every target, one reference
//! sequence at a time. At each new position it pulls newly overlapping alignments into the queue,
//! rebuilds the registered allele list and groups the observations at the position by sample.
//!

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::alignment::Alignment;
use crate::allele::AlleleArena;
use crate::chrom_list::ChromList;
use crate::errors::ScanError;
use crate::genome_ref::{RefWindow, ReferenceLoader};
use crate::int_range::IntRange;
use crate::log_utils::debug_msg;
use crate::registration::{AlignmentQueue, RegistrationSettings, SampleGroups};
use crate::targets::TargetSet;

/// Number of malformed alignment warnings written to the log before they are only counted
const MAX_MALFORMED_ALIGNMENT_WARNINGS: usize = 10;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TraversalState {
    NotStarted,
    ScanningTarget,
    BetweenTargets,
    EndOfReferenceSequence,
    Done,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScanCursor {
    pub chrom_index: usize,
    pub pos: i64,

    /// Index of the current target among the targets of chrom_index
    pub target_index: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TraversalSettings {
    /// Reference flank loaded before each target
    pub bases_before_target: i64,

    /// Reference flank loaded after each target
    pub bases_after_target: i64,

    pub registration: RegistrationSettings,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self {
            bases_before_target: 100,
            bases_after_target: 100,
            registration: RegistrationSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TraversalStats {
    pub alignments_pulled: usize,

    /// Alignments which ended before the scan position they were pulled at
    pub alignments_outside_targets: usize,

    pub alignments_malformed: usize,
    pub alignments_registered: usize,
    pub alignments_mismatch_filtered: usize,
    pub targets_scanned: usize,
    pub positions_scanned: usize,
}

/// Observations at one scan position
///
pub struct PositionAlleles {
    pub chrom_index: usize,
    pub pos: i64,
    pub ref_base: u8,
    pub sample_groups: SampleGroups,
}

/// Sort order check key for the alignment stream
struct StreamPosition {
    chrom_index: usize,
    pos: i64,
}

pub struct TargetTraversal<S> {
    state: TraversalState,
    cursor: Option<ScanCursor>,
    chrom_list: ChromList,
    targets: TargetSet,
    reference: Box<dyn ReferenceLoader>,
    ref_window: Option<RefWindow>,

    source: S,

    /// Alignment pulled from the source which starts after the current scan position
    pending: Option<Alignment>,

    last_stream_pos: Option<StreamPosition>,

    queue: AlignmentQueue,
    settings: TraversalSettings,
    pub stats: TraversalStats,
    debug: bool,
}

impl<S> TargetTraversal<S>
where
    S: Iterator<Item = Result<Alignment, ScanError>>,
{
    pub fn new(
        chrom_list: ChromList,
        targets: TargetSet,
        reference: Box<dyn ReferenceLoader>,
        source: S,
        settings: TraversalSettings,
    ) -> Self {
        Self {
            state: TraversalState::NotStarted,
            cursor: None,
            chrom_list,
            targets,
            reference,
            ref_window: None,
            source,
            pending: None,
            last_stream_pos: None,
            queue: AlignmentQueue::default(),
            settings,
            stats: TraversalStats::default(),
            debug: false,
        }
    }

    /// Enable verbose target loading messages
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn state(&self) -> TraversalState {
        self.state
    }

    pub fn cursor(&self) -> Option<ScanCursor> {
        self.cursor
    }

    pub fn arena(&self) -> &AlleleArena {
        &self.queue.arena
    }

    pub fn registered_alleles(&self) -> &[crate::allele::AlleleId] {
        self.queue.registered_alleles()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn current_target(&self) -> Option<IntRange> {
        let cursor = self.cursor?;
        self.targets
            .chrom(cursor.chrom_index)
            .get(cursor.target_index)
            .copied()
    }

    /// Position the cursor on the start of the first target with available reference data
    ///
    /// Fails with EmptyTargetSet if there are no targets, or none of their sequences are found in
    /// the reference.
    ///
    pub fn to_first_target_position(&mut self) -> Result<bool, ScanError> {
        assert_eq!(self.state, TraversalState::NotStarted);
        if self.targets.is_empty() || !self.to_chrom_from(0)? {
            return Err(ScanError::EmptyTargetSet);
        }
        Ok(true)
    }

    /// Advance the cursor by one position within the current target
    ///
    /// Returns false, leaving the state machine between targets, if the target is complete.
    ///
    pub fn to_next_target_position(&mut self) -> Result<bool, ScanError> {
        assert_eq!(self.state, TraversalState::ScanningTarget);
        let target = self.current_target().ok_or(ScanError::EmptyTargetSet)?;
        let cursor = self.cursor.as_mut().ok_or(ScanError::EmptyTargetSet)?;
        cursor.pos += 1;
        if cursor.pos >= target.end {
            self.state = TraversalState::BetweenTargets;
            return Ok(false);
        }
        self.update_position()?;
        Ok(true)
    }

    /// Load the next target on the current reference sequence
    ///
    /// Returns false, leaving the state machine at the end of the reference sequence, if there are
    /// no more targets on it.
    ///
    pub fn to_next_target(&mut self) -> Result<bool, ScanError> {
        assert_eq!(self.state, TraversalState::BetweenTargets);
        let cursor = self.cursor.ok_or(ScanError::EmptyTargetSet)?;
        let next_target_index = cursor.target_index + 1;
        if next_target_index >= self.targets.chrom(cursor.chrom_index).len() {
            self.state = TraversalState::EndOfReferenceSequence;
            return Ok(false);
        }
        self.load_target(cursor.chrom_index, next_target_index)?;
        Ok(true)
    }

    /// Advance to the first target of the next reference sequence with targets and reference data
    ///
    /// Returns false, completing the traversal, if all reference sequences are exhausted.
    ///
    pub fn to_next_ref_id(&mut self) -> Result<bool, ScanError> {
        assert_eq!(self.state, TraversalState::EndOfReferenceSequence);
        let next_chrom_index = self.cursor.map(|x| x.chrom_index + 1).unwrap_or(0);
        self.to_chrom_from(next_chrom_index)
    }

    fn to_chrom_from(&mut self, first_chrom_index: usize) -> Result<bool, ScanError> {
        for chrom_index in first_chrom_index..self.targets.chrom_count() {
            if self.targets.chrom(chrom_index).is_empty() {
                continue;
            }
            let chrom_label = self.chrom_list.label(chrom_index);
            if self.reference.chrom_length(chrom_label).is_none() {
                warn!("Skipping targets on sequence '{chrom_label}', which is not found in the reference");
                continue;
            }
            self.load_target(chrom_index, 0)?;
            return Ok(true);
        }
        self.state = TraversalState::Done;
        self.queue.clear();
        self.ref_window = None;
        Ok(false)
    }

    /// Load reference data for the given target, and set the cursor to its start
    ///
    /// Queued alignments which do not reach the new target are dropped. The observations at the
    /// target start are gathered before returning.
    ///
    pub fn load_target(&mut self, chrom_index: usize, target_index: usize) -> Result<(), ScanError> {
        let target = self.targets.chrom(chrom_index)[target_index];
        let chrom_label = self.chrom_list.label(chrom_index).to_string();
        debug_msg!(
            self.debug,
            "Loading target {chrom_label}:{}-{}",
            target.start + 1,
            target.end
        );

        let chrom_length = self
            .reference
            .chrom_length(&chrom_label)
            .unwrap_or(self.chrom_list.data[chrom_index].length) as i64;
        let window_range = IntRange::from_pair(
            std::cmp::max(target.start - self.settings.bases_before_target, 0),
            std::cmp::min(target.end + self.settings.bases_after_target, chrom_length),
        );
        let bases = self
            .reference
            .load(&chrom_label, window_range.start, window_range.end)?;
        self.ref_window = Some(RefWindow {
            chrom_index,
            range: window_range,
            bases,
        });

        let is_new_chrom = self.cursor.is_none_or(|x| x.chrom_index != chrom_index);
        if is_new_chrom {
            info!("Scanning targets on sequence '{chrom_label}'");
            self.queue.clear();
        }
        self.cursor = Some(ScanCursor {
            chrom_index,
            pos: target.start,
            target_index,
        });
        self.state = TraversalState::ScanningTarget;
        self.stats.targets_scanned += 1;
        self.update_position()
    }

    /// Update all alignment and allele state for a new cursor position
    fn update_position(&mut self) -> Result<(), ScanError> {
        self.update_alignment_queue()?;
        let pos = self.cursor.map(|x| x.pos).ok_or(ScanError::EmptyTargetSet)?;
        self.queue.update_registered_alleles(pos);
        self.stats.positions_scanned += 1;
        Ok(())
    }

    fn check_sort_order(&mut self, alignment: &Alignment) -> Result<(), ScanError> {
        if let Some(last) = &self.last_stream_pos {
            if (alignment.chrom_index, alignment.pos) < (last.chrom_index, last.pos) {
                return Err(ScanError::UnsortedStream {
                    read_name: alignment.read_name.clone(),
                    chrom: self.chrom_list.label(alignment.chrom_index).to_string(),
                    pos: alignment.pos,
                    prev_chrom: self.chrom_list.label(last.chrom_index).to_string(),
                    prev_pos: last.pos,
                });
            }
        }
        self.last_stream_pos = Some(StreamPosition {
            chrom_index: alignment.chrom_index,
            pos: alignment.pos,
        });
        Ok(())
    }

    fn handle_malformed_alignment(&mut self, err: ScanError) {
        self.stats.alignments_malformed += 1;
        if self.stats.alignments_malformed <= MAX_MALFORMED_ALIGNMENT_WARNINGS {
            warn!("Skipping alignment: {err}");
            if self.stats.alignments_malformed == MAX_MALFORMED_ALIGNMENT_WARNINGS {
                warn!("Further malformed alignment warnings will be suppressed");
            }
        }
    }

    /// Extend the reference window to cover the given range, if required
    ///
    fn ensure_ref_window(&mut self, chrom_index: usize, range: &IntRange) -> Result<(), ScanError> {
        let window = match &self.ref_window {
            Some(x) if x.covers(chrom_index, range) => return Ok(()),
            Some(x) if x.chrom_index == chrom_index => IntRange::from_pair(
                std::cmp::min(x.range.start, range.start),
                std::cmp::max(x.range.end, range.end),
            ),
            _ => *range,
        };
        let chrom_label = self.chrom_list.label(chrom_index).to_string();
        debug!(
            "Extending reference window to {chrom_label}:{}-{}",
            window.start + 1,
            window.end
        );
        let bases = self.reference.load(&chrom_label, window.start, window.end)?;
        self.ref_window = Some(RefWindow {
            chrom_index,
            range: window,
            bases,
        });
        Ok(())
    }

    fn register(&mut self, alignment: Alignment) -> Result<(), ScanError> {
        let span = IntRange::from_pair(alignment.pos, alignment.end);
        if let Err(e) = self.ensure_ref_window(alignment.chrom_index, &span) {
            let reason = e.to_string();
            return Err(ScanError::MalformedAlignment {
                read_name: alignment.read_name,
                chrom_index: alignment.chrom_index,
                pos: alignment.pos,
                reason,
            });
        }
        let Some(ref_window) = &self.ref_window else {
            return Ok(());
        };
        if self
            .queue
            .register(alignment, ref_window, &self.settings.registration)?
        {
            self.stats.alignments_registered += 1;
        } else {
            self.stats.alignments_mismatch_filtered += 1;
        }
        Ok(())
    }

    /// Pull all alignments starting at or before the scan position into the alignment queue
    ///
    /// Alignments from earlier reference sequences, or which end before the scan position, are
    /// discarded.
    ///
    pub fn update_alignment_queue(&mut self) -> Result<(), ScanError> {
        let Some(cursor) = self.cursor else {
            return Ok(());
        };
        loop {
            let alignment = match self.pending.take() {
                Some(x) => x,
                None => match self.source.next() {
                    None => break,
                    Some(Err(e)) => {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        self.handle_malformed_alignment(e);
                        continue;
                    }
                    Some(Ok(x)) => {
                        self.check_sort_order(&x)?;
                        self.stats.alignments_pulled += 1;
                        x
                    }
                },
            };

            if alignment.chrom_index > cursor.chrom_index
                || (alignment.chrom_index == cursor.chrom_index && alignment.pos > cursor.pos)
            {
                self.pending = Some(alignment);
                break;
            }

            if alignment.chrom_index < cursor.chrom_index || alignment.end <= cursor.pos {
                self.stats.alignments_outside_targets += 1;
                continue;
            }

            if let Err(e) = self.register(alignment) {
                if e.is_fatal() {
                    return Err(e);
                }
                self.handle_malformed_alignment(e);
            }
        }
        Ok(())
    }

    /// Observations at the current cursor position, grouped by sample
    ///
    pub fn get_alleles(&self) -> Option<PositionAlleles> {
        if self.state != TraversalState::ScanningTarget {
            return None;
        }
        let cursor = self.cursor?;
        let ref_base = self.ref_window.as_ref()?.base_at(cursor.pos)?;
        Some(PositionAlleles {
            chrom_index: cursor.chrom_index,
            pos: cursor.pos,
            ref_base,
            sample_groups: self.queue.get_sample_groups(cursor.pos),
        })
    }

    /// Advance the traversal to the next scan position and return its observations
    ///
    /// Returns None when all targets are complete.
    ///
    pub fn get_next_alleles(&mut self) -> Result<Option<PositionAlleles>, ScanError> {
        loop {
            let positioned = match self.state {
                TraversalState::NotStarted => self.to_first_target_position()?,
                TraversalState::ScanningTarget => self.to_next_target_position()?,
                TraversalState::BetweenTargets => self.to_next_target()?,
                TraversalState::EndOfReferenceSequence => self.to_next_ref_id()?,
                TraversalState::Done => return Ok(None),
            };
            if positioned {
                return Ok(self.get_alleles());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::tests::get_test_alignment;
    use crate::allele::AlleleType;
    use crate::genome_ref::GenomeRef;
    use crate::targets::Target;

    fn get_test_chrom_list() -> ChromList {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 40);
        chrom_list.add_chrom("chr2", 40);
        chrom_list
    }

    fn get_test_reference() -> Box<dyn ReferenceLoader> {
        let mut genome_ref = GenomeRef::default();
        let seq = b"ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT".to_vec();
        genome_ref.chroms.insert("chr1".to_string(), seq.clone());
        genome_ref.chroms.insert("chr2".to_string(), seq);
        Box::new(genome_ref)
    }

    fn get_test_targets(chrom_list: &ChromList, targets: &[(usize, i64, i64)]) -> TargetSet {
        let targets = targets
            .iter()
            .map(|&(chrom_index, start, end)| Target {
                chrom_index,
                range: IntRange::from_pair(start, end),
            })
            .collect::<Vec<_>>();
        TargetSet::new(chrom_list, &targets).unwrap()
    }

    fn get_test_traversal(
        targets: &[(usize, i64, i64)],
        alignments: Vec<Alignment>,
    ) -> TargetTraversal<impl Iterator<Item = Result<Alignment, ScanError>>> {
        let chrom_list = get_test_chrom_list();
        let targets = get_test_targets(&chrom_list, targets);
        let settings = TraversalSettings {
            bases_before_target: 2,
            bases_after_target: 2,
            ..Default::default()
        };
        TargetTraversal::new(
            chrom_list,
            targets,
            get_test_reference(),
            alignments.into_iter().map(Ok),
            settings,
        )
    }

    #[test]
    fn test_two_target_traversal_order() {
        let alignments = vec![
            get_test_alignment(b"r1\t0\tchr1\t3\t60\t6M\t*\t0\t0\tGTACGT\tIIIIII", 0, 0),
            get_test_alignment(b"r2\t0\tchr1\t12\t60\t8M\t*\t0\t0\tTACGTTCG\tIIIIIIII", 1, 0),
            get_test_alignment(b"r3\t0\tchr1\t25\t60\t4M\t*\t0\t0\tACGT\tIIII", 2, 0),
        ];
        let mut traversal = get_test_traversal(&[(0, 5, 9), (0, 14, 18)], alignments);

        let mut visited = Vec::new();
        let mut observation_counts = Vec::new();
        while let Some(position_alleles) = traversal.get_next_alleles().unwrap() {
            visited.push(position_alleles.pos);
            observation_counts.push(
                position_alleles
                    .sample_groups
                    .values()
                    .map(|x| x.len())
                    .sum::<usize>(),
            );
        }
        assert_eq!(visited, vec![5, 6, 7, 8, 14, 15, 16, 17]);
        assert_eq!(observation_counts, vec![1, 1, 1, 0, 1, 1, 1, 1]);
        assert_eq!(traversal.state(), TraversalState::Done);
        assert_eq!(traversal.stats.targets_scanned, 2);
        assert_eq!(traversal.stats.alignments_registered, 2);
        assert_eq!(traversal.stats.alignments_pulled, 3);
    }

    #[test]
    fn test_traversal_finds_substitution() {
        let alignments = vec![get_test_alignment(
            b"r1\t0\tchr2\t3\t60\t6M\t*\t0\t0\tGTTCGT\tIIIIII",
            0,
            0,
        )];
        let mut traversal = get_test_traversal(&[(1, 3, 6)], alignments);

        let mut found = Vec::new();
        while let Some(position_alleles) = traversal.get_next_alleles().unwrap() {
            assert_eq!(position_alleles.chrom_index, 1);
            for ids in position_alleles.sample_groups.values() {
                for &id in ids {
                    let allele = &traversal.arena()[id];
                    found.push((allele.pos, allele.allele_type, position_alleles.ref_base));
                }
            }
        }
        assert_eq!(
            found,
            vec![
                (3, AlleleType::Reference, b'T'),
                (4, AlleleType::Substitution, b'A'),
                (5, AlleleType::Reference, b'C'),
            ]
        );
    }

    #[test]
    fn test_eviction_after_advance() {
        let alignments = vec![
            get_test_alignment(b"r1\t0\tchr1\t1\t60\t2M3D2M\t*\t0\t0\tACAC\tIIII", 0, 0),
            get_test_alignment(b"r2\t0\tchr1\t2\t60\t10M\t*\t0\t0\tCGTACGTACG\tIIIIIIIIII", 1, 0),
        ];
        let mut traversal = get_test_traversal(&[(0, 0, 12)], alignments);
        while let Some(position_alleles) = traversal.get_next_alleles().unwrap() {
            let pos = position_alleles.pos;
            for &id in traversal.registered_alleles() {
                let allele = &traversal.arena()[id];
                assert!(allele.pos + allele.length > pos || allele.pos == pos);
            }
        }
    }

    #[test]
    fn test_unsorted_stream() {
        let alignments = vec![
            get_test_alignment(b"r1\t0\tchr1\t10\t60\t4M\t*\t0\t0\tCGTA\tIIII", 0, 0),
            get_test_alignment(b"r2\t0\tchr1\t5\t60\t4M\t*\t0\t0\tACGT\tIIII", 1, 0),
        ];
        let mut traversal = get_test_traversal(&[(0, 0, 20)], alignments);

        let mut observation_count = 0;
        let err = loop {
            match traversal.get_next_alleles() {
                Ok(Some(x)) => observation_count += x.sample_groups.len(),
                Ok(None) => panic!("Unsorted alignment stream was not detected"),
                Err(e) => break e,
            }
        };
        assert_eq!(observation_count, 0);
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ScanError::UnsortedStream {
                pos: 4,
                prev_pos: 9,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_target_set() {
        let mut traversal = get_test_traversal(&[], Vec::new());
        assert!(matches!(
            traversal.get_next_alleles(),
            Err(ScanError::EmptyTargetSet)
        ));
    }

    #[test]
    fn test_alignment_past_chrom_end_is_skipped() {
        let alignments = vec![
            get_test_alignment(b"r1\t0\tchr1\t37\t60\t8M\t*\t0\t0\tACGTACGT\tIIIIIIII", 0, 0),
            get_test_alignment(b"r2\t0\tchr1\t38\t60\t2M\t*\t0\t0\tGT\tII", 1, 0),
        ];
        let mut traversal = get_test_traversal(&[(0, 36, 40)], alignments);
        let mut positions = 0;
        while traversal.get_next_alleles().unwrap().is_some() {
            positions += 1;
        }
        assert_eq!(positions, 4);
        assert_eq!(traversal.stats.alignments_malformed, 1);
        assert_eq!(traversal.stats.alignments_registered, 1);
    }

    #[test]
    fn test_skip_chrom_missing_from_reference() {
        let chrom_list = {
            let mut x = get_test_chrom_list();
            x.add_chrom("chr3", 40);
            x
        };
        let targets = get_test_targets(&chrom_list, &[(2, 0, 4), (1, 0, 2)]);
        let mut traversal = TargetTraversal::new(
            chrom_list,
            targets,
            get_test_reference(),
            std::iter::empty(),
            TraversalSettings::default(),
        );
        let mut visited = Vec::new();
        while let Some(x) = traversal.get_next_alleles().unwrap() {
            visited.push((x.chrom_index, x.pos));
        }
        assert_eq!(visited, vec![(1, 0), (1, 1)]);

        // No target sequence is in the reference
        let chrom_list = {
            let mut x = get_test_chrom_list();
            x.add_chrom("chr3", 40);
            x
        };
        let targets = get_test_targets(&chrom_list, &[(2, 0, 4)]);
        let mut traversal = TargetTraversal::new(
            chrom_list,
            targets,
            get_test_reference(),
            std::iter::empty(),
            TraversalSettings::default(),
        );
        assert!(matches!(
            traversal.get_next_alleles(),
            Err(ScanError::EmptyTargetSet)
        ));
        assert_eq!(traversal.state(), TraversalState::Done);
    }
}
