//! Target intervals to be scanned
//!
//! Targets can be read from a BED file, parsed from samtools-style region strings, or generated to
//! cover every reference sequence in the alignment file header.
//!

use std::fmt;

use bio::data_structures::interval_tree::IntervalTree;
use log::info;
use regex::Regex;
use simple_error::{SimpleResult, bail};
use unwrap::unwrap;

use crate::chrom_list::ChromList;
use crate::int_range::IntRange;

/// A contiguous region of a single reference sequence to scan
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Target {
    /// chrom_index is defined by the indexing scheme used in the input bam file
    pub chrom_index: usize,
    pub range: IntRange,
}

impl Target {
    /// Convert to a string in 'samtools' region format (e.g. chr20:100-200)
    ///
    pub fn to_region_str(&self, chrom_list: &ChromList) -> String {
        let chrom = chrom_list.label(self.chrom_index);
        format!("{chrom}:{}-{}", self.range.start + 1, self.range.end)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Target: {}:{:?}", self.chrom_index, self.range)
    }
}

/// Parse the chromosome string out of a samtools-style region string
///
/// Return the index of the chromosome, and an optional position string following the chromosome
/// name. Contig names containing a colon are tried as a whole when the split name isn't found.
///
fn parse_chrom_index_from_region_str<'a>(
    chrom_list: &ChromList,
    region_str: &'a str,
) -> SimpleResult<(usize, Option<&'a str>)> {
    let (chrom, pos_str) = match region_str.rsplit_once(':') {
        Some((chrom, pos_str)) => (chrom, Some(pos_str)),
        None => (region_str, None),
    };
    if let Some(&chrom_index) = chrom_list.label_to_index.get(chrom) {
        Ok((chrom_index, pos_str))
    } else if let Some(&chrom_index) = chrom_list.label_to_index.get(region_str) {
        Ok((chrom_index, None))
    } else {
        bail!(
            "Unexpected format in genome region string '{region_str}': can't find chromosome '{chrom}' in bam file header"
        );
    }
}

fn parse_coordinate(region_str: &str, s: &str) -> SimpleResult<i64> {
    // Strip any commas out of the number field (same as tabix cmdline behavior)
    let s = s.chars().filter(|&c| c != ',').collect::<String>();
    match s.parse::<i64>() {
        Ok(x) => Ok(x),
        Err(_) => bail!("Can't parse coordinate '{s}' in genome region string '{region_str}'"),
    }
}

/// Convert from a string in 'samtools' region format (e.g. chr20:100-200) to a target
///
/// The 1-indexed closed coordinates of the region string are converted to the zero-indexed
/// half-open convention. A region without an end coordinate extends to the end of the chromosome,
/// and a chromosome name alone covers the whole chromosome.
///
pub fn parse_region_str(chrom_list: &ChromList, region_str: &str) -> SimpleResult<Target> {
    let (chrom_index, pos_str) = parse_chrom_index_from_region_str(chrom_list, region_str)?;
    let chrom_size = chrom_list.data[chrom_index].length as i64;
    let range = match pos_str {
        Some(pos_str) => {
            let words = pos_str.split('-').collect::<Vec<_>>();
            if words.len() > 2 {
                bail!(
                    "Unexpected format in position range '{pos_str}' from genome region string '{region_str}'"
                );
            }
            let start = parse_coordinate(region_str, words[0])? - 1;
            let end = if words.len() == 1 {
                chrom_size
            } else {
                parse_coordinate(region_str, words[1])?
            };
            IntRange::from_pair(start, end)
        }
        None => IntRange::from_pair(0, chrom_size),
    };
    if range.start < 0 || range.is_empty() || range.end > chrom_size {
        bail!("Invalid range in genome region string '{region_str}'");
    }
    Ok(Target { chrom_index, range })
}

/// Parse targets from the text content of a BED file
///
/// Header, track and comment lines are skipped. Only the first 3 columns are used.
///
pub fn parse_bed_targets(chrom_list: &ChromList, content: &str) -> SimpleResult<Vec<Target>> {
    let mut targets = Vec::new();
    for (line_index, line) in content.lines().enumerate() {
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with("track")
            || line.starts_with("browser")
        {
            continue;
        }

        let words = line.split('\t').collect::<Vec<_>>();
        if words.len() < 3 {
            bail!(
                "Expected at least 3 columns on line {} of targets file",
                line_index + 1
            );
        }
        let chrom = words[0];
        let chrom_index = match chrom_list.label_to_index.get(chrom) {
            Some(&x) => x,
            None => bail!(
                "Target chromosome '{chrom}' on line {} of targets file is not found in the bam file header",
                line_index + 1
            ),
        };
        let (start, end) = match (words[1].parse::<i64>(), words[2].parse::<i64>()) {
            (Ok(start), Ok(end)) => (start, end),
            _ => bail!(
                "Can't parse target coordinates on line {} of targets file",
                line_index + 1
            ),
        };
        let chrom_size = chrom_list.data[chrom_index].length as i64;
        if start < 0 || end <= start || end > chrom_size {
            bail!(
                "Invalid target range {chrom}:{start}-{end} on line {} of targets file",
                line_index + 1
            );
        }
        targets.push(Target {
            chrom_index,
            range: IntRange::from_pair(start, end),
        });
    }
    Ok(targets)
}

/// Read targets from a BED file, which may be plain text or bgzip compressed
///
pub fn read_bed_targets(chrom_list: &ChromList, filename: &str) -> SimpleResult<Vec<Target>> {
    use rust_htslib::bgzf;
    use std::io::Read;

    info!("Reading target regions from file '{filename}'");

    let mut reader = unwrap!(
        bgzf::Reader::from_path(filename),
        "Unable to open targets file: '{filename}'"
    );

    let mut content = String::new();
    unwrap!(
        reader.read_to_string(&mut content),
        "Can't parse text from targets file: '{filename}'"
    );

    parse_bed_targets(chrom_list, &content)
}

/// Generate targets covering every reference sequence, optionally restricted to those whose name
/// matches chrom_regex
///
pub fn get_whole_genome_targets(chrom_list: &ChromList, chrom_regex: Option<&Regex>) -> Vec<Target> {
    chrom_list
        .data
        .iter()
        .enumerate()
        .filter(|(_, x)| x.length > 0)
        .filter(|(_, x)| chrom_regex.is_none_or(|re| re.is_match(&x.label)))
        .map(|(chrom_index, x)| Target {
            chrom_index,
            range: IntRange::from_pair(0, x.length as i64),
        })
        .collect()
}

/// Targets grouped by reference sequence
///
/// Reference sequences are ordered as in the bam file header. Within each sequence the input order
/// of the targets is preserved.
///
#[derive(Clone, Debug, Default)]
pub struct TargetSet {
    /// Target ranges indexed by chrom_index
    pub chrom_targets: Vec<Vec<IntRange>>,
}

impl TargetSet {
    /// Group targets by reference sequence, rejecting any overlapping targets
    ///
    pub fn new(chrom_list: &ChromList, targets: &[Target]) -> SimpleResult<Self> {
        let chrom_count = chrom_list.data.len();
        let mut chrom_targets = vec![Vec::new(); chrom_count];
        let mut overlap_check = (0..chrom_count)
            .map(|_| IntervalTree::new())
            .collect::<Vec<_>>();

        for target in targets.iter() {
            if target.chrom_index >= chrom_count {
                bail!("Target on unknown chromosome index {}", target.chrom_index);
            }
            let range = target.range;
            let tree = &mut overlap_check[target.chrom_index];
            if tree.find(range.start..range.end).next().is_some() {
                bail!(
                    "Overlapping target regions are not allowed, found overlap at {}",
                    target.to_region_str(chrom_list)
                );
            }
            tree.insert(range.start..range.end, ());
            chrom_targets[target.chrom_index].push(range);
        }
        Ok(Self { chrom_targets })
    }

    pub fn is_empty(&self) -> bool {
        self.chrom_targets.iter().all(|x| x.is_empty())
    }

    pub fn target_count(&self) -> usize {
        self.chrom_targets.iter().map(|x| x.len()).sum()
    }

    /// Targets on the given chromosome, empty if chrom_index is unknown
    pub fn chrom(&self, chrom_index: usize) -> &[IntRange] {
        self.chrom_targets
            .get(chrom_index)
            .map(|x| x.as_slice())
            .unwrap_or(&[])
    }

    pub fn chrom_count(&self) -> usize {
        self.chrom_targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_chrom_list() -> ChromList {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 1000);
        chrom_list.add_chrom("chr2", 500);
        chrom_list.add_chrom("HLA-DRB1*10:01:01", 200);
        chrom_list
    }

    #[test]
    fn test_parse_region_str() {
        let chrom_list = get_test_chrom_list();

        let target = parse_region_str(&chrom_list, "chr2:1,001-1,500");
        assert!(target.is_err());

        let target = parse_region_str(&chrom_list, "chr1:101-200").unwrap();
        assert_eq!(target.chrom_index, 0);
        assert_eq!(target.range, IntRange::from_pair(100, 200));
        assert_eq!(target.to_region_str(&chrom_list), "chr1:101-200");

        let target = parse_region_str(&chrom_list, "chr2:101").unwrap();
        assert_eq!(target.range, IntRange::from_pair(100, 500));

        let target = parse_region_str(&chrom_list, "chr2").unwrap();
        assert_eq!(target.range, IntRange::from_pair(0, 500));

        let target = parse_region_str(&chrom_list, "HLA-DRB1*10:01:01").unwrap();
        assert_eq!(target.chrom_index, 2);
        assert_eq!(target.range, IntRange::from_pair(0, 200));

        assert!(parse_region_str(&chrom_list, "chr3:1-10").is_err());
    }

    #[test]
    fn test_parse_bed_targets() {
        let chrom_list = get_test_chrom_list();
        let content = "#comment\nchr2\t10\t20\tfoo\nchr1\t5\t8\n\n";
        let targets = parse_bed_targets(&chrom_list, content).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].chrom_index, 1);
        assert_eq!(targets[0].range, IntRange::from_pair(10, 20));

        assert!(parse_bed_targets(&chrom_list, "chrX\t1\t2\n").is_err());
        assert!(parse_bed_targets(&chrom_list, "chr1\t1\n").is_err());
        assert!(parse_bed_targets(&chrom_list, "chr1\t10\t2000\n").is_err());
    }

    #[test]
    fn test_target_set_grouping() {
        let chrom_list = get_test_chrom_list();
        let targets = vec![
            Target {
                chrom_index: 1,
                range: IntRange::from_pair(10, 20),
            },
            Target {
                chrom_index: 0,
                range: IntRange::from_pair(50, 60),
            },
            Target {
                chrom_index: 0,
                range: IntRange::from_pair(5, 8),
            },
        ];
        let target_set = TargetSet::new(&chrom_list, &targets).unwrap();
        assert_eq!(target_set.target_count(), 3);
        assert_eq!(
            target_set.chrom(0),
            &[IntRange::from_pair(50, 60), IntRange::from_pair(5, 8)]
        );
        assert_eq!(target_set.chrom(1), &[IntRange::from_pair(10, 20)]);
        assert!(target_set.chrom(2).is_empty());
        assert!(target_set.chrom(7).is_empty());
    }

    #[test]
    fn test_target_set_rejects_overlap() {
        let chrom_list = get_test_chrom_list();
        let targets = vec![
            Target {
                chrom_index: 0,
                range: IntRange::from_pair(10, 20),
            },
            Target {
                chrom_index: 0,
                range: IntRange::from_pair(19, 30),
            },
        ];
        assert!(TargetSet::new(&chrom_list, &targets).is_err());

        // Adjacent targets are fine
        let targets = vec![targets[0], {
            let mut x = targets[1];
            x.range.start = 20;
            x
        }];
        assert!(TargetSet::new(&chrom_list, &targets).is_ok());
    }

    #[test]
    fn test_get_whole_genome_targets() {
        let chrom_list = get_test_chrom_list();
        let targets = get_whole_genome_targets(&chrom_list, None);
        assert_eq!(targets.len(), 3);

        let re = Regex::new(r"^chr\d+$").unwrap();
        let targets = get_whole_genome_targets(&chrom_list, Some(&re));
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].range, IntRange::from_pair(0, 500));
    }
}
