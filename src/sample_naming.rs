//! Assign each alignment to a sample
//!

use std::collections::HashMap;

use clap::ValueEnum;
use log::info;
use rust_htslib::bam;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};
use strum::Display;
use unwrap::unwrap;

/// Convention used to derive the sample name of each alignment
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum SampleNaming {
    /// Sample name from the SM field of the header read group matching the alignment's RG tag
    #[default]
    ReadGroup,

    /// Sample name is the read name prefix before the first sample delimiter
    ReadName,

    /// All alignments belong to a single sample
    Single,
}

/// Sample names in first-seen order
///
#[derive(Clone, Debug, Default)]
pub struct SampleList {
    pub names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl SampleList {
    /// Return the index of the sample, adding it to the list if not seen before
    pub fn get_or_insert(&mut self, name: &str) -> usize {
        if let Some(&index) = self.name_to_index.get(name) {
            return index;
        }
        let index = self.names.len();
        self.names.push(name.to_string());
        self.name_to_index.insert(name.to_string(), index);
        index
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

/// Parse sample names from the text of a sample list file, one name per line
///
/// Blank lines and lines starting with '#' are skipped.
///
pub fn parse_sample_list(content: &str) -> SimpleResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for (line_index, line) in content.lines().enumerate() {
        let name = line.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        if names.iter().any(|x| x == name) {
            bail!(
                "Duplicate sample name '{name}' on line {} of sample list file",
                line_index + 1
            );
        }
        names.push(name.to_string());
    }
    if names.is_empty() {
        bail!("Sample list file does not contain any sample names");
    }
    Ok(names)
}

/// Read sample names from a file, which may be plain text or bgzip compressed
///
pub fn read_sample_list(filename: &str) -> SimpleResult<Vec<String>> {
    use rust_htslib::bgzf;
    use std::io::Read;

    info!("Reading sample names from file '{filename}'");

    let mut reader = unwrap!(
        bgzf::Reader::from_path(filename),
        "Unable to open sample list file: '{filename}'"
    );

    let mut content = String::new();
    unwrap!(
        reader.read_to_string(&mut content),
        "Can't parse text from sample list file: '{filename}'"
    );

    parse_sample_list(&content)
}

/// Parse all read group id to sample name pairs from the text of a bam header
///
/// Read groups without an SM field are skipped. Header order is preserved.
///
fn get_read_group_samples(header_text: &str) -> Vec<(String, String)> {
    let mut rg_samples = Vec::new();
    for line in header_text.split('\n') {
        let mut words = line.split('\t');
        if words.next() != Some("@RG") {
            continue;
        }
        let mut id = None;
        let mut sample_name = None;
        for word in words {
            if let Some(x) = word.strip_prefix("ID:") {
                id = Some(x);
            } else if let Some(x) = word.strip_prefix("SM:") {
                sample_name = Some(x);
            }
        }
        if let (Some(id), Some(sample_name)) = (id, sample_name) {
            rg_samples.push((id.to_string(), sample_name.to_string()));
        }
    }
    rg_samples
}

const UNKNOWN_SAMPLE_NAME: &str = "unknown";

pub struct SampleResolver {
    naming: SampleNaming,
    delimiter: String,

    /// Map from read group id to sample index, None for samples outside of a fixed sample list
    read_group_samples: HashMap<String, Option<usize>>,

    /// Sample used when an alignment's sample can't be resolved otherwise
    default_sample_name: String,

    /// When set, the sample list was given up front and alignments from any other sample are
    /// not resolved
    is_fixed_sample_list: bool,

    pub samples: SampleList,
}

impl SampleResolver {
    /// # Arguments
    /// * `sample_name` - Sample name used in 'single' naming mode. If not given the first header
    ///   read group sample is used.
    /// * `sample_list` - Fixed list of samples to call, in output order. Alignments from other
    ///   samples are skipped. Not used in 'single' naming mode.
    ///
    pub fn new(
        header_text: &str,
        naming: SampleNaming,
        delimiter: &str,
        sample_name: Option<&str>,
        sample_list: Option<&[String]>,
    ) -> Self {
        let rg_samples = get_read_group_samples(header_text);
        let first_header_sample = rg_samples
            .first()
            .map(|(_, x)| x.clone())
            .unwrap_or(UNKNOWN_SAMPLE_NAME.to_string());

        let mut samples = SampleList::default();
        let is_fixed_sample_list = naming != SampleNaming::Single && sample_list.is_some();
        if is_fixed_sample_list {
            for name in sample_list.into_iter().flatten() {
                samples.get_or_insert(name);
            }
        }

        let mut read_group_samples = HashMap::new();
        let default_sample_name = match naming {
            SampleNaming::ReadGroup => {
                for (id, name) in rg_samples.iter() {
                    let index = if is_fixed_sample_list {
                        samples.get(name)
                    } else {
                        Some(samples.get_or_insert(name))
                    };
                    read_group_samples.insert(id.clone(), index);
                }
                first_header_sample
            }
            SampleNaming::Single => {
                let name = sample_name.map(|x| x.to_string()).unwrap_or(first_header_sample);
                samples.get_or_insert(&name);
                name
            }
            SampleNaming::ReadName => UNKNOWN_SAMPLE_NAME.to_string(),
        };

        Self {
            naming,
            delimiter: delimiter.to_string(),
            read_group_samples,
            default_sample_name,
            is_fixed_sample_list,
            samples,
        }
    }

    pub fn from_bam_header(
        header: &bam::HeaderView,
        naming: SampleNaming,
        delimiter: &str,
        sample_name: Option<&str>,
        sample_list: Option<&[String]>,
    ) -> Self {
        let header_text = String::from_utf8_lossy(header.as_bytes());
        Self::new(&header_text, naming, delimiter, sample_name, sample_list)
    }

    /// Index of the named sample, adding it to the sample list unless the list is fixed
    fn sample_index(&mut self, name: &str) -> Option<usize> {
        if self.is_fixed_sample_list {
            self.samples.get(name)
        } else {
            Some(self.samples.get_or_insert(name))
        }
    }

    fn read_group_sample_index(&mut self, record: &bam::Record) -> Option<usize> {
        let rg = match record.aux(b"RG") {
            Ok(bam::record::Aux::String(x)) => Some(x),
            _ => None,
        };
        if let Some(&index) = rg.and_then(|x| self.read_group_samples.get(x)) {
            index
        } else {
            let name = self.default_sample_name.clone();
            self.sample_index(&name)
        }
    }

    fn read_name_sample_index(&mut self, qname: &str) -> Option<usize> {
        let name = match qname.split_once(self.delimiter.as_str()) {
            Some((prefix, _)) if !prefix.is_empty() => prefix,
            _ => self.default_sample_name.as_str(),
        };
        let name = name.to_string();
        self.sample_index(&name)
    }

    /// Return the sample index for the alignment record
    ///
    /// Returns None if the record's sample is not in a fixed sample list.
    ///
    pub fn resolve(&mut self, record: &bam::Record) -> Option<usize> {
        match self.naming {
            SampleNaming::ReadGroup => self.read_group_sample_index(record),
            SampleNaming::ReadName => {
                let qname = String::from_utf8_lossy(record.qname()).to_string();
                self.read_name_sample_index(&qname)
            }
            SampleNaming::Single => Some(0),
        }
    }
}
