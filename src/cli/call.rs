use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use const_format::concatcp;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};
use unwrap::unwrap;

use super::utils::{check_optional_filename, check_required_filename};
use crate::bayes::GenotypePrior;
use crate::chrom_list::ChromList;
use crate::registration::RegistrationSettings;
use crate::sample_naming::SampleNaming;
use crate::site_caller::SiteCallSettings;
use crate::traversal::TraversalSettings;

pub const SETTINGS_FILENAME: &str = "call.settings.json";

#[derive(Args, Deserialize, Serialize)]
pub struct CallSettings {
    /// Directory for all call output (must not already exist)
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_output"))]
    pub output_dir: Utf8PathBuf,

    /// Coordinate-sorted alignment file in BAM, CRAM or SAM format
    #[arg(long = "bam", value_name = "FILE")]
    pub bam_filename: String,

    /// Genome reference in FASTA format
    ///
    /// If a samtools fai index is found next to the FASTA file, reference spans are loaded on
    /// demand. Otherwise the whole reference is read into memory.
    ///
    #[arg(long = "ref", value_name = "FILE")]
    pub ref_filename: String,

    /// Target regions to call, in BED format (optionally bgzip compressed)
    ///
    /// Targets on the same sequence must not overlap. All sequences of the alignment header are
    /// scanned if no targets are given.
    ///
    #[arg(long = "targets", value_name = "FILE")]
    pub targets_filename: Option<String>,

    /// Restrict whole-genome scanning to sequence names matching this regex
    ///
    /// This has no effect when targets are given.
    ///
    #[arg(long, value_name = "REGEX")]
    pub chrom_regex: Option<String>,

    /// Ploidy of every sample
    #[arg(long, default_value_t = 2)]
    pub ploidy: usize,

    /// Method used to assign each alignment to a sample
    #[arg(long, value_enum, default_value_t = SampleNaming::ReadGroup)]
    pub sample_naming: SampleNaming,

    /// Delimiter ending the sample name prefix of each read name, for read-name sample naming
    #[arg(long, default_value = "-")]
    pub sample_delimiter: String,

    /// Sample name to use for single sample naming
    #[arg(long)]
    pub sample_name: Option<String>,

    /// File listing the samples to call, one name per line
    ///
    /// Samples are reported in file order, and alignments from any sample not in the list are
    /// skipped. Cannot be used with single sample naming.
    ///
    #[arg(long = "samples", value_name = "FILE")]
    pub samples_filename: Option<String>,

    /// Alignments with mapping quality below this value are skipped
    #[arg(long, default_value_t = 30)]
    pub min_mapq: u8,

    /// Bases with quality below this value are not used as allele observations
    #[arg(long, default_value_t = 20)]
    pub min_base_quality: u8,

    /// Mismatched bases are counted toward the mismatch limit at this base quality or higher
    #[arg(long, default_value_t = 10)]
    pub mismatch_base_quality: u8,

    /// Alignments with more mismatches than this are skipped
    #[arg(long, default_value_t = 10)]
    pub max_mismatches: usize,

    /// A site is only evaluated if some non-reference observation has at least this mapping
    /// quality
    #[arg(long, default_value_t = 30)]
    pub min_alt_mapq: u8,

    /// A site is only evaluated if some non-reference observation has at least this base quality
    #[arg(long, default_value_t = 20)]
    pub min_alt_base_quality: u8,

    /// Indels within this many reference bases of either alignment end are not used
    #[arg(long, default_value_t = 0)]
    pub indel_exclusion_window: i64,

    /// Expected rate of distinct non-reference alleles per genotype, used for the genotype prior
    #[arg(long, default_value_t = 1e-3)]
    pub theta: f64,

    /// Use a flat genotype prior instead of the theta prior
    #[arg(long)]
    pub flat_prior: bool,

    /// Minimum probability that any sample carries a non-reference allele for a variant call
    #[arg(long, default_value_t = 0.5)]
    pub min_alt_prob: f64,

    /// Maximum probability that every sample is homozygous reference for a variant call
    #[arg(long, default_value_t = 0.05)]
    pub max_site_pvalue: f64,

    /// Scale applied to the ln likelihood of each observation, lower values reduce the weight of
    /// correlated reads
    #[arg(long, default_value_t = 1.0)]
    pub read_dependence_factor: f64,

    /// Maximum number of alleles considered at each site, including the reference allele
    #[arg(long, default_value_t = 4)]
    pub max_candidate_alleles: usize,

    /// Number of genotypes per sample included in the approximate normalization
    #[arg(hide = true, long, default_value_t = 3)]
    pub approx_top_genotypes: usize,

    /// Sites with more joint genotype combinations than this use the approximate normalization
    #[arg(hide = true, long, default_value_t = 100_000)]
    pub max_exact_joint_combos: usize,

    /// Reference bases loaded before each target
    #[arg(hide = true, long, default_value_t = 100)]
    pub bases_before_target: i64,

    /// Reference bases loaded after each target
    #[arg(hide = true, long, default_value_t = 100)]
    pub bases_after_target: i64,

    /// Report every covered position instead of only variant sites
    #[arg(long)]
    pub report_all_sites: bool,
}

impl CallSettings {
    pub fn prior(&self) -> GenotypePrior {
        if self.flat_prior {
            GenotypePrior::Flat
        } else {
            GenotypePrior::Theta(self.theta)
        }
    }

    pub fn traversal_settings(&self) -> TraversalSettings {
        TraversalSettings {
            bases_before_target: self.bases_before_target,
            bases_after_target: self.bases_after_target,
            registration: RegistrationSettings {
                min_base_quality: self.min_base_quality,
                mismatch_base_quality: self.mismatch_base_quality,
                max_mismatches: self.max_mismatches,
                indel_exclusion_window: self.indel_exclusion_window,
            },
        }
    }

    pub fn site_call_settings(&self) -> SiteCallSettings {
        SiteCallSettings {
            ploidy: self.ploidy,
            prior: self.prior(),
            min_alt_prob: self.min_alt_prob,
            max_site_pvalue: self.max_site_pvalue,
            max_candidate_alleles: self.max_candidate_alleles,
            approx_top_genotypes: self.approx_top_genotypes,
            max_exact_joint_combos: self.max_exact_joint_combos,
            report_all_sites: self.report_all_sites,
            read_dependence_factor: self.read_dependence_factor,
            min_alt_mapq: self.min_alt_mapq,
            min_alt_base_quality: self.min_alt_base_quality,
        }
    }
}

fn check_probability(value: f64, label: &str) -> SimpleResult<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("--{label} argument must be in [0,1]");
    }
    Ok(())
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_call_settings(settings: CallSettings) -> SimpleResult<CallSettings> {
    check_required_filename(&settings.ref_filename, "reference")?;

    check_required_filename(&settings.bam_filename, "alignment")?;

    check_optional_filename(settings.targets_filename.as_ref(), "targets")?;

    check_optional_filename(settings.samples_filename.as_ref(), "sample list")?;

    if settings.ploidy == 0 {
        bail!("--ploidy argument must be greater than 0");
    }

    if settings.max_candidate_alleles < 2 {
        bail!("--max-candidate-alleles argument must be at least 2");
    }

    if settings.approx_top_genotypes == 0 {
        bail!("--approx-top-genotypes argument must be greater than 0");
    }

    if settings.indel_exclusion_window < 0 {
        bail!("--indel-exclusion-window argument must not be negative");
    }

    if settings.bases_before_target < 0 || settings.bases_after_target < 0 {
        bail!("Target flank sizes must not be negative");
    }

    if settings.sample_delimiter.is_empty() {
        bail!("--sample-delimiter argument must not be empty");
    }

    if settings.sample_name.is_some() && settings.sample_naming != SampleNaming::Single {
        bail!("--sample-name can only be used with '--sample-naming single'");
    }

    if settings.samples_filename.is_some() && settings.sample_naming == SampleNaming::Single {
        bail!("--samples can't be used with '--sample-naming single'");
    }

    if !(settings.read_dependence_factor > 0.0 && settings.read_dependence_factor <= 1.0) {
        bail!("--read-dependence-factor argument must be in (0,1]");
    }

    if !settings.flat_prior && !(settings.theta > 0.0 && settings.theta <= 1.0) {
        bail!("--theta argument must be in (0,1]");
    }

    check_probability(settings.min_alt_prob, "min-alt-prob")?;
    check_probability(settings.max_site_pvalue, "max-site-pvalue")?;

    if let Some(chrom_regex) = &settings.chrom_regex {
        if let Err(e) = regex::Regex::new(chrom_regex) {
            bail!("Invalid --chrom-regex argument '{chrom_regex}': {e}");
        }
    }

    Ok(settings)
}

#[derive(Debug, PartialEq)]
enum SettingValidationError {
    NotFound,
    UnMapped,
    NoChromMatch,
}

fn validate_call_settings_data_impl(settings: &CallSettings) -> Result<(), SettingValidationError> {
    use log::error;
    use regex::Regex;
    use rust_htslib::bam::{self, Read};

    let chrom_list = {
        let bam_reader = match bam::Reader::from_path(&settings.bam_filename) {
            Ok(x) => x,
            Err(error) => {
                error!("Failed to open input alignment file: {}", error);
                return Err(SettingValidationError::NotFound);
            }
        };
        ChromList::from_bam_header(bam_reader.header())
    };

    // Check for unmapped input
    if chrom_list.data.is_empty() {
        error!(
            "Input alignment file is not mapped: '{}'",
            &settings.bam_filename
        );
        return Err(SettingValidationError::UnMapped);
    }

    // Check that the chromosome regex can select at least one sequence to scan
    if settings.targets_filename.is_none() {
        if let Some(chrom_regex) = &settings.chrom_regex {
            let chrom_include_regex = Regex::new(chrom_regex).unwrap();
            let is_any_match = chrom_list
                .data
                .iter()
                .any(|x| chrom_include_regex.is_match(x.label.as_str()));

            if !is_any_match {
                error!(
                    "Chromosome regex '{chrom_regex}' does not match any chromosome names in the input alignment file"
                );
                return Err(SettingValidationError::NoChromMatch);
            }
        }
    }
    Ok(())
}

/// Check settings against the content of the input files
///
/// Assumes that the logger is setup
///
pub fn validate_call_settings_data(settings: &CallSettings) {
    if let Err(err) = validate_call_settings_data_impl(settings) {
        match err {
            SettingValidationError::NotFound => std::process::exit(exitcode::USAGE),
            _ => std::process::exit(exitcode::DATAERR),
        }
    }
}

/// Write call settings out in json format
pub fn write_call_settings(output_dir: &Utf8Path, settings: &CallSettings) {
    use log::info;

    let filename = output_dir.join(SETTINGS_FILENAME);

    info!("Writing call settings to file: '{filename}'");

    let f = unwrap!(
        std::fs::File::create(&filename),
        "Unable to create call settings json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &settings).unwrap();
}
