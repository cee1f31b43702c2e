//! Top-level call workflow
//!

use std::error;
use std::io::Write;

use hhmmss::Hhmmss;
use log::info;
use regex::Regex;
use rust_htslib::bam::{self, Read};
use simple_error::{SimpleResult, simple_error};
use unwrap::unwrap;

use crate::alignment::BamAlignmentSource;
use crate::call_output::{CallWriter, get_call_file_writer};
use crate::chrom_list::ChromList;
use crate::cli;
use crate::errors::ScanError;
use crate::genome_ref::get_reference_loader;
use crate::run_stats::{CallRunStats, SiteCallStats, write_call_run_stats};
use crate::sample_naming::{SampleResolver, read_sample_list};
use crate::site_caller::{SiteCallSettings, call_site};
use crate::targets::{
    Target, TargetSet, get_whole_genome_targets, parse_region_str, read_bed_targets,
};
use crate::traversal::TargetTraversal;

/// Resolve the scan targets from the debug region list, the targets file, or the whole genome,
/// in that order of precedence
///
pub fn get_call_targets(
    shared_settings: &cli::SharedSettings,
    settings: &cli::CallSettings,
    chrom_list: &ChromList,
) -> SimpleResult<Vec<Target>> {
    if !shared_settings.target_region_list.is_empty() {
        shared_settings
            .target_region_list
            .iter()
            .map(|x| parse_region_str(chrom_list, x))
            .collect()
    } else if let Some(targets_filename) = &settings.targets_filename {
        read_bed_targets(chrom_list, targets_filename)
    } else {
        let chrom_regex = match &settings.chrom_regex {
            Some(x) => Some(
                Regex::new(x).map_err(|e| simple_error!("Invalid chromosome regex '{x}': {e}"))?,
            ),
            None => None,
        };
        Ok(get_whole_genome_targets(chrom_list, chrom_regex.as_ref()))
    }
}

/// Evaluate every scan position and write out the reportable site calls
///
fn call_all_sites<W: Write>(
    traversal: &mut TargetTraversal<BamAlignmentSource>,
    chrom_list: &ChromList,
    settings: &SiteCallSettings,
    writer: &mut CallWriter<W>,
) -> Result<SiteCallStats, ScanError> {
    let mut stats = SiteCallStats::default();
    while let Some(site) = traversal.get_next_alleles()? {
        let sample_names = traversal.source().sample_names();
        let Some(call) = call_site(&site, traversal.arena(), sample_names.len(), settings) else {
            continue;
        };
        let reported = call.is_variant || settings.report_all_sites;
        if reported {
            writer.write_call(&call, chrom_list, sample_names);
        }
        stats.add_site(&call, reported);
    }
    Ok(stats)
}

/// Call variants in all targets of the input alignment file
///
/// Assumes the output directory and logger are already setup.
///
pub fn run_call(
    shared_settings: &cli::SharedSettings,
    settings: &cli::CallSettings,
) -> Result<(), Box<dyn error::Error>> {
    let start = std::time::Instant::now();

    cli::validate_call_settings_data(settings);
    cli::write_call_settings(&settings.output_dir, settings);

    let bam_reader = unwrap!(
        bam::Reader::from_path(&settings.bam_filename),
        "Unable to open alignment file: '{}'",
        settings.bam_filename
    );
    let chrom_list = ChromList::from_bam_header(bam_reader.header());
    let sample_list = match &settings.samples_filename {
        Some(x) => Some(read_sample_list(x)?),
        None => None,
    };
    let sample_resolver = SampleResolver::from_bam_header(
        bam_reader.header(),
        settings.sample_naming,
        &settings.sample_delimiter,
        settings.sample_name.as_deref(),
        sample_list.as_deref(),
    );

    let targets = get_call_targets(shared_settings, settings, &chrom_list)?;
    let targets = TargetSet::new(&chrom_list, &targets)?;
    info!("Calling variants in {} target regions", targets.target_count());

    let reference = get_reference_loader(&settings.ref_filename);
    let source = BamAlignmentSource::new(bam_reader, sample_resolver, settings.min_mapq);
    let mut traversal = TargetTraversal::new(
        chrom_list.clone(),
        targets,
        reference,
        source,
        settings.traversal_settings(),
    )
    .with_debug(shared_settings.debug);

    let site_call_settings = settings.site_call_settings();
    let mut writer = get_call_file_writer(&settings.output_dir, settings.ploidy);
    let site_calls = call_all_sites(&mut traversal, &chrom_list, &site_call_settings, &mut writer)?;
    writer.into_inner();

    info!(
        "Finished scanning {} positions, evaluated {} sites and called {} variant sites",
        traversal.stats.positions_scanned, site_calls.sites_evaluated, site_calls.sites_called
    );
    if traversal.stats.alignments_malformed > 0 {
        info!(
            "Skipped {} malformed alignments",
            traversal.stats.alignments_malformed
        );
    }

    let run_stats = CallRunStats {
        sample_names: traversal.source().sample_names().to_vec(),
        alignment_input: traversal.source().stats.clone(),
        traversal: traversal.stats.clone(),
        site_calls,
        total_runtime_secs: start.elapsed().as_secs_f64(),
    };
    write_call_run_stats(&settings.output_dir, &run_stats);

    info!("Call step runtime: {}", start.elapsed().hhmmssxxx());
    Ok(())
}
