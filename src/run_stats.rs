//! Track stats for the whole bambayes run
//!

use std::fs::File;

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use unwrap::unwrap;

use crate::alignment::AlignmentSourceStats;
use crate::site_caller::SiteCall;
use crate::traversal::TraversalStats;

pub const RUN_STATS_FILENAME: &str = "run.stats.json";

#[derive(Default, Deserialize, Serialize)]
pub struct SiteCallStats {
    /// Positions where genotype likelihoods were computed
    pub sites_evaluated: usize,

    /// Sites passing the variant call thresholds
    pub sites_called: usize,

    /// Sites written to the calls file
    pub sites_reported: usize,

    /// Genotype likelihoods with a degenerate term replaced by the probability floor
    pub underflow_clamps: usize,

    pub approximate_normalizations: usize,
}

impl SiteCallStats {
    pub fn add_site(&mut self, call: &SiteCall, reported: bool) {
        self.sites_evaluated += 1;
        if call.is_variant {
            self.sites_called += 1;
        }
        if reported {
            self.sites_reported += 1;
        }
        self.underflow_clamps += call.floored_count;
        if !call.exact_normalization {
            self.approximate_normalizations += 1;
        }
    }
}

#[derive(Default, Deserialize, Serialize)]
pub struct CallRunStats {
    pub sample_names: Vec<String>,
    pub alignment_input: AlignmentSourceStats,
    pub traversal: TraversalStats,
    pub site_calls: SiteCallStats,
    pub total_runtime_secs: f64,
}

/// Write run_stats structure out in json format
pub fn write_call_run_stats(output_dir: &Utf8Path, run_stats: &CallRunStats) {
    let filename = output_dir.join(RUN_STATS_FILENAME);

    info!("Writing run statistics to file: '{filename}'");

    let f = unwrap!(
        File::create(&filename),
        "Unable to create run statistics json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &run_stats).unwrap();
}
