mod alignment;
mod allele;
mod bayes;
mod call;
mod call_output;
mod chrom_list;
mod cli;
mod errors;
mod genome_ref;
mod genotype;
mod globals;
mod int_range;
mod log_utils;
mod logger;
mod os_utils;
mod prob_utils;
mod registration;
mod run_stats;
mod sample_naming;
mod site_caller;
mod targets;
mod traversal;

use std::{error, process};

use hhmmss::Hhmmss;
use log::{error, info};

use crate::call::run_call;
use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};
use crate::logger::setup_output_dir_and_logger;

fn run(settings: &cli::Settings) -> Result<(), Box<dyn error::Error>> {
    info!("Starting {PROGRAM_NAME} {PROGRAM_VERSION}");
    info!(
        "cmdline: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    let start = std::time::Instant::now();

    run_call(&settings.shared, &settings.call)?;

    info!(
        "{PROGRAM_NAME} completed. Total Runtime: {}",
        start.elapsed().hhmmssxxx()
    );
    Ok(())
}

fn main() {
    let settings = cli::validate_and_fix_settings(cli::parse_settings());

    // Setup logger, including creation of the output directory for the log file:
    setup_output_dir_and_logger(
        settings.get_output_dir(),
        settings.shared.clobber,
        settings.shared.debug,
    );

    if let Err(err) = run(&settings) {
        error!("{err}");
        process::exit(exitcode::DATAERR);
    }
}
