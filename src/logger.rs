//! Log setup for bambayes runs
//!
//! Every run logs to stderr and to a log file in the output directory. The log file is created
//! together with the output directory, before any input is read.
//!

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use log::LevelFilter;

use crate::cli;
use crate::globals::PROGRAM_NAME;
use crate::os_utils::create_dir_all;

pub fn get_log_filename(output_dir: &Utf8Path) -> Utf8PathBuf {
    output_dir.join(format!("{PROGRAM_NAME}.log"))
}

fn get_log_level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Log lines are prefixed with local time, program name and level
fn format_log_record(out: fern::FormatCallback, message: &fmt::Arguments, record: &log::Record) {
    out.finish(format_args!(
        "{}[{}][{}] {}",
        chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
        PROGRAM_NAME,
        record.level(),
        message
    ))
}

fn setup_logger(log_filename: &Utf8Path, debug: bool) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(format_log_record)
        .level(get_log_level(debug))
        .chain(std::io::stderr())
        .chain(fern::log_file(log_filename)?)
        .apply()?;
    Ok(())
}

/// Check and create output directory, then setup logger to write there
///
/// An existing output directory is only reused when clobber is set. Failures exit the process,
/// reporting to stderr since no logger exists yet.
///
/// #Arguments
/// * `debug` - If true use debug log level, and info level otherwise
///
pub fn setup_output_dir_and_logger(output_dir: &Utf8Path, clobber: bool, debug: bool) {
    if let Err(msg) = cli::check_novel_dirname(output_dir, "Output directory") {
        if !clobber {
            eprintln!("Invalid command-line setting: {msg}");
            std::process::exit(exitcode::USAGE);
        }
    };
    create_dir_all(output_dir, "output");

    let log_filename = get_log_filename(output_dir);
    if let Err(e) = setup_logger(&log_filename, debug) {
        eprintln!("Unable to setup log file '{log_filename}': {e}");
        std::process::exit(exitcode::CANTCREAT);
    }
}
