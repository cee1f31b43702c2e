mod call;
mod shared;
mod utils;

use camino::Utf8Path;
use chrono::Datelike;
use clap::Parser;
use simple_error::{SimpleResult, bail};

use self::call::validate_and_fix_call_settings;
pub use self::call::{
    CallSettings, SETTINGS_FILENAME, validate_call_settings_data, write_call_settings,
};
use self::shared::validate_and_fix_shared_settings;
pub use self::shared::SharedSettings;

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    after_help = format!("Copyright (C) 2023-{}     The bambayes developers
This program comes with ABSOLUTELY NO WARRANTY. It is distributed under the
terms of the MIT license.", chrono::Utc::now().year()),
    help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(rename_all = "kebab_case")]
pub struct Settings {
    #[command(flatten)]
    pub shared: SharedSettings,

    #[command(flatten)]
    pub call: CallSettings,
}

impl Settings {
    pub fn get_output_dir(&self) -> &Utf8Path {
        &self.call.output_dir
    }
}

/// Checks if a directory does not exist
///
pub fn check_novel_dirname(dirname: &Utf8Path, label: &str) -> SimpleResult<()> {
    if dirname.exists() {
        bail!("{label} already exists: \"{dirname}\"");
    }
    Ok(())
}

/// Validate settings and update parameters that can't be processed by clap
///
pub fn validate_and_fix_settings_impl(mut settings: Settings) -> SimpleResult<Settings> {
    settings.shared = validate_and_fix_shared_settings(settings.shared)?;
    settings.call = validate_and_fix_call_settings(settings.call)?;
    Ok(settings)
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
pub fn validate_and_fix_settings(settings: Settings) -> Settings {
    match validate_and_fix_settings_impl(settings) {
        Ok(x) => x,
        Err(msg) => {
            eprintln!("Invalid command-line setting: {msg}");
            std::process::exit(exitcode::USAGE);
        }
    }
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_novel_dirname() {
        let dir = tempfile::tempdir().unwrap();
        let existing = Utf8Path::from_path(dir.path()).unwrap();
        assert!(check_novel_dirname(existing, "Output directory").is_err());
        assert!(check_novel_dirname(&existing.join("novel"), "Output directory").is_ok());
    }

    #[test]
    fn test_parse_shared_and_call_settings() {
        let settings = Settings::parse_from([
            "bambayes",
            "--bam",
            "in.bam",
            "--ref",
            "ref.fa",
            "--debug",
            "--target-region",
            "chr1:100-200",
            "--ploidy",
            "1",
        ]);
        assert!(settings.shared.debug);
        assert!(!settings.shared.clobber);
        assert_eq!(settings.shared.target_region_list, vec!["chr1:100-200".to_string()]);
        assert_eq!(settings.call.ploidy, 1);
        assert_eq!(settings.get_output_dir().as_str(), "bambayes_output");
    }
}
