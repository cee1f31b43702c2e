use clap::Args;
use simple_error::{SimpleResult, bail};

#[derive(Args)]
pub struct SharedSettings {
    /// Overwrite an existing output directory
    #[arg(long, global = true)]
    pub clobber: bool,

    /// Turn on extra debug logging
    ///
    /// This option enables extra logging intended for debugging only, including a message for
    /// every target loaded.
    ///
    #[arg(long, global = true)]
    pub debug: bool,

    /// Specify one or more target regions for calling, in samtools region format
    ///
    /// This option is provided strictly for debugging at this point. Any targets file is ignored
    /// when this is given.
    ///
    #[arg(hide = true, long = "target-region", global = true)]
    pub target_region_list: Vec<String>,
}

pub fn validate_and_fix_shared_settings(
    mut settings: SharedSettings,
) -> SimpleResult<SharedSettings> {
    settings.target_region_list = settings
        .target_region_list
        .into_iter()
        .map(|x| x.trim().to_string())
        .collect();

    if settings.target_region_list.iter().any(|x| x.is_empty()) {
        bail!("--target-region arguments must not be empty");
    }

    Ok(settings)
}
