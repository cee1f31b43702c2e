pub use log::debug;

/// Debug message which can be forced on for one component
///
/// When the flag given as the first argument is set, the message goes straight to stderr
/// regardless of log level. Otherwise it is logged at debug level, so it only appears with the
/// global --debug option.
///
/// ```ignore
/// debug_msg!(self.debug, "Loading target {target_index} on {chrom}");
/// ```
macro_rules! debug_msg {
    ($flag:expr, $($arg:tt)+) => {
        if $flag {
            eprintln!($($arg)+);
        } else {
            $crate::log_utils::debug!($($arg)+);
        }
    }
}

pub(crate) use debug_msg;
