//! # CLI Module
//!
//! One option, `--date`. Arguments the parser does not know are dropped
//! instead of rejected, so the binary can be launched from wrappers that
//! append their own flags.

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;
use log::debug;
use std::ffi::OsString;

pub const DEFAULT_DATE: &str = "1979-10-01";

/// Download CONUS404 data for a specific day
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "conus404-daily")]
#[command(about = "Download CONUS404 data for a specific day")]
#[command(version)]
#[command(long_about = "
Downloads one day of CONUS404 hourly data from the Microsoft Planetary Computer,
subsets it to the configured grid window, derives 10-meter wind speed and writes
data/CONUS404/<year>/ny_wind_10m_<date>.nc.

ENVIRONMENT:
  CONUS404_CONFIG        JSON or YAML file overriding the job configuration
  CONUS404_OUTPUT_ROOT   Output root directory or s3://bucket/prefix
  RUST_LOG               Log level (default: info)
")]
pub struct Cli {
    /// Date in YYYY-MM-DD
    #[arg(long, default_value = DEFAULT_DATE, env = "CONUS404_DATE")]
    pub date: String,
}

impl Cli {
    /// Parses `args`, dropping every argument clap reports as unknown.
    pub fn parse_known<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        loop {
            let error = match Cli::try_parse_from(&args) {
                Ok(cli) => return Ok(cli),
                Err(e) if e.kind() == ErrorKind::UnknownArgument => e,
                Err(e) => return Err(e),
            };

            let unknown = match error.get(ContextKind::InvalidArg) {
                Some(ContextValue::String(arg)) => arg.clone(),
                _ => return Err(error),
            };
            match position_of(&args, &unknown) {
                Some(index) => {
                    debug!("Ignoring unrecognized argument: {:?}", args[index]);
                    args.remove(index);
                }
                None => return Err(error),
            }
        }
    }
}

/// Index (past the program name) of the argument clap reported.
///
/// For a short flag clap names only the offending letter, so `-f` also
/// matches a grouped token such as `-fv`.
fn position_of(args: &[OsString], unknown: &str) -> Option<usize> {
    let with_value = format!("{}=", unknown);
    let is_short = unknown.len() == 2 && unknown.starts_with('-') && !unknown.starts_with("--");
    args.iter()
        .skip(1)
        .position(|arg| {
            let arg = arg.to_string_lossy();
            arg == unknown
                || arg.starts_with(&with_value)
                || (is_short && !arg.starts_with("--") && arg.starts_with(unknown))
        })
        .map(|i| i + 1)
}
