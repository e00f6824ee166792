//! # conus404-wind
//!
//! Downloads one day of the CONUS404 hourly reanalysis, cuts it to a fixed
//! grid-index window, derives 10 m wind speed and writes a compressed daily
//! NetCDF file.
//!
//! ## Pipeline
//!
//! 1. Resolve the Zarr asset through the STAC catalog and sign it
//! 2. Open the variables lazily over the grid window
//! 3. Select the target day's 24 hourly steps
//! 4. Derive `WIND_SPEED_10M = sqrt(U10² + V10²)`
//! 5. Assemble the output with per-variable chunking and deflate
//! 6. Write `<root>/<year>/<prefix>_<date>.nc`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conus404_wind::{run_day, input::JobConfig, DayOutcome};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = JobConfig::default();
//!     match run_day(&config, "1979-10-01").await {
//!         DayOutcome::Saved(report) => println!("wrote {}", report.path),
//!         DayOutcome::Failed { date, error } => eprintln!("{}: {}", date, error),
//!     }
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod error;
pub mod field;
pub mod info;
pub mod input;
pub mod log;
pub mod output;
pub mod postprocess;
pub mod source;
pub mod storage;
pub mod time_window;

#[cfg(test)]
mod tests;

pub use error::{ProcessError, ProcessResult};

use crate::catalog::CatalogClient;
use crate::input::{JobConfig, SourceConfig};
use crate::output::{save_dataset, DayDataset};
use crate::source::{open_local_store, open_remote_store, ZarrDataset};
use crate::storage::StorageFactory;
use crate::time_window::{parse_target_date, TimeWindow};
use chrono::{NaiveDate, Utc};

/// A day that was written successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayReport {
    pub date: NaiveDate,
    pub path: String,
    pub time_steps: usize,
}

/// Result of one day run. Failures carry the date text as given and the
/// typed reason.
#[derive(Debug)]
pub enum DayOutcome {
    Saved(DayReport),
    Failed { date: String, error: ProcessError },
}

impl DayOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, DayOutcome::Saved(_))
    }
}

/// Opens the configured dataset: catalog lookup, signing and lazy array
/// metadata for the remote source, or a local Zarr directory.
pub async fn open_dataset(config: &JobConfig) -> ProcessResult<ZarrDataset> {
    match &config.source {
        SourceConfig::PlanetaryComputer {
            stac_url,
            sas_url,
            collection,
            asset,
        } => {
            let client = CatalogClient::new(stac_url, sas_url)?;
            let location = client.resolve_zarr_asset(collection, asset).await?;
            ::log::info!("Opening Zarr store {}", location);
            let token = client.sign(&location).await?;
            let storage = open_remote_store(&location, &token)?;
            ZarrDataset::open(storage, &location.prefix, config)
        }
        SourceConfig::Local { path } => {
            ::log::info!("Opening local Zarr store {}", path);
            ZarrDataset::open(open_local_store(path)?, "", config)
        }
    }
}

/// Selects, derives, assembles and writes one day from an opened dataset.
pub async fn process_day(
    dataset: &ZarrDataset,
    config: &JobConfig,
    date: NaiveDate,
) -> ProcessResult<DayReport> {
    let window = TimeWindow::for_day(date);
    let subset = dataset.select_day(&window)?;
    let time_steps = subset.time_steps();

    let day = DayDataset::assemble(subset, config, date, Utc::now())?;
    let path = config.output_path(date);
    save_dataset(&day, &path).await?;

    if !StorageFactory::is_s3_path(&path) && ::log::log_enabled!(::log::Level::Debug) {
        match info::get_netcdf_info(&path) {
            Ok(summary) => info::log_file_info(&summary),
            Err(e) => ::log::warn!("Could not inspect {}: {:#}", path, e),
        }
    }

    Ok(DayReport {
        date,
        path,
        time_steps,
    })
}

/// The whole day run behind one error boundary.
///
/// Nothing is retried and nothing escapes: every failure, from a malformed
/// date to a write error, comes back as [`DayOutcome::Failed`].
pub async fn run_day(config: &JobConfig, date_text: &str) -> DayOutcome {
    match run_day_inner(config, date_text).await {
        Ok(report) => DayOutcome::Saved(report),
        Err(error) => {
            ::log::debug!("Day {} failed: {:?}", date_text, error);
            DayOutcome::Failed {
                date: date_text.to_string(),
                error,
            }
        }
    }
}

async fn run_day_inner(config: &JobConfig, date_text: &str) -> ProcessResult<DayReport> {
    let date = parse_target_date(date_text)?;
    crate::log::show_connecting(config);
    let dataset = open_dataset(config).await?;
    crate::log::show_subset_ready(config);
    crate::log::show_processing(&date.format("%Y-%m-%d").to_string());
    process_day(&dataset, config, date).await
}
