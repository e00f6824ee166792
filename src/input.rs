//! # Job Configuration
//!
//! A [`JobConfig`] holds everything a day run needs: where the dataset comes
//! from, the grid-index window, the variables to keep, where the NetCDF file
//! goes and the descriptive metadata written into it.
//!
//! The defaults reproduce the New York State 10 m wind job. Any field can be
//! overridden from a JSON or YAML file:
//!
//! ```rust,no_run
//! use conus404_wind::input::JobConfig;
//!
//! let config = JobConfig::from_file("ny_wind.yaml")?;
//! println!("Window: {}", config.window.describe());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ```yaml
//! window:
//!   south_north: [610, 740]
//!   west_east: [1045, 1215]
//! output:
//!   root: data/CONUS404
//!   file_prefix: ny_wind_10m
//! ```

use crate::error::{ProcessError, ProcessResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Environment variable pointing at a JSON/YAML configuration file
pub const CONFIG_ENV: &str = "CONUS404_CONFIG";
/// Environment variable overriding `output.root`
pub const OUTPUT_ROOT_ENV: &str = "CONUS404_OUTPUT_ROOT";

/// Complete configuration of a day run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Where the Zarr dataset is read from
    pub source: SourceConfig,
    /// Grid-index window applied to every variable
    pub window: GridWindow,
    /// Source variables copied to the output, in output order
    pub variables: Vec<String>,
    /// Optional 2-D coordinate fields sliced alongside the data
    pub coordinates: Vec<String>,
    /// Name of the time coordinate in the source store
    pub time_variable: String,
    /// Wind components and the derived speed field
    pub wind: WindConfig,
    pub output: OutputConfig,
    pub metadata: DatasetMetadata,
}

/// Dataset location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// STAC collection on the Planetary Computer, signed with a SAS token
    PlanetaryComputer {
        stac_url: String,
        sas_url: String,
        collection: String,
        asset: String,
    },
    /// Zarr store on local disk
    Local { path: String },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::PlanetaryComputer {
            stac_url: "https://planetarycomputer.microsoft.com/api/stac/v1".to_string(),
            sas_url: "https://planetarycomputer.microsoft.com/api/sas/v1".to_string(),
            collection: "conus404".to_string(),
            asset: "zarr-abfs".to_string(),
        }
    }
}

impl SourceConfig {
    pub fn describe(&self) -> String {
        match self {
            SourceConfig::PlanetaryComputer { collection, asset, .. } => {
                format!("Planetary Computer collection '{}' (asset '{}')", collection, asset)
            }
            SourceConfig::Local { path } => format!("local Zarr store {}", path),
        }
    }
}

/// Half-open index ranges `[start, end)` on the two horizontal axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridWindow {
    /// `south_north` (row) range
    pub south_north: (u64, u64),
    /// `west_east` (column) range
    pub west_east: (u64, u64),
}

impl Default for GridWindow {
    fn default() -> Self {
        // New York State
        GridWindow {
            south_north: (610, 740),
            west_east: (1045, 1215),
        }
    }
}

impl GridWindow {
    pub fn rows(&self) -> u64 {
        self.south_north.1.saturating_sub(self.south_north.0)
    }

    pub fn cols(&self) -> u64 {
        self.west_east.1.saturating_sub(self.west_east.0)
    }

    pub fn cell_count(&self) -> u64 {
        self.rows() * self.cols()
    }

    pub fn validate(&self) -> ProcessResult<()> {
        let (j1, j2) = self.south_north;
        let (i1, i2) = self.west_east;
        if j1 >= j2 {
            return Err(ProcessError::Config(format!(
                "south_north start {} must be below end {}",
                j1, j2
            )));
        }
        if i1 >= i2 {
            return Err(ProcessError::Config(format!(
                "west_east start {} must be below end {}",
                i1, i2
            )));
        }
        Ok(())
    }

    /// True when the window lies inside a grid of `rows x cols`.
    pub fn fits(&self, rows: u64, cols: u64) -> bool {
        self.south_north.1 <= rows && self.west_east.1 <= cols
    }

    /// `south_north[j1:j2], west_east[i1:i2]`
    pub fn describe(&self) -> String {
        format!(
            "south_north[{}:{}], west_east[{}:{}]",
            self.south_north.0, self.south_north.1, self.west_east.0, self.west_east.1
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindConfig {
    pub u: String,
    pub v: String,
    pub speed: String,
    /// Units attached to the components when the source has none
    pub default_units: String,
}

impl Default for WindConfig {
    fn default() -> Self {
        WindConfig {
            u: "U10".to_string(),
            v: "V10".to_string(),
            speed: "WIND_SPEED_10M".to_string(),
            default_units: "m s-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Local directory or `s3://bucket/prefix`
    pub root: String,
    pub file_prefix: String,
    pub deflate_level: i32,
    /// Upper bound of a spatial chunk edge
    pub max_spatial_chunk: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            root: "data/CONUS404".to_string(),
            file_prefix: "ny_wind_10m".to_string(),
            deflate_level: 2,
            max_spatial_chunk: 80,
        }
    }
}

/// Descriptive strings written as global attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetMetadata {
    pub region: String,
    pub source: String,
    pub institution: String,
    pub model: String,
    pub grid_bounds: String,
    pub spatial_resolution: String,
    pub temporal_resolution: String,
    pub conventions: String,
}

impl Default for DatasetMetadata {
    fn default() -> Self {
        DatasetMetadata {
            region: "New York State".to_string(),
            source: "CONUS404 dataset via Microsoft Planetary Computer".to_string(),
            institution: "NCAR/USGS collaboration".to_string(),
            model: "Weather Research and Forecasting (WRF) Model v3.9.1.1".to_string(),
            grid_bounds: "NY state domain".to_string(),
            spatial_resolution: "4 km".to_string(),
            temporal_resolution: "hourly".to_string(),
            conventions: "CF-1.8".to_string(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            source: SourceConfig::default(),
            window: GridWindow::default(),
            variables: ["U10", "V10", "MUCAPE", "MLCAPE", "SBCAPE", "USHR6", "VSHR6"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            coordinates: vec!["lat".to_string(), "lon".to_string()],
            time_variable: "time".to_string(),
            wind: WindConfig::default(),
            output: OutputConfig::default(),
            metadata: DatasetMetadata::default(),
        }
    }
}

impl JobConfig {
    /// Loads a configuration file, YAML for `.yaml`/`.yml`, JSON otherwise.
    /// Fields missing from the file keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ProcessResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(json_str: &str) -> ProcessResult<Self> {
        let config: JobConfig = serde_json::from_str(json_str)
            .map_err(|e| ProcessError::Config(format!("invalid JSON configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml_str: &str) -> ProcessResult<Self> {
        let config: JobConfig = serde_yaml::from_str(yaml_str)
            .map_err(|e| ProcessError::Config(format!("invalid YAML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from the process environment.
    pub fn from_env() -> ProcessResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `CONUS404_CONFIG` and
    /// `CONUS404_OUTPUT_ROOT` as returned by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> ProcessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        if let Some(root) = lookup(OUTPUT_ROOT_ENV).filter(|r| !r.trim().is_empty()) {
            config.output.root = root.trim().to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProcessResult<()> {
        self.window.validate()?;

        if self.variables.is_empty() {
            return Err(ProcessError::Config("no variables selected".to_string()));
        }
        let mut seen = HashSet::new();
        for name in &self.variables {
            if !seen.insert(name.as_str()) {
                return Err(ProcessError::Config(format!("variable '{}' listed twice", name)));
            }
        }
        for component in [&self.wind.u, &self.wind.v] {
            if !seen.contains(component.as_str()) {
                return Err(ProcessError::Config(format!(
                    "wind component '{}' is not in the variable list",
                    component
                )));
            }
        }
        if seen.contains(self.wind.speed.as_str()) {
            return Err(ProcessError::Config(format!(
                "derived field '{}' clashes with a source variable",
                self.wind.speed
            )));
        }
        if !(0..=9).contains(&self.output.deflate_level) {
            return Err(ProcessError::Config(format!(
                "deflate level {} outside 0..=9",
                self.output.deflate_level
            )));
        }
        if self.output.max_spatial_chunk == 0 {
            return Err(ProcessError::Config("max_spatial_chunk must be positive".to_string()));
        }
        if self.output.root.trim().is_empty() {
            return Err(ProcessError::Config("output root is empty".to_string()));
        }
        Ok(())
    }

    /// `<root>/<year>/<prefix>_<YYYY-MM-DD>.nc`
    pub fn output_path(&self, date: NaiveDate) -> String {
        format!(
            "{}/{}/{}_{}.nc",
            self.output.root.trim_end_matches('/'),
            date.year(),
            self.output.file_prefix,
            date.format("%Y-%m-%d")
        )
    }

    /// Output variable names: derived speed first, then the source variables.
    pub fn output_variables(&self) -> Vec<String> {
        std::iter::once(self.wind.speed.clone())
            .chain(self.variables.iter().cloned())
            .collect()
    }
}
