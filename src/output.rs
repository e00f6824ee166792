//! # NetCDF Output
//!
//! Assembles the daily output dataset from a [`DaySubset`] and writes it as a
//! compressed NetCDF-4 file.
//!
//! Every data variable is stored as `f32`, deflated at the configured level,
//! and chunked as `(all time steps, ≤80 rows, ≤80 columns)`. The file is
//! written to a temporary name next to the destination and renamed into place
//! once complete, so an interrupted run never leaves a partial file and a
//! re-run replaces the previous one.

use crate::error::{ProcessError, ProcessResult};
use crate::field::{AttrValue, Attributes, Field};
use crate::input::JobConfig;
use crate::postprocess::{derive_wind_speed, ensure_units};
use crate::source::{DaySubset, SOUTH_NORTH, TIME, WEST_EAST};
use crate::storage::{StorageBackend, StorageFactory};
use crate::time_window::{CfTimeUnits, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::debug;
use std::path::Path;

/// Storage settings of one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub chunks: Vec<usize>,
    pub deflate_level: i32,
    pub shuffle: bool,
}

impl Encoding {
    /// Full extent along the leading (time) axis, spatial edges capped at
    /// `max_spatial`.
    pub fn for_shape(shape: &[usize], max_spatial: usize, deflate_level: i32) -> Self {
        let chunks = shape
            .iter()
            .enumerate()
            .map(|(axis, &len)| {
                let len = len.max(1);
                if axis == 0 && shape.len() == 3 {
                    len
                } else {
                    len.min(max_spatial)
                }
            })
            .collect();

        Encoding {
            chunks,
            deflate_level,
            shuffle: false,
        }
    }
}

/// The complete daily output, held in memory until written.
#[derive(Debug, Clone)]
pub struct DayDataset {
    pub date: NaiveDate,
    pub times: Vec<NaiveDateTime>,
    pub time_units: CfTimeUnits,
    /// Data variables in output order, all `(time, south_north, west_east)`
    pub variables: Vec<Field>,
    pub coordinates: Vec<Field>,
    pub attributes: Attributes,
    deflate_level: i32,
    max_spatial_chunk: usize,
}

impl DayDataset {
    /// Derives wind speed, annotates the components and attaches the global
    /// metadata.
    pub fn assemble(
        subset: DaySubset,
        config: &JobConfig,
        date: NaiveDate,
        created: DateTime<Utc>,
    ) -> ProcessResult<Self> {
        let wind = &config.wind;
        let missing = |name: &str| ProcessError::Config(format!("variable '{}' was not read", name));

        let speed = {
            let u = subset.variable(&wind.u).ok_or_else(|| missing(&wind.u))?;
            let v = subset.variable(&wind.v).ok_or_else(|| missing(&wind.v))?;
            derive_wind_speed(u, v, wind)?
        };

        let DaySubset {
            times,
            variables,
            coordinates,
        } = subset;

        let coordinate_names = coordinates
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut ordered = Vec::with_capacity(variables.len() + 1);
        ordered.push(speed);
        for name in &config.variables {
            let mut field = variables
                .iter()
                .find(|f| &f.name == name)
                .cloned()
                .ok_or_else(|| missing(name))?;
            if *name == wind.u || *name == wind.v {
                ensure_units(&mut field, &wind.default_units);
            }
            ordered.push(field);
        }
        if !coordinate_names.is_empty() {
            for field in ordered.iter_mut() {
                field
                    .attributes
                    .insert("coordinates".to_string(), AttrValue::Text(coordinate_names.clone()));
            }
        }

        let date_str = date.format("%Y-%m-%d").to_string();
        let meta = &config.metadata;
        let mut attributes = Attributes::new();
        let mut put = |key: &str, value: AttrValue| {
            attributes.insert(key.to_string(), value);
        };
        put("title", format!("CONUS404 10m Wind Data - {} - {}", meta.region, date_str).into());
        put("source", meta.source.as_str().into());
        put("institution", meta.institution.as_str().into());
        put("model", meta.model.as_str().into());
        put("grid_bounds", meta.grid_bounds.as_str().into());
        put("grid_indices", config.window.describe().into());
        put("spatial_resolution", meta.spatial_resolution.as_str().into());
        put("temporal_resolution", meta.temporal_resolution.as_str().into());
        put("created", created.format("%Y-%m-%d %H:%M:%S UTC").to_string().into());
        put("time_steps", AttrValue::Int(times.len() as i64));
        put("conventions", meta.conventions.as_str().into());

        Ok(DayDataset {
            date,
            time_units: CfTimeUnits {
                unit: TimeUnit::Hours,
                reference: date.and_time(NaiveTime::MIN),
            },
            times,
            variables: ordered,
            coordinates,
            attributes,
            deflate_level: config.output.deflate_level,
            max_spatial_chunk: config.output.max_spatial_chunk,
        })
    }

    pub fn time_steps(&self) -> usize {
        self.times.len()
    }

    pub fn variable(&self, name: &str) -> Option<&Field> {
        self.variables.iter().find(|f| f.name == name)
    }

    pub fn encoding_for(&self, field: &Field) -> Encoding {
        Encoding::for_shape(&field.shape, self.max_spatial_chunk, self.deflate_level)
    }

    /// Writes the dataset to `path`, replacing any existing file.
    pub fn write_netcdf(&self, path: &Path) -> ProcessResult<()> {
        let spatial = self
            .variables
            .first()
            .map(|f| (f.shape[1], f.shape[2]))
            .ok_or_else(|| ProcessError::Shape("dataset has no variables".to_string()))?;

        let mut file = netcdf::create(path)?;
        file.add_dimension(TIME, self.times.len())?;
        file.add_dimension(SOUTH_NORTH, spatial.0)?;
        file.add_dimension(WEST_EAST, spatial.1)?;

        {
            let offsets = self.time_units.encode(&self.times);
            let mut time = file.add_variable::<f64>(TIME, &[TIME])?;
            time.put_attribute("units", self.time_units_label())?;
            time.put_attribute("calendar", "proleptic_gregorian")?;
            time.put_attribute("standard_name", "time")?;
            time.put_attribute("long_name", "time")?;
            time.put_attribute("axis", "T")?;
            time.put_values(&offsets, ..)?;
        }

        for coord in &self.coordinates {
            let encoding = self.encoding_for(coord);
            let dims: Vec<&str> = coord.dims.iter().map(String::as_str).collect();
            let mut var = file.add_variable::<f32>(&coord.name, &dims)?;
            var.set_chunking(&encoding.chunks)?;
            var.set_compression(encoding.deflate_level, encoding.shuffle)?;
            put_attributes(&mut var, &coord.attributes)?;
            var.put_values(&coord.data, ..)?;
        }

        for field in &self.variables {
            if field.shape.len() != 3 || (field.shape[1], field.shape[2]) != spatial {
                return Err(ProcessError::Shape(format!(
                    "'{}' has shape {:?}, expected (time, {}, {})",
                    field.name, field.shape, spatial.0, spatial.1
                )));
            }
            let encoding = self.encoding_for(field);
            debug!("Writing {} chunks={:?} deflate={}", field.name, encoding.chunks, encoding.deflate_level);

            let mut var = file.add_variable::<f32>(&field.name, &[TIME, SOUTH_NORTH, WEST_EAST])?;
            var.set_chunking(&encoding.chunks)?;
            var.set_compression(encoding.deflate_level, encoding.shuffle)?;
            var.set_fill_value(f32::NAN)?;
            put_attributes(&mut var, &field.attributes)?;
            var.put_values(&field.data, ..)?;
        }

        for (name, value) in &self.attributes {
            match value {
                AttrValue::Text(s) => file.add_attribute(name, s.as_str())?,
                AttrValue::Int(i) => file.add_attribute(name, *i)?,
                AttrValue::Float(f) => file.add_attribute(name, *f)?,
            };
        }

        // Dropping the handle closes the file and flushes it to disk
        drop(file);
        Ok(())
    }

    fn time_units_label(&self) -> String {
        format!(
            "hours since {}",
            self.time_units.reference.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn put_attributes(var: &mut netcdf::VariableMut<'_>, attributes: &Attributes) -> ProcessResult<()> {
    for (name, value) in attributes {
        match value {
            AttrValue::Text(s) => var.put_attribute(name, s.as_str())?,
            AttrValue::Int(i) => var.put_attribute(name, *i)?,
            AttrValue::Float(f) => var.put_attribute(name, *f)?,
        };
    }
    Ok(())
}

/// Writes `dataset` to `dest`: a local path, or an `s3://` URI.
///
/// The file is staged under a temporary name and only becomes visible at
/// `dest` once fully written.
pub async fn save_dataset(dataset: &DayDataset, dest: &str) -> ProcessResult<()> {
    if StorageFactory::is_s3_path(dest) {
        let staged = tempfile::Builder::new().suffix(".nc").tempfile()?;
        dataset.write_netcdf(staged.path())?;

        let storage = StorageFactory::from_path(dest).await?;
        storage.publish_file(staged.path(), dest).await?;
        debug!("Uploaded {} to {}", staged.path().display(), dest);
        return Ok(());
    }

    let dest_path = Path::new(dest);
    let dir = match dest_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    tokio::fs::create_dir_all(&dir).await?;

    let staged = tempfile::Builder::new()
        .prefix(".conus404-")
        .suffix(".nc.part")
        .tempfile_in(&dir)?;
    dataset.write_netcdf(staged.path())?;
    staged.persist(dest_path).map_err(|e| ProcessError::Io(e.error))?;
    debug!("Wrote {}", dest);
    Ok(())
}
