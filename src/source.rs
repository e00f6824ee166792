//! # Zarr Dataset Access
//!
//! Opens the CONUS404 Zarr store (remote through `object_store`, or a local
//! directory) and reads the configured variables over the grid window.
//!
//! Opening a [`ZarrDataset`] only reads array metadata. Chunk data is fetched
//! by [`ZarrDataset::select_day`], and only for the chunks that intersect the
//! day and the window.

use crate::catalog::{SasToken, ZarrLocation};
use crate::error::{ProcessError, ProcessResult};
use crate::field::{AttrValue, Attributes, Field};
use crate::input::{GridWindow, JobConfig};
use crate::time_window::{CfTimeUnits, TimeWindow};
use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use serde_json::{json, Value};
use std::ops::Range;
use std::sync::Arc;
use zarrs::array::{Array, ArrayMetadata, ArrayMetadataV2, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::{ReadableStorage, ReadableStorageTraits, StoreKey};
use zarrs_filesystem::FilesystemStore;
use zarrs_object_store::AsyncObjectStore;
use zarrs_storage::storage_adapter::async_to_sync::{
    AsyncToSyncBlockOn, AsyncToSyncStorageAdapter,
};

/// Horizontal dimension names of the WRF grid
pub const SOUTH_NORTH: &str = "south_north";
pub const WEST_EAST: &str = "west_east";
pub const TIME: &str = "time";

/// Attributes describing on-disk encoding rather than the data.
const ENCODING_ATTRIBUTES: &[&str] = &[
    "_ARRAY_DIMENSIONS",
    "_FillValue",
    "missing_value",
    "scale_factor",
    "add_offset",
    "coordinates",
    "dtype",
];

/// Drives async storage calls from the synchronous `zarrs` API.
///
/// `block_in_place` moves the current task off the async worker so the
/// runtime handle can be blocked on without nesting runtimes. Requires the
/// multi-threaded runtime.
#[derive(Clone, Copy)]
pub struct TokioBlockOn;

impl AsyncToSyncBlockOn for TokioBlockOn {
    fn block_on<F: core::future::Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
    }
}

/// Azure Blob store authenticated with a SAS token, usable by `zarrs`.
pub fn open_remote_store(location: &ZarrLocation, token: &SasToken) -> ProcessResult<ReadableStorage> {
    let azure = MicrosoftAzureBuilder::new()
        .with_account(&location.account)
        .with_container_name(&location.container)
        .with_config(AzureConfigKey::SasKey, token.token.clone())
        .build()
        .map_err(|e| ProcessError::zarr(format!("failed to create Azure client: {}", e)))?;

    let async_store = Arc::new(AsyncObjectStore::new(azure));
    let sync_store = AsyncToSyncStorageAdapter::new(async_store, TokioBlockOn);
    Ok(Arc::new(sync_store))
}

/// Zarr store in a local directory.
pub fn open_local_store(path: &str) -> ProcessResult<ReadableStorage> {
    let store = FilesystemStore::new(path)
        .map_err(|e| ProcessError::zarr(format!("failed to open Zarr store {}: {}", path, e)))?;
    Ok(Arc::new(store))
}

type ZarrArray = Array<dyn ReadableStorageTraits>;

/// An opened array and whether its stored fill value marks missing data.
///
/// Arrays whose v2 metadata had a null fill value are opened with a
/// placeholder fill, which must never be masked.
struct SourceArray {
    array: ZarrArray,
    fill_is_missing: bool,
}

/// One day of data, cut to the grid window.
#[derive(Debug, Clone)]
pub struct DaySubset {
    pub times: Vec<NaiveDateTime>,
    /// Source variables in configured order, shape `(time, rows, cols)`
    pub variables: Vec<Field>,
    /// 2-D coordinate fields, shape `(rows, cols)`
    pub coordinates: Vec<Field>,
}

impl DaySubset {
    pub fn time_steps(&self) -> usize {
        self.times.len()
    }

    pub fn variable(&self, name: &str) -> Option<&Field> {
        self.variables.iter().find(|f| f.name == name)
    }
}

/// Lazily opened subset of a Zarr dataset: configured variables over a fixed
/// grid window.
pub struct ZarrDataset {
    window: GridWindow,
    time: ZarrArray,
    variables: Vec<(String, SourceArray)>,
    coordinates: Vec<(String, SourceArray)>,
}

impl ZarrDataset {
    /// Opens the metadata of the time axis, every configured variable and any
    /// configured coordinate fields that exist.
    ///
    /// `root` is the key prefix of the store root, empty for a store opened at
    /// its root.
    pub fn open(storage: ReadableStorage, root: &str, config: &JobConfig) -> ProcessResult<Self> {
        let window = config.window;
        window.validate()?;

        let time = open_array(&storage, root, &config.time_variable)?.array;
        if time.shape().len() != 1 {
            return Err(ProcessError::TimeAxis(format!(
                "'{}' has {} dimensions, expected 1",
                config.time_variable,
                time.shape().len()
            )));
        }

        let mut variables = Vec::with_capacity(config.variables.len());
        for name in &config.variables {
            let source = open_array(&storage, root, name)?;
            check_layout(name, &source.array, &[TIME, SOUTH_NORTH, WEST_EAST], &window)?;
            debug!(
                "Opened {} shape={:?} type={:?}",
                name,
                source.array.shape(),
                source.array.data_type()
            );
            variables.push((name.clone(), source));
        }

        let mut coordinates = Vec::new();
        for name in &config.coordinates {
            match open_array(&storage, root, name) {
                Ok(source) => {
                    check_layout(name, &source.array, &[SOUTH_NORTH, WEST_EAST], &window)?;
                    coordinates.push((name.clone(), source));
                }
                Err(e) => warn!("Skipping coordinate '{}': {}", name, e),
            }
        }

        Ok(ZarrDataset {
            window,
            time,
            variables,
            coordinates,
        })
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Decodes the full source time axis.
    pub fn time_axis(&self) -> ProcessResult<Vec<NaiveDateTime>> {
        let units = self
            .time
            .attributes()
            .get("units")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessError::TimeAxis("time coordinate has no units".to_string()))?;
        let units = CfTimeUnits::parse(units)?;

        let subset = ArraySubset::new_with_shape(self.time.shape().to_vec());
        match self.time.data_type() {
            DataType::Int64 => units.decode_i64(&self.time.retrieve_array_subset_elements::<i64>(&subset)?),
            DataType::Int32 => {
                let raw = self.time.retrieve_array_subset_elements::<i32>(&subset)?;
                units.decode_i64(&raw.into_iter().map(i64::from).collect::<Vec<_>>())
            }
            DataType::Float64 => units.decode_f64(&self.time.retrieve_array_subset_elements::<f64>(&subset)?),
            DataType::Float32 => {
                let raw = self.time.retrieve_array_subset_elements::<f32>(&subset)?;
                units.decode_f64(&raw.into_iter().map(f64::from).collect::<Vec<_>>())
            }
            other => Err(ProcessError::TimeAxis(format!("unsupported time data type {:?}", other))),
        }
    }

    /// Reads every variable for the timestamps inside `window`.
    pub fn select_day(&self, window: &TimeWindow) -> ProcessResult<DaySubset> {
        let axis = self.time_axis()?;
        let steps = window.select_non_empty(&axis)?;
        let (start, end) = window.label_pair();
        debug!(
            "Time selection {}..{} -> indices {}..{} ({} steps)",
            start,
            end,
            steps.start,
            steps.end,
            steps.len()
        );

        let progress = ProgressBar::new(self.variables.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("  {spinner} [{bar:30}] {pos}/{len} {msg}") {
            progress.set_style(style.progress_chars("=> "));
        }

        let mut variables = Vec::with_capacity(self.variables.len());
        for (name, array) in &self.variables {
            progress.set_message(name.clone());
            variables.push(self.read_variable(name, array, &steps)?);
            progress.inc(1);
        }
        progress.finish_and_clear();

        let mut coordinates = Vec::with_capacity(self.coordinates.len());
        for (name, array) in &self.coordinates {
            coordinates.push(self.read_coordinate(name, array)?);
        }

        Ok(DaySubset {
            times: axis[steps].to_vec(),
            variables,
            coordinates,
        })
    }

    fn read_variable(&self, name: &str, source: &SourceArray, steps: &Range<usize>) -> ProcessResult<Field> {
        let (j1, j2) = self.window.south_north;
        let (i1, i2) = self.window.west_east;
        let subset = ArraySubset::new_with_ranges(&[steps.start as u64..steps.end as u64, j1..j2, i1..i2]);
        let data = retrieve_f32(source, &subset)?;
        let shape = vec![steps.len(), self.window.rows() as usize, self.window.cols() as usize];
        debug!("Read {} subset {:?} ({} values)", name, shape, data.len());

        let mut field = Field::new(name, &[TIME, SOUTH_NORTH, WEST_EAST], shape, data);
        field.attributes = data_attributes(&source.array);
        Ok(field)
    }

    fn read_coordinate(&self, name: &str, source: &SourceArray) -> ProcessResult<Field> {
        let (j1, j2) = self.window.south_north;
        let (i1, i2) = self.window.west_east;
        let subset = ArraySubset::new_with_ranges(&[j1..j2, i1..i2]);
        let data = retrieve_f32(source, &subset)?;
        let shape = vec![self.window.rows() as usize, self.window.cols() as usize];

        let mut field = Field::new(name, &[SOUTH_NORTH, WEST_EAST], shape, data);
        field.attributes = data_attributes(&source.array);
        Ok(field)
    }
}

fn node_path(root: &str, name: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        format!("/{}", name)
    } else {
        format!("/{}/{}", root, name)
    }
}

fn open_array(storage: &ReadableStorage, root: &str, name: &str) -> ProcessResult<SourceArray> {
    let path = node_path(root, name);
    let error = match Array::open(storage.clone(), &path) {
        Ok(array) => {
            return Ok(SourceArray {
                array,
                fill_is_missing: true,
            });
        }
        Err(e) => e,
    };

    // zarrs rejects the null fill value xarray writes for arrays without
    // a _FillValue, e.g. an encoded int64 time coordinate
    match read_v2_metadata(storage, &path) {
        Ok(Some(mut metadata)) => {
            if !replace_null_fill(&mut metadata) {
                return Err(ProcessError::zarr(format!("cannot open '{}': {}", path, error)));
            }
            debug!("'{}' has a null fill value, opening with a placeholder", path);
            let metadata: ArrayMetadataV2 = serde_json::from_value(metadata)
                .map_err(|e| ProcessError::zarr(format!("bad metadata for '{}': {}", path, e)))?;
            let array = Array::new_with_metadata(storage.clone(), &path, ArrayMetadata::V2(metadata))
                .map_err(|e| ProcessError::zarr(format!("cannot open '{}': {}", path, e)))?;
            Ok(SourceArray {
                array,
                fill_is_missing: false,
            })
        }
        _ => Err(ProcessError::zarr(format!("cannot open '{}': {}", path, error))),
    }
}

/// `.zarray` of a v2 node with its `.zattrs` folded in as `attributes`.
fn read_v2_metadata(storage: &ReadableStorage, path: &str) -> ProcessResult<Option<Value>> {
    let prefix = path.trim_start_matches('/');
    let Some(zarray) = read_json(storage, &format!("{}/.zarray", prefix))? else {
        return Ok(None);
    };
    let mut metadata = zarray;
    if let Some(attrs) = read_json(storage, &format!("{}/.zattrs", prefix))? {
        if let Some(object) = metadata.as_object_mut() {
            object.insert("attributes".to_string(), attrs);
        }
    }
    Ok(Some(metadata))
}

fn read_json(storage: &ReadableStorage, key: &str) -> ProcessResult<Option<Value>> {
    let key = StoreKey::new(key).map_err(ProcessError::zarr)?;
    match storage.get(&key).map_err(ProcessError::zarr)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(ProcessError::zarr)?)),
        None => Ok(None),
    }
}

/// Swaps a null v2 `fill_value` for a placeholder of the array's type: 0 for
/// integers, NaN for floats. Returns false when nothing was replaced.
fn replace_null_fill(metadata: &mut Value) -> bool {
    let Some(object) = metadata.as_object_mut() else {
        return false;
    };
    if !object.get("fill_value").is_some_and(Value::is_null) {
        return false;
    }
    let kind = object
        .get("dtype")
        .and_then(Value::as_str)
        .and_then(|dtype| dtype.trim_start_matches(['<', '>', '|', '=']).chars().next());
    let placeholder = match kind {
        Some('i') | Some('u') => json!(0),
        Some('f') => json!("NaN"),
        _ => return false,
    };
    object.insert("fill_value".to_string(), placeholder);
    true
}

/// Dimension names from the v3 metadata or the xarray `_ARRAY_DIMENSIONS`
/// attribute of v2 stores.
fn dimension_names(array: &ZarrArray) -> Option<Vec<String>> {
    if let Some(dims) = array.attributes().get("_ARRAY_DIMENSIONS").and_then(|v| v.as_array()) {
        return dims.iter().map(|d| d.as_str().map(str::to_string)).collect();
    }
    array.dimension_names().as_ref().and_then(|names| {
        names
            .iter()
            .map(|n| n.as_str().map(str::to_string))
            .collect()
    })
}

fn check_layout(name: &str, array: &ZarrArray, expected: &[&str], window: &GridWindow) -> ProcessResult<()> {
    let shape = array.shape();
    if shape.len() != expected.len() {
        return Err(ProcessError::Shape(format!(
            "'{}' has {} dimensions, expected {:?}",
            name,
            shape.len(),
            expected
        )));
    }
    if let Some(dims) = dimension_names(array) {
        if dims.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(ProcessError::Shape(format!(
                "'{}' has dimensions {:?}, expected {:?}",
                name, dims, expected
            )));
        }
    }

    let rows = shape[shape.len() - 2];
    let cols = shape[shape.len() - 1];
    if !window.fits(rows, cols) {
        return Err(ProcessError::WindowOutOfBounds {
            variable: name.to_string(),
            window: window.describe(),
            rows,
            cols,
        });
    }
    Ok(())
}

/// Source attributes worth keeping on the output variable.
fn data_attributes(array: &ZarrArray) -> Attributes {
    array
        .attributes()
        .iter()
        .filter(|(key, _)| !ENCODING_ATTRIBUTES.contains(&key.as_str()))
        .filter_map(|(key, value)| AttrValue::from_json(value).map(|v| (key.clone(), v)))
        .collect()
}

fn attribute_f64(array: &ZarrArray, name: &str) -> Option<f64> {
    array.attributes().get(name).and_then(|v| v.as_f64())
}

/// Reads a subset as `f32` whatever the stored numeric type, applying CF
/// packing and masking missing values to NaN.
///
/// Missing values are `_FillValue`, then `missing_value`, then the array's
/// own fill value, as xarray decodes them.
fn retrieve_f32(source: &SourceArray, subset: &ArraySubset) -> ProcessResult<Vec<f32>> {
    let array = &source.array;
    let missing = attribute_f64(array, "_FillValue")
        .or_else(|| attribute_f64(array, "missing_value"))
        .or_else(|| source.fill_is_missing.then(|| stored_fill(array)).flatten());

    let mut values: Vec<f64> = match array.data_type() {
        DataType::Float32 => {
            let raw = array.retrieve_array_subset_elements::<f32>(subset)?;
            if is_unpacked(array) {
                return Ok(mask_fill(raw, missing.map(|m| m as f32)));
            }
            raw.into_iter().map(f64::from).collect()
        }
        DataType::Float64 => array.retrieve_array_subset_elements::<f64>(subset)?,
        DataType::Int16 => array
            .retrieve_array_subset_elements::<i16>(subset)?
            .into_iter()
            .map(f64::from)
            .collect(),
        DataType::Int32 => array
            .retrieve_array_subset_elements::<i32>(subset)?
            .into_iter()
            .map(f64::from)
            .collect(),
        DataType::Int64 => array
            .retrieve_array_subset_elements::<i64>(subset)?
            .into_iter()
            .map(|v| v as f64)
            .collect(),
        other => {
            return Err(ProcessError::zarr(format!(
                "unsupported data type {:?} for '{}'",
                other,
                array.path()
            )));
        }
    };

    let scale = attribute_f64(array, "scale_factor").unwrap_or(1.0);
    let offset = attribute_f64(array, "add_offset").unwrap_or(0.0);

    for v in values.iter_mut() {
        if missing.is_some_and(|m| *v == m) {
            *v = f64::NAN;
        } else {
            *v = *v * scale + offset;
        }
    }
    Ok(values.into_iter().map(|v| v as f32).collect())
}

fn is_unpacked(array: &ZarrArray) -> bool {
    attribute_f64(array, "scale_factor").is_none() && attribute_f64(array, "add_offset").is_none()
}

/// The array's fill value as a number; `None` for NaN fills.
fn stored_fill(array: &ZarrArray) -> Option<f64> {
    let bytes = array.fill_value().as_ne_bytes();
    let fill = match array.data_type() {
        DataType::Float32 => f64::from(f32::from_ne_bytes(bytes.try_into().ok()?)),
        DataType::Float64 => f64::from_ne_bytes(bytes.try_into().ok()?),
        DataType::Int16 => f64::from(i16::from_ne_bytes(bytes.try_into().ok()?)),
        DataType::Int32 => f64::from(i32::from_ne_bytes(bytes.try_into().ok()?)),
        DataType::Int64 => i64::from_ne_bytes(bytes.try_into().ok()?) as f64,
        _ => return None,
    };
    (!fill.is_nan()).then_some(fill)
}

fn mask_fill(mut values: Vec<f32>, fill: Option<f32>) -> Vec<f32> {
    if let Some(fill) = fill {
        for v in values.iter_mut().filter(|v| **v == fill) {
            *v = f32::NAN;
        }
    }
    values
}
