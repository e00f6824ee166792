use crate::info::get_netcdf_info;
use crate::input::*;
use crate::source::{SOUTH_NORTH, TIME, WEST_EAST};
use crate::{open_dataset, process_day, run_day, DayOutcome, ProcessError};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use zarrs::array::{ArrayBuilder, DataType, Element, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Extent of a fixture store, starting 1979-10-01 00:00
#[derive(Debug, Clone, Copy)]
struct SourceGrid {
    hours: u64,
    rows: u64,
    cols: u64,
}

impl SourceGrid {
    fn cube(&self) -> Vec<u64> {
        vec![self.hours, self.rows, self.cols]
    }

    fn plane(&self) -> Vec<u64> {
        vec![self.rows, self.cols]
    }

    fn fill<T>(&self, f: impl Fn(u64, u64, u64) -> T) -> Vec<T> {
        let mut data = Vec::with_capacity((self.hours * self.rows * self.cols) as usize);
        for t in 0..self.hours {
            for j in 0..self.rows {
                for i in 0..self.cols {
                    data.push(f(t, j, i));
                }
            }
        }
        data
    }

    fn lat(&self) -> Vec<f32> {
        (0..self.rows * self.cols).map(|n| 40.0 + (n / self.cols) as f32 * 0.04).collect()
    }

    fn lon(&self) -> Vec<f32> {
        (0..self.rows * self.cols).map(|n| -80.0 + (n % self.cols) as f32 * 0.04).collect()
    }
}

/// Two days on an 8 x 10 grid
const SOURCE: SourceGrid = SourceGrid {
    hours: 48,
    rows: 8,
    cols: 10,
};

/// One day on a grid wider than a single spatial chunk
const WIDE: SourceGrid = SourceGrid {
    hours: 24,
    rows: 6,
    cols: 100,
};

const CUBE_CHUNKS: [u64; 3] = [24, 4, 5];

/// Window cut from the fixture: rows 2..6, columns 3..8
const WINDOW: GridWindow = GridWindow {
    south_north: (2, 6),
    west_east: (3, 8),
};

/// 4 x 90 cells out of `WIDE`
const WIDE_WINDOW: GridWindow = GridWindow {
    south_north: (1, 5),
    west_east: (2, 92),
};

const SBCAPE_FILL: i16 = -9999;

const DATA_VARIABLES: [(u64, &str, &str); 4] = [
    (1, "MUCAPE", "J kg-1"),
    (2, "MLCAPE", "J kg-1"),
    (3, "USHR6", "m s-1"),
    (4, "VSHR6", "m s-1"),
];

fn u10(t: u64, j: u64, i: u64) -> f32 {
    t as f32 * 0.5 + j as f32 - i as f32 * 0.25
}

fn v10(t: u64, j: u64, i: u64) -> f32 {
    1.0 + i as f32 * 0.5 - t as f32 * 0.1 + j as f32 * 0.01
}

fn plain(k: u64, t: u64, j: u64, i: u64) -> f32 {
    (k * 1000 + t * 10) as f32 + j as f32 * 0.1 + i as f32 * 0.01
}

/// Stored SBCAPE value; decoded as `raw * 0.5`. One cell holds the fill value.
fn sbcape_raw(t: u64, j: u64, i: u64) -> i16 {
    if t == 5 && j == 3 && i == 4 {
        SBCAPE_FILL
    } else {
        (t * 4 + j * 2 + i) as i16
    }
}

fn attributes(dims: &[&str], extra: &[(&str, Value)]) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("_ARRAY_DIMENSIONS".to_string(), json!(dims));
    for (key, value) in extra {
        attrs.insert(key.to_string(), value.clone());
    }
    attrs
}

fn time_attributes() -> Map<String, Value> {
    attributes(&[TIME], &[("units", json!("hours since 1979-10-01 00:00:00"))])
}

#[allow(clippy::too_many_arguments)]
fn write_array<T: Element>(
    store: &Arc<FilesystemStore>,
    name: &str,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    data_type: DataType,
    fill: FillValue,
    attrs: Map<String, Value>,
    data: &[T],
) -> TestResult {
    let array = ArrayBuilder::new(shape.clone(), data_type, chunks.try_into()?, fill)
        .attributes(attrs)
        .build(store.clone(), &format!("/{}", name))?;
    array.store_metadata()?;
    array.store_array_subset_elements(&ArraySubset::new_with_shape(shape), data)?;
    Ok(())
}

/// Builds a CONUS404-shaped Zarr v3 store with hourly steps from
/// 1979-10-01 00:00.
fn write_fixture_store(path: &Path, grid: SourceGrid) -> TestResult {
    std::fs::create_dir_all(path)?;
    let store = Arc::new(FilesystemStore::new(path)?);

    let hours: Vec<i64> = (0..grid.hours as i64).collect();
    write_array(
        &store,
        "time",
        vec![grid.hours],
        vec![grid.hours],
        DataType::Int64,
        FillValue::from(-1i64),
        time_attributes(),
        &hours,
    )?;

    let cube_chunks = CUBE_CHUNKS.to_vec();
    let dims = [TIME, SOUTH_NORTH, WEST_EAST];

    // U10 deliberately carries no units
    write_array(
        &store,
        "U10",
        grid.cube(),
        cube_chunks.clone(),
        DataType::Float32,
        FillValue::from(f32::NAN),
        attributes(&dims, &[("description", json!("U at 10 M"))]),
        &grid.fill(u10),
    )?;
    write_array(
        &store,
        "V10",
        grid.cube(),
        cube_chunks.clone(),
        DataType::Float32,
        FillValue::from(f32::NAN),
        attributes(&dims, &[("units", json!("m/s")), ("description", json!("V at 10 M"))]),
        &grid.fill(v10),
    )?;

    for (k, name, units) in DATA_VARIABLES {
        write_array(
            &store,
            name,
            grid.cube(),
            cube_chunks.clone(),
            DataType::Float32,
            FillValue::from(f32::NAN),
            attributes(&dims, &[("units", json!(units))]),
            &grid.fill(|t, j, i| plain(k, t, j, i)),
        )?;
    }

    write_array(
        &store,
        "SBCAPE",
        grid.cube(),
        cube_chunks,
        DataType::Int16,
        FillValue::from(SBCAPE_FILL),
        attributes(
            &dims,
            &[
                ("units", json!("J kg-1")),
                ("scale_factor", json!(0.5)),
                ("_FillValue", json!(SBCAPE_FILL)),
            ],
        ),
        &grid.fill(sbcape_raw),
    )?;

    for (name, units, values) in [
        ("lat", "degrees_north", grid.lat()),
        ("lon", "degrees_east", grid.lon()),
    ] {
        write_array(
            &store,
            name,
            grid.plane(),
            grid.plane(),
            DataType::Float32,
            FillValue::from(f32::NAN),
            attributes(&[SOUTH_NORTH, WEST_EAST], &[("units", json!(units))]),
            &values,
        )?;
    }
    Ok(())
}

/// Element types written to uncompressed v2 chunks
trait LeBytes: Copy {
    fn extend_le(self, out: &mut Vec<u8>);
}

impl LeBytes for f32 {
    fn extend_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl LeBytes for i16 {
    fn extend_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl LeBytes for i64 {
    fn extend_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// C-order position of `n` within a block of `extent`
fn unravel(mut n: u64, extent: &[u64]) -> Vec<u64> {
    let mut index = vec![0; extent.len()];
    for axis in (0..extent.len()).rev() {
        index[axis] = n % extent[axis];
        n /= extent[axis];
    }
    index
}

/// Writes a Zarr v2 array the way xarray lays it out on disk: `.zarray`,
/// `.zattrs` and one raw little-endian file per chunk named `i.j.k`.
/// `chunks` must divide `shape` evenly.
#[allow(clippy::too_many_arguments)]
fn write_v2_array<T: LeBytes>(
    root: &Path,
    name: &str,
    shape: &[u64],
    chunks: &[u64],
    dtype: &str,
    fill_value: Value,
    attrs: Map<String, Value>,
    data: &[T],
) -> TestResult {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir)?;

    let zarray = json!({
        "zarr_format": 2,
        "shape": shape,
        "chunks": chunks,
        "dtype": dtype,
        "compressor": null,
        "fill_value": fill_value,
        "order": "C",
        "filters": null,
    });
    std::fs::write(dir.join(".zarray"), serde_json::to_vec_pretty(&zarray)?)?;
    std::fs::write(dir.join(".zattrs"), serde_json::to_vec_pretty(&Value::Object(attrs))?)?;

    let grid: Vec<u64> = shape.iter().zip(chunks).map(|(s, c)| s / c).collect();
    let per_chunk: u64 = chunks.iter().product();
    for n in 0..grid.iter().product::<u64>() {
        let chunk = unravel(n, &grid);
        let mut bytes = Vec::with_capacity(per_chunk as usize * std::mem::size_of::<T>());
        for m in 0..per_chunk {
            let local = unravel(m, chunks);
            let flat = (0..shape.len()).fold(0, |acc, axis| {
                acc * shape[axis] + chunk[axis] * chunks[axis] + local[axis]
            });
            data[flat as usize].extend_le(&mut bytes);
        }
        let key: Vec<String> = chunk.iter().map(u64::to_string).collect();
        std::fs::write(dir.join(key.join(".")), bytes)?;
    }
    Ok(())
}

/// Same contents as `write_fixture_store`, written as an xarray-style Zarr
/// v2 store. The time coordinate has a null fill value and SBCAPE declares
/// its fill only in `.zarray`.
fn write_v2_fixture_store(path: &Path, grid: SourceGrid) -> TestResult {
    std::fs::create_dir_all(path)?;
    std::fs::write(path.join(".zgroup"), br#"{"zarr_format": 2}"#)?;

    let hours: Vec<i64> = (0..grid.hours as i64).collect();
    write_v2_array(
        path,
        "time",
        &[grid.hours],
        &[grid.hours],
        "<i8",
        Value::Null,
        time_attributes(),
        &hours,
    )?;

    let dims = [TIME, SOUTH_NORTH, WEST_EAST];
    write_v2_array(
        path,
        "U10",
        &grid.cube(),
        &CUBE_CHUNKS,
        "<f4",
        json!("NaN"),
        attributes(&dims, &[("description", json!("U at 10 M"))]),
        &grid.fill(u10),
    )?;
    write_v2_array(
        path,
        "V10",
        &grid.cube(),
        &CUBE_CHUNKS,
        "<f4",
        json!("NaN"),
        attributes(&dims, &[("units", json!("m/s")), ("description", json!("V at 10 M"))]),
        &grid.fill(v10),
    )?;
    for (k, name, units) in DATA_VARIABLES {
        write_v2_array(
            path,
            name,
            &grid.cube(),
            &CUBE_CHUNKS,
            "<f4",
            json!("NaN"),
            attributes(&dims, &[("units", json!(units))]),
            &grid.fill(|t, j, i| plain(k, t, j, i)),
        )?;
    }
    write_v2_array(
        path,
        "SBCAPE",
        &grid.cube(),
        &CUBE_CHUNKS,
        "<i2",
        json!(SBCAPE_FILL),
        attributes(&dims, &[("units", json!("J kg-1")), ("scale_factor", json!(0.5))]),
        &grid.fill(sbcape_raw),
    )?;

    for (name, units, values) in [
        ("lat", "degrees_north", grid.lat()),
        ("lon", "degrees_east", grid.lon()),
    ] {
        write_v2_array(
            path,
            name,
            &grid.plane(),
            &grid.plane(),
            "<f4",
            json!("NaN"),
            attributes(&[SOUTH_NORTH, WEST_EAST], &[("units", json!(units))]),
            &values,
        )?;
    }
    Ok(())
}

struct Fixture {
    _dir: TempDir,
    output_root: PathBuf,
    config: JobConfig,
}

impl Fixture {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::build(|path| write_fixture_store(path, SOURCE), WINDOW)
    }

    /// Fixture backed by an xarray-style v2 store
    fn v2() -> Result<Self, Box<dyn std::error::Error>> {
        Self::build(|path| write_v2_fixture_store(path, SOURCE), WINDOW)
    }

    /// One day on `WIDE`, cut to `WIDE_WINDOW`
    fn wide() -> Result<Self, Box<dyn std::error::Error>> {
        Self::build(|path| write_fixture_store(path, WIDE), WIDE_WINDOW)
    }

    fn build(
        write_store: impl FnOnce(&Path) -> TestResult,
        window: GridWindow,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store_path = dir.path().join("conus404_hourly.zarr");
        write_store(&store_path)?;

        let output_root = dir.path().join("CONUS404");
        let mut config = JobConfig::default();
        config.source = SourceConfig::Local {
            path: store_path.to_string_lossy().to_string(),
        };
        config.window = window;
        config.output.root = output_root.to_string_lossy().to_string();

        Ok(Fixture {
            _dir: dir,
            output_root,
            config,
        })
    }

    fn output_file(&self, year: &str, date: &str) -> PathBuf {
        self.output_root.join(year).join(format!("ny_wind_10m_{}.nc", date))
    }
}

fn read_f32(path: &Path, name: &str) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let file = netcdf::open(path)?;
    let var = file.variable(name).ok_or_else(|| format!("missing variable {}", name))?;
    Ok(var.get_values::<f32, _>(..)?)
}

fn variable_text(path: &Path, variable: &str, attribute: &str) -> Option<String> {
    let file = netcdf::open(path).ok()?;
    let var = file.variable(variable)?;
    let value = var.attribute(attribute)?.value().ok()?;
    match value {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn global_attribute(path: &Path, attribute: &str) -> Option<netcdf::AttributeValue> {
    let file = netcdf::open(path).ok()?;
    let value = file.attribute(attribute)?.value().ok();
    value
}

/// Flat index of output cell `(t, r, c)` in a `(24, 4, 5)` cube
fn out_index(t: u64, r: u64, c: u64) -> usize {
    ((t * WINDOW.rows() + r) * WINDOW.cols() + c) as usize
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_day_is_written_with_24_hours() -> TestResult {
        let fixture = Fixture::new()?;

        let outcome = run_day(&fixture.config, "1979-10-01").await;
        let report = match outcome {
            DayOutcome::Saved(report) => report,
            DayOutcome::Failed { error, .. } => return Err(error.into()),
        };

        let expected = fixture.output_file("1979", "1979-10-01");
        assert_eq!(report.time_steps, 24);
        assert_eq!(report.date, NaiveDate::from_ymd_opt(1979, 10, 1).unwrap());
        assert_eq!(PathBuf::from(&report.path), expected);
        assert!(expected.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_output_layout_matches_window() -> TestResult {
        let fixture = Fixture::new()?;
        run_day(&fixture.config, "1979-10-01").await;
        let path = fixture.output_file("1979", "1979-10-01");

        let info = get_netcdf_info(&path.to_string_lossy())?;
        assert_eq!(info.dimension(TIME).map(|d| d.length), Some(24));
        assert_eq!(info.dimension(SOUTH_NORTH).map(|d| d.length), Some(4));
        assert_eq!(info.dimension(WEST_EAST).map(|d| d.length), Some(5));

        for name in fixture.config.output_variables() {
            let var = info
                .variable(&name)
                .ok_or_else(|| format!("missing variable {}", name))?;
            assert!(var.is_float32, "{} stored as {}", name, var.data_type);
            assert_eq!(var.dimensions, vec![TIME, SOUTH_NORTH, WEST_EAST]);
            assert_eq!(var.shape, vec![24, 4, 5]);
        }

        let lat = info.variable("lat").ok_or("missing lat")?;
        assert_eq!(lat.dimensions, vec![SOUTH_NORTH, WEST_EAST]);
        assert_eq!(lat.shape, vec![4, 5]);
        Ok(())
    }

    #[tokio::test]
    async fn test_values_come_from_window() -> TestResult {
        let fixture = Fixture::new()?;
        run_day(&fixture.config, "1979-10-01").await;
        let path = fixture.output_file("1979", "1979-10-01");

        let u = read_f32(&path, "U10")?;
        let mucape = read_f32(&path, "MUCAPE")?;
        let lat = read_f32(&path, "lat")?;
        let (j0, i0) = (WINDOW.south_north.0, WINDOW.west_east.0);

        for (t, r, c) in [(0, 0, 0), (7, 2, 3), (23, 3, 4)] {
            assert_eq!(u[out_index(t, r, c)], u10(t, j0 + r, i0 + c));
            assert_eq!(mucape[out_index(t, r, c)], plain(1, t, j0 + r, i0 + c));
        }
        assert!((lat[0] - (40.0 + j0 as f32 * 0.04)).abs() < 1e-5);
        Ok(())
    }

    #[tokio::test]
    async fn test_wind_speed_is_hypot_of_components() -> TestResult {
        let fixture = Fixture::new()?;
        run_day(&fixture.config, "1979-10-01").await;
        let path = fixture.output_file("1979", "1979-10-01");

        let u = read_f32(&path, "U10")?;
        let v = read_f32(&path, "V10")?;
        let speed = read_f32(&path, "WIND_SPEED_10M")?;
        assert_eq!(speed.len(), 24 * 4 * 5);
        for ((s, u), v) in speed.iter().zip(&u).zip(&v) {
            assert!((s - u.hypot(*v)).abs() < 1e-5);
        }

        assert_eq!(
            variable_text(&path, "WIND_SPEED_10M", "standard_name").as_deref(),
            Some("wind_speed")
        );
        assert_eq!(variable_text(&path, "WIND_SPEED_10M", "units").as_deref(), Some("m s-1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_packed_integer_variable_is_decoded() -> TestResult {
        let fixture = Fixture::new()?;
        run_day(&fixture.config, "1979-10-01").await;
        let path = fixture.output_file("1979", "1979-10-01");

        let sbcape = read_f32(&path, "SBCAPE")?;
        let (j0, i0) = (WINDOW.south_north.0, WINDOW.west_east.0);
        assert_eq!(sbcape[out_index(2, 1, 1)], f32::from(sbcape_raw(2, j0 + 1, i0 + 1)) * 0.5);
        // (t=5, j=3, i=4) is the stored fill value
        assert!(sbcape[out_index(5, 3 - j0, 4 - i0)].is_nan());
        Ok(())
    }

    #[tokio::test]
    async fn test_second_day_selects_later_hours() -> TestResult {
        let fixture = Fixture::new()?;
        let outcome = run_day(&fixture.config, "1979-10-02").await;
        assert!(outcome.is_saved());

        let path = fixture.output_file("1979", "1979-10-02");
        let u = read_f32(&path, "U10")?;
        let (j0, i0) = (WINDOW.south_north.0, WINDOW.west_east.0);
        assert_eq!(u[out_index(0, 0, 0)], u10(24, j0, i0));
        assert_eq!(u[out_index(23, 0, 0)], u10(47, j0, i0));

        let file = netcdf::open(&path)?;
        let time = file.variable(TIME).ok_or("missing time")?;
        let offsets = time.get_values::<f64, _>(..)?;
        assert_eq!(offsets.first(), Some(&0.0));
        assert_eq!(offsets.last(), Some(&23.0));
        assert_eq!(
            variable_text(&path, TIME, "units").as_deref(),
            Some("hours since 1979-10-02 00:00:00")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_one_open_dataset_serves_several_days() -> TestResult {
        let fixture = Fixture::new()?;
        let dataset = open_dataset(&fixture.config).await?;
        assert_eq!(
            dataset.variable_names(),
            vec!["U10", "V10", "MUCAPE", "MLCAPE", "SBCAPE", "USHR6", "VSHR6"]
        );

        for day in [1, 2] {
            let date = NaiveDate::from_ymd_opt(1979, 10, day).unwrap();
            let report = process_day(&dataset, &fixture.config, date).await?;
            assert_eq!(report.time_steps, 24);
        }
        assert!(fixture.output_file("1979", "1979-10-01").exists());
        assert!(fixture.output_file("1979", "1979-10-02").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_overwrites_without_leftovers() -> TestResult {
        let fixture = Fixture::new()?;
        assert!(run_day(&fixture.config, "1979-10-01").await.is_saved());
        let path = fixture.output_file("1979", "1979-10-01");
        let first = read_f32(&path, "WIND_SPEED_10M")?;

        assert!(run_day(&fixture.config, "1979-10-01").await.is_saved());
        let second = read_f32(&path, "WIND_SPEED_10M")?;
        assert_eq!(first, second);

        let entries: Vec<String> = std::fs::read_dir(fixture.output_root.join("1979"))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["ny_wind_10m_1979-10-01.nc".to_string()]);
        Ok(())
    }
}

#[cfg(test)]
mod encoding_tests {
    use super::*;

    fn chunking(path: &Path, name: &str) -> Result<Option<Vec<usize>>, Box<dyn std::error::Error>> {
        let file = netcdf::open(path)?;
        let var = file.variable(name).ok_or_else(|| format!("missing variable {}", name))?;
        Ok(var.chunking()?)
    }

    #[tokio::test]
    async fn test_wide_window_is_chunked_at_80_columns() -> TestResult {
        let fixture = Fixture::wide()?;
        let outcome = run_day(&fixture.config, "1979-10-01").await;
        assert!(outcome.is_saved(), "{:?}", outcome);
        let path = fixture.output_file("1979", "1979-10-01");

        for name in fixture.config.output_variables() {
            assert_eq!(chunking(&path, &name)?, Some(vec![24, 4, 80]), "{}", name);
        }
        assert_eq!(chunking(&path, "lat")?, Some(vec![4, 80]));

        let u = read_f32(&path, "U10")?;
        let cols = WIDE_WINDOW.cols();
        assert_eq!(u.len() as u64, 24 * WIDE_WINDOW.rows() * cols);
        // Last column of the window lies in the second chunk
        let (j0, i0) = (WIDE_WINDOW.south_north.0, WIDE_WINDOW.west_east.0);
        let last = ((23 * WIDE_WINDOW.rows() + 3) * cols + cols - 1) as usize;
        assert_eq!(u[last], u10(23, j0 + 3, i0 + cols - 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_deflate_shrinks_the_file() -> TestResult {
        let fixture = Fixture::wide()?;
        assert!(run_day(&fixture.config, "1979-10-01").await.is_saved());
        let deflated = std::fs::metadata(fixture.output_file("1979", "1979-10-01"))?.len();

        let mut stored = fixture.config.clone();
        let stored_root = fixture.output_root.with_file_name("CONUS404-level0");
        stored.output.root = stored_root.to_string_lossy().to_string();
        stored.output.deflate_level = 0;
        assert!(run_day(&stored, "1979-10-01").await.is_saved());
        let plain_size = std::fs::metadata(stored_root.join("1979").join("ny_wind_10m_1979-10-01.nc"))?.len();

        assert!(
            deflated < plain_size,
            "level 2 file is {} bytes, level 0 file is {} bytes",
            deflated,
            plain_size
        );
        assert_eq!(
            read_f32(&fixture.output_file("1979", "1979-10-01"), "WIND_SPEED_10M")?,
            read_f32(&stored_root.join("1979").join("ny_wind_10m_1979-10-01.nc"), "WIND_SPEED_10M")?
        );
        Ok(())
    }
}

#[cfg(test)]
mod v2_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_xarray_layout_day_is_written() -> TestResult {
        let fixture = Fixture::v2()?;
        let report = match run_day(&fixture.config, "1979-10-02").await {
            DayOutcome::Saved(report) => report,
            DayOutcome::Failed { error, .. } => return Err(error.into()),
        };
        assert_eq!(report.time_steps, 24);

        let path = fixture.output_file("1979", "1979-10-02");
        let u = read_f32(&path, "U10")?;
        let v = read_f32(&path, "V10")?;
        let speed = read_f32(&path, "WIND_SPEED_10M")?;
        let (j0, i0) = (WINDOW.south_north.0, WINDOW.west_east.0);
        assert_eq!(u[out_index(0, 0, 0)], u10(24, j0, i0));
        assert_eq!(u[out_index(23, 3, 4)], u10(47, j0 + 3, i0 + 4));
        for ((s, u), v) in speed.iter().zip(&u).zip(&v) {
            assert!((s - u.hypot(*v)).abs() < 1e-5);
        }

        let lat = read_f32(&path, "lat")?;
        assert!((lat[0] - (40.0 + j0 as f32 * 0.04)).abs() < 1e-5);
        assert_eq!(
            variable_text(&path, TIME, "units").as_deref(),
            Some("hours since 1979-10-02 00:00:00")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_fill_declared_only_in_zarray_is_masked() -> TestResult {
        let fixture = Fixture::v2()?;
        assert!(run_day(&fixture.config, "1979-10-01").await.is_saved());
        let path = fixture.output_file("1979", "1979-10-01");

        let sbcape = read_f32(&path, "SBCAPE")?;
        let (j0, i0) = (WINDOW.south_north.0, WINDOW.west_east.0);
        assert!(sbcape[out_index(5, 3 - j0, 4 - i0)].is_nan());
        assert_eq!(sbcape[out_index(2, 1, 1)], f32::from(sbcape_raw(2, j0 + 1, i0 + 1)) * 0.5);
        assert_eq!(sbcape.iter().filter(|v| v.is_nan()).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_null_fill_time_axis_keeps_hour_zero() -> TestResult {
        // The placeholder fill for time equals the first stored hour
        let fixture = Fixture::v2()?;
        let dataset = open_dataset(&fixture.config).await?;
        let date = NaiveDate::from_ymd_opt(1979, 10, 1).unwrap();
        let report = process_day(&dataset, &fixture.config, date).await?;
        assert_eq!(report.time_steps, 24);

        let file = netcdf::open(fixture.output_file("1979", "1979-10-01"))?;
        let time = file.variable(TIME).ok_or("missing time")?;
        let offsets = time.get_values::<f64, _>(..)?;
        assert_eq!(offsets.first(), Some(&0.0));
        assert_eq!(offsets.last(), Some(&23.0));
        Ok(())
    }
}

#[cfg(test)]
mod metadata_tests {
    use super::*;

    #[tokio::test]
    async fn test_component_units_are_filled_in() -> TestResult {
        let fixture = Fixture::new()?;
        run_day(&fixture.config, "1979-10-01").await;
        let path = fixture.output_file("1979", "1979-10-01");

        // U10 had no units in the store, V10 and MUCAPE keep theirs
        assert_eq!(variable_text(&path, "U10", "units").as_deref(), Some("m s-1"));
        assert_eq!(variable_text(&path, "V10", "units").as_deref(), Some("m/s"));
        assert_eq!(variable_text(&path, "MUCAPE", "units").as_deref(), Some("J kg-1"));
        assert_eq!(variable_text(&path, "U10", "description").as_deref(), Some("U at 10 M"));
        assert_eq!(variable_text(&path, "U10", "coordinates").as_deref(), Some("lat lon"));
        Ok(())
    }

    #[tokio::test]
    async fn test_global_attributes() -> TestResult {
        let fixture = Fixture::new()?;
        run_day(&fixture.config, "1979-10-01").await;
        let path = fixture.output_file("1979", "1979-10-01");

        let text = |name: &str| match global_attribute(&path, name) {
            Some(netcdf::AttributeValue::Str(s)) => Some(s),
            _ => None,
        };
        assert_eq!(
            text("title").as_deref(),
            Some("CONUS404 10m Wind Data - New York State - 1979-10-01")
        );
        assert_eq!(text("conventions").as_deref(), Some("CF-1.8"));
        assert_eq!(text("temporal_resolution").as_deref(), Some("hourly"));
        assert_eq!(
            text("grid_indices").as_deref(),
            Some("south_north[2:6], west_east[3:8]")
        );
        assert!(text("created").is_some_and(|c| c.ends_with(" UTC")));
        assert!(matches!(
            global_attribute(&path, "time_steps"),
            Some(netcdf::AttributeValue::Longlong(24))
        ));
        Ok(())
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_day_outside_axis_reports_no_data() -> TestResult {
        let fixture = Fixture::new()?;

        match run_day(&fixture.config, "1980-01-01").await {
            DayOutcome::Failed { date, error } => {
                assert_eq!(date, "1980-01-01");
                assert!(matches!(error, ProcessError::NoData));
            }
            DayOutcome::Saved(report) => panic!("unexpected output {}", report.path),
        }
        assert!(!fixture.output_file("1980", "1980-01-01").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_date_fails_without_output() -> TestResult {
        let fixture = Fixture::new()?;
        let outcome = run_day(&fixture.config, "1979-13-45").await;
        assert!(matches!(
            outcome,
            DayOutcome::Failed { error: ProcessError::InvalidDate(_), .. }
        ));
        assert!(!fixture.output_root.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_window_beyond_grid_is_rejected() -> TestResult {
        let mut fixture = Fixture::new()?;
        fixture.config.window = GridWindow {
            south_north: (2, 6),
            west_east: (3, SOURCE.cols + 1),
        };

        match run_day(&fixture.config, "1979-10-01").await {
            DayOutcome::Failed {
                error: ProcessError::WindowOutOfBounds { rows, cols, .. },
                ..
            } => {
                assert_eq!(rows, SOURCE.rows);
                assert_eq!(cols, SOURCE.cols);
            }
            other => panic!("expected window error, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_variable_fails() -> TestResult {
        let mut fixture = Fixture::new()?;
        fixture.config.variables.push("T2".to_string());

        let outcome = run_day(&fixture.config, "1979-10-01").await;
        assert!(matches!(
            outcome,
            DayOutcome::Failed { error: ProcessError::Zarr(_), .. }
        ));
        assert!(!fixture.output_file("1979", "1979-10-01").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_store_fails() -> TestResult {
        let dir = tempdir()?;
        let mut config = JobConfig::default();
        config.source = SourceConfig::Local {
            path: dir.path().join("absent.zarr").to_string_lossy().to_string(),
        };
        config.output.root = dir.path().join("out").to_string_lossy().to_string();

        let outcome = run_day(&config, "1979-10-01").await;
        assert!(!outcome.is_saved());
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_line_names_the_date() -> TestResult {
        let fixture = Fixture::new()?;
        let outcome = run_day(&fixture.config, "1970-01-01").await;
        assert_eq!(
            crate::log::outcome_line(&outcome),
            "✗ Error processing 1970-01-01: No data found for this day"
        );
        Ok(())
    }
}
