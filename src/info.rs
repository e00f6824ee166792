//! # NetCDF File Information
//!
//! Summarizes a written daily file: dimensions, variables with their storage
//! type and shape, and attributes.

use anyhow::{Context, Result};
use log::debug;
use netcdf::types::{FloatType, NcVariableType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetCdfDimensionInfo {
    pub name: String,
    pub length: usize,
    pub is_unlimited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetCdfVariableInfo {
    pub name: String,
    pub data_type: String,
    pub is_float32: bool,
    pub dimensions: Vec<String>,
    pub attributes: HashMap<String, String>,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetCdfInfo {
    pub path: String,
    pub dimensions: Vec<NetCdfDimensionInfo>,
    pub variables: Vec<NetCdfVariableInfo>,
    pub global_attributes: HashMap<String, String>,
    pub file_size: Option<u64>,
}

impl NetCdfInfo {
    pub fn dimension(&self, name: &str) -> Option<&NetCdfDimensionInfo> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&NetCdfVariableInfo> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// Reads the structure of a local NetCDF file.
pub fn get_netcdf_info(file_path: &str) -> Result<NetCdfInfo> {
    debug!("Opening NetCDF file: {}", file_path);
    let file = netcdf::open(file_path)
        .with_context(|| format!("Failed to open NetCDF file: {}", file_path))?;

    let file_size = std::fs::metadata(file_path).ok().map(|m| m.len());

    let dimensions = file
        .dimensions()
        .map(|dim| NetCdfDimensionInfo {
            name: dim.name().to_string(),
            length: dim.len(),
            is_unlimited: dim.is_unlimited(),
        })
        .collect();

    let mut variables = Vec::new();
    for var in file.variables() {
        let attributes = var
            .attributes()
            .filter_map(|attr| {
                attr.value()
                    .ok()
                    .map(|value| (attr.name().to_string(), format_attribute_value(&value)))
            })
            .collect();

        let vartype = var.vartype();
        variables.push(NetCdfVariableInfo {
            name: var.name().to_string(),
            data_type: format!("{:?}", vartype),
            is_float32: matches!(vartype, NcVariableType::Float(FloatType::F32)),
            dimensions: var.dimensions().iter().map(|d| d.name().to_string()).collect(),
            attributes,
            shape: var.dimensions().iter().map(|d| d.len()).collect(),
        });
    }

    let global_attributes = file
        .attributes()
        .filter_map(|attr| {
            attr.value()
                .ok()
                .map(|value| (attr.name().to_string(), format_attribute_value(&value)))
        })
        .collect();

    file.close().context("Failed to close NetCDF file")?;

    Ok(NetCdfInfo {
        path: file_path.to_string(),
        dimensions,
        variables,
        global_attributes,
        file_size,
    })
}

/// Strings print bare; everything else uses its debug form.
fn format_attribute_value(value: &netcdf::AttributeValue) -> String {
    match value {
        netcdf::AttributeValue::Str(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

/// Logs the summary at debug level.
pub fn log_file_info(info: &NetCdfInfo) {
    debug!("NetCDF file: {}", info.path);
    if let Some(size) = info.file_size {
        debug!("  size: {:.2} MB", size as f64 / 1_048_576.0);
    }
    for dim in &info.dimensions {
        debug!("  dim {} = {}", dim.name, dim.length);
    }
    for var in &info.variables {
        debug!(
            "  var {} {} [{}] {:?}",
            var.name,
            var.data_type,
            var.dimensions.join(", "),
            var.shape
        );
    }
}
