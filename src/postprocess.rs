//! # Derived Fields
//!
//! Wind speed from the horizontal wind components, plus the unit annotation
//! the components need before they are written out.

use crate::error::{ProcessError, ProcessResult};
use crate::field::{AttrValue, Field};
use crate::input::WindConfig;
use log::debug;

/// Element-wise `sqrt(u² + v²)`.
///
/// The result has the shape and dimensions of the inputs; the two components
/// must match exactly.
pub fn wind_speed(u: &Field, v: &Field, name: &str) -> ProcessResult<Field> {
    if u.shape != v.shape || u.dims != v.dims {
        return Err(ProcessError::Shape(format!(
            "cannot combine '{}' {:?} with '{}' {:?}",
            u.name, u.shape, v.name, v.shape
        )));
    }

    let data: Vec<f32> = u
        .data
        .iter()
        .zip(&v.data)
        .map(|(a, b)| a.hypot(*b))
        .collect();

    let dims: Vec<&str> = u.dims.iter().map(String::as_str).collect();
    Ok(Field::new(name, &dims, u.shape.clone(), data))
}

/// Builds the annotated wind speed field from the subset's components.
pub fn derive_wind_speed(u: &Field, v: &Field, wind: &WindConfig) -> ProcessResult<Field> {
    let speed = wind_speed(u, v, &wind.speed)?
        .with_attribute("long_name", "10-meter wind speed")
        .with_attribute("units", wind.default_units.as_str())
        .with_attribute(
            "description",
            format!("Wind speed calculated from {} and {} components", wind.u, wind.v),
        )
        .with_attribute("formula", format!("sqrt({}² + {}²)", wind.u, wind.v))
        .with_attribute("standard_name", "wind_speed");

    debug!("Derived {} from {} and {} ({} values)", speed.name, wind.u, wind.v, speed.len());
    Ok(speed)
}

/// Adds a `units` attribute when the field has none. Existing units are kept.
pub fn ensure_units(field: &mut Field, units: &str) {
    if !field.attributes.contains_key("units") {
        debug!("Adding default units '{}' to {}", units, field.name);
        field
            .attributes
            .insert("units".to_string(), AttrValue::Text(units.to_string()));
    }
}
