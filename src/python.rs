//! Python bindings (`reflecta._core`)

use crate::core::calibrate::{self, CalibrationProcessor, CalibrationTable, SceneGeometry};
use crate::core::dstretch::{cube_valid_mask, stretch_cube, StretchParams};
use crate::types::{GainMode, ReflectaError};
use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: ReflectaError) -> PyErr {
    match e {
        ReflectaError::Configuration(_) | ReflectaError::DataIncomplete { .. } => {
            PyErr::new::<PyValueError, _>(e.to_string())
        }
        _ => PyErr::new::<PyRuntimeError, _>(e.to_string()),
    }
}

/// Earth-sun distance in AU for a day of year
#[pyfunction]
fn earth_sun_distance(day_of_year: u32) -> f64 {
    calibrate::earth_sun_distance(day_of_year)
}

/// Calibrate one ASTER band of raw DNs to (radiance, 16-bit reflectance)
#[pyfunction]
fn calibrate_band<'py>(
    py: Python<'py>,
    dn: PyReadonlyArray2<'py, u16>,
    band: u8,
    gain: &str,
    day_of_year: u32,
    solar_zenith: f64,
) -> PyResult<(&'py PyArray2<f32>, &'py PyArray2<u16>)> {
    let gain = GainMode::parse(gain).map_err(to_py_err)?;
    let geometry = SceneGeometry::new(day_of_year, solar_zenith).map_err(to_py_err)?;
    let processor = CalibrationProcessor::new(&CalibrationTable::aster(), band, gain, geometry).map_err(to_py_err)?;

    let calibrated = processor.calibrate(dn.as_array());
    Ok((calibrated.radiance.into_pyarray(py), calibrated.reflectance.into_pyarray(py)))
}

/// Decorrelation stretch of a (rows, cols, 3) array to (linear, lab) byte images
#[pyfunction]
#[pyo3(signature = (cube, nodata=None, low_percentile=0.02, high_percentile=0.98))]
fn decorrelation_stretch<'py>(
    py: Python<'py>,
    cube: PyReadonlyArray3<'py, f64>,
    nodata: Option<f64>,
    low_percentile: f64,
    high_percentile: f64,
) -> PyResult<(&'py PyArray3<u8>, &'py PyArray3<u8>)> {
    let cube = cube.as_array().to_owned();
    let valid = cube_valid_mask(&cube, nodata);
    let params = StretchParams {
        low_percentile,
        high_percentile,
        ..StretchParams::default()
    };

    let outputs = py
        .allow_threads(|| stretch_cube(&cube, &valid, &params))
        .map_err(to_py_err)?;
    Ok((outputs.linear.into_pyarray(py), outputs.perceptual.into_pyarray(py)))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(earth_sun_distance, m)?)?;
    m.add_function(wrap_pyfunction!(calibrate_band, m)?)?;
    m.add_function(wrap_pyfunction!(decorrelation_stretch, m)?)?;
    Ok(())
}
