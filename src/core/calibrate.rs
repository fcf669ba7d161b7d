use crate::io::SceneMetadata;
use crate::types::{DnImage, GainMode, RealImage, ReflectaError, ReflectaResult};
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// ASTER unit-conversion coefficients (W m-2 sr-1 um-1 per DN)
const ASTER_UNIT_CONVERSION: &[(u8, GainMode, f64)] = &[
    (1, GainMode::High, 0.676),
    (1, GainMode::Normal, 1.688),
    (1, GainMode::Low1, 2.25),
    (2, GainMode::High, 0.708),
    (2, GainMode::Normal, 1.415),
    (2, GainMode::Low1, 1.89),
    (3, GainMode::High, 0.423),
    (3, GainMode::Normal, 0.862),
    (3, GainMode::Low1, 1.15),
    (4, GainMode::High, 0.1087),
    (4, GainMode::Normal, 0.2174),
    (4, GainMode::Low1, 0.2900),
    (4, GainMode::Low2, 0.2900),
    (5, GainMode::High, 0.0348),
    (5, GainMode::Normal, 0.0696),
    (5, GainMode::Low1, 0.0925),
    (5, GainMode::Low2, 0.4090),
    (6, GainMode::High, 0.0313),
    (6, GainMode::Normal, 0.0625),
    (6, GainMode::Low1, 0.0830),
    (6, GainMode::Low2, 0.3900),
    (7, GainMode::High, 0.0299),
    (7, GainMode::Normal, 0.0597),
    (7, GainMode::Low1, 0.0795),
    (7, GainMode::Low2, 0.3320),
    (8, GainMode::High, 0.0209),
    (8, GainMode::Normal, 0.0417),
    (8, GainMode::Low1, 0.0556),
    (8, GainMode::Low2, 0.2450),
    (9, GainMode::High, 0.0159),
    (9, GainMode::Normal, 0.0318),
    (9, GainMode::Low1, 0.0424),
    (9, GainMode::Low2, 0.2650),
];

/// Exo-atmospheric irradiance for bands 1..9 (Thome et al., MODTRAN)
const ASTER_IRRADIANCE: [f64; 9] = [1848.0, 1549.0, 1114.0, 225.4, 86.63, 81.85, 74.85, 66.49, 59.85];

/// Coefficient and irradiance lookup for one sensor
#[derive(Debug, Clone, Copy)]
pub struct CalibrationTable {
    coefficients: &'static [(u8, GainMode, f64)],
    irradiance: &'static [f64],
}

impl CalibrationTable {
    pub fn aster() -> Self {
        Self {
            coefficients: ASTER_UNIT_CONVERSION,
            irradiance: &ASTER_IRRADIANCE,
        }
    }

    /// Unit-conversion coefficient for (band, gain mode)
    pub fn coefficient(&self, band: u8, gain: GainMode) -> ReflectaResult<f64> {
        let mut matches = self
            .coefficients
            .iter()
            .filter(|(b, g, _)| *b == band && *g == gain);

        match (matches.next(), matches.next()) {
            (Some(&(_, _, c)), None) => Ok(c),
            (None, _) => Err(ReflectaError::Configuration(format!(
                "No calibration coefficient for band {} in {} gain",
                band, gain
            ))),
            (Some(_), Some(_)) => Err(ReflectaError::Configuration(format!(
                "Ambiguous calibration coefficient for band {} in {} gain",
                band, gain
            ))),
        }
    }

    /// Spectral irradiance for a band (index-aligned with band order)
    pub fn irradiance(&self, band: u8) -> ReflectaResult<f64> {
        (band as usize)
            .checked_sub(1)
            .and_then(|i| self.irradiance.get(i))
            .copied()
            .ok_or_else(|| ReflectaError::Configuration(format!("No irradiance for band {}", band)))
    }

    /// All (band, gain mode) pairs the table resolves
    pub fn entries(&self) -> impl Iterator<Item = (u8, GainMode, f64)> + '_ {
        self.coefficients.iter().copied()
    }
}

/// Earth-sun distance in AU for a day of year
pub fn earth_sun_distance(day_of_year: u32) -> f64 {
    1.0 - 0.01672 * (0.9856 * (day_of_year as f64 - 4.0)).to_radians().cos()
}

/// Scene-level solar geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneGeometry {
    pub earth_sun_distance: f64,
    /// Second SOLARDIRECTION component, in degrees
    pub solar_zenith: f64,
}

impl SceneGeometry {
    /// The solar angle must lie in (0, 180) degrees so its sine stays positive
    pub fn new(day_of_year: u32, solar_zenith: f64) -> ReflectaResult<Self> {
        if !(solar_zenith > 0.0 && solar_zenith < 180.0) {
            return Err(ReflectaError::Configuration(format!(
                "Solar angle {} is outside (0, 180) degrees",
                solar_zenith
            )));
        }
        Ok(Self {
            earth_sun_distance: earth_sun_distance(day_of_year),
            solar_zenith,
        })
    }

    pub fn from_metadata(meta: &SceneMetadata) -> ReflectaResult<Self> {
        Self::new(meta.day_of_year(), meta.solar_direction.1)
    }
}

/// Calibrated output of one band
#[derive(Debug, Clone)]
pub struct CalibratedBand {
    pub band: u8,
    pub radiance: Array2<f32>,
    pub reflectance: Array2<u16>,
}

/// DN -> radiance -> TOA reflectance for one band
#[derive(Debug, Clone)]
pub struct CalibrationProcessor {
    band: u8,
    coefficient: f64,
    irradiance: f64,
    geometry: SceneGeometry,
}

impl CalibrationProcessor {
    /// Resolve the band's coefficient; unknown (band, gain) is fatal for the band
    pub fn new(
        table: &CalibrationTable,
        band: u8,
        gain: GainMode,
        geometry: SceneGeometry,
    ) -> ReflectaResult<Self> {
        let coefficient = table.coefficient(band, gain)?;
        let irradiance = table.irradiance(band)?;
        log::debug!(
            "Band {} calibration: gain {}, coefficient {}, irradiance {}",
            band,
            gain,
            coefficient,
            irradiance
        );
        Ok(Self {
            band,
            coefficient,
            irradiance,
            geometry,
        })
    }

    /// radiance = (dn - 1) * coefficient, with dn == 0 forced to 0
    pub fn dn_to_radiance(&self, dn: ArrayView2<u16>) -> Array2<f32> {
        let c = self.coefficient;
        let kernel = move |&v: &u16| -> f32 {
            if v == 0 {
                0.0
            } else {
                ((v as f64 - 1.0) * c) as f32
            }
        };

        #[cfg(feature = "parallel")]
        {
            Zip::from(&dn).par_map_collect(kernel)
        }
        #[cfg(not(feature = "parallel"))]
        {
            Zip::from(&dn).map_collect(kernel)
        }
    }

    /// TOA reflectance from radiance and scene geometry
    pub fn radiance_to_reflectance(&self, radiance: &Array2<f32>) -> RealImage {
        let d2 = self.geometry.earth_sun_distance * self.geometry.earth_sun_distance;
        let denom = self.irradiance * (PI * self.geometry.solar_zenith / 180.0).sin();
        let kernel = move |&rad: &f32| -> f64 { (PI * rad as f64 * d2) / denom };

        #[cfg(feature = "parallel")]
        {
            Zip::from(radiance).par_map_collect(kernel)
        }
        #[cfg(not(feature = "parallel"))]
        {
            Zip::from(radiance).map_collect(kernel)
        }
    }

    /// Scale reflectance to the full unsigned 16-bit range
    pub fn quantize_reflectance(reflectance: &RealImage) -> Array2<u16> {
        reflectance.mapv(|r| {
            if r.is_finite() {
                (r * 65535.0).round().clamp(0.0, 65535.0) as u16
            } else {
                0
            }
        })
    }

    /// Full chain for one band
    pub fn calibrate(&self, dn: ArrayView2<u16>) -> CalibratedBand {
        let radiance = self.dn_to_radiance(dn);
        let reflectance = self.radiance_to_reflectance(&radiance);
        CalibratedBand {
            band: self.band,
            reflectance: Self::quantize_reflectance(&reflectance),
            radiance,
        }
    }
}

/// Convert a float tile back to raw DN samples
pub fn to_dn_image(data: &RealImage) -> DnImage {
    data.mapv(|v| {
        if v.is_finite() {
            v.round().clamp(0.0, u16::MAX as f64) as u16
        } else {
            0
        }
    })
}
