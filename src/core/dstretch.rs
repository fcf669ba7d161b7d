//! Decorrelation stretch and 8-bit display quantization
//!
//! The stretch whitens the three channels with the eigenvectors of their
//! covariance and rescales them to the original (or a target) spread, then
//! each channel is clipped at histogram percentiles into 1..=255. Pixel value
//! 0 is reserved for pixels that took no part in the statistics.

use crate::core::stats::{symmetric_eigen, ChannelStatistics, SignConvention};
use crate::types::{is_valid_sample, ByteImage, DerivedProduct, ReflectaError, ReflectaResult, RgbCube};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

/// Percentile clip and target statistics for the stretch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StretchParams {
    /// Lower clip as a fraction of valid pixels
    pub low_percentile: f64,
    pub high_percentile: f64,
    /// Histogram bucket count
    pub bins: usize,
    /// Per-channel output mean (defaults to the input mean)
    pub target_mean: Option<[f64; 3]>,
    /// Per-channel output standard deviation (defaults to the input spread)
    pub target_sigma: Option<[f64; 3]>,
}

impl Default for StretchParams {
    fn default() -> Self {
        Self {
            low_percentile: 0.02,
            high_percentile: 0.98,
            bins: 4096,
            target_mean: None,
            target_sigma: None,
        }
    }
}

impl StretchParams {
    pub fn validate(&self) -> ReflectaResult<()> {
        let ok = self.bins > 0
            && (0.0..1.0).contains(&self.low_percentile)
            && (0.0..=1.0).contains(&self.high_percentile)
            && self.low_percentile < self.high_percentile;
        if ok {
            Ok(())
        } else {
            Err(ReflectaError::Configuration(format!(
                "Invalid stretch parameters: {}..{} over {} bins",
                self.low_percentile, self.high_percentile, self.bins
            )))
        }
    }
}

/// The three 8-bit renderings of one derived product
#[derive(Debug, Clone)]
pub struct StretchOutputs {
    /// Per-channel percentile stretch without decorrelation
    pub preview: ByteImage,
    /// Decorrelation stretch of the linear channels
    pub linear: ByteImage,
    /// Decorrelation stretch in CIE L*a*b*
    pub perceptual: ByteImage,
}

/// Stretch a derived product
pub fn decorrelation_stretch(product: &DerivedProduct, params: &StretchParams) -> ReflectaResult<StretchOutputs> {
    log::debug!("Decorrelation stretch of {}", product.name);
    stretch_cube(&product.channels, &product.valid_mask(), params)
}

/// Stretch a (rows, cols, 3) cube; `valid` selects pixels used for statistics
pub fn stretch_cube(cube: &RgbCube, valid: &Array2<bool>, params: &StretchParams) -> ReflectaResult<StretchOutputs> {
    params.validate()?;
    let (rows, cols, n) = cube.dim();
    if n != 3 {
        return Err(ReflectaError::Processing(format!("Stretch expects 3 channels, got {}", n)));
    }
    if valid.dim() != (rows, cols) {
        return Err(ReflectaError::Processing("Validity mask does not match cube".to_string()));
    }

    let preview = quantize_cube(cube.view(), valid.view(), params);

    let linear_stretched = decorrelate(cube.view(), valid.view(), params)?;
    let linear = quantize_cube(linear_stretched.view(), valid.view(), params);

    let unit = normalize_unit(cube.view(), valid.view(), params);
    let lab = rgb_to_lab(unit.view());
    let lab_stretched = decorrelate(lab.view(), valid.view(), params)?;
    let perceptual = quantize_cube(lab_stretched.view(), valid.view(), params);

    Ok(StretchOutputs {
        preview,
        linear,
        perceptual,
    })
}

/// Apply the decorrelation operator to valid pixels; others become NaN
///
/// operator = V · diag(1/sqrt(λ)) · Vᵀ · diag(σ), applied to mean-centred
/// pixels before re-adding the original or target mean.
pub fn decorrelate(cube: ArrayView3<f64>, valid: ArrayView2<bool>, params: &StretchParams) -> ReflectaResult<RgbCube> {
    let (rows, cols, n) = cube.dim();
    let mut out = Array3::<f64>::from_elem((rows, cols, n), f64::NAN);

    let valid: Array2<bool> = Array2::from_shape_fn((rows, cols), |(r, c)| {
        valid[[r, c]] && (0..n).all(|k| cube[[r, c, k]].is_finite())
    });
    let stats = ChannelStatistics::compute(cube, valid.view())?;
    if stats.count == 0 {
        log::warn!("No valid pixels to stretch");
        return Ok(out);
    }

    let eigen = symmetric_eigen(&stats.covariance, SignConvention::Unpinned)?;
    let largest = eigen.values.iter().fold(0.0f64, |m, &v| m.max(v));
    let scale: Vec<f64> = eigen
        .values
        .iter()
        .map(|&v| if largest > 0.0 && v > 1e-12 * largest { 1.0 / v.sqrt() } else { 0.0 })
        .collect();

    let sigma: Vec<f64> = match params.target_sigma {
        Some(t) if n == 3 => t.to_vec(),
        _ => stats.std_dev().to_vec(),
    };
    let mean: Vec<f64> = match params.target_mean {
        Some(t) if n == 3 => t.to_vec(),
        _ => stats.mean.to_vec(),
    };

    let v = &eigen.vectors;
    let operator = Array2::from_shape_fn((n, n), |(i, j)| {
        (0..n).map(|k| v[[i, k]] * scale[k] * v[[j, k]]).sum::<f64>() * sigma[j]
    });

    let mut centred = vec![0.0; n];
    for ((r, c), _) in valid.indexed_iter().filter(|&(_, &ok)| ok) {
        for k in 0..n {
            centred[k] = cube[[r, c, k]] - stats.mean[k];
        }
        for j in 0..n {
            let y: f64 = (0..n).map(|i| centred[i] * operator[[i, j]]).sum();
            out[[r, c, j]] = y + mean[j];
        }
    }

    Ok(out)
}

/// Lower and upper clip values of a channel's valid samples
///
/// Returns None when the channel has no valid samples.
pub fn percentile_bounds(values: ArrayView2<f64>, valid: ArrayView2<bool>, params: &StretchParams) -> Option<(f64, f64)> {
    let samples: Vec<f64> = values
        .iter()
        .zip(valid.iter())
        .filter(|&(v, &ok)| ok && v.is_finite())
        .map(|(&v, _)| v)
        .collect();
    if samples.is_empty() {
        return None;
    }

    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= min {
        return Some((min, max));
    }

    let bins = params.bins.max(1);
    let width = (max - min) / bins as f64;
    let mut counts = vec![0u64; bins];
    for &v in &samples {
        let idx = (((v - min) / (max - min)) * bins as f64).floor() as usize;
        counts[idx.min(bins - 1)] += 1;
    }

    let total = samples.len() as f64;
    let cut = |p: f64| -> f64 {
        let mut cumulative = 0u64;
        for (i, &count) in counts.iter().enumerate() {
            cumulative += count;
            if cumulative as f64 / total > p {
                return min + i as f64 * width;
            }
        }
        max
    };

    Some((cut(params.low_percentile), cut(params.high_percentile)))
}

/// Clip a channel into 1..=255 between its percentile bounds; invalid pixels are 0
pub fn quantize_to_byte(values: ArrayView2<f64>, valid: ArrayView2<bool>, params: &StretchParams) -> Array2<u8> {
    let mut out = Array2::<u8>::zeros(values.dim());
    let Some((lo, hi)) = percentile_bounds(values, valid, params) else {
        return out;
    };

    for ((v, &ok), o) in values.iter().zip(valid.iter()).zip(out.iter_mut()) {
        if !ok || !v.is_finite() {
            continue;
        }
        *o = if hi > lo {
            let scaled = ((v - lo) / (hi - lo) * 254.0).round() + 1.0;
            scaled.clamp(1.0, 255.0) as u8
        } else if *v > lo {
            255
        } else {
            1
        };
    }
    out
}

fn quantize_cube(cube: ArrayView3<f64>, valid: ArrayView2<bool>, params: &StretchParams) -> ByteImage {
    let (rows, cols, n) = cube.dim();
    let mut out = ByteImage::zeros((rows, cols, n));
    for k in 0..n {
        let channel = quantize_to_byte(cube.slice(s![.., .., k]), valid, params);
        out.slice_mut(s![.., .., k]).assign(&channel);
    }
    out
}

/// Percentile-clip each channel into [0, 1]
fn normalize_unit(cube: ArrayView3<f64>, valid: ArrayView2<bool>, params: &StretchParams) -> RgbCube {
    let (rows, cols, n) = cube.dim();
    let mut out = Array3::<f64>::from_elem((rows, cols, n), f64::NAN);
    for k in 0..n {
        let channel = cube.slice(s![.., .., k]);
        let Some((lo, hi)) = percentile_bounds(channel, valid, params) else {
            continue;
        };
        let span = hi - lo;
        for ((r, c), &v) in channel.indexed_iter() {
            if valid[[r, c]] && v.is_finite() {
                out[[r, c, k]] = if span > 0.0 { ((v - lo) / span).clamp(0.0, 1.0) } else { 0.0 };
            }
        }
    }
    out
}

const SRGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.412453, 0.357580, 0.180423],
    [0.212671, 0.715160, 0.072169],
    [0.019334, 0.119193, 0.950227],
];

/// D65 reference white
const WHITE_D65: [f64; 3] = [0.95047, 1.0, 1.08883];

/// sRGB in [0, 1] to CIE L*a*b* (D65); non-finite pixels stay NaN
pub fn rgb_to_lab(rgb: ArrayView3<f64>) -> RgbCube {
    let (rows, cols, _) = rgb.dim();
    let mut lab = Array3::<f64>::from_elem((rows, cols, 3), f64::NAN);

    let linearize = |c: f64| if c <= 0.04045 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) };
    let f = |t: f64| if t > 0.008856 { t.cbrt() } else { 7.787 * t + 16.0 / 116.0 };

    for r in 0..rows {
        for c in 0..cols {
            let px = [rgb[[r, c, 0]], rgb[[r, c, 1]], rgb[[r, c, 2]]];
            if px.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let lin = px.map(linearize);
            let mut xyz = [0.0; 3];
            for (i, row) in SRGB_TO_XYZ.iter().enumerate() {
                xyz[i] = (row[0] * lin[0] + row[1] * lin[1] + row[2] * lin[2]) / WHITE_D65[i];
            }
            let (fx, fy, fz) = (f(xyz[0]), f(xyz[1]), f(xyz[2]));
            lab[[r, c, 0]] = 116.0 * fy - 16.0;
            lab[[r, c, 1]] = 500.0 * (fx - fy);
            lab[[r, c, 2]] = 200.0 * (fy - fz);
        }
    }
    lab
}

/// Validity of a cube against a nodata sentinel across all channels
pub fn cube_valid_mask(cube: &RgbCube, nodata: Option<f64>) -> Array2<bool> {
    let (rows, cols, n) = cube.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| (0..n).all(|k| is_valid_sample(cube[[r, c, k]], nodata)))
}
