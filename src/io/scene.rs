use crate::types::{GainMode, GeoReference, GeoTransform, ReflectaError, ReflectaResult};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use gdal::{Dataset, Metadata};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Scene-level attributes of one ASTER capture
#[derive(Debug, Clone)]
pub struct SceneMetadata {
    pub calendar_date: NaiveDate,
    /// SOLARDIRECTION as (azimuth, second component) in degrees
    pub solar_direction: (f64, f64),
    /// Raw gain labels keyed by band index
    gains: HashMap<u8, String>,
    /// All key/value pairs as read
    items: HashMap<String, String>,
}

impl SceneMetadata {
    /// Build from metadata key/value pairs
    pub fn from_items<I, K, V>(items: I) -> ReflectaResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let items: HashMap<String, String> = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let date_str = required(&items, "CALENDARDATE")?;
        let calendar_date = NaiveDate::parse_from_str(date_str.trim(), "%Y%m%d").map_err(|e| {
            ReflectaError::Configuration(format!("Invalid CALENDARDATE '{}': {}", date_str, e))
        })?;

        let direction = parse_number_list(required(&items, "SOLARDIRECTION")?, "SOLARDIRECTION")?;
        if direction.len() < 2 {
            return Err(ReflectaError::Configuration(format!(
                "SOLARDIRECTION needs two angles, got {}",
                direction.len()
            )));
        }

        let mut gains = HashMap::new();
        for (key, value) in items.iter().filter(|(k, _)| k.contains("GAIN")) {
            let mut parts = value.split(',').map(str::trim);
            let (Some(band_label), Some(gain_label)) = (parts.next(), parts.next()) else {
                log::warn!("Ignoring malformed gain entry {}={}", key, value);
                continue;
            };
            if let Some(band) = parse_band_label(band_label) {
                gains.insert(band, gain_label.to_string());
            }
        }

        log::debug!(
            "Scene metadata: date {}, solar direction {:?}, {} gain entries",
            calendar_date,
            direction,
            gains.len()
        );

        Ok(Self {
            calendar_date,
            solar_direction: (direction[0], direction[1]),
            gains,
            items,
        })
    }

    /// Read the default metadata domain of an opened scene
    pub fn from_dataset(dataset: &Dataset) -> ReflectaResult<Self> {
        let entries = dataset.metadata_domain("").unwrap_or_default();
        let items = entries.iter().filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        });
        Self::from_items(items)
    }

    /// Day of year (1..=366) of the acquisition
    pub fn day_of_year(&self) -> u32 {
        self.calendar_date.ordinal()
    }

    /// Gain mode of one band; unknown or absent labels are fatal for that band
    pub fn gain_mode(&self, band: u8) -> ReflectaResult<GainMode> {
        let label = self.gains.get(&band).ok_or_else(|| {
            ReflectaError::Configuration(format!("No gain entry for band {}", band))
        })?;
        GainMode::parse(label)
    }

    /// UTM grid of the scene from its corner coordinates
    ///
    /// Returns the EPSG code and a transform whose origin is shifted by half
    /// a pixel from the listed upper-left centre.
    pub fn utm_grid(&self, rows: usize, cols: usize) -> ReflectaResult<(u32, GeoTransform)> {
        let ul = parse_number_list(required(&self.items, "UPPERLEFTM")?, "UPPERLEFTM")?;
        let lr = parse_number_list(required(&self.items, "LOWERRIGHTM")?, "LOWERRIGHTM")?;
        if ul.len() < 2 || lr.len() < 2 {
            return Err(ReflectaError::Configuration(
                "UPPERLEFTM/LOWERRIGHTM need northing and easting".to_string(),
            ));
        }

        let north = parse_f64(required(&self.items, "NORTHBOUNDINGCOORDINATE")?, "NORTHBOUNDINGCOORDINATE")?;
        let zone: u32 = required(&self.items, "UTMZONENUMBER")?
            .trim()
            .parse()
            .map_err(|e| ReflectaError::Configuration(format!("Invalid UTMZONENUMBER: {}", e)))?;

        let epsg = utm_epsg(zone, north);
        let offset = if north < 0.0 { 10_000_000.0 } else { 0.0 };
        let (ul_y, ul_x) = (ul[0] + offset, ul[1]);
        let (lr_y, lr_x) = (lr[0] + offset, lr[1]);

        if rows == 0 || cols == 0 {
            return Err(ReflectaError::InvalidFormat("Empty scene raster".to_string()));
        }

        let y_res = -((ul_y - lr_y).abs() / rows as f64).round();
        let x_res = ((ul_x - lr_x).abs() / cols as f64).round();

        let transform = GeoTransform::north_up(ul_x - x_res / 2.0, ul_y - y_res / 2.0, x_res, y_res);
        transform.validate()?;
        Ok((epsg, transform))
    }

    /// [`utm_grid`](Self::utm_grid) resolved to a WKT georeference
    pub fn utm_georeference(&self, rows: usize, cols: usize) -> ReflectaResult<GeoReference> {
        let (epsg, transform) = self.utm_grid(rows, cols)?;
        let wkt = crate::io::raster::wkt_from_epsg(epsg)?;
        Ok(GeoReference::new(transform, wkt))
    }
}

/// WGS84 / UTM EPSG code for a zone and hemisphere
pub fn utm_epsg(zone: u32, north_bounding: f64) -> u32 {
    if north_bounding < 0.0 {
        32700 + zone
    } else {
        32600 + zone
    }
}

/// Acquisition date-time embedded in a path as `YYYYMMDD_HHMMSS`
pub fn capture_datetime_from_path<P: AsRef<Path>>(path: P) -> Option<NaiveDateTime> {
    let re = Regex::new(r"[0-9]{8}_[0-9]{6}").ok()?;
    let text = path.as_ref().to_string_lossy();
    let m = re.find(&text)?;
    NaiveDateTime::parse_from_str(m.as_str(), "%Y%m%d_%H%M%S").ok()
}

/// Map a gain-table band label ("01", "3N", "09") to a band index
fn parse_band_label(label: &str) -> Option<u8> {
    match label {
        "3N" => Some(3),
        "3B" => None,
        other => other.parse::<u8>().ok(),
    }
}

fn required<'a>(items: &'a HashMap<String, String>, key: &str) -> ReflectaResult<&'a str> {
    items
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ReflectaError::Configuration(format!("Missing scene metadata field {}", key)))
}

fn parse_f64(value: &str, key: &str) -> ReflectaResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| ReflectaError::Configuration(format!("Invalid {} value '{}': {}", key, value, e)))
}

fn parse_number_list(value: &str, key: &str) -> ReflectaResult<Vec<f64>> {
    value.split(',').map(|s| parse_f64(s, key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_items() -> Vec<(&'static str, &'static str)> {
        vec![
            ("CALENDARDATE", "20190615"),
            ("SOLARDIRECTION", "140.25, 62.5"),
            ("GAIN.1", "01, HGH"),
            ("GAIN.2", "02, NOR"),
            ("GAIN.3", "3N, NOR"),
            ("GAIN.4", "3B, NOR"),
            ("GAIN.5", "04, LO1"),
            ("GAIN.6", "05, XYZ"),
            ("UPPERLEFTM", "4800000.0, 500000.0"),
            ("LOWERRIGHTM", "4740000.0, 560000.0"),
            ("NORTHBOUNDINGCOORDINATE", "43.4"),
            ("UTMZONENUMBER", "43"),
        ]
    }

    #[test]
    fn test_scene_metadata_parsing() {
        let meta = SceneMetadata::from_items(scene_items()).unwrap();

        assert_eq!(meta.calendar_date, NaiveDate::from_ymd_opt(2019, 6, 15).unwrap());
        assert_eq!(meta.day_of_year(), 166);
        assert_eq!(meta.solar_direction, (140.25, 62.5));
        assert_eq!(meta.gain_mode(1).unwrap(), GainMode::High);
        assert_eq!(meta.gain_mode(3).unwrap(), GainMode::Normal);
        assert_eq!(meta.gain_mode(4).unwrap(), GainMode::Low1);
    }

    #[test]
    fn test_unknown_gain_is_per_band_error() {
        let meta = SceneMetadata::from_items(scene_items()).unwrap();

        assert!(matches!(meta.gain_mode(5), Err(ReflectaError::Configuration(_))));
        assert!(matches!(meta.gain_mode(9), Err(ReflectaError::Configuration(_))));
    }

    #[test]
    fn test_missing_scene_field_is_fatal() {
        let items: Vec<_> = scene_items()
            .into_iter()
            .filter(|(k, _)| *k != "SOLARDIRECTION")
            .collect();

        let result = SceneMetadata::from_items(items);
        assert!(matches!(result, Err(ReflectaError::Configuration(_))));
    }

    #[test]
    fn test_utm_grid() {
        let meta = SceneMetadata::from_items(scene_items()).unwrap();
        let (epsg, gt) = meta.utm_grid(4000, 4000).unwrap();

        assert_eq!(epsg, 32643);
        assert_eq!(gt.pixel_width, 15.0);
        assert_eq!(gt.pixel_height, -15.0);
        assert_eq!(gt.top_left_x, 500000.0 - 7.5);
        assert_eq!(gt.top_left_y, 4800000.0 + 7.5);
    }

    #[test]
    fn test_utm_epsg_south() {
        assert_eq!(utm_epsg(55, -12.0), 32755);
        assert_eq!(utm_epsg(55, 12.0), 32655);
    }

    #[test]
    fn test_capture_datetime_from_path() {
        let dt = capture_datetime_from_path("/data/ard/20190615_053012/shokpar/B02_10m.tif").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2019-06-15 05:30:12");

        assert!(capture_datetime_from_path("/data/ard/none/B02.tif").is_none());
    }
}
