use std::hash::{Hash, Hasher};

use serde_json::{json, Value};
use tracing::debug;

use crate::audio::filters::{ensure_finite, hash_f64};
use crate::error::{Error, Result};

/// Number of bands the node's equalizer exposes (25 Hz to 16 kHz).
pub const BAND_COUNT: usize = 15;

/// Lowest accepted gain (multiplier offset, `-0.25` mutes the band).
pub const MIN_GAIN: f64 = -0.25;

/// Highest accepted gain (`1.0` doubles the band).
pub const MAX_GAIN: f64 = 1.0;

/// A named set of gains for all 15 bands.
#[derive(Debug, Clone, PartialEq)]
pub struct EqPreset {
    pub name: &'static str,
    pub gains: [f64; BAND_COUNT],
}

/// Built-in presets.
pub struct EqPresets;

impl EqPresets {
    pub fn flat() -> EqPreset {
        EqPreset {
            name: "flat",
            gains: [0.0; BAND_COUNT],
        }
    }

    pub fn bass() -> EqPreset {
        EqPreset {
            name: "bass",
            gains: [
                0.2, 0.15, 0.1, 0.05, 0.0, -0.05, -0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            ],
        }
    }

    pub fn pop() -> EqPreset {
        EqPreset {
            name: "pop",
            gains: [
                -0.02, -0.01, 0.08, 0.1, 0.15, 0.1, 0.03, -0.02, -0.035, -0.05, -0.05, -0.05,
                -0.05, -0.05, -0.05,
            ],
        }
    }

    pub fn rock() -> EqPreset {
        EqPreset {
            name: "rock",
            gains: [
                0.3, 0.25, 0.2, 0.1, 0.05, -0.05, -0.15, -0.2, -0.1, -0.05, 0.05, 0.1, 0.2, 0.25,
                0.3,
            ],
        }
    }

    pub fn classical() -> EqPreset {
        EqPreset {
            name: "classical",
            gains: [
                0.375, 0.35, 0.125, 0.0, 0.0, 0.125, 0.55, 0.05, 0.125, 0.25, 0.2, 0.25, 0.3, 0.25,
                0.3,
            ],
        }
    }

    pub fn electronic() -> EqPreset {
        EqPreset {
            name: "electronic",
            gains: [
                0.375, 0.35, 0.125, 0.0, 0.0, -0.125, -0.125, 0.0, 0.25, 0.125, 0.15, 0.2, 0.25,
                0.35, 0.4,
            ],
        }
    }

    pub fn vocal() -> EqPreset {
        EqPreset {
            name: "vocal",
            gains: [
                -0.2, -0.15, -0.1, 0.0, 0.1, 0.2, 0.25, 0.2, 0.1, 0.05, 0.0, -0.05, -0.1, -0.1,
                -0.1,
            ],
        }
    }

    /// Look up a preset by name, ignoring case.
    pub fn get(name: &str) -> Option<EqPreset> {
        match name.to_lowercase().as_str() {
            "flat" => Some(Self::flat()),
            "bass" => Some(Self::bass()),
            "pop" => Some(Self::pop()),
            "rock" => Some(Self::rock()),
            "classical" => Some(Self::classical()),
            "electronic" => Some(Self::electronic()),
            "vocal" => Some(Self::vocal()),
            _ => None,
        }
    }

    /// Names of every built-in preset.
    pub fn list() -> Vec<&'static str> {
        vec!["flat", "bass", "pop", "rock", "classical", "electronic", "vocal"]
    }
}

/// 15-band equalizer.
///
/// Unlike the other filters this one is edited in place. Every band starts
/// unset; unset bands are left out of the wire fragment entirely, so the
/// node keeps (or resets to) its own value for them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Equalizer {
    bands: [Option<f64>; BAND_COUNT],
}

impl Equalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an equalizer with every band set from a named preset.
    pub fn from_preset(name: &str) -> Result<Self> {
        let preset = EqPresets::get(name)
            .ok_or_else(|| Error::validation(format!("unknown equalizer preset '{name}'")))?;
        let mut eq = Self::new();
        for (band, gain) in preset.gains.iter().enumerate() {
            eq.set_band(band, Some(*gain))?;
        }
        debug!(preset = preset.name, "Equalizer preset loaded");
        Ok(eq)
    }

    /// Set or clear one band.
    ///
    /// `band` must be in `0..=14` and `gain`, when present, in
    /// `[-0.25, 1.0]`. The equalizer is left untouched on error.
    pub fn set_band(&mut self, band: usize, gain: Option<f64>) -> Result<&mut Self> {
        if band >= BAND_COUNT {
            return Err(Error::validation(format!(
                "equalizer band must be in 0..={}, got {band}",
                BAND_COUNT - 1
            )));
        }
        if let Some(g) = gain {
            let g = ensure_finite("equalizer.gain", g)?;
            if !(MIN_GAIN..=MAX_GAIN).contains(&g) {
                return Err(Error::validation(format!(
                    "equalizer gain for band {band} must be in [{MIN_GAIN}, {MAX_GAIN}], got {g}"
                )));
            }
        }
        self.bands[band] = gain;
        Ok(self)
    }

    /// Chaining form of [`set_band`](Self::set_band).
    pub fn with_band(mut self, band: usize, gain: f64) -> Result<Self> {
        self.set_band(band, Some(gain))?;
        Ok(self)
    }

    pub fn reset_band(&mut self, band: usize) -> Result<&mut Self> {
        self.set_band(band, None)
    }

    /// Unset every band.
    pub fn reset(&mut self) {
        self.bands = [None; BAND_COUNT];
    }

    pub fn band(&self, band: usize) -> Option<f64> {
        self.bands.get(band).copied().flatten()
    }

    /// `(band, gain)` for every set band, in band order.
    pub fn gains(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.bands
            .iter()
            .enumerate()
            .filter_map(|(band, gain)| gain.map(|g| (band, g)))
    }

    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(Option::is_none)
    }

    /// Parse a `"band:gain"` list such as `"0:0.25 1:0.2 14:-0.1"`.
    /// Bands not listed stay unset.
    pub fn parse(config: &str) -> Result<Self> {
        let mut eq = Self::new();
        for part in config.split_whitespace() {
            let (band, gain) = part.split_once(':').ok_or_else(|| {
                Error::validation(format!("invalid band '{part}', use 'band:gain'"))
            })?;
            let band: usize = band
                .parse()
                .map_err(|_| Error::validation(format!("invalid band number in '{part}'")))?;
            let gain: f64 = gain
                .parse()
                .map_err(|_| Error::validation(format!("invalid gain in '{part}'")))?;
            eq.set_band(band, Some(gain))?;
        }
        Ok(eq)
    }

    pub(crate) fn fragment(&self) -> Value {
        let bands: Vec<Value> = self
            .gains()
            .map(|(band, gain)| json!({ "band": band, "gain": gain }))
            .collect();
        json!({ "bands": bands })
    }
}

impl Hash for Equalizer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (band, gain) in self.gains() {
            band.hash(state);
            hash_f64(gain, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::filters::Filter;
    use pretty_assertions::assert_eq;

    #[test]
    fn gain_range_is_inclusive() {
        let mut eq = Equalizer::new();
        assert!(eq.set_band(0, Some(-0.25)).is_ok());
        assert!(eq.set_band(1, Some(1.0)).is_ok());
        assert!(eq.set_band(2, Some(-0.2501)).is_err());
        assert!(eq.set_band(3, Some(1.0001)).is_err());
        assert!(eq.set_band(4, Some(f64::NAN)).is_err());
    }

    #[test]
    fn band_index_is_checked() {
        let mut eq = Equalizer::new();
        assert!(eq.set_band(14, Some(0.1)).is_ok());
        assert!(matches!(eq.set_band(15, Some(0.1)), Err(Error::Validation(_))));
    }

    #[test]
    fn failed_set_leaves_band_untouched() {
        let mut eq = Equalizer::new().with_band(3, 0.5).unwrap();
        assert!(eq.set_band(3, Some(2.0)).is_err());
        assert_eq!(eq.band(3), Some(0.5));
    }

    #[test]
    fn fragment_skips_unset_bands() {
        let mut eq = Equalizer::new();
        eq.set_band(0, Some(0.25)).unwrap();
        eq.set_band(7, Some(-0.25)).unwrap();
        eq.set_band(9, Some(0.1)).unwrap();
        eq.reset_band(9).unwrap();

        assert_eq!(
            Filter::from(eq).encode(),
            (
                "equalizer".to_string(),
                json!({"bands": [{"band": 0, "gain": 0.25}, {"band": 7, "gain": -0.25}]})
            )
        );
    }

    #[test]
    fn empty_equalizer_encodes_no_bands() {
        assert_eq!(Equalizer::new().fragment(), json!({"bands": []}));
        assert!(Equalizer::new().is_empty());
    }

    #[test]
    fn presets_are_within_range() {
        for name in EqPresets::list() {
            let eq = Equalizer::from_preset(name).unwrap();
            assert_eq!(eq.gains().count(), BAND_COUNT, "preset {name}");
        }
        assert!(Equalizer::from_preset("nope").is_err());
    }

    #[test]
    fn parse_band_config() {
        let eq = Equalizer::parse("0:0.2 14:-0.1").unwrap();
        assert_eq!(eq.band(0), Some(0.2));
        assert_eq!(eq.band(14), Some(-0.1));
        assert_eq!(eq.band(5), None);

        assert!(Equalizer::parse("0=0.2").is_err());
        assert!(Equalizer::parse("20:0.1").is_err());
        assert!(Equalizer::parse("1:3.0").is_err());
    }
}
