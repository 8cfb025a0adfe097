//! Audio filters applied by the node.
//!
//! Each filter is validated once, when its config is built, and is frozen
//! afterwards (the [`Equalizer`] is the one mutable exception, and it checks
//! every band as it is set). A filter encodes to a `(kind, fragment)` pair;
//! the kind is the key of the fragment in a `filters` command.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde_json::{json, Map, Value};

use crate::audio::equalizer::Equalizer;
use crate::error::{Error, Result};

/// Fields a raw filter kind may not use, since they carry the command itself.
const RESERVED_KINDS: [&str; 2] = ["op", "guildId"];

pub(crate) fn ensure_finite(field: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::validation(format!("{field} must be a finite number, got {value}")))
    }
}

fn ensure_positive(field: &str, value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(Error::validation(format!("{field} must be greater than 0, got {value}")))
    }
}

fn ensure_in(field: &str, value: f64, max: f64) -> Result<f64> {
    if value > 0.0 && value <= max {
        Ok(value)
    } else {
        Err(Error::validation(format!("{field} must be in (0, {max}], got {value}")))
    }
}

/// Numeric field of a reported filter entry; absent or null takes `default`.
fn state_field(entry: &Value, kind: &str, key: &str, default: f64) -> Result<f64> {
    match entry.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| Error::validation(format!("{kind}.{key} must be a number, got {value}"))),
    }
}

/// Hashes a float so that `0.0` and `-0.0` (equal under `==`) agree.
pub(crate) fn hash_f64<H: Hasher>(value: f64, state: &mut H) {
    let bits = if value == 0.0 { 0 } else { value.to_bits() };
    bits.hash(state);
}

// ============================================================================
// Karaoke
// ============================================================================

/// Settings for [`Karaoke`]. Every field is optional on the wire but always
/// sent; the defaults are the node's own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KaraokeConfig {
    /// Default `1.0`.
    pub level: f64,
    /// Default `1.0`.
    pub mono_level: f64,
    /// Default `220.0` Hz.
    pub filter_band: f64,
    /// Default `110.0`.
    pub filter_width: f64,
}

impl Default for KaraokeConfig {
    fn default() -> Self {
        Self {
            level: 1.0,
            mono_level: 1.0,
            filter_band: 220.0,
            filter_width: 110.0,
        }
    }
}

impl KaraokeConfig {
    pub fn build(self) -> Result<Karaoke> {
        Ok(Karaoke {
            level: ensure_finite("karaoke.level", self.level)?,
            mono_level: ensure_finite("karaoke.monoLevel", self.mono_level)?,
            filter_band: ensure_finite("karaoke.filterBand", self.filter_band)?,
            filter_width: ensure_finite("karaoke.filterWidth", self.filter_width)?,
        })
    }
}

/// Vocal elimination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Karaoke {
    level: f64,
    mono_level: f64,
    filter_band: f64,
    filter_width: f64,
}

impl Karaoke {
    pub fn builder() -> KaraokeConfig {
        KaraokeConfig::default()
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn mono_level(&self) -> f64 {
        self.mono_level
    }

    pub fn filter_band(&self) -> f64 {
        self.filter_band
    }

    pub fn filter_width(&self) -> f64 {
        self.filter_width
    }

    fn fragment(&self) -> Value {
        json!({
            "level": self.level,
            "monoLevel": self.mono_level,
            "filterBand": self.filter_band,
            "filterWidth": self.filter_width,
        })
    }
}

// ============================================================================
// Timescale
// ============================================================================

/// Settings for [`Timescale`]. Every field is sent; `1.0` leaves playback
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimescaleConfig {
    /// Default `1.0`.
    pub speed: f64,
    /// Default `1.0`.
    pub pitch: f64,
    /// Default `1.0`.
    pub rate: f64,
}

impl Default for TimescaleConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

impl TimescaleConfig {
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn pitch(mut self, pitch: f64) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Every field must be greater than 0.
    pub fn build(self) -> Result<Timescale> {
        Ok(Timescale {
            speed: ensure_positive("timescale.speed", self.speed)?,
            pitch: ensure_positive("timescale.pitch", self.pitch)?,
            rate: ensure_positive("timescale.rate", self.rate)?,
        })
    }
}

/// Playback speed, pitch and rate change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timescale {
    speed: f64,
    pitch: f64,
    rate: f64,
}

impl Timescale {
    pub fn builder() -> TimescaleConfig {
        TimescaleConfig::default()
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    fn fragment(&self) -> Value {
        json!({
            "speed": self.speed,
            "pitch": self.pitch,
            "rate": self.rate,
        })
    }
}

// ============================================================================
// Tremolo / Vibrato
// ============================================================================

/// Settings for [`Tremolo`] and [`Vibrato`]. Both fields are always sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillationConfig {
    /// Default `2.0` Hz.
    pub frequency: f64,
    /// Default `0.5`.
    pub depth: f64,
}

impl Default for OscillationConfig {
    fn default() -> Self {
        Self {
            frequency: 2.0,
            depth: 0.5,
        }
    }
}

impl OscillationConfig {
    pub fn frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn depth(mut self, depth: f64) -> Self {
        self.depth = depth;
        self
    }

    /// Frequency must be positive, depth in `(0, 1]`.
    pub fn tremolo(self) -> Result<Tremolo> {
        Ok(Tremolo {
            frequency: ensure_positive("tremolo.frequency", self.frequency)?,
            depth: ensure_in("tremolo.depth", self.depth, 1.0)?,
        })
    }

    /// Frequency in `(0, 14]`, depth in `(0, 1]`.
    pub fn vibrato(self) -> Result<Vibrato> {
        Ok(Vibrato {
            frequency: ensure_in("vibrato.frequency", self.frequency, Vibrato::MAX_FREQUENCY)?,
            depth: ensure_in("vibrato.depth", self.depth, 1.0)?,
        })
    }
}

fn oscillation_fragment(frequency: f64, depth: f64) -> Value {
    json!({ "frequency": frequency, "depth": depth })
}

/// Volume oscillation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tremolo {
    frequency: f64,
    depth: f64,
}

impl Tremolo {
    pub fn builder() -> OscillationConfig {
        OscillationConfig::default()
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }
}

/// Pitch oscillation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vibrato {
    frequency: f64,
    depth: f64,
}

impl Vibrato {
    pub const MAX_FREQUENCY: f64 = 14.0;

    pub fn builder() -> OscillationConfig {
        OscillationConfig::default()
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }
}

// ============================================================================
// Volume / Raw
// ============================================================================

/// Volume multiplier applied inside the filter chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume(f64);

impl Volume {
    pub fn new(value: f64) -> Result<Self> {
        Ok(Self(ensure_finite("volume", value)?))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// A filter kind this crate does not model, forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raw {
    kind: String,
    fragment: Value,
}

impl Raw {
    pub fn new(kind: impl Into<String>, fragment: Value) -> Result<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(Error::validation("raw filter kind must not be empty"));
        }
        if RESERVED_KINDS.contains(&kind.as_str()) {
            return Err(Error::validation(format!(
                "raw filter kind '{kind}' collides with a command field"
            )));
        }
        Ok(Self { kind, fragment })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fragment(&self) -> &Value {
        &self.fragment
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Any filter the node understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equalizer(Equalizer),
    Karaoke(Karaoke),
    Timescale(Timescale),
    Tremolo(Tremolo),
    Vibrato(Vibrato),
    Volume(Volume),
    Raw(Raw),
}

impl Filter {
    /// Key of this filter's fragment in a `filters` command.
    pub fn kind(&self) -> &str {
        match self {
            Filter::Equalizer(_) => "equalizer",
            Filter::Karaoke(_) => "karaoke",
            Filter::Timescale(_) => "timescale",
            Filter::Tremolo(_) => "tremolo",
            Filter::Vibrato(_) => "vibrato",
            Filter::Volume(_) => "volume",
            Filter::Raw(raw) => raw.kind(),
        }
    }

    /// Wire fragment for this filter.
    pub fn fragment(&self) -> Value {
        match self {
            Filter::Equalizer(eq) => eq.fragment(),
            Filter::Karaoke(k) => k.fragment(),
            Filter::Timescale(t) => t.fragment(),
            Filter::Tremolo(t) => oscillation_fragment(t.frequency, t.depth),
            Filter::Vibrato(v) => oscillation_fragment(v.frequency, v.depth),
            Filter::Volume(v) => json!({ "volume": v.0 }),
            Filter::Raw(raw) => raw.fragment.clone(),
        }
    }

    pub fn encode(&self) -> (String, Value) {
        (self.kind().to_string(), self.fragment())
    }
}

// Every float in a built filter is finite, so equality is reflexive.
impl Eq for Filter {}

impl Hash for Filter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Filter::Equalizer(eq) => eq.hash(state),
            Filter::Karaoke(k) => {
                for v in [k.level, k.mono_level, k.filter_band, k.filter_width] {
                    hash_f64(v, state);
                }
            }
            Filter::Timescale(t) => {
                for v in [t.speed, t.pitch, t.rate] {
                    hash_f64(v, state);
                }
            }
            Filter::Tremolo(t) => {
                hash_f64(t.frequency, state);
                hash_f64(t.depth, state);
            }
            Filter::Vibrato(v) => {
                hash_f64(v.frequency, state);
                hash_f64(v.depth, state);
            }
            Filter::Volume(v) => hash_f64(v.0, state),
            Filter::Raw(raw) => {
                raw.kind.hash(state);
                raw.fragment.to_string().hash(state);
            }
        }
    }
}

macro_rules! impl_from_filter {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Filter {
                fn from(value: $variant) -> Self {
                    Filter::$variant(value)
                }
            }
        )*
    };
}

impl_from_filter!(Equalizer, Karaoke, Timescale, Tremolo, Vibrato, Volume, Raw);

// ============================================================================
// FilterSet
// ============================================================================

/// Filters keyed by kind. Inserting a second filter of the same kind
/// replaces the first, the same way a JSON object would.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    filters: BTreeMap<String, Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter, returning the one of the same kind it replaced.
    pub fn insert(&mut self, filter: impl Into<Filter>) -> Option<Filter> {
        let filter = filter.into();
        self.filters.insert(filter.kind().to_string(), filter)
    }

    pub fn with(mut self, filter: impl Into<Filter>) -> Self {
        self.insert(filter);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Filter> {
        self.filters.get(kind)
    }

    pub fn remove(&mut self, kind: &str) -> Option<Filter> {
        self.filters.remove(kind)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.values()
    }

    /// Rebuild the filters a node reports in a player's `filters` state.
    ///
    /// Each entry is keyed by kind and kept only when it carries
    /// `"enabled": true`. Equalizer state lists one gain per band and only
    /// non-zero gains are set. Missing fields take the builder defaults;
    /// kinds not modelled here come back as [`Raw`] with the whole entry as
    /// fragment. Values go through the same checks as the builders.
    pub fn from_node_state(state: &Value) -> Result<Self> {
        let entries = state
            .as_object()
            .ok_or_else(|| Error::validation("filter state must be a JSON object"))?;

        let mut set = FilterSet::new();
        for (kind, entry) in entries {
            if !entry.get("enabled").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }

            let filter: Filter = match kind.as_str() {
                "equalizer" => {
                    let mut eq = Equalizer::new();
                    let bands = match entry.get("bands") {
                        None | Some(Value::Null) => &[][..],
                        Some(Value::Array(bands)) => bands.as_slice(),
                        Some(other) => {
                            return Err(Error::validation(format!(
                                "equalizer.bands must be an array, got {other}"
                            )))
                        }
                    };
                    for (band, gain) in bands.iter().enumerate() {
                        let gain = gain.as_f64().ok_or_else(|| {
                            Error::validation(format!("equalizer band {band} gain must be a number"))
                        })?;
                        if gain != 0.0 {
                            eq.set_band(band, Some(gain))?;
                        }
                    }
                    eq.into()
                }
                "karaoke" => {
                    let d = KaraokeConfig::default();
                    KaraokeConfig {
                        level: state_field(entry, "karaoke", "level", d.level)?,
                        mono_level: state_field(entry, "karaoke", "monoLevel", d.mono_level)?,
                        filter_band: state_field(entry, "karaoke", "filterBand", d.filter_band)?,
                        filter_width: state_field(entry, "karaoke", "filterWidth", d.filter_width)?,
                    }
                    .build()?
                    .into()
                }
                "timescale" => {
                    let d = TimescaleConfig::default();
                    TimescaleConfig {
                        speed: state_field(entry, "timescale", "speed", d.speed)?,
                        pitch: state_field(entry, "timescale", "pitch", d.pitch)?,
                        rate: state_field(entry, "timescale", "rate", d.rate)?,
                    }
                    .build()?
                    .into()
                }
                "tremolo" | "vibrato" => {
                    let d = OscillationConfig::default();
                    let config = OscillationConfig {
                        frequency: state_field(entry, kind, "frequency", d.frequency)?,
                        depth: state_field(entry, kind, "depth", d.depth)?,
                    };
                    if kind == "tremolo" {
                        config.tremolo()?.into()
                    } else {
                        config.vibrato()?.into()
                    }
                }
                "volume" => Volume::new(state_field(entry, "volume", "volume", 1.0)?)?.into(),
                _ => Raw::new(kind.clone(), entry.clone())?.into(),
            };
            set.insert(filter);
        }
        Ok(set)
    }

    /// Fragments keyed by kind, ready to merge into a `filters` command.
    pub fn to_fragments(&self) -> Map<String, Value> {
        self.filters
            .iter()
            .map(|(kind, filter)| (kind.clone(), filter.fragment()))
            .collect()
    }
}

impl<F: Into<Filter>> FromIterator<F> for FilterSet {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut set = FilterSet::new();
        set.extend(iter);
        set
    }
}

impl<F: Into<Filter>> Extend<F> for FilterSet {
    fn extend<I: IntoIterator<Item = F>>(&mut self, iter: I) {
        for filter in iter {
            self.insert(filter);
        }
    }
}
