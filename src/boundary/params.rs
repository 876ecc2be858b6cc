use std::collections::BTreeMap;

use crate::experiment::Settings;
use crate::feedback::{ApproachParameters, ExperimentKind, HoppingParameters};
use crate::potentiostat::{
    AmplifierSettings, CvParameters, EisParameters, Filter1, Filter2, FilterResponse,
};

use super::error::ParameterError;

/// Strip padding and trailing line breaks from a raw value.
pub fn clean(raw: &str) -> &str {
    raw.trim_end_matches(['\r', '\n']).trim()
}

/// Read-only access to the user's measurement parameters.
///
/// Implementors only provide raw string lookup by dotted key; every typed
/// getter is built on top of it.
///
/// ```text
/// amplifier.hold_voltage   amplifier.filter1 (10k|30k|100k)
/// amplifier.filter2        amplifier.filter2_response (bessel|butterworth)
/// amplifier.stim_filter    amplifier.electrode_mode   amplifier.gain_index
/// cv.e0 cv.e1 cv.e2 cv.e3 cv.scan_rate cv.quiet_time
/// eis.e0 eis.f0 eis.f1 eis.n_pts eis.n_cycles eis.amplitude eis.force_waveform
/// approach.cutoff approach.relative approach.step_size approach.height
/// approach.x approach.y
/// hopping.length hopping.z_ceiling hopping.n_points hopping.kind
/// hopping.custom_sequence hopping.custom_duration hopping.mask
/// ```
pub trait ParameterProvider {
    /// Raw value of `key`, untrimmed.
    fn raw(&self, key: &str) -> Option<String>;

    /// Every key with a value.
    fn keys(&self) -> Vec<String>;

    /// Cleaned value of `key`; `None` when missing or blank.
    fn optional_text(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| clean(&v).to_string())
            .filter(|v| !v.is_empty())
    }

    /// Cleaned value of a required `key`.
    fn text(&self, key: &str) -> Result<String, ParameterError> {
        self.optional_text(key)
            .ok_or_else(|| ParameterError::Missing(key.to_string()))
    }

    /// Finite number, or `None` when missing.
    fn optional_number(&self, key: &str) -> Result<Option<f64>, ParameterError> {
        let Some(value) = self.optional_text(key) else {
            return Ok(None);
        };
        match value.parse::<f64>() {
            Ok(x) if x.is_finite() => Ok(Some(x)),
            _ => Err(ParameterError::invalid(key, &value, "expected a finite number")),
        }
    }

    /// Required finite number.
    fn number(&self, key: &str) -> Result<f64, ParameterError> {
        self.optional_number(key)?
            .ok_or_else(|| ParameterError::Missing(key.to_string()))
    }

    /// Non-negative integer, or `None` when missing.
    fn optional_count(&self, key: &str) -> Result<Option<usize>, ParameterError> {
        let Some(value) = self.optional_text(key) else {
            return Ok(None);
        };
        value
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ParameterError::invalid(key, &value, "expected a non-negative integer"))
    }

    /// Required non-negative integer.
    fn count(&self, key: &str) -> Result<usize, ParameterError> {
        self.optional_count(key)?
            .ok_or_else(|| ParameterError::Missing(key.to_string()))
    }

    /// Boolean switch; missing means off.
    fn flag(&self, key: &str) -> Result<bool, ParameterError> {
        let Some(value) = self.optional_text(key) else {
            return Ok(false);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ParameterError::invalid(key, &value, "expected a boolean")),
        }
    }

    /// Amplifier fields that have a value.
    fn amplifier(&self) -> Result<AmplifierSettings, ParameterError> {
        let filter1 = match self.optional_text("amplifier.filter1") {
            None => None,
            Some(v) => Some(match v.to_ascii_lowercase().trim_end_matches("hz") {
                "10k" | "10000" => Filter1::Bessel10k,
                "30k" | "30000" => Filter1::Bessel30k,
                "100k" | "100000" => Filter1::Bessel100k,
                _ => {
                    return Err(ParameterError::invalid(
                        "amplifier.filter1",
                        &v,
                        "expected 10k, 30k or 100k",
                    ))
                }
            }),
        };
        let response = match self.optional_text("amplifier.filter2_response") {
            None => FilterResponse::Bessel,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "bessel" => FilterResponse::Bessel,
                "butterworth" => FilterResponse::Butterworth,
                _ => {
                    return Err(ParameterError::invalid(
                        "amplifier.filter2_response",
                        &v,
                        "expected bessel or butterworth",
                    ))
                }
            },
        };
        let filter2 = self
            .optional_number("amplifier.filter2")?
            .map(|cutoff| Filter2 { response, cutoff });
        let small = |key: &str| -> Result<Option<u8>, ParameterError> {
            match self.optional_count(key)? {
                None => Ok(None),
                Some(n) => u8::try_from(n)
                    .map(Some)
                    .map_err(|_| ParameterError::invalid(key, &n.to_string(), "expected 0..=255")),
            }
        };

        Ok(AmplifierSettings {
            hold_voltage: self.optional_number("amplifier.hold_voltage")?,
            filter1,
            filter2,
            stim_filter: small("amplifier.stim_filter")?,
            electrode_mode: small("amplifier.electrode_mode")?,
            gain_index: self.optional_count("amplifier.gain_index")?,
        })
    }

    /// CV sweep.
    fn cv(&self) -> Result<CvParameters, ParameterError> {
        Ok(CvParameters {
            e0: self.number("cv.e0")?,
            e1: self.number("cv.e1")?,
            e2: self.number("cv.e2")?,
            e3: self.number("cv.e3")?,
            scan_rate: self.number("cv.scan_rate")?,
            quiet_time: self.optional_number("cv.quiet_time")?.unwrap_or(0.0),
        })
    }

    /// EIS waveform and bias.
    fn eis(&self) -> Result<EisParameters, ParameterError> {
        Ok(EisParameters {
            e0: self.optional_number("eis.e0")?.unwrap_or(0.0),
            f0: self.number("eis.f0")?,
            f1: self.number("eis.f1")?,
            n_pts: self.count("eis.n_pts")?,
            n_cycles: self.optional_count("eis.n_cycles")?.unwrap_or(1),
            amplitude_mv: self.number("eis.amplitude")?,
            force_waveform: self.flag("eis.force_waveform")?,
        })
    }

    /// Approach settings.
    fn approach(&self) -> Result<ApproachParameters, ParameterError> {
        let defaults = ApproachParameters::default();
        let start = match (
            self.optional_number("approach.x")?,
            self.optional_number("approach.y")?,
        ) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        };
        Ok(ApproachParameters {
            cutoff_pa: self.number("approach.cutoff")?,
            relative: match self.optional_text("approach.relative") {
                Some(_) => self.flag("approach.relative")?,
                None => defaults.relative,
            },
            step_size: self
                .optional_number("approach.step_size")?
                .unwrap_or(defaults.step_size),
            height: self.optional_number("approach.height")?,
            start,
        })
    }

    /// Hopping scan settings.
    fn hopping(&self) -> Result<HoppingParameters, ParameterError> {
        let n_points = self.count("hopping.n_points")?;
        let kind_text = self.text("hopping.kind")?;
        let kind = if kind_text.eq_ignore_ascii_case("custom") {
            ExperimentKind::Custom {
                sequence: self.text("hopping.custom_sequence")?,
                duration_s: self.number("hopping.custom_duration")?,
            }
        } else {
            kind_text
                .parse()
                .map_err(|e: crate::feedback::FeedbackError| {
                    ParameterError::invalid("hopping.kind", &kind_text, e.to_string())
                })?
        };
        let mask = match self.optional_text("hopping.mask") {
            None => None,
            Some(text) => Some(parse_mask(&text, n_points)?),
        };
        Ok(HoppingParameters {
            length: self.number("hopping.length")?,
            z_ceiling: self.number("hopping.z_ceiling")?,
            n_points,
            kind,
            mask,
        })
    }

    /// All parameters as a nested settings map.
    fn snapshot(&self) -> Settings {
        let mut settings = Settings::new();
        for key in self.keys() {
            if let Some(value) = self.raw(&key) {
                settings.set(&key, clean(&value));
            }
        }
        settings
    }
}

/// `n` rows of `n` cells separated by `;`, `1` marking a cell to visit.
/// Row `k` of the text is `mask[k]`.
pub fn parse_mask(text: &str, n: usize) -> Result<Vec<Vec<bool>>, ParameterError> {
    let bad = |reason: String| ParameterError::invalid("hopping.mask", text, reason);
    let rows: Vec<Vec<bool>> = text
        .split(';')
        .map(|row| {
            row.trim()
                .chars()
                .map(|c| match c {
                    '1' => Ok(true),
                    '0' => Ok(false),
                    other => Err(bad(format!("unexpected '{}'", other))),
                })
                .collect::<Result<Vec<bool>, _>>()
        })
        .collect::<Result<_, _>>()?;
    if rows.len() != n || rows.iter().any(|r| r.len() != n) {
        return Err(bad(format!("expected {} rows of {} cells", n, n)));
    }
    Ok(rows)
}

/// Parameters held in a map, e.g. the `[parameters]` table of a config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapParameters {
    values: BTreeMap<String, String>,
}

impl MapParameters {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Builder form of [`MapParameters::insert`].
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Flatten a TOML table; nested tables become dotted keys and arrays
    /// are joined with `;`.
    pub fn from_toml(table: &toml::Table) -> Self {
        let mut params = Self::new();
        flatten_toml("", table, &mut params.values);
        params
    }

    /// Parse a TOML document of parameters.
    pub fn from_toml_str(text: &str) -> Result<Self, ParameterError> {
        let table: toml::Table = toml::from_str(text)?;
        Ok(Self::from_toml(&table))
    }
}

fn toml_scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items.iter().map(toml_scalar).collect::<Vec<_>>().join(";"),
        other => other.to_string(),
    }
}

fn flatten_toml(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten_toml(&path, inner, out),
            other => {
                out.insert(path, toml_scalar(other));
            }
        }
    }
}

impl ParameterProvider for MapParameters {
    fn raw(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}
