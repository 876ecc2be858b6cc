//! Serde helpers that keep non-finite floats through JSON.
//!
//! JSON has no NaN or infinity, and `serde_json` writes them as `null`,
//! which it then refuses to read back as `f64`. These helpers write
//! non-finite values as the strings `"NaN"`, `"inf"` and `"-inf"` and accept
//! either form when reading.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// One float in its JSON form.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TextFloat(f64);

impl Serialize for TextFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let x = self.0;
        if x.is_finite() {
            serializer.serialize_f64(x)
        } else if x.is_nan() {
            serializer.serialize_str("NaN")
        } else if x > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }
}

struct TextFloatVisitor;

impl<'de> Visitor<'de> for TextFloatVisitor {
    type Value = TextFloat;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<TextFloat, E> {
        Ok(TextFloat(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<TextFloat, E> {
        Ok(TextFloat(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<TextFloat, E> {
        Ok(TextFloat(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TextFloat, E> {
        match v {
            "NaN" | "nan" => Ok(TextFloat(f64::NAN)),
            "inf" | "Infinity" => Ok(TextFloat(f64::INFINITY)),
            "-inf" | "-Infinity" => Ok(TextFloat(f64::NEG_INFINITY)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }

    // files written before these helpers existed hold `null`
    fn visit_unit<E: de::Error>(self) -> Result<TextFloat, E> {
        Ok(TextFloat(f64::NAN))
    }
}

impl<'de> Deserialize<'de> for TextFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TextFloatVisitor)
    }
}

/// `#[serde(with)]` for a single `f64`.
pub(crate) mod scalar {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        TextFloat(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(TextFloat::deserialize(deserializer)?.0)
    }
}

/// `#[serde(with)]` for `Vec<f64>`.
pub(crate) mod vec {
    use super::*;

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|x| TextFloat(*x)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<TextFloat>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|x| x.0).collect())
    }
}

/// `#[serde(with)]` for analysis memo maps.
pub(crate) mod map {
    use super::*;

    pub fn serialize<S: Serializer>(
        values: &BTreeMap<String, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(values.iter().map(|(k, x)| (k, TextFloat(*x))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, f64>, D::Error> {
        let values = BTreeMap::<String, TextFloat>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|(k, x)| (k, x.0)).collect())
    }
}
