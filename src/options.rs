//! Render options decoding and canonicalization
//!
//! The target page URL carries its own `options` query parameter holding a
//! JSON object. Decoding keeps JSON's type distinctions (so `480` and `"480"`
//! stay different values) and re-serializes the object in a canonical form:
//! keys sorted at every depth, no insignificant whitespace, integral floats
//! written as integers. The canonical text is written back into the target
//! URL so hashing and logging observe the same bytes.

use crate::{Error, Result, Viewport};
use base64::Engine as _;
use serde_json::{Map, Value};
use url::Url;

/// Name of the query parameter carrying the options payload
pub const OPTIONS_PARAM: &str = "options";

/// Viewport width used when `xMax` is absent or unusable
pub const DEFAULT_WIDTH: u32 = 360;
/// Viewport height used when `yMax` is absent or unusable
pub const DEFAULT_HEIGHT: u32 = 1600;

/// Decoded render options: option name to JSON value
pub type RenderOptions = Map<String, Value>;

/// A target URL after its options have been decoded and canonicalized
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    /// Target URL with the canonical options text written back
    pub target: Url,
    /// Canonical options object
    pub options: RenderOptions,
    /// Canonical serialized options
    pub canonical: String,
    /// Viewport resolved from `xMax`/`yMax`
    pub viewport: Viewport,
    /// JPEG quality, 1..=100
    pub quality: u8,
}

/// Decode and canonicalize the `options` parameter of `target`.
///
/// Fails with [`Error::MissingOptions`] when the parameter is absent, cannot
/// be decoded, or does not hold a JSON object.
pub fn normalize(mut target: Url, default_quality: u8) -> Result<NormalizedRequest> {
    let raw = target
        .query_pairs()
        .find(|(k, _)| k == OPTIONS_PARAM)
        .map(|(_, v)| v.into_owned())
        .ok_or(Error::MissingOptions)?;

    let options = decode_options(&raw)?;
    let canonical = canonical_text(&options);

    let viewport = Viewport {
        width: coerce_dimension(options.get("xMax")).unwrap_or(DEFAULT_WIDTH),
        height: coerce_dimension(options.get("yMax")).unwrap_or(DEFAULT_HEIGHT),
    };
    let quality = coerce_dimension(options.get("quality"))
        .map(|q| q.min(100) as u8)
        .unwrap_or(default_quality);

    write_back(&mut target, &canonical);

    Ok(NormalizedRequest {
        target,
        options,
        canonical,
        viewport,
        quality,
    })
}

/// Decode raw options text (JSON, or URL-safe base64 of JSON) into a
/// canonical options object.
pub fn decode_options(raw: &str) -> Result<RenderOptions> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::MissingOptions);
    }

    let json = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        decode_base64(trimmed).ok_or(Error::MissingOptions)?
    };

    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(map)) => Ok(canonicalize_map(map)),
        Ok(_) | Err(_) => Err(Error::MissingOptions),
    }
}

fn decode_base64(text: &str) -> Option<String> {
    let unpadded = text.trim_end_matches('=');
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(unpadded)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(unpadded))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Serialize options in canonical form.
pub fn canonical_text(options: &RenderOptions) -> String {
    // Maps are rebuilt in sorted order by canonicalize_map, so plain
    // serialization is canonical regardless of serde_json's map backing.
    Value::Object(options.clone()).to_string()
}

fn canonicalize_map(map: Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<(String, Value)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
        .into_iter()
        .map(|(k, v)| (k, canonicalize(v)))
        .collect()
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(canonicalize_map(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Number(n) => {
            if n.is_f64() {
                if let Some(f) = n.as_f64() {
                    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        return Value::from(f as i64);
                    }
                }
            }
            Value::Number(n)
        }
        other => other,
    }
}

/// Typed parse-with-default helper for numeric options.
///
/// Accepts a JSON number directly (fractions truncated) or a string whose
/// leading digits form an integer after an optional `+` sign (`"480"`,
/// `" 480px"`, `"+480"`). Negative, zero, non-finite or unparseable values
/// are treated as absent.
pub fn coerce_dimension(value: Option<&Value>) -> Option<u32> {
    let n = match value? {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else {
                let f = n.as_f64()?;
                if !f.is_finite() || f < 0.0 {
                    return None;
                }
                f.trunc() as u64
            }
        }
        Value::String(s) => {
            let s = s.trim();
            let s = s.strip_prefix('+').unwrap_or(s);
            let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()?
        }
        _ => return None,
    };

    match u32::try_from(n) {
        Ok(0) | Err(_) => None,
        Ok(v) => Some(v),
    }
}

fn write_back(target: &mut Url, canonical: &str) {
    let pairs: Vec<(String, String)> = target
        .query_pairs()
        .map(|(k, v)| {
            if k == OPTIONS_PARAM {
                (k.into_owned(), canonical.to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();

    target.query_pairs_mut().clear().extend_pairs(pairs);
}
