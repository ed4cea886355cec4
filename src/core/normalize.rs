//! Purpose: Turn a stored `motos` row into the canonical `Listing` shape.
//! Exports: `Shape`, `Decoded`, `FallbackReason`, `decode_structured`, `coerce_float`,
//! `coerce_bool`, `normalize`.
//! Role: The only place where stored text is reinterpreted as structured data.
//! Invariants: Decode failures never propagate; they become `Decoded::EmptyFallback`.
//! Invariants: Structured fields always come out as the container their `Shape` names.
//! Notes: Price coercion follows `parseFloat` semantics and may yield NaN.
use serde_json::{Map, Value};
use tracing::warn;

use super::listing::{Listing, RawListing};

const PREVIEW_CHARS: usize = 30;

/// Container a structured field is expected to hold.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shape {
    List,
    Map,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FallbackReason {
    /// Text started like JSON but did not parse.
    Malformed,
    /// Value parsed (or was stored structured) but is the other container kind.
    WrongShape,
}

/// Outcome of decoding one structured field.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// Absent or falsy stored value.
    Empty,
    /// Stored value was already structured.
    Passthrough(Value),
    /// Stored text decoded as JSON.
    Parsed(Value),
    /// Decoding was attempted and abandoned; a warning was logged.
    EmptyFallback {
        reason: FallbackReason,
        preview: String,
    },
    /// Stored value is plain text (or a scalar) that does not look like JSON.
    NotJson,
}

impl Decoded {
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Decoded::Passthrough(Value::Array(items)) | Decoded::Parsed(Value::Array(items)) => {
                items
            }
            _ => Vec::new(),
        }
    }

    pub fn into_map(self) -> Map<String, Value> {
        match self {
            Decoded::Passthrough(Value::Object(map)) | Decoded::Parsed(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

pub fn decode_structured(field: &str, value: Value, shape: Shape) -> Decoded {
    if is_falsy(&value) {
        return Decoded::Empty;
    }
    match value {
        Value::Array(_) | Value::Object(_) => check_shape(field, value, shape, Decoded::Passthrough),
        Value::String(text) => {
            let trimmed = text.trim_start();
            if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
                warn!(field, preview = %preview(&text), "structured field holds plain text");
                return Decoded::NotJson;
            }
            match serde_json::from_str::<Value>(&text) {
                Ok(parsed) => check_shape(field, parsed, shape, Decoded::Parsed),
                Err(err) => {
                    let preview = preview(&text);
                    warn!(field, preview = %preview, error = %err, "could not decode structured field");
                    Decoded::EmptyFallback {
                        reason: FallbackReason::Malformed,
                        preview,
                    }
                }
            }
        }
        other => {
            warn!(field, preview = %preview(&other.to_string()), "structured field holds a non-text scalar");
            Decoded::NotJson
        }
    }
}

fn check_shape(field: &str, value: Value, shape: Shape, wrap: fn(Value) -> Decoded) -> Decoded {
    let matches = match shape {
        Shape::List => value.is_array(),
        Shape::Map => value.is_object(),
    };
    if matches {
        return wrap(value);
    }
    let preview = preview(&value.to_string());
    warn!(field, preview = %preview, expected = ?shape, "structured field has the wrong shape");
    Decoded::EmptyFallback {
        reason: FallbackReason::WrongShape,
        preview,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64().is_none_or(|n| n == 0.0 || n.is_nan()),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Numeric coercion with `parseFloat` semantics: numbers pass through, text
/// contributes its longest numeric prefix, anything else is NaN.
pub fn coerce_float(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => parse_float_prefix(text),
        _ => f64::NAN,
    }
}

fn parse_float_prefix(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    let mut negative = false;
    if let Some(sign @ (b'+' | b'-')) = bytes.first().copied() {
        negative = sign == b'-';
        end = 1;
    }
    if text[end..].starts_with("Infinity") {
        return if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    let digits_at = |mut pos: usize| {
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        pos
    };

    let int_end = digits_at(end);
    let mut digits = int_end - end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_at(end + 1);
        let frac_digits = frac_end - (end + 1);
        if digits + frac_digits > 0 {
            end = frac_end;
            digits += frac_digits;
        }
    }
    if digits == 0 {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_at(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    text[..end].parse::<f64>().unwrap_or(f64::NAN)
}

/// Truthiness: null, false, zero, NaN and "" are false; everything else is true.
pub fn coerce_bool(value: &Value) -> bool {
    !is_falsy(value)
}

fn coerce_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|n| n as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn normalize(raw: RawListing) -> Listing {
    Listing {
        id: raw.id,
        marca: coerce_text(raw.marca),
        modelo: coerce_text(raw.modelo),
        ano: coerce_int(&raw.ano),
        precio: coerce_float(&raw.precio),
        descuento: coerce_float(&raw.descuento),
        imagen: coerce_text(raw.imagen),
        imagenes_galeria: decode_structured("imagenes_galeria", raw.imagenes_galeria, Shape::List)
            .into_list(),
        categoria: coerce_text(raw.categoria),
        destacado: coerce_bool(&raw.destacado),
        descripcion: coerce_text(raw.descripcion),
        especificaciones: decode_structured("especificaciones", raw.especificaciones, Shape::Map)
            .into_map(),
        colores: decode_structured("colores", raw.colores, Shape::List).into_list(),
        caracteristicas: decode_structured("caracteristicas", raw.caracteristicas, Shape::List)
            .into_list(),
    }
}
