//! Purpose: Stored and external shapes of a motorcycle catalog listing.
//! Exports: `RawListing`, `Listing`.
//! Role: `RawListing` mirrors a `motos` row as stored; `Listing` is what the API emits.
//! Invariants: Structured fields on `Listing` are always concrete containers.
//! Invariants: `precio`/`descuento` are always floats (NaN serializes as JSON null).
use serde::Serialize;
use serde_json::{Map, Value};

/// One `motos` row before normalization.
///
/// Every column except `id` is kept as the JSON value of what SQLite stored,
/// so a price stored as TEXT stays a string and a JSON column stays text
/// until the normalizer looks at it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawListing {
    pub id: i64,
    pub marca: Value,
    pub modelo: Value,
    pub ano: Value,
    pub precio: Value,
    pub descuento: Value,
    pub imagen: Value,
    pub imagenes_galeria: Value,
    pub categoria: Value,
    pub destacado: Value,
    pub descripcion: Value,
    pub especificaciones: Value,
    pub colores: Value,
    pub caracteristicas: Value,
}

/// A listing as exposed by the API. Field order matches the response body.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Listing {
    pub id: i64,
    pub marca: Option<String>,
    pub modelo: Option<String>,
    pub ano: Option<i64>,
    pub precio: f64,
    pub descuento: f64,
    pub imagen: Option<String>,
    pub imagenes_galeria: Vec<Value>,
    pub categoria: Option<String>,
    pub destacado: bool,
    pub descripcion: Option<String>,
    pub especificaciones: Map<String, Value>,
    pub colores: Vec<Value>,
    pub caracteristicas: Vec<Value>,
}
