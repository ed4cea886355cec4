//! Purpose: Read-only access to the `motos` table over one shared SQLite connection.
//! Exports: `ListingStore`, `create_schema`, `init_database`.
//! Role: Data Access; every operation is a single parameterized SELECT.
//! Invariants: The connection lock is held for exactly one statement.
//! Invariants: Column values reach `RawListing` with their stored type intact.
//! Notes: Calls block; async callers run them on the blocking pool.
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Params, Row, params};
use serde_json::Value;

use super::error::{Error, ErrorKind};
use super::listing::RawListing;

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS motos (
    id INTEGER PRIMARY KEY,
    marca TEXT,
    modelo TEXT,
    ano INTEGER,
    precio DECIMAL(10, 2),
    descuento DECIMAL(5, 2),
    imagen TEXT,
    imagenes_galeria TEXT,
    categoria TEXT,
    destacado BOOLEAN DEFAULT 0,
    descripcion TEXT,
    especificaciones TEXT,
    colores TEXT,
    caracteristicas TEXT
)";

/// Shared handle to the listings database.
///
/// Clones share the same connection; SQLite serializes statements on it.
#[derive(Clone, Debug)]
pub struct ListingStore {
    conn: Arc<Mutex<Connection>>,
}

impl ListingStore {
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Opens an existing database file without write access.
    pub fn open_read_only(path: &Path) -> Result<Self, Error> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(path, flags).map_err(|err| {
            Error::from(err)
                .with_path(path)
                .with_hint("Check that the file is a SQLite database readable by this user.")
        })?;
        Ok(Self::from_connection(conn))
    }

    /// Runs `f` with the connection locked; the lock is released when `f` returns.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let conn = self.conn.lock().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("database connection lock poisoned")
        })?;
        f(&conn)
    }

    pub fn list_all(&self) -> Result<Vec<RawListing>, Error> {
        self.query_listings("SELECT * FROM motos ORDER BY id", [])
    }

    pub fn list_featured(&self) -> Result<Vec<RawListing>, Error> {
        self.query_listings(
            "SELECT * FROM motos WHERE destacado = TRUE ORDER BY id",
            [],
        )
    }

    pub fn list_by_category(&self, category: &str) -> Result<Vec<RawListing>, Error> {
        self.query_listings(
            "SELECT * FROM motos WHERE categoria = ?1 ORDER BY id",
            params![category],
        )
    }

    pub fn list_categories(&self) -> Result<Vec<String>, Error> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT categoria FROM motos WHERE categoria IS NOT NULL ORDER BY categoria",
            )?;
            let rows = stmt.query_map([], |row| Ok(text_value(row.get_ref(0)?)))?;
            let mut categories = Vec::new();
            for row in rows {
                categories.push(row?);
            }
            Ok(categories)
        })
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<RawListing>, Error> {
        self.with_connection(|conn| {
            let listing = conn
                .query_row(
                    "SELECT * FROM motos WHERE id = ?1",
                    params![id],
                    raw_listing_from_row,
                )
                .optional()?;
            Ok(listing)
        })
    }

    fn query_listings<P: Params>(&self, sql: &str, params: P) -> Result<Vec<RawListing>, Error> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params, raw_listing_from_row)?;
            let mut listings = Vec::new();
            for row in rows {
                listings.push(row?);
            }
            Ok(listings)
        })
    }
}

pub fn create_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Creates the database file and the `motos` table when missing.
pub fn init_database(path: &Path) -> Result<(), Error> {
    let conn = Connection::open(path).map_err(|err| Error::from(err).with_path(path))?;
    create_schema(&conn).map_err(|err| err.with_path(path))
}

fn raw_listing_from_row(row: &Row<'_>) -> rusqlite::Result<RawListing> {
    let column = |name: &str| row.get_ref(name).map(json_value);
    Ok(RawListing {
        id: row.get("id")?,
        marca: column("marca")?,
        modelo: column("modelo")?,
        ano: column("ano")?,
        precio: column("precio")?,
        descuento: column("descuento")?,
        imagen: column("imagen")?,
        imagenes_galeria: column("imagenes_galeria")?,
        categoria: column("categoria")?,
        destacado: column("destacado")?,
        descripcion: column("descripcion")?,
        especificaciones: column("especificaciones")?,
        colores: column("colores")?,
        caracteristicas: column("caracteristicas")?,
    })
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(n) => Value::from(n),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn text_value(value: ValueRef<'_>) -> String {
    match json_value(value) {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
