//! Purpose: Library crate backing the `motos-api` server binary and its tests.
//! Exports: `core` (listing model, normalizer, SQLite store, errors).
//! Role: Keeps data access and normalization testable without HTTP.
//! Invariants: Nothing in this crate writes to the listings table except `init_database`.
pub mod core;
