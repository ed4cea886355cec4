// Core modules implementing the listing model, normalization, storage, and errors.
pub mod error;
pub mod listing;
pub mod normalize;
pub mod store;
