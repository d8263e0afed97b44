//! # ragctl-core
//!
//! Shared, WASM-safe logic for ragctl: data models, chunking, store
//! abstractions, the hybrid search algorithm, the embedding trait, and
//! tool descriptor types.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. It compiles to both native targets and
//! `wasm32-unknown-unknown`.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod search;
pub mod store;
pub mod tool;
