// src/ingest/providers/mod.rs
pub mod phivolcs;
pub mod usgs;
