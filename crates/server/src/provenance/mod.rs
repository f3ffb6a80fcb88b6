// crates/server/src/provenance/mod.rs
//! Provenance Tracker (spec.md 4.M): hashes recipes and their source
//! categories, logs generations to an experiment store, and flags drift
//! between a recipe's hash and the category definitions it was built from.

pub mod store;
pub mod tracker;

pub use store::{ExperimentStore, InMemoryExperimentStore, NullExperimentStore, ProvenanceError, RunFilter, RunRecord};
pub use tracker::{category_hash, combined_hash, DriftResult, ProvenanceRecord, ProvenanceTracker};
