//! # Story Graph
//!
//! The data model of the narrative engine. This crate owns the content graph and
//! the vocabulary used to describe it, and contains no stepping logic.
//!
//! - **entities**: nodes, edges and the `Entity` trait shared by everything in a registry
//! - **graph**: the arena that owns nodes and edges, with an incremental adjacency index
//! - **registry**: insertion-ordered indexed collections, query criteria and scope paths
//! - **provision**: provision keys, requirements and templates
//! - **mechanics**: conditions and effects evaluated against a scope

pub mod entities;
pub mod error;
pub mod graph;
pub mod mechanics;
pub mod provision;
pub mod registry;

pub use entities::*;
pub use error::*;
pub use graph::*;
pub use mechanics::*;
pub use provision::*;
pub use registry::*;
