//! Pipeline graphs.
//!
//! Stages never name each other. Each declares the values it consumes and
//! produces, and [`Graph::build`] derives the edges by matching consumed
//! names to producers. Everything that can be checked without running a
//! stage (ambiguous producers, cycles, type disagreement, unsatisfiable
//! inputs) is checked here and reported together.

mod cache;
mod error;
mod graph;
mod spec;

pub use cache::{GraphCache, fingerprint};
pub use error::{GraphError, GraphErrors};
pub use graph::Graph;
pub use spec::{StageSpec, suffixed_name};
