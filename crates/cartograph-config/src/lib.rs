//! Cartograph Config
//!
//! Serializable definitions of print templates, before they are resolved
//! into a dependency graph and bound to stage implementations.
//!
//! Definitions are usually loaded from JSON files (via the CLI) or from a
//! configuration service. The job crate resolves them into runtime
//! structures; this crate only carries shape.

mod slot;
mod stage;
mod template;

pub use slot::{SlotDef, SlotKindDef};
pub use stage::StageDef;
pub use template::TemplateDef;
