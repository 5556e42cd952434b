//! Parameter contracts for cartograph.
//!
//! A [`Contract`] is an ordered list of [`Slot`]s describing which values a
//! stage (or a template's top-level attributes) accepts or produces.
//! Binding raw request JSON against a contract yields typed [`Value`]s plus
//! every [`Violation`] found along the way.

mod bind;
mod coerce;
mod error;
mod slot;
mod value;

pub use bind::{Binding, ExtraParameterPolicy};
pub use coerce::{check, coerce};
pub use error::{ContractError, Violation};
pub use slot::{Contract, Slot, SlotKind};
pub use value::{ArtifactRef, UnknownValueType, Value, ValueType};
