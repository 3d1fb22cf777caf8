//! Automata: the schedulable unit.
//!
//! `action` defines the paction/caction vocabulary actions are built
//! from, `area` the tagged memory-map entries an address space is made
//! of, `automaton` the object itself, and `registry` the global
//! id-keyed table every other module reaches automata through.

pub mod action;
pub mod area;
#[allow(clippy::module_inception)]
pub mod automaton;
pub mod registry;

pub use action::{ActionKind, Caction, Paction, ParameterMode};
pub use area::{AreaKind, FaultOutcome, VmArea};
pub use automaton::{Automaton, ReadyState, COPY_VALUE_LIMIT};
pub use registry::{registry, AutomatonRegistry};

/// Identifies an automaton in the registry. `0` is never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AutomatonId(pub u32);
