/*!
Kill-driven morph unlocks.

Players unlock a cosmetic model by killing an entity that wears it. This crate
polls each active world for death markers, credits each death at most once to
the killer's [`morph_ledger::UnlockLedger`], and serves the `/morph` command and
selection page on top of that ledger. Everything host-specific sits behind the
[`crate::core::host::World`] and [`crate::core::host::Host`] traits.
*/

pub mod core;

pub use crate::core::{
    config::MorphConfig,
    service::{MorphService, ServiceStats},
};
