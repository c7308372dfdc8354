//! Stage model for vidgraph graphs.
//!
//! A [`Stage`] is a named processing unit with ordered input and output
//! [`Pad`]s, a kind-specific [`StageConfig`] and a [`StageBackend`] that
//! performs the actual media work. The graph owns every stage and drives
//! its [`StageState`] through adjacent transitions only.
//!
//! # Pads
//!
//! Pads are created from [`PadTemplate`]s:
//! - `Always` pads exist from construction and usually carry known caps.
//! - `Sometimes` pads have unknown caps until the stage announces them at
//!   runtime (decoders, the source bin).
//! - `Request` pads are instantiated on demand (`sink_%u` on a muxer).
//!
//! A [`GhostPad`] exposes an internal pad of a composite stage; its target
//! can be set exactly once.

mod backend;
mod config;
mod context;
mod pad;
mod stage;
mod state;

pub use backend::{NullBackend, StageBackend};
pub use config::{CODECS, OptionSpec, StageConfig, ValueKind, schema};
pub use context::StageContext;
pub use pad::{GhostPad, Pad, PadDirection, PadPresence, PadTarget, PadTemplate};
pub use stage::{Selection, Stage, StageKind};
pub use state::{StageState, Step};
