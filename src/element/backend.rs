//! Backend seam for the external processing stages.
//!
//! Decoders, encoders, muxers and network sinks are provided by the
//! environment. The graph only drives their lifecycle through these hooks.

use super::{StageConfig, StageContext};
use crate::error::Result;

/// Lifecycle hooks implemented by an external stage.
///
/// | Transition | Hook |
/// |---|---|
/// | `null → ready` | [`acquire`](Self::acquire) |
/// | `paused → playing` | [`start`](Self::start) |
/// | `playing → paused` | [`pause`](Self::pause) |
/// | `ready → null` | [`release`](Self::release) |
///
/// A failing hook aborts the transition; the stage stays in its prior state.
pub trait StageBackend: Send {
    /// Acquire devices, sockets and other handles.
    fn acquire(&mut self, _config: &StageConfig, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }

    /// Begin active data flow.
    fn start(&mut self, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }

    /// Suspend data flow, keeping resources.
    fn pause(&mut self, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }

    /// Release everything acquired in [`acquire`](Self::acquire).
    fn release(&mut self, _ctx: &StageContext) {}
}

/// Backend that accepts every transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl StageBackend for NullBackend {}
