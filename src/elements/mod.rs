//! Composite stages.
//!
//! - [`SourceBin`]: wraps an auto-detecting decoder and exposes a single
//!   output whose media type is known only once decoding starts

mod source_bin;

pub use source_bin::{
    BinState, BinTransition, ChildInfo, DECODER_NAME, DecodeEvent, DecodeEventSender, GHOST_PAD,
    NOT_ACCELERATED, SourceBin,
};
