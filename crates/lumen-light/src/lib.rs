//! Two-channel incremental light propagation over padded block buffers.
#![forbid(unsafe_code)]

pub mod codec;
mod padded;
mod spread;

#[cfg(test)]
mod tests;

pub use padded::PaddedBuf;
pub use spread::{Propagator, SpreadOutput};

use lumen_blocks::{BlockId, BlockRegistry};
use lumen_geom::Vec3i;
use thiserror::Error;

/// Maximum value a light nibble can hold.
pub const MAX_LIGHT: u8 = 15;

/// Light lost per propagation step across a face.
pub const LIGHT_FALLOFF: u8 = 1;

/// The two independent light channels packed into one voxel byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightChannel {
    Artificial,
    Natural,
}

/// One pending light edit, local to a block. `value == 0` removes whatever
/// light the voxel currently stores; `value > 0` makes the voxel a source of
/// at least `value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightSeed {
    pub channel: LightChannel,
    pub value: u8,
    pub pos: Vec3i,
}

/// A propagation step that crossed the padded boundary and must continue in
/// the neighboring block. `pos` is local to the target block. For removal
/// spills, `value` is the departing brightness the target has to erase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpillEvent {
    pub block: Vec3i,
    pub channel: LightChannel,
    pub value: u8,
    pub pos: Vec3i,
}

#[derive(Debug, Error)]
pub enum LightError {
    #[error("invalid position or value: {0}")]
    InvalidPosition(String),
    #[error("unknown voxel type id {0}")]
    UnknownVoxelType(BlockId),
    #[error("block ({}, {}, {}) is not loaded", .0.x, .0.y, .0.z)]
    BlockNotLoaded(Vec3i),
    #[error("light data corrupted: {0}")]
    InternalInvariant(String),
}

/// Transparency capability over the injected block library. Unknown ids are
/// fatal: they indicate a corrupted type channel upstream.
#[inline]
pub fn is_transparent(reg: &BlockRegistry, id: BlockId) -> Result<bool, LightError> {
    reg.get(id)
        .map(|ty| ty.transparent)
        .ok_or(LightError::UnknownVoxelType(id))
}
