use lumen_blocks::BlockId;
use lumen_chunk::BlockBuf;
use lumen_geom::{Face, Vec3i};

use crate::LightError;

/// A block's voxels plus a halo ring copied from its neighbors, so the flood
/// never reads outside the buffer it owns. Interior coordinates are
/// `[padding, padding + size)` on each axis; the halo holds read-only
/// snapshots taken at job submission time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaddedBuf {
    size: usize,
    padding: usize,
    edge: usize,
    light: Vec<u8>,
    types: Vec<BlockId>,
}

impl PaddedBuf {
    pub fn new(
        size: usize,
        padding: usize,
        default_light: u8,
        default_type: BlockId,
    ) -> Result<Self, LightError> {
        if padding == 0 {
            return Err(LightError::InvalidPosition(
                "halo padding must be at least 1".into(),
            ));
        }
        let edge = size + 2 * padding;
        let volume = edge * edge * edge;
        Ok(Self {
            size,
            padding,
            edge,
            light: vec![default_light; volume],
            types: vec![default_type; volume],
        })
    }

    /// Snapshots a block and the opposing faces of its (up to six) neighbors.
    /// Neighbor slots follow [`Face::ALL`] order; absent neighbors leave the
    /// channel defaults in the halo.
    pub fn build(
        center: &BlockBuf,
        neighbors: &[Option<&BlockBuf>; Face::COUNT],
        padding: usize,
        default_light: u8,
        default_type: BlockId,
    ) -> Result<Self, LightError> {
        let size = center.size();
        let mut buf = Self::new(size, padding, default_light, default_type)?;
        for z in 0..size {
            for x in 0..size {
                for y in 0..size {
                    let p = Vec3i::new(
                        (x + padding) as i32,
                        (y + padding) as i32,
                        (z + padding) as i32,
                    );
                    let i = buf.idx(p);
                    buf.light[i] = center.light_at(x, y, z);
                    buf.types[i] = center.type_at(x, y, z);
                }
            }
        }
        for face in Face::ALL {
            let Some(nb) = neighbors[face.index()] else {
                continue;
            };
            if nb.size() != size {
                return Err(LightError::InternalInvariant(format!(
                    "neighbor block size {} does not match {}",
                    nb.size(),
                    size
                )));
            }
            buf.fill_halo(face, nb);
        }
        Ok(buf)
    }

    /// Copies the opposing face slab of `nb` into this buffer's halo ring for
    /// `face`, covering the interior cross-section only (halo edges and
    /// corners are never read by a six-neighbor flood).
    fn fill_halo(&mut self, face: Face, nb: &BlockBuf) {
        let s = self.size;
        let p = self.padding;
        for depth in 0..p {
            // Halo layer just past the interior on `face`, and the matching
            // source layer on the neighbor's opposing side.
            let (halo, src) = match face {
                Face::PosX | Face::PosY | Face::PosZ => (p + s + depth, depth),
                Face::NegX | Face::NegY | Face::NegZ => (p - 1 - depth, s - 1 - depth),
            };
            for u in 0..s {
                for v in 0..s {
                    let (hpos, sx, sy, sz) = match face {
                        Face::PosX | Face::NegX => (
                            Vec3i::new(halo as i32, (u + p) as i32, (v + p) as i32),
                            src,
                            u,
                            v,
                        ),
                        Face::PosY | Face::NegY => (
                            Vec3i::new((u + p) as i32, halo as i32, (v + p) as i32),
                            u,
                            src,
                            v,
                        ),
                        Face::PosZ | Face::NegZ => (
                            Vec3i::new((u + p) as i32, (v + p) as i32, halo as i32),
                            u,
                            v,
                            src,
                        ),
                    };
                    let i = self.idx(hpos);
                    self.light[i] = nb.light_at(sx, sy, sz);
                    self.types[i] = nb.type_at(sx, sy, sz);
                }
            }
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn padding(&self) -> usize {
        self.padding
    }

    #[inline]
    pub fn min_boundary(&self) -> Vec3i {
        Vec3i::splat(self.padding as i32)
    }

    #[inline]
    pub fn max_boundary(&self) -> Vec3i {
        Vec3i::splat((self.padding + self.size) as i32)
    }

    /// Whether `pos` lies in the interior (owned) region.
    #[inline]
    pub fn is_inside(&self, pos: Vec3i) -> bool {
        let lo = self.padding as i32;
        let hi = (self.padding + self.size) as i32;
        pos.x >= lo && pos.x < hi && pos.y >= lo && pos.y < hi && pos.z >= lo && pos.z < hi
    }

    /// Block-local position to padded coordinates.
    #[inline]
    pub fn to_padded(&self, local: Vec3i) -> Vec3i {
        local + Vec3i::splat(self.padding as i32)
    }

    /// Padded coordinates back to a local position of the block that owns the
    /// voxel (wraps across the halo, so a halo cell maps into the neighbor).
    #[inline]
    pub fn to_local_wrapped(&self, pos: Vec3i) -> Vec3i {
        (pos - Vec3i::splat(self.padding as i32)).rem_euclid(self.size as i32)
    }

    #[inline]
    fn idx(&self, pos: Vec3i) -> usize {
        debug_assert!(
            pos.x >= 0
                && pos.y >= 0
                && pos.z >= 0
                && (pos.x as usize) < self.edge
                && (pos.y as usize) < self.edge
                && (pos.z as usize) < self.edge
        );
        pos.y as usize + self.edge * (pos.x as usize + self.edge * pos.z as usize)
    }

    #[inline]
    pub fn light_at(&self, pos: Vec3i) -> u8 {
        self.light[self.idx(pos)]
    }

    #[inline]
    pub fn set_light(&mut self, pos: Vec3i, v: u8) {
        let i = self.idx(pos);
        self.light[i] = v;
    }

    #[inline]
    pub fn type_at(&self, pos: Vec3i) -> BlockId {
        self.types[self.idx(pos)]
    }

    #[inline]
    pub fn set_type(&mut self, pos: Vec3i, ty: BlockId) {
        let i = self.idx(pos);
        self.types[i] = ty;
    }

    /// Extracts the interior light channel in block storage order.
    pub fn interior_light(&self) -> Vec<u8> {
        let s = self.size;
        let p = self.padding;
        let mut out = vec![0u8; s * s * s];
        for z in 0..s {
            for x in 0..s {
                for y in 0..s {
                    let src = self.idx(Vec3i::new(
                        (x + p) as i32,
                        (y + p) as i32,
                        (z + p) as i32,
                    ));
                    out[y + s * (x + s * z)] = self.light[src];
                }
            }
        }
        out
    }
}
