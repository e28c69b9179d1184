use std::collections::VecDeque;
use std::mem;

use lumen_blocks::BlockRegistry;
use lumen_geom::{Face, Vec3i};

use crate::{
    LIGHT_FALLOFF, LightChannel, LightError, LightSeed, MAX_LIGHT, PaddedBuf, SpillEvent, codec,
    is_transparent,
};

#[derive(Clone, Copy, Debug)]
struct BfsNode {
    pos: Vec3i,
    value: u8,
}

/// Cross-block continuations produced by one job.
#[derive(Clone, Debug, Default)]
pub struct SpreadOutput {
    pub add_spills: Vec<SpillEvent>,
    pub remove_spills: Vec<SpillEvent>,
}

/// Per-worker flood state. The four queues and the spill lists are reused
/// across jobs; everything is cleared when a job starts.
pub struct Propagator {
    block_size: usize,
    padding: usize,
    art_add: VecDeque<BfsNode>,
    art_remove: VecDeque<BfsNode>,
    nat_add: VecDeque<BfsNode>,
    nat_remove: VecDeque<BfsNode>,
    add_spills: Vec<SpillEvent>,
    remove_spills: Vec<SpillEvent>,
}

impl Propagator {
    pub fn new(block_size_pow2: u32, padding: usize) -> Result<Self, LightError> {
        if !(3..=5).contains(&block_size_pow2) {
            return Err(LightError::InvalidPosition(format!(
                "block_size_pow2 {block_size_pow2} outside 3..=5"
            )));
        }
        if padding == 0 {
            return Err(LightError::InvalidPosition(
                "halo padding must be at least 1".into(),
            ));
        }
        Ok(Self {
            block_size: 1usize << block_size_pow2,
            padding,
            art_add: VecDeque::new(),
            art_remove: VecDeque::new(),
            nat_add: VecDeque::new(),
            nat_remove: VecDeque::new(),
            add_spills: Vec::new(),
            remove_spills: Vec::new(),
        })
    }

    fn clear(&mut self) {
        self.art_add.clear();
        self.art_remove.clear();
        self.nat_add.clear();
        self.nat_remove.clear();
        self.add_spills.clear();
        self.remove_spills.clear();
    }

    #[inline]
    fn queue_of(&mut self, channel: LightChannel, is_add: bool) -> &mut VecDeque<BfsNode> {
        match (channel, is_add) {
            (LightChannel::Artificial, true) => &mut self.art_add,
            (LightChannel::Artificial, false) => &mut self.art_remove,
            (LightChannel::Natural, true) => &mut self.nat_add,
            (LightChannel::Natural, false) => &mut self.nat_remove,
        }
    }

    /// Runs the full two-phase flood for one block: seeds are applied, the
    /// removal flood drains before the addition flood per channel, and the
    /// mutated buffer plus spill events are the result. Deterministic: same
    /// buffer and seed batch, same output bytes and spill lists.
    pub fn process_block(
        &mut self,
        reg: &BlockRegistry,
        block_pos: Vec3i,
        buf: &mut PaddedBuf,
        seeds: &[LightSeed],
    ) -> Result<SpreadOutput, LightError> {
        if buf.size() != self.block_size || buf.padding() != self.padding {
            return Err(LightError::InternalInvariant(format!(
                "buffer geometry {}+{} does not match worker {}+{}",
                buf.size(),
                buf.padding(),
                self.block_size,
                self.padding
            )));
        }
        self.clear();

        for seed in seeds {
            if seed.value > MAX_LIGHT {
                return Err(LightError::InternalInvariant(format!(
                    "seed value {} exceeds nibble range",
                    seed.value
                )));
            }
            let p = buf.to_padded(seed.pos);
            if !buf.is_inside(p) {
                return Err(LightError::InvalidPosition(format!(
                    "seed position ({}, {}, {}) outside block",
                    seed.pos.x, seed.pos.y, seed.pos.z
                )));
            }
            let cur = codec::get(seed.channel, buf.light_at(p));
            if seed.value > 0 && seed.value > cur {
                buf.set_light(p, codec::set(seed.channel, buf.light_at(p), seed.value));
                // Queued value is what the neighbors receive, one step dimmer.
                self.queue_of(seed.channel, true).push_back(BfsNode {
                    pos: p,
                    value: seed.value - LIGHT_FALLOFF,
                });
            } else if seed.value == 0 && cur > 0 {
                // Removal keeps the old brightness; the dark flood needs it.
                buf.set_light(p, codec::set(seed.channel, buf.light_at(p), 0));
                self.queue_of(seed.channel, false)
                    .push_back(BfsNode { pos: p, value: cur });
            }
        }

        let Propagator {
            art_add,
            art_remove,
            nat_add,
            nat_remove,
            add_spills,
            remove_spills,
            ..
        } = self;
        flood_remove(
            block_pos,
            buf,
            LightChannel::Artificial,
            art_remove,
            art_add,
            remove_spills,
        );
        flood_add(
            reg,
            block_pos,
            buf,
            LightChannel::Artificial,
            art_add,
            add_spills,
        )?;
        flood_remove(
            block_pos,
            buf,
            LightChannel::Natural,
            nat_remove,
            nat_add,
            remove_spills,
        );
        flood_add(
            reg,
            block_pos,
            buf,
            LightChannel::Natural,
            nat_add,
            add_spills,
        )?;

        Ok(SpreadOutput {
            add_spills: mem::take(add_spills),
            remove_spills: mem::take(remove_spills),
        })
    }
}

#[inline]
fn spill(
    block_pos: Vec3i,
    buf: &PaddedBuf,
    face: Face,
    channel: LightChannel,
    value: u8,
    pos: Vec3i,
) -> SpillEvent {
    SpillEvent {
        block: block_pos + face.normal(),
        channel,
        value,
        pos: buf.to_local_wrapped(pos),
    }
}

/// Darkness flood. A popped node carries the brightness that used to live at
/// its position; neighbors strictly dimmer than it descended from here and
/// are erased, neighbors at least as bright survive and requeue as sources.
/// Every step across the padded boundary spills unconditionally with the
/// departing value; the receiving side decides what the removal means there.
fn flood_remove(
    block_pos: Vec3i,
    buf: &mut PaddedBuf,
    channel: LightChannel,
    remove: &mut VecDeque<BfsNode>,
    add: &mut VecDeque<BfsNode>,
    remove_spills: &mut Vec<SpillEvent>,
) {
    while let Some(node) = remove.pop_front() {
        for face in Face::ALL {
            let n = node.pos + face.normal();
            if !buf.is_inside(n) {
                remove_spills.push(spill(block_pos, buf, face, channel, node.value, n));
                continue;
            }
            let nl = codec::get(channel, buf.light_at(n));
            if nl == 0 {
                continue;
            }
            if nl < node.value {
                buf.set_light(n, codec::set(channel, buf.light_at(n), 0));
                remove.push_back(BfsNode { pos: n, value: nl });
            } else {
                add.push_back(BfsNode {
                    pos: n,
                    value: nl - LIGHT_FALLOFF,
                });
            }
        }
    }
}

/// Brightness flood over transparent voxels.
fn flood_add(
    reg: &BlockRegistry,
    block_pos: Vec3i,
    buf: &mut PaddedBuf,
    channel: LightChannel,
    add: &mut VecDeque<BfsNode>,
    add_spills: &mut Vec<SpillEvent>,
) -> Result<(), LightError> {
    while let Some(node) = add.pop_front() {
        if node.value == 0 {
            continue;
        }
        for face in Face::ALL {
            let n = node.pos + face.normal();
            // Opacity gates the step even into the halo; the snapshot of the
            // neighbor's type channel decides whether a spill is worth it.
            if !is_transparent(reg, buf.type_at(n))? {
                continue;
            }
            if !buf.is_inside(n) {
                add_spills.push(spill(block_pos, buf, face, channel, node.value, n));
                continue;
            }
            let nl = codec::get(channel, buf.light_at(n));
            if node.value <= nl {
                continue;
            }
            buf.set_light(n, codec::set(channel, buf.light_at(n), node.value));
            if node.value > LIGHT_FALLOFF {
                add.push_back(BfsNode {
                    pos: n,
                    value: node.value - LIGHT_FALLOFF,
                });
            }
        }
    }
    Ok(())
}
