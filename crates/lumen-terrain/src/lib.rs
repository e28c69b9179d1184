//! Terrain coordinator: block storage, the per-block state machine, and the
//! fixed-point light tick.
#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use hashbrown::{HashMap, HashSet};
use lumen_blocks::{AIR, BlockId, BlockRegistry};
use lumen_chunk::BlockBuf;
use lumen_geom::{Face, Vec3i};
use lumen_light::{
    LIGHT_FALLOFF, LightChannel, LightError, LightSeed, MAX_LIGHT, PaddedBuf, SpillEvent, codec,
};
use lumen_runtime::{LightJob, LightJobOut, LightSpreader};

pub const DEFAULT_BLOCK_SIZE_POW2: u32 = 4;

/// Halo depth around a block snapshot.
const PADDING: usize = 1;

/// Lifecycle of one block with respect to the light and mesh pipelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// Storage requested but not installed yet; seeds are parked.
    Load,
    /// Has a pending non-empty seed batch.
    LightDirty,
    /// A light job for this block is in flight.
    LightSent,
    /// Light settled and bytes changed; a remesh is due.
    MeshDirty,
    /// The host took the remesh hint and has not acknowledged it yet.
    MeshSent,
    Idle,
}

/// Per-tick counters and phase timings.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    pub rounds: u32,
    pub jobs_issued: u32,
    pub blocks_updated: u32,
    pub spill_seeds: u32,
    pub time_send_ms: u32,
    pub time_receive_ms: u32,
    pub time_total_ms: u32,
}

/// Owns every block's voxel channels and routes light between them. All
/// mutation happens on the caller's thread; workers only ever see padded
/// snapshots and hand back owned results.
pub struct Terrain {
    size_pow2: u32,
    size: i32,
    mask: i32,
    default_light: u8,
    default_type: BlockId,
    reg: Arc<BlockRegistry>,
    spreader: LightSpreader,
    blocks: HashMap<Vec3i, BlockBuf>,
    states: HashMap<Vec3i, BlockState>,
    pending: HashMap<Vec3i, Vec<LightSeed>>,
    mesh_dirty: HashSet<Vec3i>,
    inflight: usize,
    next_job_id: u64,
}

impl Terrain {
    pub fn new(
        reg: Arc<BlockRegistry>,
        workers: usize,
        block_size_pow2: u32,
    ) -> Result<Self, LightError> {
        if !(3..=5).contains(&block_size_pow2) {
            return Err(LightError::InvalidPosition(format!(
                "block_size_pow2 {block_size_pow2} outside 3..=5"
            )));
        }
        let spreader = LightSpreader::new(workers, block_size_pow2, PADDING, reg.clone())?;
        let size = 1i32 << block_size_pow2;
        Ok(Self {
            size_pow2: block_size_pow2,
            size,
            mask: size - 1,
            default_light: 0,
            default_type: AIR,
            reg,
            spreader,
            blocks: HashMap::new(),
            states: HashMap::new(),
            pending: HashMap::new(),
            mesh_dirty: HashSet::new(),
            inflight: 0,
            next_job_id: 0,
        })
    }

    #[inline]
    pub fn block_size(&self) -> i32 {
        self.size
    }

    #[inline]
    pub fn voxel_to_block(&self, world: Vec3i) -> Vec3i {
        world.shr(self.size_pow2)
    }

    #[inline]
    pub fn to_local(&self, world: Vec3i) -> Vec3i {
        world.mask(self.mask)
    }

    /// Schedules an artificial light edit. `value == 0` removes the source.
    pub fn set_voxel_artificial(&mut self, world: Vec3i, value: u8) -> Result<(), LightError> {
        self.set_voxel_light(LightChannel::Artificial, world, value)
    }

    /// Schedules a natural light edit. `value == 0` removes the source.
    pub fn set_voxel_natural(&mut self, world: Vec3i, value: u8) -> Result<(), LightError> {
        self.set_voxel_light(LightChannel::Natural, world, value)
    }

    fn set_voxel_light(
        &mut self,
        channel: LightChannel,
        world: Vec3i,
        value: u8,
    ) -> Result<(), LightError> {
        if value > MAX_LIGHT {
            return Err(LightError::InvalidPosition(format!(
                "light value {value} exceeds nibble range"
            )));
        }
        let bpos = self.voxel_to_block(world);
        self.get_or_create_block(bpos);
        let seed = LightSeed {
            channel,
            value,
            pos: self.to_local(world),
        };
        self.push_seed(bpos, seed);
        Ok(())
    }

    /// Writes the type channel. Light is not recomputed; schedule a light
    /// edit if the change should re-shape an existing field.
    pub fn set_voxel_type(&mut self, world: Vec3i, ty: BlockId) -> Result<(), LightError> {
        if self.reg.get(ty).is_none() {
            return Err(LightError::UnknownVoxelType(ty));
        }
        let bpos = self.voxel_to_block(world);
        let local = self.to_local(world);
        let buf = self.get_or_create_block(bpos);
        buf.set_type_at(local.x as usize, local.y as usize, local.z as usize, ty);
        Ok(())
    }

    pub fn get_voxel_type(&self, world: Vec3i) -> BlockId {
        let bpos = self.voxel_to_block(world);
        let local = self.to_local(world);
        match self.blocks.get(&bpos) {
            Some(buf) => buf.type_at(local.x as usize, local.y as usize, local.z as usize),
            None => self.default_type,
        }
    }

    /// Current packed nibble pair; the channel default when no block is loaded.
    pub fn get_light_byte(&self, world: Vec3i) -> u8 {
        let bpos = self.voxel_to_block(world);
        let local = self.to_local(world);
        match self.blocks.get(&bpos) {
            Some(buf) => buf.light_at(local.x as usize, local.y as usize, local.z as usize),
            None => self.default_light,
        }
    }

    pub fn block_state(&self, bpos: Vec3i) -> Option<BlockState> {
        self.states.get(&bpos).copied()
    }

    /// Whole light channel of one block, for a host mesh pipeline.
    pub fn block_light(&self, bpos: Vec3i) -> Result<&[u8], LightError> {
        self.blocks
            .get(&bpos)
            .map(|buf| buf.light())
            .ok_or(LightError::BlockNotLoaded(bpos))
    }

    pub fn is_block_loaded(&self, bpos: Vec3i) -> bool {
        self.blocks.contains_key(&bpos)
    }

    /// Installs block storage with the given type channel (dark light) and
    /// wakes any seeds parked for it. Replaces existing storage.
    pub fn load_block(&mut self, bpos: Vec3i, types: Vec<BlockId>) -> Result<(), LightError> {
        let volume = (self.size * self.size * self.size) as usize;
        if types.len() != volume {
            return Err(LightError::InvalidPosition(format!(
                "type channel length {} does not match block volume {volume}",
                types.len()
            )));
        }
        if self.blocks.contains_key(&bpos) {
            log::warn!(
                "reloading block ({}, {}, {}) over existing storage",
                bpos.x,
                bpos.y,
                bpos.z
            );
        }
        self.filter_parked_seeds(bpos);
        let light = vec![self.default_light; volume];
        self.blocks
            .insert(bpos, BlockBuf::from_channels(self.size as usize, light, types));
        let state = if self.pending.contains_key(&bpos) {
            BlockState::LightDirty
        } else {
            BlockState::Idle
        };
        self.states.insert(bpos, state);
        Ok(())
    }

    /// Drops a block's storage, state, and parked seeds.
    pub fn evict_block(&mut self, bpos: Vec3i) {
        self.blocks.remove(&bpos);
        self.states.remove(&bpos);
        self.pending.remove(&bpos);
        self.mesh_dirty.remove(&bpos);
    }

    /// Blocks whose light settled with changes since the last drain. Each
    /// returned block moves `MeshDirty -> MeshSent`.
    pub fn drain_mesh_dirty(&mut self) -> Vec<Vec3i> {
        let mut out: Vec<Vec3i> = Vec::new();
        for bpos in self.mesh_dirty.iter() {
            if self.states.get(bpos) == Some(&BlockState::MeshDirty) {
                out.push(*bpos);
            }
        }
        for bpos in &out {
            self.states.insert(*bpos, BlockState::MeshSent);
            self.mesh_dirty.remove(bpos);
        }
        out
    }

    /// Host acknowledgement for a remesh taken via [`Self::drain_mesh_dirty`].
    pub fn mark_block_meshed(&mut self, bpos: Vec3i) {
        if self.states.get(&bpos) == Some(&BlockState::MeshSent) {
            self.states.insert(bpos, BlockState::Idle);
        }
    }

    /// Runs light to quiescence: every pending batch for a loaded block is
    /// flushed, spills are re-queued as new batches, and the loop ends when
    /// nothing is pending and nothing is in flight. A worker error aborts the
    /// tick; outstanding jobs are drained first so the pool stays coherent.
    pub fn tick(&mut self) -> Result<TickStats, LightError> {
        let result = self.tick_inner();
        if result.is_err() {
            self.drain_inflight();
        }
        result
    }

    fn tick_inner(&mut self) -> Result<TickStats, LightError> {
        let t_start = Instant::now();
        let mut stats = TickStats::default();
        loop {
            stats.rounds += 1;
            let t_send = Instant::now();
            self.send_pending(&mut stats)?;
            stats.time_send_ms += elapsed_ms(t_send);
            if self.inflight == 0 {
                break;
            }
            let t_recv = Instant::now();
            let first = self.spreader.recv().ok_or_else(|| {
                LightError::InternalInvariant("light workers disconnected".into())
            })?;
            self.handle_result(first, &mut stats)?;
            for res in self.spreader.drain() {
                self.handle_result(res, &mut stats)?;
            }
            stats.time_receive_ms += elapsed_ms(t_recv);
        }
        stats.time_total_ms = elapsed_ms(t_start);
        log::info!(
            target: "perf",
            "ms={} terrain_tick rounds={} jobs={} updated={} spills={}",
            stats.time_total_ms,
            stats.rounds,
            stats.jobs_issued,
            stats.blocks_updated,
            stats.spill_seeds
        );
        Ok(stats)
    }

    fn handle_result(
        &mut self,
        res: Result<LightJobOut, LightError>,
        stats: &mut TickStats,
    ) -> Result<(), LightError> {
        match res {
            Ok(out) => self.apply_output(out, stats),
            Err(e) => {
                // The job completed by failing; it is no longer in flight.
                self.inflight -= 1;
                Err(e)
            }
        }
    }

    /// Receives every outstanding result after an aborted tick so later
    /// ticks never wait on jobs that already finished.
    fn drain_inflight(&mut self) {
        let mut scratch = TickStats::default();
        while self.inflight > 0 {
            let Some(res) = self.spreader.recv() else {
                break;
            };
            match res {
                Ok(out) => {
                    let _ = self.apply_output(out, &mut scratch);
                }
                Err(e) => {
                    self.inflight -= 1;
                    log::error!("discarding failed light job while aborting: {e}");
                }
            }
        }
    }

    fn get_or_create_block(&mut self, bpos: Vec3i) -> &mut BlockBuf {
        let size = self.size as usize;
        let (default_light, default_type) = (self.default_light, self.default_type);
        if !self.blocks.contains_key(&bpos) {
            self.filter_parked_seeds(bpos);
            let state = if self.pending.contains_key(&bpos) {
                BlockState::LightDirty
            } else {
                BlockState::Idle
            };
            self.states.insert(bpos, state);
        }
        self.blocks
            .entry(bpos)
            .or_insert_with(|| BlockBuf::filled(size, default_light, default_type))
    }

    /// Parked seeds go live when a block's storage arrives. An add seed is
    /// only still valid if a neighboring voxel carries light one step
    /// brighter, which is exactly the support its spill had when it was
    /// emitted; seeds whose source disappeared while the block was unloaded
    /// are dropped instead of replaying ghost light.
    fn filter_parked_seeds(&mut self, bpos: Vec3i) {
        let Some(seeds) = self.pending.remove(&bpos) else {
            return;
        };
        let base = Vec3i::new(
            bpos.x * self.size,
            bpos.y * self.size,
            bpos.z * self.size,
        );
        let kept: Vec<LightSeed> = seeds
            .into_iter()
            .filter(|seed| {
                if seed.value == 0 {
                    return true;
                }
                let world = base + seed.pos;
                Face::ALL.iter().any(|face| {
                    let nb = world + face.normal();
                    codec::get(seed.channel, self.get_light_byte(nb)) > seed.value
                })
            })
            .collect();
        if !kept.is_empty() {
            self.pending.insert(bpos, kept);
        }
    }

    fn push_seed(&mut self, bpos: Vec3i, seed: LightSeed) {
        self.pending.entry(bpos).or_default().push(seed);
        if self.blocks.contains_key(&bpos) {
            if self.states.get(&bpos) != Some(&BlockState::LightSent) {
                self.states.insert(bpos, BlockState::LightDirty);
            }
        } else {
            self.states.insert(bpos, BlockState::Load);
        }
    }

    /// Send phase: one job per loaded block with a pending batch, unless a
    /// job for that block is already in flight (same-block jobs serialize).
    fn send_pending(&mut self, stats: &mut TickStats) -> Result<(), LightError> {
        let ready: Vec<Vec3i> = self
            .pending
            .keys()
            .filter(|bpos| {
                self.blocks.contains_key(*bpos)
                    && self.states.get(*bpos) != Some(&BlockState::LightSent)
            })
            .copied()
            .collect();
        for bpos in ready {
            let seeds = self.pending.remove(&bpos).unwrap_or_default();
            let buf = self.build_padded(bpos)?;
            let job_id = self.next_job_id;
            self.next_job_id += 1;
            self.spreader.push(LightJob {
                block_pos: bpos,
                buf,
                seeds,
                lod: 0,
                job_id,
            });
            self.states.insert(bpos, BlockState::LightSent);
            self.inflight += 1;
            stats.jobs_issued += 1;
        }
        Ok(())
    }

    fn build_padded(&self, bpos: Vec3i) -> Result<PaddedBuf, LightError> {
        let center = &self.blocks[&bpos];
        let owned: [Option<&BlockBuf>; Face::COUNT] =
            Face::ALL.map(|face| self.blocks.get(&(bpos + face.normal())));
        PaddedBuf::build(
            center,
            &owned,
            PADDING,
            self.default_light,
            self.default_type,
        )
    }

    fn apply_output(&mut self, out: LightJobOut, stats: &mut TickStats) -> Result<(), LightError> {
        self.inflight -= 1;
        let bpos = out.block_pos;
        let Some(buf) = self.blocks.get_mut(&bpos) else {
            // Evicted while the job ran; its spills die with it.
            log::debug!(
                "dropping light result for evicted block ({}, {}, {})",
                bpos.x,
                bpos.y,
                bpos.z
            );
            return Ok(());
        };
        if buf.replace_light(&out.light) {
            stats.blocks_updated += 1;
            self.mesh_dirty.insert(bpos);
        }
        for ev in &out.remove_spills {
            self.apply_remove_spill(bpos, ev);
            stats.spill_seeds += 1;
        }
        for ev in &out.add_spills {
            self.push_seed(
                ev.block,
                LightSeed {
                    channel: ev.channel,
                    value: ev.value,
                    pos: ev.pos,
                },
            );
            stats.spill_seeds += 1;
        }
        let state = if self.pending.contains_key(&bpos) {
            BlockState::LightDirty
        } else if self.mesh_dirty.contains(&bpos) {
            BlockState::MeshDirty
        } else {
            BlockState::Idle
        };
        self.states.insert(bpos, state);
        Ok(())
    }

    /// A removal crossing a block border carries the brightness that left.
    /// What it means depends on what the target voxel holds right now:
    /// already dark means there is nothing to erase (the seed would be a
    /// no-op, so none is queued); dimmer light descended from the departed
    /// value, so the nibble is restored to it and a removal is seeded;
    /// light at least as bright marks an independent survivor, and the block
    /// that sent the removal gets re-lit from it across the shared face.
    fn apply_remove_spill(&mut self, origin: Vec3i, ev: &SpillEvent) {
        let Some(buf) = self.blocks.get_mut(&ev.block) else {
            // Unloaded blocks are dark; nothing to erase.
            return;
        };
        let (x, y, z) = (ev.pos.x as usize, ev.pos.y as usize, ev.pos.z as usize);
        let old = buf.light_at(x, y, z);
        let current = codec::get(ev.channel, old);
        if current == 0 {
            return;
        }
        if current < ev.value {
            buf.set_light_at(x, y, z, codec::set(ev.channel, old, ev.value));
            self.push_seed(
                ev.block,
                LightSeed {
                    channel: ev.channel,
                    value: 0,
                    pos: ev.pos,
                },
            );
        } else if current > LIGHT_FALLOFF {
            let normal = ev.block - origin;
            let survivor_world = Vec3i::new(
                ev.block.x * self.size + ev.pos.x,
                ev.block.y * self.size + ev.pos.y,
                ev.block.z * self.size + ev.pos.z,
            );
            let origin_world = survivor_world - normal;
            self.push_seed(
                origin,
                LightSeed {
                    channel: ev.channel,
                    value: current - LIGHT_FALLOFF,
                    pos: self.to_local(origin_world),
                },
            );
        }
    }
}

fn elapsed_ms(t: Instant) -> u32 {
    t.elapsed().as_millis().min(u128::from(u32::MAX)) as u32
}
