use super::*;
use lumen_blocks::{AIR, BlockRegistry};
use lumen_chunk::BlockBuf;
use lumen_geom::{Face, Vec3i};
use proptest::prelude::*;

const S: usize = 16;

fn reg() -> BlockRegistry {
    BlockRegistry::builtin()
}

fn padded(center: &BlockBuf) -> PaddedBuf {
    PaddedBuf::build(center, &[None; Face::COUNT], 1, 0, AIR).unwrap()
}

fn propagator() -> Propagator {
    Propagator::new(4, 1).unwrap()
}

fn add_seed(x: i32, y: i32, z: i32, v: u8) -> LightSeed {
    LightSeed {
        channel: LightChannel::Artificial,
        value: v,
        pos: Vec3i::new(x, y, z),
    }
}

fn rem_seed(x: i32, y: i32, z: i32) -> LightSeed {
    add_seed(x, y, z, 0)
}

fn art(buf: &PaddedBuf, x: i32, y: i32, z: i32) -> u8 {
    codec::artificial(buf.light_at(buf.to_padded(Vec3i::new(x, y, z))))
}

fn nat(buf: &PaddedBuf, x: i32, y: i32, z: i32) -> u8 {
    codec::natural(buf.light_at(buf.to_padded(Vec3i::new(x, y, z))))
}

#[test]
fn codec_nibbles_do_not_disturb_each_other() {
    let v = codec::with_artificial(0, 13);
    let v = codec::with_natural(v, 6);
    assert_eq!(codec::artificial(v), 13);
    assert_eq!(codec::natural(v), 6);
    let v = codec::with_artificial(v, 2);
    assert_eq!(codec::artificial(v), 2);
    assert_eq!(codec::natural(v), 6);
    // Values clamp to four bits.
    assert_eq!(codec::artificial(codec::with_artificial(0, 0xFF)), 15);
    assert_eq!(codec::natural(codec::with_natural(0, 0xFF)), 15);
}

#[test]
fn codec_final_light_is_channel_max() {
    let v = codec::with_natural(codec::with_artificial(0, 9), 12);
    assert_eq!(codec::final_light(v), 12);
    let v = codec::with_natural(codec::with_artificial(0, 14), 3);
    assert_eq!(codec::final_light(v), 14);
    assert_eq!(codec::final_light(0), 0);
}

#[test]
fn padded_interior_mirrors_center_and_halo_defaults() {
    let mut center = BlockBuf::new(4);
    center.set_light_at(1, 2, 3, 0x5A);
    center.set_type_at(1, 2, 3, 1);
    let buf = PaddedBuf::build(&center, &[None; Face::COUNT], 1, 0x07, AIR).unwrap();
    assert_eq!(buf.min_boundary(), Vec3i::splat(1));
    assert_eq!(buf.max_boundary(), Vec3i::splat(5));
    assert_eq!(buf.light_at(Vec3i::new(2, 3, 4)), 0x5A);
    assert_eq!(buf.type_at(Vec3i::new(2, 3, 4)), 1);
    // Halo keeps the provided default when no neighbor is given.
    assert_eq!(buf.light_at(Vec3i::new(0, 2, 2)), 0x07);
    assert_eq!(buf.type_at(Vec3i::new(5, 2, 2)), AIR);
    assert!(buf.is_inside(Vec3i::new(1, 1, 1)));
    assert!(buf.is_inside(Vec3i::new(4, 4, 4)));
    assert!(!buf.is_inside(Vec3i::new(0, 2, 2)));
    assert!(!buf.is_inside(Vec3i::new(2, 5, 2)));
}

#[test]
fn padded_halo_copies_opposing_neighbor_faces() {
    let center = BlockBuf::new(4);
    let mut xp = BlockBuf::new(4);
    xp.set_light_at(0, 1, 2, 0x3C);
    xp.set_type_at(0, 1, 2, 1);
    let mut yn = BlockBuf::new(4);
    yn.set_light_at(2, 3, 0, 0x09);
    let mut neighbors: [Option<&BlockBuf>; Face::COUNT] = [None; Face::COUNT];
    neighbors[Face::PosX.index()] = Some(&xp);
    neighbors[Face::NegY.index()] = Some(&yn);
    let buf = PaddedBuf::build(&center, &neighbors, 1, 0, AIR).unwrap();
    // +X halo at padded x = 5 comes from the neighbor's x = 0 face.
    assert_eq!(buf.light_at(Vec3i::new(5, 2, 3)), 0x3C);
    assert_eq!(buf.type_at(Vec3i::new(5, 2, 3)), 1);
    // -Y halo at padded y = 0 comes from the neighbor's y = 3 face.
    assert_eq!(buf.light_at(Vec3i::new(3, 0, 1)), 0x09);
}

#[test]
fn padded_wrap_maps_halo_cells_into_neighbors() {
    let buf = padded(&BlockBuf::new(S));
    assert_eq!(
        buf.to_local_wrapped(Vec3i::new((S + 1) as i32, 3, 4)),
        Vec3i::new(0, 2, 3)
    );
    assert_eq!(
        buf.to_local_wrapped(Vec3i::new(0, 3, 4)),
        Vec3i::new((S - 1) as i32, 2, 3)
    );
}

#[test]
fn interior_light_extraction_is_storage_order() {
    let mut center = BlockBuf::new(4);
    center.set_light_at(1, 2, 3, 0xAB);
    let buf = padded(&center);
    let light = buf.interior_light();
    assert_eq!(light.len(), 64);
    assert_eq!(light[2 + 4 * (1 + 4 * 3)], 0xAB);
}

#[test]
fn torch_decays_one_per_step() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    let out = propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(0, 0, 0, 15)])
        .unwrap();
    assert_eq!(art(&buf, 0, 0, 0), 15);
    assert_eq!(art(&buf, 5, 0, 0), 10);
    assert_eq!(art(&buf, 14, 0, 0), 1);
    assert_eq!(art(&buf, 15, 0, 0), 0);
    assert_eq!(art(&buf, 3, 4, 5), 15 - 12);
    assert_eq!(nat(&buf, 0, 0, 0), 0);
    // The corner torch leaks across the three touching faces, never +X.
    assert!(out.remove_spills.is_empty());
    assert!(!out.add_spills.is_empty());
    assert!(
        out.add_spills
            .iter()
            .all(|ev| ev.block != Vec3i::new(1, 0, 0))
    );
    assert!(
        out.add_spills
            .iter()
            .any(|ev| ev.block == Vec3i::new(-1, 0, 0)
                && ev.pos == Vec3i::new(15, 0, 0)
                && ev.value == 14)
    );
}

#[test]
fn reapplying_the_same_seed_changes_nothing() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    let mut p = propagator();
    p.process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(2, 2, 2, 12)])
        .unwrap();
    let before = buf.clone();
    let out = p
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(2, 2, 2, 12)])
        .unwrap();
    assert_eq!(buf, before);
    assert!(out.add_spills.is_empty());
    assert!(out.remove_spills.is_empty());
}

#[test]
fn removing_a_single_torch_restores_darkness() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    let mut p = propagator();
    p.process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(7, 7, 7, 15)])
        .unwrap();
    p.process_block(&reg, Vec3i::ZERO, &mut buf, &[rem_seed(7, 7, 7)])
        .unwrap();
    assert!(buf.interior_light().iter().all(|&b| b == 0));
}

#[test]
fn two_torches_keep_the_max_envelope() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    propagator()
        .process_block(
            &reg,
            Vec3i::ZERO,
            &mut buf,
            &[add_seed(0, 0, 0, 15), add_seed(10, 0, 0, 15)],
        )
        .unwrap();
    assert_eq!(art(&buf, 5, 0, 0), 10);
    assert_eq!(art(&buf, 10, 0, 0), 15);
    assert_eq!(art(&buf, 12, 0, 0), 13);
}

#[test]
fn removing_one_torch_relights_from_the_survivor() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    let mut p = propagator();
    p.process_block(
        &reg,
        Vec3i::ZERO,
        &mut buf,
        &[add_seed(0, 0, 0, 15), add_seed(10, 0, 0, 15)],
    )
    .unwrap();
    p.process_block(&reg, Vec3i::ZERO, &mut buf, &[rem_seed(10, 0, 0)])
        .unwrap();
    assert_eq!(art(&buf, 10, 0, 0), 5);
    assert_eq!(art(&buf, 15, 0, 0), 0);
    assert_eq!(art(&buf, 4, 0, 0), 11);
}

#[test]
fn wall_plane_stops_the_flood() {
    let reg = reg();
    let stone = reg.id_by_name("stone").unwrap();
    let mut center = BlockBuf::new(S);
    for y in 0..S {
        for z in 0..S {
            center.set_type_at(5, y, z, stone);
        }
    }
    let mut buf = padded(&center);
    propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(0, 0, 0, 15)])
        .unwrap();
    assert_eq!(art(&buf, 4, 0, 0), 11);
    assert_eq!(art(&buf, 5, 0, 0), 0);
    assert_eq!(art(&buf, 6, 0, 0), 0);
}

#[test]
fn flood_goes_around_a_single_opaque_voxel() {
    let reg = reg();
    let stone = reg.id_by_name("stone").unwrap();
    let mut center = BlockBuf::new(S);
    center.set_type_at(2, 0, 0, stone);
    let mut buf = padded(&center);
    propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(0, 0, 0, 15)])
        .unwrap();
    assert_eq!(art(&buf, 2, 0, 0), 0);
    // Shortest detour is five steps.
    assert_eq!(art(&buf, 3, 0, 0), 10);
}

#[test]
fn glass_passes_light() {
    let reg = reg();
    let glass = reg.id_by_name("glass").unwrap();
    let mut center = BlockBuf::new(S);
    center.set_type_at(2, 0, 0, glass);
    let mut buf = padded(&center);
    propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(0, 0, 0, 15)])
        .unwrap();
    assert_eq!(art(&buf, 2, 0, 0), 13);
    assert_eq!(art(&buf, 3, 0, 0), 12);
}

#[test]
fn boundary_torch_spills_with_decremented_value() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    let out = propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(15, 0, 0, 15)])
        .unwrap();
    assert!(
        out.add_spills
            .iter()
            .any(|ev| ev.block == Vec3i::new(1, 0, 0)
                && ev.channel == LightChannel::Artificial
                && ev.pos == Vec3i::new(0, 0, 0)
                && ev.value == 14)
    );
    // Light dimmed along -X still reaches the -Y/-Z faces with lower values.
    assert!(
        out.add_spills
            .iter()
            .any(|ev| ev.block == Vec3i::new(0, -1, 0) && ev.pos == Vec3i::new(15, 15, 0))
    );
}

#[test]
fn removal_spills_carry_the_departing_value() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    let mut p = propagator();
    p.process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(15, 0, 0, 15)])
        .unwrap();
    let out = p
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[rem_seed(15, 0, 0)])
        .unwrap();
    assert!(
        out.remove_spills
            .iter()
            .any(|ev| ev.block == Vec3i::new(1, 0, 0)
                && ev.channel == LightChannel::Artificial
                && ev.pos == Vec3i::new(0, 0, 0)
                && ev.value == 15)
    );
    assert!(buf.interior_light().iter().all(|&b| b == 0));
}

#[test]
fn removal_spills_are_unconditional_at_the_boundary() {
    let reg = reg();
    // The +X neighbor snapshot is brighter than anything departing here; the
    // flood still reports the crossing and leaves the verdict to the owner
    // of that block.
    let mut xp = BlockBuf::new(S);
    for y in 0..S {
        for z in 0..S {
            xp.set_light_at(0, y, z, codec::with_artificial(0, 15));
        }
    }
    let center = BlockBuf::new(S);
    let mut neighbors: [Option<&BlockBuf>; Face::COUNT] = [None; Face::COUNT];
    neighbors[Face::PosX.index()] = Some(&xp);
    let mut buf = PaddedBuf::build(&center, &neighbors, 1, 0, AIR).unwrap();
    let mut p = propagator();
    p.process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(14, 0, 0, 12)])
        .unwrap();
    let out = p
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[rem_seed(14, 0, 0)])
        .unwrap();
    assert!(
        out.remove_spills
            .iter()
            .any(|ev| ev.block == Vec3i::new(1, 0, 0)
                && ev.pos == Vec3i::new(0, 0, 0)
                && ev.value == 11)
    );
    assert!(buf.interior_light().iter().all(|&b| b == 0));
}

#[test]
fn opaque_halo_swallows_the_spill() {
    let reg = reg();
    let stone = reg.id_by_name("stone").unwrap();
    let xp = BlockBuf::filled(S, 0, stone);
    let center = BlockBuf::new(S);
    let mut neighbors: [Option<&BlockBuf>; Face::COUNT] = [None; Face::COUNT];
    neighbors[Face::PosX.index()] = Some(&xp);
    let mut buf = PaddedBuf::build(&center, &neighbors, 1, 0, AIR).unwrap();
    let out = propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(15, 8, 8, 15)])
        .unwrap();
    assert!(
        out.add_spills
            .iter()
            .all(|ev| ev.block != Vec3i::new(1, 0, 0))
    );
}

#[test]
fn channels_are_independent() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    let mut p = propagator();
    p.process_block(
        &reg,
        Vec3i::ZERO,
        &mut buf,
        &[
            add_seed(4, 0, 0, 12),
            LightSeed {
                channel: LightChannel::Natural,
                value: 15,
                pos: Vec3i::new(4, 0, 0),
            },
        ],
    )
    .unwrap();
    assert_eq!(art(&buf, 6, 0, 0), 10);
    assert_eq!(nat(&buf, 6, 0, 0), 13);
    // Removing the artificial source leaves the natural field untouched.
    let natural_before: Vec<u8> = buf
        .interior_light()
        .iter()
        .map(|&b| codec::natural(b))
        .collect();
    p.process_block(&reg, Vec3i::ZERO, &mut buf, &[rem_seed(4, 0, 0)])
        .unwrap();
    let natural_after: Vec<u8> = buf
        .interior_light()
        .iter()
        .map(|&b| codec::natural(b))
        .collect();
    assert_eq!(natural_before, natural_after);
    assert_eq!(art(&buf, 6, 0, 0), 0);
}

#[test]
fn process_block_is_deterministic() {
    let reg = reg();
    let stone = reg.id_by_name("stone").unwrap();
    let mut center = BlockBuf::new(S);
    center.set_type_at(3, 1, 0, stone);
    center.set_type_at(7, 0, 2, stone);
    let seeds = [
        add_seed(0, 0, 0, 15),
        add_seed(12, 3, 9, 11),
        LightSeed {
            channel: LightChannel::Natural,
            value: 14,
            pos: Vec3i::new(8, 8, 8),
        },
        rem_seed(12, 3, 9),
    ];
    let mut buf_a = padded(&center);
    let out_a = propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf_a, &seeds)
        .unwrap();
    let mut buf_b = padded(&center);
    let out_b = propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf_b, &seeds)
        .unwrap();
    assert_eq!(buf_a, buf_b);
    assert_eq!(out_a.add_spills, out_b.add_spills);
    assert_eq!(out_a.remove_spills, out_b.remove_spills);
}

#[test]
fn seed_outside_block_is_rejected() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(S));
    let err = propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(16, 0, 0, 5)])
        .unwrap_err();
    assert!(matches!(err, LightError::InvalidPosition(_)));
}

#[test]
fn mismatched_buffer_geometry_is_an_invariant_violation() {
    let reg = reg();
    let mut buf = padded(&BlockBuf::new(8));
    let err = propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[])
        .unwrap_err();
    assert!(matches!(err, LightError::InternalInvariant(_)));
}

#[test]
fn unknown_type_in_the_flood_path_is_fatal() {
    let reg = reg();
    let mut center = BlockBuf::new(S);
    center.set_type_at(1, 0, 0, 200);
    let mut buf = padded(&center);
    let err = propagator()
        .process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(0, 0, 0, 9)])
        .unwrap_err();
    assert!(matches!(err, LightError::UnknownVoxelType(200)));
}

fn seed_strategy() -> impl Strategy<Value = Vec<(u8, u8, u8, u8)>> {
    proptest::collection::vec(
        (0u8..S as u8, 0u8..S as u8, 0u8..S as u8, 1u8..=15),
        1..6,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lipschitz_holds_after_random_seeds(seeds in seed_strategy()) {
        let reg = reg();
        let mut buf = padded(&BlockBuf::new(S));
        let batch: Vec<LightSeed> = seeds
            .iter()
            .map(|&(x, y, z, v)| add_seed(x as i32, y as i32, z as i32, v))
            .collect();
        propagator()
            .process_block(&reg, Vec3i::ZERO, &mut buf, &batch)
            .unwrap();
        let s = S as i32;
        for z in 0..s {
            for y in 0..s {
                for x in 0..s {
                    let here = art(&buf, x, y, z) as i16;
                    if x + 1 < s {
                        prop_assert!((here - art(&buf, x + 1, y, z) as i16).abs() <= 1);
                    }
                    if y + 1 < s {
                        prop_assert!((here - art(&buf, x, y + 1, z) as i16).abs() <= 1);
                    }
                    if z + 1 < s {
                        prop_assert!((here - art(&buf, x, y, z + 1) as i16).abs() <= 1);
                    }
                }
            }
        }
    }

    #[test]
    fn opaque_voxels_stay_dark_wherever_they_sit(
        stones in proptest::collection::hash_set(
            (0u8..S as u8, 0u8..S as u8, 0u8..S as u8),
            1..48,
        ),
        seeds in seed_strategy(),
    ) {
        let reg = reg();
        let stone = reg.id_by_name("stone").unwrap();
        let mut center = BlockBuf::new(S);
        for &(x, y, z) in &stones {
            center.set_type_at(x as usize, y as usize, z as usize, stone);
        }
        let mut buf = padded(&center);
        // Emitters only go into open voxels, on both channels.
        let batch: Vec<LightSeed> = seeds
            .iter()
            .filter(|(x, y, z, _)| !stones.contains(&(*x, *y, *z)))
            .flat_map(|&(x, y, z, v)| {
                let pos = Vec3i::new(x as i32, y as i32, z as i32);
                [
                    LightSeed {
                        channel: LightChannel::Artificial,
                        value: v,
                        pos,
                    },
                    LightSeed {
                        channel: LightChannel::Natural,
                        value: v,
                        pos,
                    },
                ]
            })
            .collect();
        propagator()
            .process_block(&reg, Vec3i::ZERO, &mut buf, &batch)
            .unwrap();
        for &(x, y, z) in &stones {
            prop_assert_eq!(art(&buf, x as i32, y as i32, z as i32), 0);
            prop_assert_eq!(nat(&buf, x as i32, y as i32, z as i32), 0);
        }
    }

    #[test]
    fn monotone_in_the_emitter_value(x in 0u8..S as u8, y in 0u8..S as u8, z in 0u8..S as u8, v in 1u8..15) {
        let reg = reg();
        let mut dim = padded(&BlockBuf::new(S));
        propagator()
            .process_block(&reg, Vec3i::ZERO, &mut dim, &[add_seed(x as i32, y as i32, z as i32, v)])
            .unwrap();
        let mut bright = padded(&BlockBuf::new(S));
        propagator()
            .process_block(&reg, Vec3i::ZERO, &mut bright, &[add_seed(x as i32, y as i32, z as i32, v + 1)])
            .unwrap();
        for (d, b) in dim.interior_light().iter().zip(bright.interior_light().iter()) {
            prop_assert!(codec::artificial(*b) >= codec::artificial(*d));
        }
    }

    #[test]
    fn single_source_add_then_remove_is_reversible(x in 0u8..S as u8, y in 0u8..S as u8, z in 0u8..S as u8, v in 1u8..=15) {
        let reg = reg();
        let mut buf = padded(&BlockBuf::new(S));
        let mut p = propagator();
        p.process_block(&reg, Vec3i::ZERO, &mut buf, &[add_seed(x as i32, y as i32, z as i32, v)])
            .unwrap();
        p.process_block(&reg, Vec3i::ZERO, &mut buf, &[rem_seed(x as i32, y as i32, z as i32)])
            .unwrap();
        prop_assert!(buf.interior_light().iter().all(|&b| b == 0));
    }
}
