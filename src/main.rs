//! Headless soak driver: floods a grid of emitters through the terrain
//! coordinator and reports per-tick statistics.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lumen_blocks::BlockRegistry;
use lumen_geom::Vec3i;
use lumen_light::codec;
use lumen_terrain::{DEFAULT_BLOCK_SIZE_POW2, Terrain};

#[derive(Parser, Debug)]
#[command(
    name = "lumen",
    version,
    about = "Voxel light propagation soak",
    propagate_version = true
)]
struct Cli {
    /// Log to a file; optional path (defaults to lumen.log if omitted)
    #[arg(long, num_args = 0..=1, value_name = "PATH", default_missing_value = "lumen.log")]
    log_file: Option<String>,

    /// Block registry TOML (falls back to the built-in set)
    #[arg(long, value_name = "PATH")]
    blocks: Option<PathBuf>,

    /// Light worker threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Block edge length as a power of two (3..=5)
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE_POW2)]
    block_size_pow2: u32,

    /// Emitters per axis of the soak grid
    #[arg(long, default_value_t = 4)]
    grid: i32,

    /// Voxel spacing between emitters
    #[arg(long, default_value_t = 9)]
    spacing: i32,

    /// Print a y=0 cross-section of the final light field
    #[arg(long, default_value_t = true)]
    dump: bool,
}

fn init_logging(log_file: Option<String>) {
    if let Some(path) = log_file {
        let level = match std::env::var("RUST_LOG")
            .ok()
            .unwrap_or_else(|| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => simplelog::LevelFilter::Trace,
            "debug" => simplelog::LevelFilter::Debug,
            "warn" => simplelog::LevelFilter::Warn,
            "error" => simplelog::LevelFilter::Error,
            _ => simplelog::LevelFilter::Info,
        };
        let config = simplelog::ConfigBuilder::new()
            .set_target_level(simplelog::LevelFilter::Info)
            .build();
        match std::fs::File::create(&path) {
            Ok(file) => {
                let _ = simplelog::WriteLogger::init(level, config, file);
                eprintln!("Logging to file: {} (level: {:?})", path, level);
            }
            Err(e) => {
                eprintln!(
                    "Failed to open log file {}: {}. Falling back to stderr.",
                    path, e
                );
                env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                    .init();
            }
        }
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_file.clone());

    let reg = match &cli.blocks {
        Some(path) => match BlockRegistry::from_path(path) {
            Ok(reg) => reg,
            Err(e) => {
                log::error!("failed to load block registry from {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => BlockRegistry::builtin(),
    };
    let stone = reg.id_by_name("stone");

    let mut terrain = match Terrain::new(Arc::new(reg), cli.threads, cli.block_size_pow2) {
        Ok(t) => t,
        Err(e) => {
            log::error!("terrain setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let extent = cli.grid * cli.spacing;
    if let Err(e) = run_soak(&mut terrain, &cli, stone) {
        log::error!("soak aborted: {}", e);
        std::process::exit(1);
    }

    if cli.dump {
        dump_cross_section(&terrain, extent);
    }
}

fn run_soak(
    terrain: &mut Terrain,
    cli: &Cli,
    stone: Option<lumen_blocks::BlockId>,
) -> Result<(), lumen_light::LightError> {
    let extent = cli.grid * cli.spacing;

    // A wall through the middle of the field shows occlusion in the dump.
    if let Some(stone) = stone {
        let wall_x = extent / 2;
        for z in 0..extent {
            for y in 0..4 {
                terrain.set_voxel_type(Vec3i::new(wall_x, y, z), stone)?;
            }
        }
    }

    // Deterministic emitter grid: artificial on even rows, natural on odd.
    for gx in 0..cli.grid {
        for gz in 0..cli.grid {
            let pos = Vec3i::new(gx * cli.spacing, 0, gz * cli.spacing);
            let value = 8 + ((gx + gz) % 8) as u8;
            if gz % 2 == 0 {
                terrain.set_voxel_artificial(pos, value)?;
            } else {
                terrain.set_voxel_natural(pos, value)?;
            }
        }
    }
    let stats = terrain.tick()?;
    log::info!(
        "placed {} emitters: rounds={} jobs={} updated={} spills={} send_ms={} recv_ms={} total_ms={}",
        cli.grid * cli.grid,
        stats.rounds,
        stats.jobs_issued,
        stats.blocks_updated,
        stats.spill_seeds,
        stats.time_send_ms,
        stats.time_receive_ms,
        stats.time_total_ms
    );

    // Remove every other emitter and settle again.
    let mut removed = 0;
    for gx in 0..cli.grid {
        for gz in 0..cli.grid {
            if (gx + gz) % 2 != 0 {
                continue;
            }
            let pos = Vec3i::new(gx * cli.spacing, 0, gz * cli.spacing);
            if gz % 2 == 0 {
                terrain.set_voxel_artificial(pos, 0)?;
            } else {
                terrain.set_voxel_natural(pos, 0)?;
            }
            removed += 1;
        }
    }
    let stats = terrain.tick()?;
    log::info!(
        "removed {} emitters: rounds={} jobs={} updated={} spills={} total_ms={}",
        removed,
        stats.rounds,
        stats.jobs_issued,
        stats.blocks_updated,
        stats.spill_seeds,
        stats.time_total_ms
    );

    let remeshed = terrain.drain_mesh_dirty();
    log::info!("{} blocks need remeshing after the soak", remeshed.len());
    for bpos in remeshed {
        terrain.mark_block_meshed(bpos);
    }
    Ok(())
}

fn dump_cross_section(terrain: &Terrain, extent: i32) {
    println!("final light, y=0 plane ({}x{}):", extent, extent);
    for z in 0..extent {
        let row: String = (0..extent)
            .map(|x| {
                let v = codec::final_light(terrain.get_light_byte(Vec3i::new(x, 0, z)));
                char::from_digit(u32::from(v), 16).unwrap_or('?')
            })
            .collect();
        println!("{row}");
    }
}
