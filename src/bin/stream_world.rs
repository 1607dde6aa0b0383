//! Streaming driver: flies a viewpoint across generated terrain and reports
//! what the scheduler did.
//!
//! Usage: cargo run --release --bin stream_world -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>   World configuration JSON (default: built-in defaults)
//!   --seed <SEED>     Terrain seed (overrides the config)
//!   --radius <R>      Load radius in chunks; unload radius is R + 2
//!   --ticks <N>       Ticks to run (default: 600)
//!   --speed <V>       Viewpoint speed in voxels per tick (default: 2.0)
//!   --save <DIR>      Persist edits under DIR
//!   --materials <PATH> Material table JSON layered over the built-ins
//!   --dig             Carve a shaft below the start position before flying

use std::path::PathBuf;
use std::time::{Duration, Instant};

use glam::{IVec3, Vec3};
use serde_json::json;

use voxelworld::core::logging;
use voxelworld::edit::EditOp;
use voxelworld::render::RecordingSink;
use voxelworld::{Result, VoxelWorld, WorldConfig};

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => WorldConfig::load(&path)?,
        None => WorldConfig::default(),
    };
    if let Some(seed) = parse_u32_arg(&args, "--seed") {
        config.terrain.seed = seed;
    }
    if let Some(radius) = parse_f32_arg(&args, "--radius") {
        config.streaming.load_radius = radius;
        config.streaming.unload_radius = radius + 2.0;
    }
    if let Some(path) = parse_str_arg(&args, "--materials") {
        config.materials_path = Some(PathBuf::from(path));
    }
    if let Some(dir) = parse_str_arg(&args, "--save") {
        config.persistence.save_dir = Some(PathBuf::from(dir));
    }
    let ticks = parse_usize_arg(&args, "--ticks").unwrap_or(600);
    let speed = parse_f32_arg(&args, "--speed").unwrap_or(2.0);
    let dig = args.iter().any(|a| a == "--dig");

    println!("=== Voxelworld Streaming ===");
    println!("Seed:   {}", config.terrain.seed);
    println!("Chunk:  {} voxels", config.chunk_size);
    println!("Radius: load {}, unload {}", config.streaming.load_radius, config.streaming.unload_radius);
    println!("Budget: {} generate / {} mesh per tick",
        config.streaming.max_generate_per_tick, config.streaming.max_mesh_per_tick);
    println!("Ticks:  {} at {} voxels/tick", ticks, speed);
    println!();

    let mut world = VoxelWorld::from_config(config)?;
    let mut sink = RecordingSink::new();
    let start_pos = Vec3::new(0.0, 24.0, 0.0);

    let start = Instant::now();
    world.run_until_idle(start_pos, &mut sink, Duration::from_secs(120))?;
    println!("Initial load: {} chunks meshed in {:.2}s",
        sink.len(), start.elapsed().as_secs_f64());

    if dig {
        let column = start_pos.floor().as_ivec3();
        let mut removed = 0;
        for y in (column.y - 32..column.y).rev() {
            match world.apply_edit(IVec3::new(column.x, y, column.z), EditOp::Remove) {
                Ok(outcome) if outcome.is_applied() => removed += 1,
                Ok(_) => {}
                Err(e) => log::warn!("Dig stopped at y={}: {}", y, e),
            }
        }
        println!("Dug {} voxels below the start position", removed);
    }

    let start = Instant::now();
    let direction = Vec3::new(1.0, 0.0, 0.35).normalize();
    for tick in 0..ticks {
        let viewpoint = start_pos + direction * speed * tick as f32;
        let stats = world.tick(viewpoint, &mut sink)?;

        if tick % 100 == 0 {
            eprintln!("  [{}/{}] {} resident, {} meshed, {} queued, {} in flight",
                tick, ticks, stats.resident_chunks, stats.meshed_chunks,
                stats.queued_generate + stats.queued_mesh, stats.in_flight);
        }
    }
    let elapsed = start.elapsed();

    let stats = world.stats();
    println!();
    println!("Flight: {} ticks in {:.2}s ({:.0} ticks/sec)",
        ticks, elapsed.as_secs_f64(), ticks as f64 / elapsed.as_secs_f64());

    let summary = json!({
        "ticks": stats.ticks,
        "generated": stats.generated,
        "meshed": stats.meshed,
        "evicted": stats.evicted,
        "stale_meshes": stats.stale_meshes,
        "cancelled_jobs": stats.cancelled_jobs,
        "dropped_requests": stats.dropped_requests,
        "generation_failures": stats.generation_failures,
        "resident_chunks": stats.resident_chunks,
        "live_meshes": sink.len(),
        "live_triangles": sink.triangle_count(),
        "live_mesh_bytes": sink.memory_size(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let compacted = world.compact_edits()?;
    if compacted > 0 {
        println!("Compacted edit log: {} records removed", compacted);
    }
    world.shutdown(&mut sink);
    Ok(())
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
