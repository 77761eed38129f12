//! page-tiles - Tile hierarchy planner and tile cache simulator.
//!
//! This binary exposes the library through three subcommands: `plan`,
//! `simulate` and `render`.

use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use page_tiles::{
    config::{Cli, Command, PlanConfig, PlanOutputFormat, RenderConfig, SimulateConfig},
    run_simulation, PageTileIndex, PatternRenderer, Rect, TileHierarchy, TileIndex,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Plan(config) => run_plan(config),
        Command::Simulate(config) => run_simulate(config).await,
        Command::Render(config) => run_render(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "page_tiles=debug"
    } else {
        "page_tiles=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Plan Command
// =============================================================================

#[derive(Serialize)]
struct PlannedTile {
    level: u32,
    row: u32,
    col: u32,
    region: Rect,
}

fn run_plan(config: PlanConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let hierarchy = match TileHierarchy::new(config.hierarchy.levels, config.hierarchy.base) {
        Ok(hierarchy) => hierarchy,
        Err(e) => {
            error!("Failed to build hierarchy: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tiles: Vec<PlannedTile> = hierarchy
        .breadth_first(config.min_level, config.max_level, config.cull.as_ref())
        .into_iter()
        .map(|index| PlannedTile {
            level: index.level(),
            row: index.row(),
            col: index.col(),
            region: index.page_region(),
        })
        .collect();

    info!(
        levels = hierarchy.levels(),
        base = hierarchy.base(),
        nodes = hierarchy.len(),
        visited = tiles.len(),
        "Planned traversal"
    );

    match config.format {
        PlanOutputFormat::Text => {
            for tile in &tiles {
                let r = &tile.region;
                println!(
                    "L{} {},{}  [{:.4}, {:.4}, {:.4}, {:.4}]",
                    tile.level, tile.row, tile.col, r.x, r.y, r.width, r.height
                );
            }
            ExitCode::SUCCESS
        }
        PlanOutputFormat::Json => print_json(&tiles),
    }
}

// =============================================================================
// Simulate Command
// =============================================================================

async fn run_simulate(config: SimulateConfig) -> ExitCode {
    match run_simulation(&config).await {
        Ok(report) => {
            if report.leaked_images > 0 {
                error!(leaked = report.leaked_images, "Rendered tiles were never released");
                return ExitCode::FAILURE;
            }
            print_json(&report)
        }
        Err(e) => {
            error!("Simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Render Command
// =============================================================================

async fn run_render(config: RenderConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let tile = match TileIndex::new(config.row, config.col, config.level, config.hierarchy.base) {
        Ok(tile) => tile,
        Err(e) => {
            error!("Invalid tile: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let index = PageTileIndex::new(config.page, tile);

    let renderer = PatternRenderer::new(config.tile_size);
    let jpeg = match renderer
        .rasterize(&index, config.scale)
        .and_then(|raster| raster.to_jpeg(config.quality))
    {
        Ok(jpeg) => jpeg,
        Err(e) => {
            error!("Failed to render {}: {}", index, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::fs::write(&config.output, &jpeg).await {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        tile = %index,
        bytes = jpeg.len(),
        "Wrote {}",
        config.output.display()
    );
    ExitCode::SUCCESS
}
