//! Command-line configuration for page-tiles.
//!
//! This module provides the CLI definition for the `page-tiles` binary:
//! - Subcommands via clap derive
//! - Environment variables with the `PAGE_TILES_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Subcommands
//!
//! - `plan` - Print the breadth-first traversal of one page's tile hierarchy
//! - `simulate` - Scroll through a synthetic document and report cache statistics
//! - `render` - Render one tile with the test-pattern renderer and write a JPEG
//!
//! # Environment Variables
//!
//! - `PAGE_TILES_LEVELS` - Hierarchy depth (default: 4)
//! - `PAGE_TILES_BASE` - Branching factor per axis (default: 2)
//! - `PAGE_TILES_PAGES` - Pages in the simulated document (default: 20)
//! - `PAGE_TILES_MAX_TILES` - Cache capacity in tiles (default: 128)
//! - `PAGE_TILES_TILE_SIZE` - Tile edge in pixels at scale 1 (default: 256)
//! - `PAGE_TILES_LATENCY_MS` - Simulated render latency (default: 0)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::DEFAULT_MAX_TILE_COUNT;
use crate::tile::{Rect, MAX_HIERARCHY_NODES};

// =============================================================================
// Default Values
// =============================================================================

/// Default hierarchy depth.
pub const DEFAULT_LEVELS: u32 = 4;

/// Default branching factor.
pub const DEFAULT_BASE: u32 = 2;

/// Default number of pages in a simulated document.
pub const DEFAULT_PAGES: u32 = 20;

/// Default number of simulated scroll steps.
pub const DEFAULT_STEPS: u32 = 100;

/// Default tile edge in pixels at scale 1.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default simulated zoom (1.0 shows a whole page).
pub const DEFAULT_ZOOM: f64 = 3.0;

/// Default JPEG quality for `render`.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

// =============================================================================
// CLI Arguments
// =============================================================================

/// page-tiles - Hierarchical page tiling with a bounded priority tile cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "page-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the tiles a breadth-first traversal visits.
    Plan(PlanConfig),

    /// Scroll through a synthetic document and report cache statistics.
    Simulate(SimulateConfig),

    /// Render a single tile as JPEG.
    Render(RenderConfig),
}

/// Hierarchy shape shared by every subcommand.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct HierarchyArgs {
    /// Number of levels, including the whole-page level 0.
    #[arg(long, default_value_t = DEFAULT_LEVELS, env = "PAGE_TILES_LEVELS")]
    pub levels: u32,

    /// Tiles per axis each level splits a tile into.
    #[arg(long, default_value_t = DEFAULT_BASE, env = "PAGE_TILES_BASE")]
    pub base: u32,
}

impl HierarchyArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.levels == 0 {
            return Err("levels must be at least 1".to_string());
        }
        if self.base < 2 {
            return Err("base must be at least 2".to_string());
        }
        let nodes = (0..self.levels).try_fold(0u64, |total, level| {
            let per_axis = u64::from(self.base).checked_pow(level)?;
            total.checked_add(per_axis.checked_mul(per_axis)?)
        });
        match nodes {
            Some(n) if n <= MAX_HIERARCHY_NODES as u64 => Ok(()),
            _ => Err(format!(
                "a hierarchy with {} levels and base {} exceeds {} tiles",
                self.levels, self.base, MAX_HIERARCHY_NODES
            )),
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

/// Output format for the plan subcommand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PlanOutputFormat {
    /// One tile per line
    #[default]
    Text,
    /// JSON array of tiles with their regions
    Json,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct PlanConfig {
    #[command(flatten)]
    pub hierarchy: HierarchyArgs,

    /// Only report tiles at or below this level.
    #[arg(long, default_value_t = 0)]
    pub min_level: u32,

    /// Do not descend past this level.
    #[arg(long)]
    pub max_level: Option<u32>,

    /// Only descend into tiles overlapping this region, given as `x,y,w,h`.
    #[arg(long, value_parser = parse_rect)]
    pub cull: Option<Rect>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = PlanOutputFormat::Text)]
    pub format: PlanOutputFormat,
}

impl PlanConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.hierarchy.validate()?;
        if let Some(max_level) = self.max_level {
            if max_level < self.min_level {
                return Err("max_level must not be below min_level".to_string());
            }
        }
        Ok(())
    }
}

// =============================================================================
// Simulate
// =============================================================================

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SimulateConfig {
    #[command(flatten)]
    pub hierarchy: HierarchyArgs,

    /// Pages in the simulated document.
    #[arg(long, default_value_t = DEFAULT_PAGES, env = "PAGE_TILES_PAGES")]
    pub pages: u32,

    /// Cache capacity in tiles, counting the tile being rendered.
    #[arg(long, default_value_t = DEFAULT_MAX_TILE_COUNT, env = "PAGE_TILES_MAX_TILES")]
    pub max_tiles: usize,

    /// Scroll steps from the first to the last page.
    #[arg(long, default_value_t = DEFAULT_STEPS)]
    pub steps: u32,

    /// Zoom factor (1.0 shows a whole page).
    #[arg(long, default_value_t = DEFAULT_ZOOM)]
    pub zoom: f64,

    /// Tile edge in pixels at scale 1.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "PAGE_TILES_TILE_SIZE")]
    pub tile_size: u32,

    /// Simulated render latency in milliseconds.
    #[arg(long, default_value_t = 0, env = "PAGE_TILES_LATENCY_MS")]
    pub latency_ms: u64,

    /// Make every render on this page fail.
    #[arg(long)]
    pub fail_page: Option<u32>,
}

impl SimulateConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.hierarchy.validate()?;
        if self.pages == 0 {
            return Err("pages must be greater than 0".to_string());
        }
        if self.steps == 0 {
            return Err("steps must be greater than 0".to_string());
        }
        if self.max_tiles < 2 {
            return Err("max_tiles must be at least 2".to_string());
        }
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err("zoom must be a positive number".to_string());
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Render
// =============================================================================

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RenderConfig {
    #[command(flatten)]
    pub hierarchy: HierarchyArgs,

    /// Page number.
    #[arg(long, default_value_t = 0)]
    pub page: u32,

    /// Tile level.
    #[arg(long, default_value_t = 0)]
    pub level: u32,

    /// Tile row at that level.
    #[arg(long, default_value_t = 0)]
    pub row: u32,

    /// Tile column at that level.
    #[arg(long, default_value_t = 0)]
    pub col: u32,

    /// Render scale.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// Tile edge in pixels at scale 1.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "PAGE_TILES_TILE_SIZE")]
    pub tile_size: u32,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    pub quality: u8,

    /// Output file.
    #[arg(short, long)]
    pub output: PathBuf,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.hierarchy.validate()?;
        if self.level >= self.hierarchy.levels {
            return Err(format!(
                "level {} does not exist in a hierarchy of {} levels",
                self.level, self.hierarchy.levels
            ));
        }
        if self.quality == 0 || self.quality > 100 {
            return Err("quality must be between 1 and 100".to_string());
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Parse a rectangle given as `x,y,w,h`.
pub fn parse_rect(value: &str) -> Result<Rect, String> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid number '{}': {}", part.trim(), e))
        })
        .collect::<Result<_, _>>()?;

    match parts.as_slice() {
        [x, y, w, h] if *w >= 0.0 && *h >= 0.0 => Ok(Rect::new(*x, *y, *w, *h)),
        [_, _, _, _] => Err("width and height must not be negative".to_string()),
        _ => Err(format!(
            "expected 4 comma-separated numbers (x,y,w,h), got {}",
            parts.len()
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================
