//! CLI commands for mosaico

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mosaico_common::MosaicoConfig;
use mosaico_extract::{partition_layer, run_build, run_index, IndexBuildSummary, PartitionReport};
use mosaico_geometry::BoundingBox;
use mosaico_serve::{ElevationResolver, ElevationSource, QueryOptions, TileCache, VectorQueryService};

#[derive(Parser)]
#[command(name = "mosaico")]
#[command(about = "Partition, index and serve geospatial tile datasets", long_about = None)]
pub struct Cli {
    /// Dataset and service configuration
    #[arg(short, long, global = true, default_value = "mosaico.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Cut one layer's source into tiles (run `index` afterwards)
    Partition {
        /// Layer name as declared in the config
        layer: String,
    },

    /// Rebuild the master index from the tile store
    Index,

    /// Partition every sourced layer, then rebuild the index
    Build,

    /// Start the HTTP tile service
    Serve {
        /// Listen address, overrides `serve.bind`
        #[arg(long)]
        bind: Option<String>,
    },

    /// Query vector layers within a bounding box
    Query {
        /// Bounding box as `north,south,east,west`
        #[arg(long, allow_hyphen_values = true)]
        bbox: String,

        /// Comma separated layer names
        #[arg(long, value_delimiter = ',')]
        layers: Vec<String>,

        /// Drop features repeated across tiles
        #[arg(long)]
        dedupe: bool,

        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Look up elevations
    Elevation {
        /// Coordinates as `lat,lon`, repeatable
        #[arg(long = "point", required = true, allow_hyphen_values = true)]
        points: Vec<String>,

        /// Print samples as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_numbers<const N: usize>(s: &str, what: &str) -> Result<[f64; N]> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != N {
        bail!("{what} must have {N} comma separated numbers, got '{s}'");
    }
    let mut out = [0.0; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid number '{part}' in {what}"))?;
    }
    Ok(out)
}

/// Parse `north,south,east,west`.
pub fn parse_bbox(s: &str) -> Result<BoundingBox> {
    let [north, south, east, west] = parse_numbers::<4>(s, "bbox")?;
    Ok(BoundingBox::region(north, south, east, west)?)
}

/// Parse `lat,lon`.
pub fn parse_point(s: &str) -> Result<(f64, f64)> {
    let [lat, lon] = parse_numbers::<2>(s, "point")?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        bail!("point '{s}' is outside lat [-90, 90] / lon [-180, 180]");
    }
    Ok((lat, lon))
}

fn print_report(report: &PartitionReport) {
    println!(
        "  ✓ {}/{}: {} tiles, {:.1} KB",
        report.category,
        report.layer,
        report.tiles_written,
        report.bytes_written as f64 / 1024.0
    );
    if report.features_read > 0 {
        println!(
            "    {} features read, {} assigned ({} tile assignments), {} skipped",
            report.features_read, report.features_assigned, report.assignments, report.skipped
        );
    }
    for sample in &report.skip_samples {
        println!("    skipped: {sample}");
    }
}

fn print_index_summary(summary: &IndexBuildSummary) {
    println!(
        "  ✓ {} layers, {} tiles, {} features",
        summary.layers, summary.tiles_indexed, summary.features_indexed
    );
    if summary.tiles_skipped > 0 {
        println!("  ⚠ {} unreadable tiles left out", summary.tiles_skipped);
    }
    for layer in &summary.missing_layers {
        println!("  ⚠ no tiles on disk for layer '{layer}'");
    }
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = MosaicoConfig::load(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;

        match self.command {
            Commands::Partition { layer } => {
                println!("Partitioning layer '{layer}'...");
                let start = Instant::now();
                let report = partition_layer(&config.dataset, &layer)?;
                print_report(&report);
                println!("Done in {:.2}s; run `mosaico index` to publish", start.elapsed().as_secs_f64());
                Ok(())
            }
            Commands::Index => {
                println!("Indexing {}...", config.dataset.store.display());
                let start = Instant::now();
                let (_, summary) = run_index(&config.dataset)?;
                print_index_summary(&summary);
                println!("Done in {:.2}s", start.elapsed().as_secs_f64());
                Ok(())
            }
            Commands::Build => {
                println!("Building {}...", config.dataset.store.display());
                let start = Instant::now();
                let summary = run_build(&config.dataset)?;
                for report in &summary.reports {
                    print_report(report);
                }
                for layer in &summary.unsourced {
                    println!("  - {layer}: no source, existing tiles kept");
                }
                for failure in &summary.failures {
                    println!("  ✗ {}: {}", failure.layer, failure.error);
                }
                println!("\nIndex:");
                print_index_summary(&summary.index);
                println!("\nTotal time: {:.2}s", start.elapsed().as_secs_f64());
                if !summary.failures.is_empty() {
                    bail!("{} layer(s) failed to partition", summary.failures.len());
                }
                Ok(())
            }
            Commands::Serve { bind } => {
                let mut config = config;
                if let Some(bind) = bind {
                    config.serve.bind = bind;
                }
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(mosaico_serve::serve(&config))
                    .context("tile service failed")?;
                Ok(())
            }
            Commands::Query {
                bbox,
                layers,
                dedupe,
                output,
            } => {
                let bbox = parse_bbox(&bbox)?;
                if layers.is_empty() {
                    bail!("--layers needs at least one layer name");
                }
                let cache = TileCache::open(&config.dataset.store)?;
                let known = cache.index().layer_names();
                for name in &layers {
                    if let Err(e) = cache.index().layer(name) {
                        println!("  ⚠ {e} (known: {})", known.join(", "));
                    }
                }

                let start = Instant::now();
                let service = VectorQueryService::new(Arc::new(cache));
                let result = service.query(&bbox, &layers, QueryOptions { dedupe_by_id: dedupe });
                for (name, collection) in &result.layers {
                    println!("  {name}: {} features", collection.len());
                }
                for skipped in &result.skipped_tiles {
                    println!("  ⚠ skipped {}/{}: {}", skipped.layer, skipped.tile_id, skipped.error);
                }
                println!(
                    "{} features from {} tiles in {:.1}ms",
                    result.features_total,
                    result.tiles_loaded,
                    start.elapsed().as_secs_f64() * 1000.0
                );
                if let Some(path) = output {
                    let json = serde_json::to_vec_pretty(&result)?;
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Saved to {}", path.display());
                }
                Ok(())
            }
            Commands::Elevation { points, json } => {
                let points = points
                    .iter()
                    .map(|p| parse_point(p))
                    .collect::<Result<Vec<_>>>()?;
                let cache = Arc::new(TileCache::open(&config.dataset.store)?);
                let resolver = ElevationResolver::new(Arc::clone(&cache), &config.serve.elevation_layer)
                    .with_sampling(config.serve.sampling);

                let mut scope = cache.scope();
                let samples: Vec<_> = points
                    .iter()
                    .map(|&(lat, lon)| resolver.sample(&mut scope, lat, lon))
                    .collect();
                scope.release();

                if json {
                    println!("{}", serde_json::to_string_pretty(&samples)?);
                } else {
                    for ((lat, lon), sample) in points.iter().zip(&samples) {
                        let source = match &sample.source {
                            ElevationSource::Raster { tile_id } => format!("tile {tile_id}"),
                            ElevationSource::Fallback { reason } => {
                                format!("estimated, {reason}")
                            }
                        };
                        println!("{lat:.6},{lon:.6}: {:.1} m ({source})", sample.value);
                    }
                }
                Ok(())
            }
        }
    }
}
