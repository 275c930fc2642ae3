use anyhow::{Context, Result, bail};
use chrono::Duration;
use quadrant_watch::{ActivityPipeline, FrameBuffer, PipelineConfig, load_config};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: quadrant_tester <frames_dir> [config.json]");
        return Ok(());
    }
    let frames_dir = PathBuf::from(&args[1]);
    let config = match args.get(2) {
        Some(path) => load_config(Path::new(path))
            .with_context(|| format!("loading config from {path}"))?,
        None => PipelineConfig::default(),
    };

    // --- 2. Frame Discovery ---
    // One sub-directory per region, frames in file-name order.
    let regions = discover_regions(&frames_dir)?;
    if regions.is_empty() {
        bail!("no region directories with PNG frames under {}", frames_dir.display());
    }
    let ticks = regions.iter().map(|(_, frames)| frames.len()).max().unwrap_or(0);
    info!(regions = regions.len(), ticks, "frames discovered");

    // --- 3. Pipeline Initialization ---
    let start = chrono::Local::now().naive_local();
    let pipeline = ActivityPipeline::starting_at(config, start);

    // --- 4. Main Processing Loop ---
    // Every region's n-th frame is submitted together, one second of synthetic
    // time apart.
    for tick in 0..ticks {
        let timestamp = start + Duration::seconds(tick as i64);
        let mut batch = Vec::with_capacity(regions.len());
        for (region, frames) in &regions {
            let Some(path) = frames.get(tick) else {
                continue;
            };
            let image = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
            batch.push((region.clone(), FrameBuffer::from_dynamic_image(&image)?));
        }

        for (region, result) in pipeline.submit_batch(batch, timestamp).await {
            match result {
                Ok(result) if result.has_activity => {
                    info!(%region, tick, change_percent = result.change_percent, "activity")
                }
                Ok(_) => {}
                Err(e) => warn!(%region, tick, error = %e, "frame rejected"),
            }
        }
    }

    pipeline.flush().await?;
    let report = pipeline.get_report();
    let timeline = pipeline.timeline();
    pipeline.shutdown().await?;

    // --- 5. Summary ---
    let summary = &report.summary;
    println!("Report {}", report.id);
    println!("  window:              {} .. {}", report.report_start, report.report_end);
    println!("  regions:             {}", summary.total_quadrants);
    println!("  comparisons:         {}", summary.total_comparisons);
    println!("  activities:          {}", summary.total_activities);
    println!("  avg activity rate:   {:.2}%", summary.average_activity_rate);
    println!(
        "  most active region:  {}",
        summary.most_active_region.as_deref().unwrap_or("-")
    );
    println!("  efficiency:          {:.2}", summary.monitoring_efficiency);
    if pipeline.dropped_events() > 0 {
        println!("  dropped events:      {}", pipeline.dropped_events());
    }

    for entry in &report.entries {
        println!(
            "  {:<12} rate {:>6.2}%  avg change {:>6.2}%  points {}",
            entry.region,
            entry.activity_rate(),
            entry.stats.avg_change_on_activity(),
            entry.detection_points.len()
        );
    }

    // --- 6. Timeline ---
    println!();
    println!("Timeline ({} min buckets)", timeline.interval_minutes);
    print!("{:<12}", "");
    for series in &timeline.series {
        print!("{:>10}", series.region);
    }
    println!();
    for (i, label) in timeline.labels.iter().enumerate() {
        print!("{label:<12}");
        for series in &timeline.series {
            print!("{:>10.2}", series.samples[i].value);
        }
        println!();
    }

    Ok(())
}

fn discover_regions(frames_dir: &Path) -> Result<Vec<(String, Vec<PathBuf>)>> {
    let mut regions = Vec::new();
    let entries = std::fs::read_dir(frames_dir)
        .with_context(|| format!("reading {}", frames_dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(region) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        let mut frames: Vec<PathBuf> = std::fs::read_dir(&path)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .collect();
        frames.sort();

        if frames.is_empty() {
            warn!(%region, "region directory has no PNG frames");
            continue;
        }
        regions.push((region, frames));
    }

    regions.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(regions)
}
