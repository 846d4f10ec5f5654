use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use east_detect::{
    overlay::{draw_boxes, GREEN},
    DetectionOptions, EastDetector, EastDetectorBuilder, InputLayout, TextBox,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Detect text regions in images with an EAST model.
#[derive(Parser)]
#[command(name = "east-detect", version, about, long_about = None)]
struct Cli {
    /// Images to process
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Path to the ONNX detection model
    #[arg(long, env = "EAST_MODEL", default_value = "models/east_text_detection.onnx")]
    model: PathBuf,

    /// Name of the model's image input
    #[arg(long, default_value = "input_images")]
    input_name: String,

    #[arg(long, value_enum, default_value_t = Layout::Nhwc)]
    input_layout: Layout,

    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// GPU device index for the CUDA, TensorRT or DirectML provider
    #[arg(long)]
    gpu: Option<u32>,

    /// Directory for TensorRT engine caches
    #[arg(long)]
    engine_cache: Option<PathBuf>,

    /// Longest image side fed to the network
    #[arg(long, default_value_t = 2400)]
    max_side_len: u32,

    #[arg(long, default_value_t = 0.8)]
    score_map_threshold: f32,

    #[arg(long, default_value_t = 0.1)]
    box_threshold: f32,

    #[arg(long, default_value_t = 0.2)]
    nms_threshold: f32,

    /// Drop boxes with a side shorter than this many pixels
    #[arg(long, default_value_t = 5.0)]
    min_edge: f32,

    /// Fraction of the box width added on each side
    #[arg(long, default_value_t = 0.0)]
    padding_horizontal: f32,

    /// Fraction of the box height added on each side
    #[arg(long, default_value_t = 0.0)]
    padding_vertical: f32,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Write images with the detected boxes drawn on them into this directory
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum Layout {
    Nhwc,
    Nchw,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Serialize)]
struct Report<'a> {
    image: &'a Path,
    boxes: &'a [TextBox],
    net_ms: f64,
    restore_ms: f64,
    nms_ms: f64,
    total_ms: f64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let layout = match cli.input_layout {
        Layout::Nhwc => InputLayout::Nhwc,
        Layout::Nchw => InputLayout::Nchw,
    };
    let mut builder = EastDetectorBuilder::new()
        .model(&cli.model)
        .input_name(&cli.input_name)
        .input_layout(layout)
        .threads(cli.threads)
        .gpu_index(cli.gpu)
        .max_side_len(cli.max_side_len);
    if let Some(cache) = &cli.engine_cache {
        std::fs::create_dir_all(cache)
            .with_context(|| format!("Failed to create {}", cache.display()))?;
        builder = builder.with_engine_cache_path(cache);
    }
    let detector = builder
        .build()
        .with_context(|| format!("Failed to load model {}", cli.model.display()))?;

    let options = DetectionOptions {
        max_side_len: cli.max_side_len,
        score_map_threshold: cli.score_map_threshold,
        box_threshold: cli.box_threshold,
        nms_threshold: cli.nms_threshold,
        min_edge: cli.min_edge,
        padding_horizontal: cli.padding_horizontal,
        padding_vertical: cli.padding_vertical,
    };

    if let Some(dir) = &cli.preview {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    for path in &cli.images {
        process(&detector, path, options, &cli)?;
    }
    Ok(())
}

fn process(
    detector: &EastDetector,
    path: &Path,
    options: DetectionOptions,
    cli: &Cli,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let (image, detection) = detector
        .detect_file(path, options)
        .with_context(|| format!("Detection failed for {}", path.display()))?;
    let total = start.elapsed();
    info!("{}: {} boxes in {total:?}", path.display(), detection.boxes.len());

    let ms = |d: std::time::Duration| d.as_secs_f64() * 1000.0;
    match cli.format {
        Format::Text => {
            println!(
                "{}: net {:.0}ms, restore {:.0}ms, nms {:.0}ms, total {:.0}ms",
                path.display(),
                ms(detection.timings.net),
                ms(detection.timings.restore),
                ms(detection.timings.nms),
                ms(total),
            );
            for text_box in &detection.boxes {
                let points = text_box
                    .quad
                    .points()
                    .iter()
                    .map(|[x, y]| format!("{x},{y}"))
                    .collect::<Vec<_>>()
                    .join(",");
                println!("{points},{:.4}", text_box.score);
            }
        }
        Format::Json => {
            let report = Report {
                image: path,
                boxes: &detection.boxes,
                net_ms: ms(detection.timings.net),
                restore_ms: ms(detection.timings.restore),
                nms_ms: ms(detection.timings.nms),
                total_ms: ms(total),
            };
            println!("{}", serde_json::to_string(&report)?);
        }
    }

    if let Some(dir) = &cli.preview {
        let canvas = draw_boxes(&image, &detection.boxes, GREEN, 2);
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".into());
        let out = dir.join(format!("{name}_boxes.png"));
        canvas
            .save(&out)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        info!("Wrote preview to {}", out.display());
    }
    Ok(())
}
