use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use image::imageops::flip_vertical_in_place;
use lumiere_config::LumiereConfig;
use lumiere_renderer::device::HeadlessStats;
use lumiere_renderer::{
    HeadlessDevice, Image, ImageSpec, ShaderProgram, StreamStats, TextureStream, Value,
};
use lumiere_scheduler::{TaskScheduler, WorkerPool};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::bindings::apply_shader_settings;
use crate::cli::{StreamArgs, UniformsArgs};
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads `explicit` when given, otherwise the file in the config directory
/// if there is one.
pub fn load_config(explicit: Option<&Path>) -> Result<LumiereConfig> {
    if let Some(path) = explicit {
        return LumiereConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()));
    }

    let paths = AppPaths::discover()?;
    let path = paths.config_file();
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no configuration file; using defaults");
        return Ok(LumiereConfig::default());
    }
    tracing::debug!(path = %path.display(), "loading configuration");
    LumiereConfig::load(&path)
        .with_context(|| format!("failed to load configuration {}", path.display()))
}

#[derive(Debug, Serialize)]
struct UniformReport {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    slot: String,
    values: Vec<Value>,
}

pub fn run_uniforms(config: &LumiereConfig, args: UniformsArgs) -> Result<()> {
    let mut gpu = HeadlessDevice::new();
    let mut program = ShaderProgram::new(&mut gpu).context("failed to create shader program")?;
    apply_shader_settings(&mut program, &mut gpu, &config.shader, args.fill)?;

    let compiled = program
        .set_source_from_file(&mut gpu, &args.file, args.stage)
        .with_context(|| format!("failed to load {}", args.file.display()))?;
    if !compiled {
        bail!(
            "{} failed to compile as a {} shader",
            args.file.display(),
            args.stage
        );
    }

    let mut active = program
        .activate(&mut gpu)
        .ok_or_else(|| anyhow!("shader program failed to link"))?;
    let uploads = active.push_uniforms();
    drop(active);
    tracing::info!(
        file = %args.file.display(),
        stage = %args.stage,
        fill = %program.fill(),
        uploads,
        "shader linked"
    );

    let reports: Vec<UniformReport> = program
        .uniforms()
        .iter()
        .map(|(name, entry)| UniformReport {
            name: name.to_owned(),
            ty: entry.ty().to_string(),
            slot: entry.slot().to_string(),
            values: entry.values().to_vec(),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let values: Vec<String> = report.values.iter().map(ToString::to_string).collect();
            println!(
                "{:<28} {:<11} {:<12} [{}]",
                report.name,
                report.ty,
                report.slot,
                values.join(", ")
            );
        }
    }

    program.destroy(&mut gpu);
    Ok(())
}

#[derive(Debug, Serialize)]
struct StreamReport {
    frames: u32,
    width: u32,
    height: u32,
    workers: usize,
    stream: StreamStats,
    device: HeadlessStats,
}

pub fn run_stream(config: &LumiereConfig, args: StreamArgs) -> Result<()> {
    let pool = match args.workers.or(config.workers.threads) {
        Some(threads) => WorkerPool::new(threads),
        None => WorkerPool::with_default_threads(),
    }
    .context("failed to start worker pool")?;
    let workers = pool.threads();
    let scheduler: Arc<dyn TaskScheduler> = Arc::new(pool);

    let image = match &args.image {
        Some(path) => load_image(path)?,
        None => gradient_image(args.size.0, args.size.1)?,
    };
    let spec = image.spec();

    let mut gpu = HeadlessDevice::new();
    let mut stream = TextureStream::new(&mut gpu, scheduler)
        .context("failed to create texture stream")?
        .with_copy_chunks(config.texture.copy_chunks)
        .with_filtering(config.texture.filtering && !args.no_filtering);
    stream.attach_source(image.clone());

    let mut program = ShaderProgram::new(&mut gpu).context("failed to create shader program")?;
    apply_shader_settings(&mut program, &mut gpu, &config.shader, None)?;

    for frame in 0..args.frames {
        if frame > 0 {
            advance(&image, frame);
        }
        stream.update(&mut gpu);
        if let Some(mut active) = program.activate(&mut gpu) {
            active.bind_stream(&stream, 0, "_tex0");
            active.push_uniforms();
        }
        stream.flush_pending_copy(&mut gpu);
    }

    let report = StreamReport {
        frames: args.frames,
        width: spec.width,
        height: spec.height,
        workers,
        stream: stream.stats(),
        device: gpu.stats(),
    };
    tracing::info!(
        frames = report.frames,
        reallocations = report.stream.reallocations,
        content_updates = report.stream.content_updates,
        "stream finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Streamed {} frame(s) of {}", report.frames, spec);
        println!("  workers:            {}", report.workers);
        println!("  reallocations:      {}", report.stream.reallocations);
        println!("  content updates:    {}", report.stream.content_updates);
        println!("  background copies:  {}", report.stream.background_copies);
        println!("  skipped frames:     {}", report.stream.skipped_frames);
        println!("  buffer maps:        {}", report.device.maps);
    }

    stream.destroy(&mut gpu);
    program.destroy(&mut gpu);
    Ok(())
}

fn load_image(path: &Path) -> Result<Image> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to open image at {}", path.display()))?;
    let mut rgba = decoded.to_rgba8();
    flip_vertical_in_place(&mut rgba);
    let (width, height) = rgba.dimensions();
    Image::new(ImageSpec::rgba8(width, height), rgba.into_raw())
        .with_context(|| format!("unexpected pixel data in {}", path.display()))
}

fn gradient_image(width: u32, height: u32) -> Result<Image> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                0,
                255,
            ]);
        }
    }
    Image::new(ImageSpec::rgba8(width, height), pixels).context("failed to build gradient")
}

/// Shifts the blue channel so every frame differs.
fn advance(image: &Image, frame: u32) {
    let step = (frame % 16) as u8 * 16;
    image.modify(|current| {
        for pixel in current.pixels_mut().chunks_exact_mut(4) {
            pixel[2] = step;
        }
    });
}
