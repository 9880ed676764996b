use anyhow::Context;
use clap::{Parser, Subcommand};
use facekit_core::config::Config;
use facekit_core::threshold::find_threshold;
use facekit_core::{DistanceMetric, FaceKit, ImageInput, ImageSource, ModelName, PairInput};
use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "facekit")]
#[command(about = "Face verification and attribute analysis", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file to use instead of the system and user files
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether two face images show the same person
    Verify {
        /// First image (path or data:image/...;base64 URI)
        img1: Option<String>,
        /// Second image
        img2: Option<String>,
        /// JSON file holding a list of [img1, img2] pairs
        #[arg(long, conflicts_with_all = ["img1", "img2"])]
        pairs: Option<PathBuf>,
        /// Recognition model (VGG-Face, OpenFace, Facenet, DeepFace)
        #[arg(short, long)]
        model: Option<String>,
        /// Distance metric (cosine, euclidean, euclidean_l2)
        #[arg(long)]
        metric: Option<String>,
    },
    /// Estimate emotion, age, gender and race of the face in each image
    Analyze {
        /// One image for a single result, several for a keyed batch
        #[arg(required = true)]
        images: Vec<String>,
        /// Comma separated actions; defaults to the configured set
        #[arg(short, long, value_delimiter = ',')]
        actions: Vec<String>,
    },
    /// Detect the face in an image and save the crop
    Detect {
        /// Image (path or data:image/...;base64 URI)
        image: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Report emotion, age and gender for every face in each frame
    Stream {
        #[arg(required = true)]
        images: Vec<String>,
        /// Directory to write frames with face boxes drawn in
        #[arg(long)]
        annotate: Option<PathBuf>,
        /// Show timing per frame
        #[arg(short, long)]
        timing: bool,
    },
    /// Print the verification threshold for a model and metric
    Threshold {
        #[arg(short, long)]
        model: String,
        #[arg(long, default_value = "cosine")]
        metric: String,
    },
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config_path = cli.config;
    match cli.command {
        Commands::Verify {
            img1,
            img2,
            pairs,
            model,
            metric,
        } => cmd_verify(config_path.as_deref(), img1, img2, pairs, model, metric),
        Commands::Analyze { images, actions } => cmd_analyze(config_path.as_deref(), images, actions),
        Commands::Detect { image, output } => cmd_detect(config_path.as_deref(), image, output),
        Commands::Stream {
            images,
            annotate,
            timing,
        } => cmd_stream(config_path.as_deref(), images, annotate, timing),
        Commands::Threshold { model, metric } => cmd_threshold(model, metric),
        Commands::Config { validate } => cmd_config(config_path.as_deref(), validate),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load()?,
    };
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_pairs(path: &Path) -> anyhow::Result<PairInput> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pairs file {}", path.display()))?;
    let entries: Vec<Vec<String>> = serde_json::from_str(&contents)
        .with_context(|| format!("{} must hold a JSON list of image pairs", path.display()))?;

    let pairs = entries
        .iter()
        .map(|entry| entry.iter().map(|img| ImageSource::classify(img)).collect())
        .collect();
    Ok(PairInput::Bulk(pairs))
}

fn cmd_verify(
    config_path: Option<&Path>,
    img1: Option<String>,
    img2: Option<String>,
    pairs: Option<PathBuf>,
    model: Option<String>,
    metric: Option<String>,
) -> anyhow::Result<()> {
    let input = match (pairs, img1, img2) {
        (Some(path), _, _) => read_pairs(&path)?,
        (None, Some(first), Some(second)) => {
            PairInput::Single(ImageSource::classify(&first), ImageSource::classify(&second))
        }
        _ => anyhow::bail!("Provide two images or --pairs <file>"),
    };

    let config = load_config(config_path)?;
    let model = model.unwrap_or_else(|| config.verification.model.to_string());
    let metric = metric.unwrap_or_else(|| config.verification.metric.to_string());

    let mut kit = FaceKit::new(config)?;
    let output = kit.verify(&input, &model, &metric)?;
    print_json(&output)
}

fn cmd_analyze(config_path: Option<&Path>, images: Vec<String>, actions: Vec<String>) -> anyhow::Result<()> {
    let mut sources: Vec<ImageSource> = images.iter().map(|img| ImageSource::classify(img)).collect();
    let input = if sources.len() == 1 {
        ImageInput::Single(sources.remove(0))
    } else {
        ImageInput::Bulk(sources)
    };

    let config = load_config(config_path)?;
    let mut kit = FaceKit::new(config)?;

    let actions: Vec<&str> = actions.iter().map(String::as_str).collect();
    let output = kit.analyze(&input, &actions)?;
    print_json(&output)
}

fn cmd_detect(config_path: Option<&Path>, image: String, output: PathBuf) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mut kit = FaceKit::new(config)?;

    let source = ImageSource::classify(&image);
    let face = match kit.detect_face(&source) {
        Ok(face) => face,
        Err(e) if e.is_face_not_detected() => {
            anyhow::bail!("No face found in {} (set detection.enforce = false to keep the whole frame)", source.describe())
        }
        Err(e) => return Err(e.into()),
    };

    face.save(&output)?;
    println!("✓ Face saved: {}", output.display());
    println!("Resolution: {}x{}", face.width(), face.height());

    Ok(())
}

fn cmd_stream(
    config_path: Option<&Path>,
    images: Vec<String>,
    annotate: Option<PathBuf>,
    show_timing: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mut kit = FaceKit::new(config)?;

    if let Some(dir) = &annotate {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    for (index, img) in images.iter().enumerate() {
        let source = ImageSource::classify(img);

        let start = Instant::now();
        let mut frames = kit.analyze_faces(std::slice::from_ref(&source))?;
        let duration = start.elapsed();
        let reports = frames.pop().unwrap_or_default();

        println!("# {} ({} faces)", source.describe(), reports.len());
        print_json(&reports)?;
        if show_timing {
            println!("Total: {:.2}ms", duration.as_secs_f64() * 1000.0);
        }

        if let Some(dir) = &annotate {
            let mut frame = source.load()?;
            for report in &reports {
                let rect = Rect::at(report.bbox_x as i32, report.bbox_y as i32)
                    .of_size(report.bbox_w.max(1), report.bbox_h.max(1));
                draw_hollow_rect_mut(&mut frame, rect, Rgb([0, 255, 0]));
            }
            let out = dir.join(format!("frame_{}.jpg", index + 1));
            frame.save(&out)?;
            log::info!("Annotated frame saved to: {}", out.display());
        }
    }

    Ok(())
}

fn cmd_threshold(model: String, metric: String) -> anyhow::Result<()> {
    let model: ModelName = model.parse()?;
    let metric: DistanceMetric = metric.parse()?;
    let threshold = find_threshold(model, metric)?;
    println!("{} / {}: {}", model, metric, threshold);
    Ok(())
}

fn cmd_config(config_path: Option<&Path>, validate: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[verification]");
    println!("  model = {}", config.verification.model);
    println!("  metric = {}", config.verification.metric);
    println!();

    println!("[analysis]");
    let actions: Vec<_> = config.analysis.actions.iter().map(|a| a.as_str()).collect();
    println!("  actions = {:?}", actions);
    println!();

    println!("[detection]");
    println!("  model = {:?}", config.detection.model_path);
    println!(
        "  confidence_threshold = {}",
        config.detection.confidence_threshold
    );
    println!("  enforce = {}", config.detection.enforce);
    println!();

    println!("[models]");
    for model in ModelName::ALL {
        println!("  {} = {:?}", model, config.models.embedding(model));
    }
    for action in facekit_core::attributes::Action::ALL {
        println!("  {} = {:?}", action, config.models.attribute(action));
    }
    println!();

    println!("[runtime]");
    match config.runtime.intra_threads {
        Some(threads) => println!("  intra_threads = {}", threads),
        None => println!("  intra_threads = (runtime default)"),
    }

    Ok(())
}
