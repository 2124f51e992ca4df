use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::pipeline::{
    DEFAULT_CROP_PADDING, DEFAULT_DETECTION_SCALE, DEFAULT_SIMILARITY_THRESHOLD,
};
use rollcall_core::{
    cosine_similarity, probe_detector, DetectorConfig, EmbeddingInput, Frame, FrameMatcher,
    FramePipeline, IdentityRecord, OnnxEmbedder, PipelineOptions, RosterCache, ScrfdDetector,
    SeetaDetector,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall offline face matching tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two embedding files (JSON array or index-keyed object)
    Compare {
        a: PathBuf,
        b: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
        threshold: f32,
    },
    /// Match every face in an image against a roster file
    Match {
        /// Roster JSON: `{sectionId, identities}` or a bare identity list
        #[arg(short, long)]
        roster: PathBuf,
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
        threshold: f32,
        #[arg(long, default_value_t = DEFAULT_DETECTION_SCALE)]
        detection_scale: f32,
        #[arg(long, default_value_t = DEFAULT_CROP_PADDING)]
        crop_padding: f32,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Report which detector and embedder backends load
    Probe {
        #[command(flatten)]
        models: ModelArgs,
    },
}

#[derive(Args)]
struct ModelArgs {
    #[arg(long, default_value = "models")]
    model_dir: PathBuf,
    #[arg(long)]
    scrfd_model: Option<PathBuf>,
    #[arg(long)]
    seeta_model: Option<PathBuf>,
    #[arg(long)]
    embedder_model: Option<PathBuf>,
    #[arg(long, default_value_t = 160)]
    input_size: u32,
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl ModelArgs {
    fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            scrfd_model: self
                .scrfd_model
                .clone()
                .unwrap_or_else(|| self.model_dir.join("det_10g.onnx")),
            seeta_model: self
                .seeta_model
                .clone()
                .unwrap_or_else(|| self.model_dir.join("seeta_fd_frontal_v1.0.bin")),
            intra_threads: self.threads,
        }
    }

    fn embedder_path(&self) -> PathBuf {
        self.embedder_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join("facenet.onnx"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterFile {
    Section {
        #[serde(rename = "sectionId", alias = "section_id")]
        section_id: String,
        #[serde(alias = "students")]
        identities: Vec<IdentityRecord>,
    },
    List(Vec<IdentityRecord>),
}

impl RosterFile {
    fn into_parts(self, fallback_id: &str) -> (String, Vec<IdentityRecord>) {
        match self {
            Self::Section { section_id, identities } => (section_id, identities),
            Self::List(identities) => (fallback_id.to_string(), identities),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compare { a, b, threshold } => {
            let a = read_json::<EmbeddingInput>(&a)?.into_values();
            let b = read_json::<EmbeddingInput>(&b)?.into_values();
            let similarity = cosine_similarity(&a, &b)?;
            let result = serde_json::json!({
                "similarity": similarity,
                "threshold": threshold,
                "match": similarity >= threshold,
                "confidence": similarity * 100.0,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Match {
            roster,
            image,
            threshold,
            detection_scale,
            crop_padding,
            models,
        } => {
            if !(detection_scale > 0.0 && detection_scale <= 1.0) {
                bail!("--detection-scale must be within (0, 1]");
            }

            let (section_id, records) = read_json::<RosterFile>(&roster)?.into_parts("offline");
            let cache = RosterCache::new();
            let loaded = cache.load_session(section_id, records);
            if loaded == 0 {
                bail!("roster {} has no usable identities", roster.display());
            }

            let bytes = std::fs::read(&image)
                .with_context(|| format!("cannot read {}", image.display()))?;
            let frame = Frame::decode(&bytes)?;

            let detector = probe_detector(&models.detector_config())?;
            let embedder =
                OnnxEmbedder::load(&models.embedder_path(), models.input_size, models.threads)?;
            let pipeline = FramePipeline::new(
                detector,
                Box::new(embedder),
                PipelineOptions {
                    detection_scale,
                    crop_padding,
                },
            );
            let mut matcher = FrameMatcher::new(pipeline, threshold);

            let result = matcher.process_frame(&frame, &cache.snapshot())?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Probe { models } => {
            let config = models.detector_config();
            report(
                "scrfd",
                &config.scrfd_model,
                ScrfdDetector::load(&config.scrfd_model, models.threads),
            );
            report("seeta", &config.seeta_model, SeetaDetector::load(&config.seeta_model));
            let embedder_path = models.embedder_path();
            report(
                "embedder",
                &embedder_path,
                OnnxEmbedder::load(&embedder_path, models.input_size, models.threads),
            );
        }
    }

    Ok(())
}

fn report<T, E: std::fmt::Display>(name: &str, path: &Path, outcome: Result<T, E>) {
    match outcome {
        Ok(_) => println!("{name:<9} ok        {}", path.display()),
        Err(e) => println!("{name:<9} missing   {e}"),
    }
}
