//! Storyreel CLI
//!
//! Headless front end for the storyboard pipeline: draft and render a full
//! storyboard, regenerate titles, compose motion prompts, and manage the
//! stored provider credential. Progress and diagnostics go to stderr; stdout
//! carries only results, so `--json` output pipes cleanly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use storyreel_core::credentials::{CredentialCipher, CredentialResolver};
use storyreel_core::gateway::{GeminiClient, StoryGateway};
use storyreel_core::history::{HistoryKind, HistoryLedger};
use storyreel_core::settings::{default_data_dir, AppSettings, SettingsManager};
use storyreel_core::store::{JsonFileStore, SharedStateStore};
use storyreel_core::storyboard::{
    JobEvent, JobStatus, Orchestrator, RenderSettings, RenderState, StoryJob, StoryRequest,
};
use storyreel_core::types::{AspectRatio, ImageData, ImageResolution, ModelTier};
use storyreel_core::CoreError;

#[derive(Parser)]
#[command(
    name = "storyreel",
    version,
    about = "Draft AI storyboards, titles, and music prompts from the command line"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory for settings, stored state, and logs
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Draft a storyboard for a topic and render every scene
    Generate {
        /// Topic or premise of the story
        topic: String,

        /// Number of scenes, 1 to 20
        #[arg(short = 'n', long)]
        scenes: Option<u32>,

        /// Reference image blended into drafting and every render
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,

        /// Image model tier (standard, pro)
        #[arg(long)]
        tier: Option<ModelTier>,

        /// Aspect ratio (16:9, 9:16, 1:1, 4:3, 3:4)
        #[arg(long)]
        aspect: Option<AspectRatio>,

        /// Output resolution for the pro tier (1k, 2k, 4k)
        #[arg(long)]
        resolution: Option<ImageResolution>,

        /// Export rendered scenes into this directory
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Print the finished job as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Draft ten bilingual title suggestions for a topic
    Titles {
        topic: String,

        #[arg(long)]
        json: bool,
    },

    /// Compose an image-to-video motion prompt from a shot description
    Prompt {
        /// Scene or shot description
        text: String,

        /// Reference image to analyze alongside the description
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Manage the stored provider credential
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Inspect or clear the generation history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },

    /// Inspect or create the settings file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Validate a key against the provider and store it encrypted
    Set { key: String },
    /// Show whether a credential resolves and whether it was validated
    Status,
    /// Remove the stored key
    Clear,
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// List recent generations, newest first
    List {
        /// Show at most this many entries
        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },
    /// Delete all history entries
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the active settings
    Show,
    /// Write a settings file with the current values
    Init,
}

/// Wired-up application services shared by every subcommand.
struct App {
    settings: AppSettings,
    resolver: Arc<CredentialResolver>,
    gateway: Arc<StoryGateway>,
    history: Arc<HistoryLedger>,
}

impl App {
    fn build(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsManager::new(data_dir).load();
        let store: SharedStateStore = Arc::new(JsonFileStore::new(data_dir));
        let cipher = Arc::new(CredentialCipher::new(data_dir)?);
        let resolver = Arc::new(CredentialResolver::new(store.clone(), cipher));
        let client = Arc::new(GeminiClient::with_config(
            settings.base_url.clone(),
            settings.request_timeout_sec,
        )?);
        let gateway = Arc::new(StoryGateway::new(client, resolver.clone()));
        let history = Arc::new(HistoryLedger::new(store));

        Ok(Self {
            settings,
            resolver,
            gateway,
            history,
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.gateway.clone(),
            self.resolver.clone(),
            self.history.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    storyreel_core::init_tracing(&data_dir.join("logs"));

    let result = run(cli, &data_dir).await;
    if let Err(error) = &result {
        if matches!(
            error.downcast_ref::<CoreError>(),
            Some(CoreError::CredentialMissing)
        ) {
            eprintln!("No API credential is configured.");
            eprintln!("Store one with `storyreel key set <KEY>` or export GEMINI_API_KEY.");
        }
    }
    result
}

async fn run(cli: Cli, data_dir: &Path) -> Result<()> {
    let app = App::build(data_dir)?;
    match cli.command {
        Commands::Generate {
            topic,
            scenes,
            image,
            tier,
            aspect,
            resolution,
            out,
            json,
        } => {
            cmd_generate(
                &app, topic, scenes, image, tier, aspect, resolution, out, json,
            )
            .await
        }
        Commands::Titles { topic, json } => cmd_titles(&app, &topic, json).await,
        Commands::Prompt { text, image, json } => cmd_prompt(&app, &text, image, json).await,
        Commands::Key { command } => match command {
            KeyCommands::Set { key } => cmd_key_set(&app, &key).await,
            KeyCommands::Status => cmd_key_status(&app).await,
            KeyCommands::Clear => cmd_key_clear(&app),
        },
        Commands::History { command } => match command {
            HistoryCommands::List { limit, json } => cmd_history_list(&app, limit, json),
            HistoryCommands::Clear => cmd_history_clear(&app),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => cmd_config_show(&app, data_dir),
            ConfigCommands::Init => cmd_config_init(data_dir),
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_generate(
    app: &App,
    topic: String,
    scenes: Option<u32>,
    image: Option<PathBuf>,
    tier: Option<ModelTier>,
    aspect: Option<AspectRatio>,
    resolution: Option<ImageResolution>,
    out: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let render = RenderSettings {
        model_tier: tier.unwrap_or(app.settings.model_tier),
        aspect_ratio: aspect.unwrap_or(app.settings.aspect_ratio),
        resolution: resolution.unwrap_or(app.settings.resolution),
    };
    let mut request = StoryRequest::new(topic)
        .with_scene_count(scenes.unwrap_or(app.settings.scene_count))
        .with_render(render);
    if let Some(path) = image {
        request = request.with_reference_image(load_reference_image(&path)?);
    }

    let orchestrator = app.orchestrator();
    let mut events = orchestrator.subscribe();
    let show_progress = !json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if show_progress {
                print_progress(&event);
            }
        }
    });

    let outcome = orchestrator.generate(request).await;
    let mut exported = Vec::new();
    if outcome.is_ok() {
        if let Some(dir) = &out {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            exported = orchestrator.export_scenes(dir).await?;
        }
    }

    // Dropping the orchestrator closes the event channel and ends the printer.
    drop(orchestrator);
    let _ = printer.await;

    let job = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job_summary(&job, &exported);
    }
    Ok(())
}

async fn cmd_titles(app: &App, topic: &str, json: bool) -> Result<()> {
    let titles = app.gateway.draft_titles(topic).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&titles)?);
        return Ok(());
    }
    for (index, title) in titles.iter().enumerate() {
        println!("{:2}. {}", index + 1, title.primary);
        println!("    {}", title.localized);
    }
    Ok(())
}

async fn cmd_prompt(app: &App, text: &str, image: Option<PathBuf>, json: bool) -> Result<()> {
    let reference = image.map(|path| load_reference_image(&path)).transpose()?;
    let prompt = app
        .gateway
        .compose_motion_prompt(text, reference.as_ref())
        .await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prompt)?);
        return Ok(());
    }
    println!("{}", prompt.english);
    println!();
    println!("{}", prompt.korean);
    Ok(())
}

async fn cmd_key_set(app: &App, key: &str) -> Result<()> {
    let message = app.resolver.activate(key, app.gateway.as_ref()).await?;
    println!("{message}");
    Ok(())
}

async fn cmd_key_status(app: &App) -> Result<()> {
    match app.resolver.resolve().await {
        Some(credential) => {
            println!("Credential: {}", credential.redacted());
            if app.resolver.is_active().await {
                println!("Validated against the provider.");
            } else {
                println!("Not yet validated; run `storyreel key set <KEY>` to check it.");
            }
        }
        None => {
            println!("No credential configured.");
            println!("Store one with `storyreel key set <KEY>` or export GEMINI_API_KEY.");
        }
    }
    Ok(())
}

fn cmd_key_clear(app: &App) -> Result<()> {
    app.resolver.clear()?;
    println!("Stored credential removed.");
    Ok(())
}

fn cmd_history_list(app: &App, limit: Option<usize>, json: bool) -> Result<()> {
    let entries = match limit {
        Some(count) => app.history.recent(count),
        None => app.history.list(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("History is empty.");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{}  {:5}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            kind_label(entry.kind),
            ellipsize(&entry.source_prompt, 64),
        );
    }
    Ok(())
}

fn cmd_history_clear(app: &App) -> Result<()> {
    app.history.clear()?;
    println!("History cleared.");
    Ok(())
}

fn cmd_config_show(app: &App, data_dir: &Path) -> Result<()> {
    let manager = SettingsManager::new(data_dir);
    println!("Data directory: {}", data_dir.display());
    println!("Settings file:  {}", manager.settings_path().display());
    println!("{}", serde_json::to_string_pretty(&app.settings)?);
    Ok(())
}

fn cmd_config_init(data_dir: &Path) -> Result<()> {
    let manager = SettingsManager::new(data_dir);
    let saved = manager.save(&manager.load())?;
    println!("Wrote {}", manager.settings_path().display());
    println!("{}", serde_json::to_string_pretty(&saved)?);
    Ok(())
}

/// Reads a reference image from disk, inferring the MIME type from the
/// file extension. Unknown extensions fall back to JPEG, which the
/// provider accepts for all common photo formats.
fn load_reference_image(path: &Path) -> Result<ImageData> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    let mime = match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    };
    Ok(ImageData::from_bytes(mime, &bytes))
}

fn print_progress(event: &JobEvent) {
    match event {
        JobEvent::StatusChanged { status } => match status {
            JobStatus::DraftingStructure => info!("Drafting story structure"),
            JobStatus::RenderingScenes => info!("Rendering scenes"),
            JobStatus::Failed { error } => warn!("Job failed: {error}"),
            JobStatus::Idle | JobStatus::Complete => {}
        },
        JobEvent::StructureReady {
            scene_count,
            title_count,
        } => {
            info!("Structure ready: {scene_count} scenes, {title_count} titles");
        }
        JobEvent::SceneUpdated {
            scene_number,
            state,
            ..
        } => match state {
            RenderState::Ready => info!("Scene {scene_number} rendered"),
            RenderState::Failed => warn!("Scene {scene_number} failed"),
            RenderState::Pending | RenderState::Rendering => {}
        },
        JobEvent::Settled { ready, failed } => {
            info!("Done: {ready} rendered, {failed} failed");
        }
        JobEvent::CredentialRequired => {}
    }
}

fn print_job_summary(job: &StoryJob, exported: &[PathBuf]) {
    println!("Storyboard: {}", job.topic);
    println!();
    for scene in &job.scenes {
        println!(
            "Scene {:2}  {:9}  {}",
            scene.scene_number,
            state_label(scene.render_state),
            ellipsize(&scene.narrative, 64),
        );
        if let Some(error) = &scene.render_error {
            println!("          {error}");
        }
    }
    if !job.titles.is_empty() {
        println!();
        println!("Titles:");
        for (index, title) in job.titles.iter().enumerate() {
            println!("{:2}. {} / {}", index + 1, title.primary, title.localized);
        }
    }
    if let Some(music) = &job.music_prompt {
        println!();
        println!("Music prompt: {}", ellipsize(music, 72));
    }
    if job.lyrics.is_some() {
        println!("Lyrics drafted in both languages; use --json to see the full text.");
    }
    if !exported.is_empty() {
        println!();
        println!("Exported {} scenes:", exported.len());
        for path in exported {
            println!("  {}", path.display());
        }
    }
}

fn state_label(state: RenderState) -> &'static str {
    match state {
        RenderState::Pending => "pending",
        RenderState::Rendering => "rendering",
        RenderState::Ready => "ready",
        RenderState::Failed => "failed",
    }
}

fn kind_label(kind: HistoryKind) -> &'static str {
    match kind {
        HistoryKind::Image => "image",
        HistoryKind::Video => "video",
    }
}

fn ellipsize(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        flattened
    } else {
        let cut: String = flattened.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
