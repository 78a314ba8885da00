//! Scene Arranger CLI: import a scene document, optionally place assets and
//! normalize it, then export the result.
//!
//! ```text
//! sa scene.json --assets ./assets --place chair.glb --clamp -o out.json
//! ```

mod assets;

use anyhow::{Context, Result};
use assets::DirAssetSource;
use clap::Parser;
use sa_editor::{EditMutation, EditorConfig, SyncEngine};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sa")]
#[command(about = "Scene Arranger — import, normalize and export scene documents")]
struct Cli {
    /// Scene document to import. An empty scene when omitted.
    input: Option<PathBuf>,

    /// Directory holding `<reference>.json` asset descriptions
    #[arg(short, long, default_value = ".")]
    assets: PathBuf,

    /// Editor configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output path. Stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the placement-volume size
    #[arg(long)]
    volume: Option<f32>,

    /// Place these assets after import
    #[arg(long, value_name = "REFERENCE")]
    place: Vec<String>,

    /// Pull every top-level node back inside the volume
    #[arg(long)]
    clamp: bool,

    /// Rest every top-level node on the floor
    #[arg(long)]
    drop: bool,
}

async fn load_config(path: Option<&PathBuf>) -> Result<EditorConfig> {
    let Some(path) = path else {
        return Ok(EditorConfig::default());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    EditorConfig::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref()).await?;
    let source = DirAssetSource::new(&cli.assets);

    let mut engine = match &cli.input {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            SyncEngine::from_text(config, source, &text)
                .await
                .with_context(|| format!("importing {}", path.display()))?
        }
        None => SyncEngine::new(config, source),
    };
    if let Some(size) = cli.volume {
        engine.apply_mutation(EditMutation::SetVolumeSize { size })?;
    }

    for reference in &cli.place {
        let id = engine
            .place_asset(reference)
            .await
            .with_context(|| format!("placing {reference}"))?;
        log::info!("placed {reference} as {id}");
    }

    if cli.drop || cli.clamp {
        let top: Vec<_> = engine
            .graph
            .children(engine.graph.root)
            .iter()
            .map(|&idx| engine.graph.graph[idx].id)
            .collect();
        for id in top {
            if cli.drop {
                engine.apply_mutation(EditMutation::DropToFloor { id })?;
            } else {
                // committed transforms are clamped by the engine
                let transform = engine.transform_of(id).context("node vanished")?;
                engine.apply_mutation(EditMutation::SetTransform { id, transform })?;
            }
        }
    }

    let text = engine.current_text()?.to_string();
    match &cli.output {
        Some(path) => tokio::fs::write(path, text)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}
