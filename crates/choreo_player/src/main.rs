// SPDX-License-Identifier: MIT OR Apache-2.0
//! Headless storyboard player.
//!
//! Loads a RON storyboard, builds a timeline over in-memory targets and runs
//! the storyboard's script against it, logging timeline and target state
//! after every command.
//!
//! ```text
//! choreo_player demos/storyboard.ron
//! RUST_LOG=choreo_timeline=debug choreo_player demos/storyboard.ron
//! ```

mod library;
mod storyboard;

use choreo_timeline::{ConfigurationError, EngineError};
use library::EffectLibrary;
use std::path::Path;
use std::process::ExitCode;
use storyboard::Storyboard;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Errors that stop the player
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Storyboard file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Storyboard text is not valid RON
    #[error("Failed to parse storyboard: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// A block names a target the storyboard does not declare
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// A block names a category with no effect bank
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// See [`ConfigurationError`]
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// See [`EngineError`]
    #[error(transparent)]
    Engine(#[from] EngineError),
}

async fn play(path: &Path) -> Result<(), PlayerError> {
    let board = Storyboard::load(path)?;
    let library = EffectLibrary::standard()?;
    info!(categories = ?library.categories().collect::<Vec<_>>(), "Effect library ready");
    let stage = board.build(&library)?;
    stage.run(&board.script).await?;
    info!(timeline = %stage.timeline.name(), "Script finished");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,choreo_player=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        error!("Usage: choreo_player <storyboard.ron>");
        return ExitCode::FAILURE;
    };

    match play(Path::new(&path)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Playback failed");
            ExitCode::FAILURE
        }
    }
}
