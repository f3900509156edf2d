//! Subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod models;
pub mod process;

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use cvx_core::CvxConfig;

/// File extensions accepted as input documents.
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Load the config from `path`, else the user config file, else defaults.
pub fn load_config(path: Option<&str>) -> anyhow::Result<CvxConfig> {
    if let Some(path) = path {
        return Ok(CvxConfig::from_file(Path::new(path))?);
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        debug!("Using config file {}", default_path.display());
        return Ok(CvxConfig::from_file(&default_path)?);
    }

    Ok(CvxConfig::default())
}

/// Point the config at the model directory to use.
///
/// An explicit directory wins; otherwise the configured directory is kept
/// when it exists, and the downloaded models directory is used when not.
pub fn resolve_model_dir(config: &mut CvxConfig, explicit: Option<PathBuf>) {
    config.models.model_dir = match explicit {
        Some(dir) => dir,
        None if config.models.model_dir.exists() => return,
        None => models::default_model_dir(),
    };
}

/// Check that every OCR model file is present.
pub fn ensure_models(config: &CvxConfig) -> anyhow::Result<()> {
    let missing: Vec<String> = [
        &config.models.detection_model,
        &config.models.recognition_model,
        &config.models.dictionary,
    ]
    .into_iter()
    .filter(|name| !config.model_path(name).exists())
    .map(|name| name.to_string())
    .collect();

    if !missing.is_empty() {
        anyhow::bail!(
            "OCR models not found at {} (missing: {}).\n\n\
             Run 'cvx models download' to download them.",
            config.models.model_dir.display(),
            missing.join(", ")
        );
    }

    Ok(())
}

/// Token cancelled on Ctrl-C.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
