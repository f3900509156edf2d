//! Models command - download and manage OCR models.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;
use futures_util::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use cvx_core::CvxConfig;

use super::{load_config, resolve_model_dir};

/// Arguments for the models command.
#[derive(Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    command: ModelsCommand,
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List required models
    List,

    /// Download models
    Download(DownloadArgs),

    /// Check model status
    Status(DirArgs),

    /// Remove downloaded models
    Clean(DirArgs),
}

#[derive(Args)]
struct DownloadArgs {
    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Force re-download even if files exist
    #[arg(long)]
    force: bool,

    /// Base URL the model files are fetched from [default: models.download_url]
    #[arg(long)]
    source: Option<String>,
}

#[derive(Args)]
struct DirArgs {
    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,
}

/// One model file the OCR engine needs.
struct ModelFile {
    filename: String,
    size_bytes: u64,
    description: &'static str,
}

fn required_models(config: &CvxConfig) -> [ModelFile; 3] {
    [
        ModelFile {
            filename: config.models.detection_model.clone(),
            size_bytes: 4_500_000,
            description: "Text detection",
        },
        ModelFile {
            filename: config.models.recognition_model.clone(),
            size_bytes: 7_500_000,
            description: "Latin recognition",
        },
        ModelFile {
            filename: config.models.dictionary.clone(),
            size_bytes: 2_000,
            description: "Latin character dictionary",
        },
    ]
}

/// Directory `models download` writes to by default.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cvx")
        .join("models")
}

pub async fn run(args: ModelsArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;

    match args.command {
        ModelsCommand::List => list_models(&config),
        ModelsCommand::Download(download_args) => {
            resolve_model_dir(&mut config, download_args.output.clone());
            download_models(&config, download_args).await
        }
        ModelsCommand::Status(dir_args) => {
            resolve_model_dir(&mut config, dir_args.model_dir);
            check_status(&config).map(|_| ())
        }
        ModelsCommand::Clean(dir_args) => {
            resolve_model_dir(&mut config, dir_args.model_dir);
            clean_models(&config)
        }
    }
}

fn list_models(config: &CvxConfig) -> anyhow::Result<()> {
    println!("{}", style("Required OCR Models").bold());
    println!();

    let models = required_models(config);
    for model in &models {
        println!(
            "    {:<20} {:>10}  {}",
            model.filename,
            format_size(model.size_bytes),
            model.description
        );
    }

    let total: u64 = models.iter().map(|m| m.size_bytes).sum();
    println!();
    println!("Total: ~{}", format_size(total));
    println!();
    println!("Commands:");
    println!("  cvx models download    Download the models");
    println!("  cvx models status      Check installed models");

    Ok(())
}

/// Base URL to download from: `--source`, else the configured one.
fn download_source(config: &CvxConfig, source: Option<String>) -> anyhow::Result<String> {
    source
        .or_else(|| config.models.download_url.clone())
        .filter(|url| !url.trim().is_empty())
        .map(|url| url.trim_end_matches('/').to_string())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No model download URL configured. Pass --source <URL> or run \
                 'cvx config set models.download_url <URL>'"
            )
        })
}

async fn download_models(config: &CvxConfig, args: DownloadArgs) -> anyhow::Result<()> {
    let source = download_source(config, args.source)?;
    let output_dir = &config.models.model_dir;
    fs::create_dir_all(output_dir)?;

    println!(
        "{} Downloading OCR models to {}",
        style("ℹ").blue(),
        output_dir.display()
    );
    println!();

    let client = reqwest::Client::builder()
        .user_agent(concat!("cvx-cli/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(300))
        .build()?;

    let multi_progress = MultiProgress::new();
    let mut success_count = 0;
    let mut skip_count = 0;
    let mut error_count = 0;

    for model in required_models(config) {
        let path = output_dir.join(&model.filename);

        if path.exists() && !args.force {
            let size = fs::metadata(&path)?.len();
            if size > model.size_bytes / 2 {
                println!(
                    "  {} {} (already exists, {})",
                    style("✓").green(),
                    model.filename,
                    format_size(size)
                );
                skip_count += 1;
                continue;
            }
        }

        let url = format!("{}/{}", source, model.filename);

        let pb = multi_progress.add(ProgressBar::new(model.size_bytes));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} {msg:<30} [{bar:25.cyan/blue}] {bytes}/{total_bytes}")?
                .progress_chars("=>-"),
        );
        pb.set_message(model.filename.clone());

        match download_file(&client, &url, &path, &pb).await {
            Ok(()) => {
                pb.finish_with_message(format!("{} {}", style("✓").green(), model.filename));
                success_count += 1;
            }
            Err(e) => {
                pb.finish_with_message(format!("{} {} - {}", style("✗").red(), model.filename, e));
                error_count += 1;
            }
        }
    }

    println!();

    if error_count == 0 {
        println!("{} Models downloaded successfully!", style("✓").green().bold());
        if skip_count > 0 {
            println!(
                "   {} downloaded, {} already present",
                success_count, skip_count
            );
        }
    } else {
        println!(
            "{} Download completed with errors",
            style("⚠").yellow().bold()
        );
        println!(
            "   {} downloaded, {} skipped, {} failed",
            success_count, skip_count, error_count
        );
        println!();
        println!("Retry with: cvx models download --force");
    }

    println!();
    let ready = check_status(config)?;
    if !ready {
        anyhow::bail!("Some models are missing");
    }

    Ok(())
}

async fn download_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
    pb: &ProgressBar,
) -> anyhow::Result<()> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }

    if let Some(content_length) = response.content_length() {
        pb.set_length(content_length);
    }

    // Partial downloads never land under the final name.
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Print the state of every model file; true when all are present.
fn check_status(config: &CvxConfig) -> anyhow::Result<bool> {
    let model_dir = &config.models.model_dir;

    println!("{}", style("Model Status").bold());
    println!("{}", model_dir.display());
    println!();

    let mut all_present = true;
    let mut total_size: u64 = 0;

    for model in required_models(config) {
        let path = model_dir.join(&model.filename);
        let (status, size_str) = if path.exists() {
            let size = fs::metadata(&path)?.len();
            total_size += size;

            if size > model.size_bytes / 2 {
                (style("✓").green(), format_size(size))
            } else {
                all_present = false;
                (
                    style("⚠").yellow(),
                    format!("{} (incomplete?)", format_size(size)),
                )
            }
        } else {
            all_present = false;
            (style("✗").red(), "missing".to_string())
        };

        println!("    {} {:<25} {:>10}", status, model.filename, size_str);
    }

    if all_present {
        println!(
            "    {} Ready ({} total)",
            style("✓").green(),
            format_size(total_size)
        );
    } else {
        println!(
            "    {} Run 'cvx models download' to download",
            style("⚠").yellow()
        );
    }

    Ok(all_present)
}

fn clean_models(config: &CvxConfig) -> anyhow::Result<()> {
    let model_dir = &config.models.model_dir;

    let mut total_removed = 0;
    let mut total_freed: u64 = 0;

    for model in required_models(config) {
        let path = model_dir.join(&model.filename);
        if path.exists() {
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            fs::remove_file(&path)?;
            total_removed += 1;
            total_freed += size;
            println!("  {} Removed {}", style("✓").green(), model.filename);
        }
    }

    if let Ok(entries) = fs::read_dir(model_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "tmp") {
                let _ = fs::remove_file(&path);
            }
        }
    }

    if total_removed > 0 {
        println!();
        println!(
            "{} Removed {} files, freed {}",
            style("✓").green(),
            total_removed,
            format_size(total_freed)
        );
    } else {
        println!("{} No model files to remove.", style("ℹ").blue());
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1}GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1}MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1}KB", bytes as f64 / 1_000.0)
    } else {
        format!("{}B", bytes)
    }
}
