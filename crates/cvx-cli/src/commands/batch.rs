//! Batch processing command for multiple résumé files.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, error, warn};

use cvx_core::{DocumentReport, ParseOutcome, Pipeline};

use super::process::{OutputFormat, render};
use super::{ctrl_c_token, ensure_models, is_supported, load_config, resolve_model_dir};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Glob pattern matching input files
    #[arg(required = true)]
    input: String,

    /// Output directory for per-file results
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also write summary.json
    #[arg(long)]
    summary: bool,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,

    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Run OCR only, without the LLM structuring step
    #[arg(long)]
    no_structure: bool,
}

/// One line of the batch summary.
#[derive(Serialize)]
struct FileSummary {
    file: PathBuf,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    structured: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    words: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    processing_time_ms: u64,
}

impl FileSummary {
    fn processed(file: PathBuf, report: &DocumentReport, processing_time_ms: u64) -> Self {
        let structured = report.structuring.as_ref().map(ParseOutcome::is_success);
        Self {
            file,
            success: true,
            structured,
            pages: Some(report.summary.processed_pages),
            words: Some(report.summary.total_words),
            error: report
                .structuring
                .as_ref()
                .and_then(ParseOutcome::error)
                .map(|e| e.to_string()),
            processing_time_ms,
        }
    }

    fn failed(file: PathBuf, error: String, processing_time_ms: u64) -> Self {
        Self {
            file,
            success: false,
            structured: None,
            pages: None,
            words: None,
            error: Some(error),
            processing_time_ms,
        }
    }
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut config = load_config(config_path)?;

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| is_supported(p))
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    resolve_model_dir(&mut config, args.model_dir.clone());
    ensure_models(&config)?;

    // One pipeline for the whole batch: models load once.
    let pipeline = Pipeline::from_config(&config, !args.no_structure)?;
    let cancel = ctrl_c_token();

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("=>-"),
    );

    let mut summaries = Vec::with_capacity(files.len());

    for path in files {
        if cancel.is_cancelled() {
            warn!("Interrupted, {} files left unprocessed", pb.length().unwrap_or(0) - pb.position());
            break;
        }

        pb.set_message(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let file_start = Instant::now();
        let result = pipeline.process_file(&path, Some(&cancel)).await;
        let processing_time_ms = file_start.elapsed().as_millis() as u64;

        match result {
            Ok(report) => {
                if let Some(output_dir) = &args.output_dir {
                    write_output(output_dir, &path, &report, args.format)?;
                }
                summaries.push(FileSummary::processed(path, &report, processing_time_ms));
            }
            Err(e) => {
                let message = e.to_string();
                if args.continue_on_error {
                    warn!("Failed to process {}: {}", path.display(), message);
                    summaries.push(FileSummary::failed(path, message, processing_time_ms));
                } else {
                    error!("Failed to process {}: {}", path.display(), message);
                    pb.abandon();
                    anyhow::bail!("Processing failed for {}: {}", path.display(), message);
                }
            }
        }

        pb.inc(1);
    }

    pb.finish_with_message("");

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.json"))
            .unwrap_or_else(|| PathBuf::from("summary.json"));

        fs::write(&summary_path, serde_json::to_string_pretty(&summaries)?)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let failed = summaries.iter().filter(|s| !s.success).count();
    let unstructured = summaries
        .iter()
        .filter(|s| s.structured == Some(false))
        .count();

    println!();
    println!(
        "{} Processed {} files in {:.1}s",
        style("✓").green(),
        summaries.len(),
        start.elapsed().as_secs_f64()
    );
    if failed > 0 {
        println!("  {} {} failed", style("✗").red(), failed);
    }
    if unstructured > 0 {
        println!("  {} {} could not be structured", style("⚠").yellow(), unstructured);
    }

    Ok(())
}

fn write_output(
    output_dir: &std::path::Path,
    input: &std::path::Path,
    report: &DocumentReport,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let output_path = output_dir.join(output_name(input, format));

    match render(report, format, true) {
        Ok(content) => {
            fs::write(&output_path, content)?;
            debug!("Wrote output to {}", output_path.display());
        }
        // Record format without a record: keep the batch going.
        Err(e) => warn!("No output for {}: {}", input.display(), e),
    }

    Ok(())
}

/// Output file name: the full input file name plus the format extension,
/// so `cv.pdf` and `cv.png` do not overwrite each other.
fn output_name(input: &std::path::Path, format: OutputFormat) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_else(|| "resume".into());
    format!("{}.{}", name, format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_output_names_keep_input_extension() {
        let pdf = output_name(Path::new("in/cv.pdf"), OutputFormat::Json);
        let png = output_name(Path::new("in/cv.png"), OutputFormat::Json);

        assert_eq!(pdf, "cv.pdf.json");
        assert_eq!(png, "cv.png.json");
        assert_ne!(pdf, png);
        assert_eq!(output_name(Path::new("cv.jpeg"), OutputFormat::Text), "cv.jpeg.txt");
    }
}
