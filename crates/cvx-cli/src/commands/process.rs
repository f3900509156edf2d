//! Process command - OCR and structure a single résumé.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use cvx_core::Pipeline;
use cvx_core::models::record::ExperienceDetail;
use cvx_core::{DocumentReport, ParseOutcome};

use super::{ctrl_c_token, ensure_models, is_supported, load_config, resolve_model_dir};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input file (PDF or image)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Model directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Run OCR only, without the LLM structuring step
    #[arg(long)]
    no_structure: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// Full report: pages, summary, text and structuring outcome
    Json,
    /// Structured record only
    Record,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json | OutputFormat::Record => "json",
            OutputFormat::Text => "txt",
        }
    }
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut config = load_config(config_path)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    if !is_supported(&args.input) {
        anyhow::bail!(
            "Unsupported file format: {}",
            args.input.extension().and_then(|e| e.to_str()).unwrap_or("")
        );
    }

    resolve_model_dir(&mut config, args.model_dir.clone());
    ensure_models(&config)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("Loading OCR models...");

    let pipeline = Pipeline::from_config(&config, !args.no_structure)?;

    pb.set_message(if pipeline.structures() {
        "Running OCR and structuring..."
    } else {
        "Running OCR..."
    });

    let cancel = ctrl_c_token();
    let report = pipeline.process_file(&args.input, Some(&cancel)).await?;
    pb.finish_and_clear();

    if let Some(ParseOutcome::Failure { error, .. }) = &report.structuring {
        eprintln!("{} Structuring failed: {}", style("⚠").yellow(), error);
    }

    let output = render(&report, args.format, args.pretty)?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        eprintln!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    debug!("Total processing time: {:?}", start.elapsed());

    Ok(())
}

/// Render a report in the requested format.
pub fn render(report: &DocumentReport, format: OutputFormat, pretty: bool) -> anyhow::Result<String> {
    let to_json = |value: &serde_json::Value| -> anyhow::Result<String> {
        Ok(if pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        })
    };

    match format {
        OutputFormat::Json => to_json(&serde_json::to_value(report)?),
        OutputFormat::Record => match &report.structuring {
            Some(ParseOutcome::Success { data, .. }) => to_json(data),
            Some(ParseOutcome::Failure { error, .. }) => {
                anyhow::bail!("No structured record: {}", error)
            }
            None => anyhow::bail!("No structured record: structuring was disabled"),
        },
        OutputFormat::Text => Ok(format_text(report)),
    }
}

fn format_text(report: &DocumentReport) -> String {
    let mut out = String::new();
    let summary = &report.summary;

    let _ = writeln!(
        out,
        "Pages: {}/{} processed",
        summary.processed_pages, summary.total_pages
    );
    if !summary.skipped_pages.is_empty() {
        let skipped: Vec<String> = summary.skipped_pages.iter().map(u32::to_string).collect();
        let _ = writeln!(out, "Skipped pages: {}", skipped.join(", "));
    }
    let _ = writeln!(
        out,
        "Text: {} segments, {} words, {} characters",
        summary.total_segments, summary.total_words, summary.total_characters
    );

    let Some(outcome) = &report.structuring else {
        return out;
    };
    out.push('\n');

    let record = match outcome {
        ParseOutcome::Success {
            model_used,
            attempts,
            fallback_used,
            missing_keys,
            ..
        } => {
            let fallback = if *fallback_used { ", fallback" } else { "" };
            let _ = writeln!(out, "Structured by {} ({} attempts{})", model_used, attempts, fallback);
            if !missing_keys.is_empty() {
                let _ = writeln!(out, "Missing keys: {}", missing_keys.join(", "));
            }
            outcome.record()
        }
        ParseOutcome::Failure { error, attempts, .. } => {
            let _ = writeln!(out, "Structuring failed after {} attempts: {}", attempts, error);
            None
        }
    };

    let Some(record) = record else {
        return out;
    };

    let _ = writeln!(out, "\n{} - {}", record.display_name, record.title);

    let skills = &record.competencies;
    for (label, items) in [
        ("Languages", &skills.programming_languages),
        ("Software", &skills.technical_software),
        ("General", &skills.general),
        ("Management", &skills.managerial),
    ] {
        if !items.is_empty() {
            let _ = writeln!(out, "  {:<11} {}", label, items.join(", "));
        }
    }

    if !record.experiences.is_empty() {
        out.push_str("\nExperience:\n");
        for experience in &record.experiences {
            let _ = writeln!(
                out,
                "  {} @ {} ({})",
                experience.role, experience.employer, experience.period
            );
            match experience.detail() {
                ExperienceDetail::Description(text) => {
                    for line in text.lines().filter(|l| !l.trim().is_empty()) {
                        let _ = writeln!(out, "    {}", line.trim());
                    }
                }
                ExperienceDetail::Missions(missions) => {
                    for mission in missions {
                        let _ = writeln!(out, "    - {} ({})", mission.client, mission.period);
                    }
                }
                ExperienceDetail::Empty => {}
            }
        }
    }

    if !record.education.is_empty() {
        out.push_str("\nEducation:\n");
        for entry in &record.education {
            let _ = writeln!(out, "  {}, {} ({})", entry.degree, entry.institution, entry.dates);
        }
    }

    if !record.languages.is_empty() {
        let _ = writeln!(out, "\nLanguages: {}", record.languages.join(", "));
    }
    if let Some(certifications) = record.certifications.as_ref().filter(|c| !c.is_empty()) {
        let _ = writeln!(out, "Certifications: {}", certifications.join(", "));
    }

    out
}
