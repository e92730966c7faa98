use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use kindle_thumbs_core::batch::{self, BatchOptions, BatchReport, FileStatus};
use kindle_thumbs_core::config::{config_path, load_config, AppConfig};
use kindle_thumbs_core::progress::{ProgressEvent, ProgressHandler};

#[derive(Parser)]
#[command(name = "kindle-thumbs")]
#[command(about = "Kindle cover thumbnails and APNX page maps")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract cover thumbnails and generate page maps for a mounted Kindle
    Extract {
        /// Kindle mount point
        #[arg(required = true)]
        kindle_path: PathBuf,

        /// Only print warnings and errors
        #[arg(short, long)]
        silent: bool,

        /// Overwrite thumbnails of personal documents (PDOC)
        #[arg(long)]
        overwrite_pdoc_thumbs: bool,

        /// Overwrite thumbnails of Amazon books (EBOK, EBSP)
        #[arg(long)]
        overwrite_amzn_thumbs: bool,

        /// Overwrite existing APNX files
        #[arg(long)]
        overwrite_apnx: bool,

        /// Do not generate APNX files
        #[arg(long)]
        skip_apnx: bool,

        /// Also process .azw files
        #[arg(long)]
        azw: bool,

        /// Only process books added within the last N days
        #[arg(long, value_name = "N")]
        days: Option<u32>,

        /// Add bottom margin to thumbnails so the device's progress bar does not cover them
        #[arg(long)]
        fix_thumb: bool,

        /// Change personal AZW3 documents (PDOC) to books (EBOK)
        #[arg(long)]
        patch_azw3: bool,

        /// Page cache CSV (defaults to the configured cache file)
        #[arg(long)]
        cache_file: Option<PathBuf>,
    },

    /// Extract the cover of a single MOBI/AZW3 file as a thumbnail JPEG
    Cover {
        /// Input file
        #[arg(required = true)]
        input: PathBuf,

        /// Output image path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use the smaller fix-mode bounding box
        #[arg(long)]
        fix_thumb: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write default config file
    Init,
    /// Show current configuration
    Show,
    /// Set a config value (e.g. thumbnail.jpeg_quality 85)
    Set {
        key: String,
        value: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let quiet = matches!(cli.command, Commands::Extract { silent: true, .. });
    let default_level = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Extract {
            kindle_path,
            silent,
            overwrite_pdoc_thumbs,
            overwrite_amzn_thumbs,
            overwrite_apnx,
            skip_apnx,
            azw,
            days,
            fix_thumb,
            patch_azw3,
            cache_file,
        } => {
            let opts = BatchOptions {
                overwrite_pdoc: *overwrite_pdoc_thumbs,
                overwrite_amzn: *overwrite_amzn_thumbs,
                overwrite_apnx: *overwrite_apnx,
                skip_apnx: *skip_apnx,
                include_azw: *azw,
                max_age_days: *days,
                fix_thumb: *fix_thumb,
                patch_azw3: *patch_azw3,
                cache_file: cache_file.clone(),
            };
            run_extract(kindle_path, &opts, *silent, cli.json)
        }
        Commands::Cover {
            input,
            output,
            fix_thumb,
        } => run_cover(input, output.as_deref(), *fix_thumb, cli.json),
        Commands::Config { action } => run_config(action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Spinner on stderr, one tick per file.
struct Spinner(ProgressBar);

impl Spinner {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {prefix}: [{pos}/{len}] {wide_msg}") {
            bar.set_style(style);
        }
        Self(bar)
    }
}

impl ProgressHandler for Spinner {
    fn on_progress(&self, event: ProgressEvent) {
        self.0.set_prefix(event.stage.label());
        if let Some(total) = event.total {
            self.0.set_length(total);
        }
        self.0.set_position(event.current);
        self.0.set_message(event.file.unwrap_or_default());
    }
}

fn run_extract(
    kindle_path: &Path,
    opts: &BatchOptions,
    silent: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cfg = load_config();
    let spinner = (!json && !silent).then(Spinner::new);
    let progress = spinner.as_ref().map(|s| s as &dyn ProgressHandler);

    let report = batch::run(kindle_path, opts, &cfg, progress);
    if let Some(s) = &spinner {
        s.0.finish_and_clear();
    }
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !silent {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &BatchReport) {
    for outcome in &report.files {
        if let FileStatus::Failed(reason) = &outcome.status {
            println!("  FAILED {}: {}", outcome.file.display(), reason);
        }
    }
    println!(
        "Thumbnails: {} created, {} skipped, {} failed",
        report.thumbnails_created, report.thumbnails_skipped, report.thumbnails_failed
    );
    println!(
        "Page maps: {} written, {} failed",
        report.apnx_written, report.apnx_failed
    );
    if report.cache_rows_added > 0 {
        println!("Page cache: {} new entries", report.cache_rows_added);
    }
    if report.generated_fixed > 0 {
        println!("Generated thumbnails fixed: {}", report.generated_fixed);
    }
}

fn run_cover(
    input: &Path,
    output: Option<&Path>,
    fix_thumb: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }
    let out = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension("jpg"));
    let cfg = load_config();
    batch::write_cover(input, &out, fix_thumb, &cfg)?;

    if json {
        let info = serde_json::json!({
            "input": input.display().to_string(),
            "output": out.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Cover written to {}", out.display());
    }
    Ok(())
}

fn run_config(
    action: &ConfigAction,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&path, toml::to_string_pretty(&AppConfig::default())?)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Set { key, value } => {
            let path = config_path().ok_or("Could not determine config directory")?;
            let mut cfg = load_config();
            set_config_key(&mut cfg, key, value)?;

            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&path, toml::to_string_pretty(&cfg)?)?;
            if !json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Box<dyn std::error::Error + Send + Sync>> {
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", key, value).into())
}

fn set_config_key(cfg: &mut AppConfig, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let parts: Vec<&str> = key.splitn(2, '.').collect();
    match parts.as_slice() {
        ["thumbnail", sub] => {
            let t = &mut cfg.thumbnail;
            match *sub {
                "width" => t.width = parse_value(key, value)?,
                "height" => t.height = parse_value(key, value)?,
                "fixed_width" => t.fixed_width = parse_value(key, value)?,
                "fixed_height" => t.fixed_height = parse_value(key, value)?,
                "pdoc_padding" => t.pdoc_padding = parse_value(key, value)?,
                "generated_padding" => t.generated_padding = parse_value(key, value)?,
                "jpeg_quality" => t.jpeg_quality = parse_value(key, value)?,
                _ => return Err(format!("Unknown key: {}", key).into()),
            }
        }
        ["pages", sub] => match *sub {
            "cache_file" => cfg.pages.cache_file = Some(value.to_string()),
            "chars_per_page" => cfg.pages.chars_per_page = parse_value(key, value)?,
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        ["scan", "skip_dictionaries"] => cfg.scan.skip_dictionaries = parse_value(key, value)?,
        _ => return Err(format!("Unknown key: {}", key).into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_config_key() {
        let mut cfg = AppConfig::default();
        set_config_key(&mut cfg, "thumbnail.jpeg_quality", "90").unwrap();
        set_config_key(&mut cfg, "pages.chars_per_page", "2000").unwrap();
        set_config_key(&mut cfg, "scan.skip_dictionaries", "false").unwrap();
        assert_eq!(cfg.thumbnail.jpeg_quality, 90);
        assert_eq!(cfg.pages.chars_per_page, 2000);
        assert!(!cfg.scan.skip_dictionaries);

        assert!(set_config_key(&mut cfg, "thumbnail.depth", "1").is_err());
        assert!(set_config_key(&mut cfg, "thumbnail.width", "wide").is_err());
    }
}
