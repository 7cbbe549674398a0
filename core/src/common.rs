//! Shared helpers for the `pfilter` command-line tool.
//!
//! - Logger initialization
//! - Input and output path validation
//! - Parsing of comma-separated parameter lists

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Route `log` output to stderr, or to `log_file` when given, at `log_level`
/// (off, error, warn, info, debug, trace).
///
/// Records carry a local timestamp and the emitting module, e.g.
/// `2026-03-01 12:00:00.000 DEBUG pomp::filter: ...`.
///
/// # Errors
/// Returns an error for an unknown level, a log file that cannot be opened or a logger
/// that is already installed.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    use std::io::Write;

    let level = parse_level(log_level)?;
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });
    if let Some(path) = log_file {
        builder.target(env_logger::Target::Pipe(open_log_file(path)?));
    }
    builder.try_init().context("logger already initialized")?;
    Ok(())
}

fn parse_level(log_level: &str) -> Result<log::LevelFilter> {
    log_level
        .parse::<log::LevelFilter>()
        .map_err(|_| anyhow::anyhow!("unknown log level '{log_level}'"))
}

/// Open `path` for appending, creating it and any missing parent directories.
fn open_log_file(path: &Path) -> Result<Box<std::fs::File>> {
    ensure_parent_dir(path)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file '{}'", path.display()))?;
    Ok(Box::new(file))
}

/// Validate that the input path exists and is a file.
pub fn validate_input_path(input: &Path) -> Result<()> {
    if !input.exists() {
        bail!("Input path '{}' does not exist.", input.display());
    }
    if !input.is_file() {
        bail!("Input path '{}' is not a file.", input.display());
    }
    Ok(())
}

/// Validate an output file path, creating its parent directories if needed.
pub fn validate_output_path(output: &Path) -> Result<()> {
    if output.is_dir() {
        bail!("Output path '{}' is a directory.", output.display());
    }
    ensure_parent_dir(output)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create directory '{}'", parent.display()))?;
        }
    }
    Ok(())
}

/// Parse a comma-separated list of numbers, e.g. `"1.5,0.5,-2"`.
pub fn parse_values(list: &str) -> Result<Vec<f64>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .with_context(|| format!("'{s}' is not a number"))
        })
        .collect()
}
