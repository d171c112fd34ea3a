use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

/// Prints `value` in a machine format, or returns `false` for `Human` so the
/// caller can render its own view.
pub fn print_structured<T: Serialize>(format: OutputFormat, value: &T) -> Result<bool> {
    match format {
        OutputFormat::Human => Ok(false),
        OutputFormat::Json => {
            let rendered = serde_json::to_string_pretty(value).context("Failed to encode JSON")?;
            println!("{rendered}");
            Ok(true)
        }
        OutputFormat::Yaml => {
            let rendered = serde_yaml::to_string(value).context("Failed to encode YAML")?;
            print!("{rendered}");
            Ok(true)
        }
    }
}

/// One compact JSON document per line.
pub fn print_json_line<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("Failed to encode JSON")?;
    println!("{line}");
    Ok(())
}
