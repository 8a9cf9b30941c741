//! `tally`: itemize receipts from fused OCR lines or from an image.
//!
//! ```bash
//! tally parse lines.txt          # summary JSON for one line per row
//! tally explain lines.txt        # how the item block was bounded
//! tally image receipt.jpg        # full pipeline (needs the `tesseract` feature)
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tally", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize a receipt from a text file of fused lines
    Parse {
        lines: PathBuf,
        /// Print only the item list
        #[arg(long)]
        items_only: bool,
    },
    /// Show the region slicer's decisions for a text file of fused lines
    Explain { lines: PathBuf },
    /// Run the full image pipeline on a receipt photo
    Image {
        file: PathBuf,
        /// Pipeline config (TOML); defaults apply to anything it omits
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Tesseract data directory
        #[arg(long)]
        tessdata: Option<String>,
        #[arg(long, default_value = "eng")]
        lang: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Parse { lines, items_only } => {
            let lines = read_lines(&lines)?;
            if items_only {
                print_json(&tally_ocr::parse(&lines))
            } else {
                print_json(&tally_ocr::summarize(&lines))
            }
        }
        Command::Explain { lines } => print_json(&tally_ocr::explain_slicing(&read_lines(&lines)?)),
        Command::Image { file, config, tessdata, lang } => {
            let config = match config {
                Some(path) => tally_ocr::PipelineConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => tally_ocr::PipelineConfig::default(),
            };
            let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
            runtime.block_on(image::run(&file, config, tessdata, &lang))
        }
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(text.lines().map(str::to_string).collect())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(feature = "tesseract")]
mod image {
    use anyhow::{Context, Result};
    use std::path::Path;
    use tally_ocr::recognizer::tesseract_backend::TesseractRecognizer;
    use tally_ocr::{CancelHandle, PipelineConfig, ReceiptPipeline};

    pub async fn run(file: &Path, config: PipelineConfig, tessdata: Option<String>, lang: &str) -> Result<()> {
        let recognizer = TesseractRecognizer::new(tessdata, lang, config.crop_padding);
        let pipeline = ReceiptPipeline::new(recognizer, config);

        let (handle, signal) = CancelHandle::pair();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                handle.cancel();
            }
        });

        let processed = pipeline
            .process_file(file, signal)
            .await
            .with_context(|| format!("processing {}", file.display()))?;
        super::print_json(&processed)
    }
}

#[cfg(not(feature = "tesseract"))]
mod image {
    use anyhow::{bail, Result};
    use std::path::Path;
    use tally_ocr::PipelineConfig;

    pub async fn run(_file: &Path, _config: PipelineConfig, _tessdata: Option<String>, _lang: &str) -> Result<()> {
        bail!("this build has no recognizer; rebuild with `--features tesseract`")
    }
}
