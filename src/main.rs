use anyhow::Result;
use clap::Parser;
use colored::*;
use pdfebook::{run, BookJob, BookMetadata, TrimSize};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdfebook")]
#[command(about = "Convert an interior PDF plus cover image(s) into a PDF ebook, optionally bundled with an EPUB")]
#[command(version)]
struct Args {
    /// Book title, written into the PDF metadata
    #[arg(short = 't', long = "title")]
    title: String,

    /// Book author, written into the PDF metadata
    #[arg(short = 'a', long = "author")]
    author: String,

    /// Trim size: A3, A4, A5, Letter, Legal or WIDTHxHEIGHT in inches (default: size of the interior's first page)
    #[arg(short = 's', long = "size", value_parser = parse_size)]
    size: Option<String>,

    /// Front cover image
    #[arg(short = 'c', long = "cover", value_parser = existing_path)]
    cover: PathBuf,

    /// Back cover image
    #[arg(short = 'b', long = "back", value_parser = existing_path)]
    back: Option<PathBuf>,

    /// Interior PDF
    #[arg(short = 'i', long = "interior", value_parser = existing_path)]
    interior: PathBuf,

    /// EPUB to bundle with the PDF; the output becomes a zip archive
    #[arg(short = 'p', long = "epub", value_parser = existing_path)]
    epub: Option<PathBuf>,

    /// Output file (PDF, or zip when --epub is given)
    #[arg(short = 'o', long = "outfile")]
    outfile: PathBuf,
}

fn existing_path(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.exists() {
        return Err(format!("Path '{}' does not exist.", s));
    }
    Ok(path)
}

fn parse_size(s: &str) -> Result<String, String> {
    TrimSize::parse(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}

impl From<Args> for BookJob {
    fn from(args: Args) -> Self {
        BookJob {
            metadata: BookMetadata::new(args.title, args.author),
            cover: args.cover,
            back: args.back,
            interior: args.interior,
            epub: args.epub,
            outfile: args.outfile,
            size: args.size,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pdfebook=info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let job = BookJob::from(Args::parse());
    info!(
        "Building \"{}\" from {}",
        job.metadata.title.green(),
        job.interior.display().to_string().blue()
    );

    if let Err(e) = run(&job).await {
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}
