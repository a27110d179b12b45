use anyhow::{anyhow, Result};
use colored::*;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::assembler::{load_pdf, BookAssembler};
use crate::cover::{build_cover_pdf, CoverPlacement};
use crate::packager::package;
use crate::{trim_size, BookMetadata};

/// Everything needed to produce one book.
#[derive(Debug, Clone)]
pub struct BookJob {
    pub metadata: BookMetadata,
    pub cover: PathBuf,
    pub back: Option<PathBuf>,
    pub interior: PathBuf,
    pub epub: Option<PathBuf>,
    pub outfile: PathBuf,
    /// Named format or `WIDTHxHEIGHT` in inches; `None` uses the interior's first page.
    pub size: Option<String>,
}

/// What a successful run wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Pdf { path: PathBuf, pages: usize },
    Archive { path: PathBuf, slug: String, pages: usize },
}

impl Artifact {
    pub fn path(&self) -> &Path {
        match self {
            Artifact::Pdf { path, .. } | Artifact::Archive { path, .. } => path,
        }
    }

    pub fn pages(&self) -> usize {
        match self {
            Artifact::Pdf { pages, .. } | Artifact::Archive { pages, .. } => *pages,
        }
    }
}

impl BookJob {
    fn check_inputs(&self) -> Result<()> {
        let inputs = [Some(&self.cover), Some(&self.interior), self.back.as_ref(), self.epub.as_ref()];
        for path in inputs.into_iter().flatten() {
            if !path.exists() {
                return Err(anyhow!("Input file '{}' does not exist", path.display()));
            }
        }
        Ok(())
    }
}

/// Builds the book described by `job` and writes it to `job.outfile`.
pub async fn run(job: &BookJob) -> Result<Artifact> {
    job.check_inputs()?;

    let interior = load_pdf(&job.interior).await?;
    let size = trim_size::resolve(job.size.as_deref(), &interior)?;
    info!("Trim size: {}", size.to_string().green());

    let front = build_cover_pdf(size, &job.cover, CoverPlacement::Front).await?;
    let back = match &job.back {
        Some(path) => Some(build_cover_pdf(size, path, CoverPlacement::Back).await?),
        None => None,
    };

    let mut assembler = BookAssembler::new();
    assembler.add_pdf_bytes("front cover", &front)?;
    assembler.add_interior(interior_label(&job.interior), interior);
    if let Some(back) = &back {
        assembler.add_pdf_bytes("back cover", back)?;
    }
    let pages = assembler.page_count();
    let pdf = assembler.assemble_to_vec(&job.metadata)?;

    let slug = job.metadata.slug();
    package(&pdf, job.epub.as_deref(), &slug, &job.outfile).await?;

    let artifact = match job.epub {
        Some(_) => Artifact::Archive {
            path: job.outfile.clone(),
            slug,
            pages,
        },
        None => Artifact::Pdf {
            path: job.outfile.clone(),
            pages,
        },
    };

    info!(
        "Wrote \"{}\" by {} ({} pages) to {}",
        job.metadata.title,
        job.metadata.author,
        pages,
        artifact.path().display().to_string().green()
    );
    Ok(artifact)
}

fn interior_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("interior.pdf")
        .to_string()
}
