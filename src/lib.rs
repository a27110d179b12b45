//! # pdfebook
//!
//! A CLI utility that turns an interior PDF plus cover images into a
//! print/ebook-ready PDF, optionally zipped together with an EPUB.
//!
//! ## Pipeline
//!
//! - Resolve the trim size (named format, `WxH` inches, or the interior's first page)
//! - Render the front (and optional back) cover image onto full-bleed pages
//! - Concatenate cover pages and interior, stamp title/author metadata
//! - Write the PDF, or a `<slug>/` zip with the PDF and EPUB
//!
//! ## Usage
//!
//! ```bash
//! pdfebook -t "Café: A Novel!" -a "Jane Doe" -c cover.jpg -i interior.pdf -o book.pdf
//! pdfebook -t "Café: A Novel!" -a "Jane Doe" -c cover.jpg -b back.png -i interior.pdf \
//!     -p book.epub -s 6x9 -o book.zip
//! ```

mod assembler;
mod book;
mod cover;
mod metadata;
mod packager;
mod trim_size;

pub use assembler::{load_pdf, BookAssembler};
pub use book::{run, Artifact, BookJob};
pub use cover::{build_cover_pdf, cover_document, CoverImage, CoverPlacement};
pub use metadata::{slugify_title, BookMetadata};
pub use packager::{build_archive, package, write_atomically};
pub use trim_size::{resolve as resolve_trim_size, TrimSize, TrimSizeError, POINTS_PER_INCH};
