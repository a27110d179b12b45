use anyhow::{anyhow, Result};
use lopdf::{dictionary, Dictionary, Document, Object};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::BookMetadata;

// Catalog entries that stop being accurate once pages are prepended.
const STALE_CATALOG_KEYS: &[&[u8]] = &[b"PageLabels", b"Metadata"];

struct Part {
    label: String,
    document: Document,
    interior: bool,
}

/// Concatenates cover and interior documents into a single book.
pub struct BookAssembler {
    parts: Vec<Part>,
}

/// Reads and parses a PDF from disk.
pub async fn load_pdf(path: &Path) -> Result<Document> {
    let data = fs::read(path)
        .await
        .map_err(|e| anyhow!("Failed to read PDF file {}: {}", path.display(), e))?;

    let document = Document::load_mem(&data)
        .map_err(|e| anyhow!("Failed to parse PDF file {}: {}", path.display(), e))?;

    if document.trailer.has(b"Encrypt") {
        return Err(anyhow!("PDF file {} is encrypted", path.display()));
    }

    debug!("Loaded PDF with {} pages from {}", document.get_pages().len(), path.display());
    Ok(document)
}

impl BookAssembler {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    pub fn add_document(&mut self, label: impl Into<String>, document: Document) {
        self.push(label.into(), document, false);
    }

    /// Adds the interior. Its catalog (outlines, named destinations, forms)
    /// becomes the catalog of the assembled book.
    pub fn add_interior(&mut self, label: impl Into<String>, document: Document) {
        self.push(label.into(), document, true);
    }

    pub fn add_pdf_bytes(&mut self, label: impl Into<String>, data: &[u8]) -> Result<()> {
        let label = label.into();
        let document =
            Document::load_mem(data).map_err(|e| anyhow!("Failed to parse {} PDF: {}", label, e))?;
        self.push(label, document, false);
        Ok(())
    }

    fn push(&mut self, label: String, document: Document, interior: bool) {
        debug!("Queued {} with {} pages", label, document.get_pages().len());
        self.parts.push(Part {
            label,
            document,
            interior,
        });
    }

    pub fn page_count(&self) -> usize {
        self.parts.iter().map(|p| p.document.get_pages().len()).sum()
    }

    /// Merges all parts, in insertion order, and stamps `metadata` on the result.
    ///
    /// Each part keeps its own page tree, hung under a new root `Pages` node,
    /// so attributes the part's pages inherit (MediaBox, Resources, Rotate)
    /// are untouched.
    pub fn assemble(&self, metadata: &BookMetadata) -> Result<Document> {
        if self.parts.is_empty() {
            return Err(anyhow!("No PDFs added to assemble"));
        }

        info!("Assembling {} documents", self.parts.len());

        let version = self
            .parts
            .iter()
            .map(|p| p.document.version.clone())
            .max()
            .unwrap_or_else(|| "1.5".to_string());
        let mut merged = Document::with_version(version);
        let root_pages_id = merged.new_object_id();
        let mut max_id = merged.max_id;

        let mut kids = Vec::with_capacity(self.parts.len());
        let mut total_pages = 0usize;
        let mut catalog: Option<Dictionary> = None;

        for (i, part) in self.parts.iter().enumerate() {
            let mut doc = part.document.clone();

            // Renumber objects to avoid conflicts
            doc.renumber_objects_with(max_id + 1);
            max_id = doc.max_id;

            let part_catalog = doc
                .catalog()
                .map_err(|e| anyhow!("{} PDF has no catalog: {}", part.label, e))?
                .clone();
            let pages_id = part_catalog
                .get(b"Pages")
                .and_then(|p| p.as_reference())
                .map_err(|e| anyhow!("{} PDF has no page tree: {}", part.label, e))?;
            let page_count = doc.get_pages().len();

            debug!(
                "Part {}: {} with {} pages, page tree {:?}",
                i + 1,
                part.label,
                page_count,
                pages_id
            );

            let pages_dict = doc
                .get_object_mut(pages_id)
                .and_then(|o| o.as_dict_mut())
                .map_err(|e| anyhow!("{} PDF page tree is malformed: {}", part.label, e))?;
            pages_dict.set("Parent", root_pages_id);
            pages_dict.set("Count", Object::Integer(page_count as i64));

            // The merged document gets a fresh catalog and Info dictionary
            for key in [b"Root".as_slice(), b"Info".as_slice()] {
                if let Ok(id) = doc.trailer.get(key).and_then(|o| o.as_reference()) {
                    doc.objects.remove(&id);
                }
            }

            if part.interior {
                catalog = Some(part_catalog);
            }

            merged.objects.extend(doc.objects);
            kids.push(Object::Reference(pages_id));
            total_pages += page_count;
        }

        merged.max_id = max_id;
        merged.objects.insert(
            root_pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(total_pages as i64),
            }),
        );

        let mut catalog = catalog.unwrap_or_else(Dictionary::new);
        for key in STALE_CATALOG_KEYS {
            catalog.remove(key);
        }
        catalog.set("Type", "Catalog");
        catalog.set("Pages", root_pages_id);
        let catalog_id = merged.add_object(catalog);
        let info_id = merged.add_object(metadata.info_dictionary());
        merged.trailer.set("Root", catalog_id);
        merged.trailer.set("Info", info_id);

        let final_page_count = merged.get_pages().len();
        if final_page_count != total_pages {
            return Err(anyhow!(
                "Page tree mismatch after merge: expected {} pages, found {}",
                total_pages,
                final_page_count
            ));
        }

        info!("Total pages collected: {}", final_page_count);
        Ok(merged)
    }

    /// Assembles and serializes the book.
    pub fn assemble_to_vec(&self, metadata: &BookMetadata) -> Result<Vec<u8>> {
        let mut merged = self.assemble(metadata)?;

        let mut data = Vec::new();
        merged
            .save_to(&mut data)
            .map_err(|e| anyhow!("Failed to serialize merged PDF: {}", e))?;

        Ok(data)
    }
}

impl Default for BookAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{ObjectId, Stream};

    /// A document with `pages` pages whose MediaBox lives on the page tree root
    /// and whose catalog carries an outline entry pointing at the first page.
    fn interior_document(pages: usize, width: i64, height: i64) -> Document {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for n in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tj", vec![Object::string_literal(format!("page {}", n + 1))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids.clone(),
                "Count" => Object::Integer(pages as i64),
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(width),
                    Object::Integer(height),
                ],
                "Resources" => Dictionary::new(),
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "PageLabels" => dictionary! { "Nums" => vec![Object::Integer(0), Object::Dictionary(Dictionary::new())] },
        };
        if let Some(first) = kids.first() {
            let outline_id = doc.add_object(dictionary! {
                "Title" => Object::string_literal("Chapter 1"),
                "Dest" => vec![first.clone(), Object::Name(b"Fit".to_vec())],
            });
            catalog.set("Outlines", outline_id);
        }
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn two_page_document(width: i64, height: i64) -> Document {
        let mut doc = interior_document(2, width, height);
        if let Ok(catalog_id) = doc.trailer.get(b"Root").and_then(|o| o.as_reference()) {
            if let Ok(catalog) = doc.get_object_mut(catalog_id).and_then(|o| o.as_dict_mut()) {
                catalog.remove(b"Outlines");
            }
        }
        doc
    }

    fn page_order(doc: &Document) -> Vec<ObjectId> {
        doc.get_pages().into_values().collect()
    }

    #[test]
    fn page_count_is_sum_of_parts() {
        let mut assembler = BookAssembler::new();
        assembler.add_document("front", two_page_document(300, 400));
        assembler.add_interior("interior", interior_document(5, 300, 400));
        assembler.add_document("back", two_page_document(300, 400));
        assert_eq!(assembler.page_count(), 9);

        let merged = assembler.assemble(&BookMetadata::new("T", "A")).unwrap();
        assert_eq!(merged.get_pages().len(), 9);
    }

    #[test]
    fn inherited_media_box_survives_merge() {
        let mut assembler = BookAssembler::new();
        assembler.add_document("front", two_page_document(300, 400));
        assembler.add_interior("interior", interior_document(3, 500, 700));

        let merged = assembler.assemble(&BookMetadata::new("T", "A")).unwrap();
        let pages = page_order(&merged);
        let size = |id| crate::trim_size::inherited_attribute(&merged, id, b"MediaBox").unwrap().as_array().unwrap()[2].clone();

        assert!(matches!(size(pages[0]), Object::Integer(300)));
        assert!(matches!(size(pages[2]), Object::Integer(500)));
        assert!(matches!(size(pages[4]), Object::Integer(500)));
    }

    #[test]
    fn interior_catalog_is_kept() {
        let mut assembler = BookAssembler::new();
        assembler.add_document("front", two_page_document(300, 400));
        assembler.add_interior("interior", interior_document(3, 300, 400));

        let merged = assembler.assemble(&BookMetadata::new("T", "A")).unwrap();
        let catalog = merged.catalog().unwrap();
        assert!(catalog.has(b"Outlines"));
        assert!(!catalog.has(b"PageLabels"));

        // the outline still points at the first interior page, now page 3
        let outline_id = catalog.get(b"Outlines").unwrap().as_reference().unwrap();
        let outline = merged.get_dictionary(outline_id).unwrap();
        let dest = outline.get(b"Dest").unwrap().as_array().unwrap();
        let target = dest[0].as_reference().unwrap();
        assert_eq!(page_order(&merged)[2], target);
    }

    #[test]
    fn metadata_is_stamped() {
        let mut assembler = BookAssembler::new();
        assembler.add_interior("interior", interior_document(1, 300, 400));

        let meta = BookMetadata::new("Café: A Novel!", "Zoë Writer");
        let merged = assembler.assemble(&meta).unwrap();
        assert_eq!(BookMetadata::from_document(&merged), Some(meta));
    }

    #[test]
    fn serialized_book_reloads() {
        let mut assembler = BookAssembler::new();
        assembler.add_document("front", two_page_document(300, 400));
        assembler.add_interior("interior", interior_document(4, 300, 400));

        let meta = BookMetadata::new("Reloaded", "Someone");
        let data = assembler.assemble_to_vec(&meta).unwrap();
        let reloaded = Document::load_mem(&data).unwrap();
        assert_eq!(reloaded.get_pages().len(), 6);
        assert_eq!(BookMetadata::from_document(&reloaded), Some(meta));
    }

    #[test]
    fn empty_assembler_is_an_error() {
        let err = BookAssembler::new().assemble(&BookMetadata::new("T", "A")).unwrap_err();
        assert!(err.to_string().contains("No PDFs"));
    }

    #[test]
    fn unparseable_bytes_are_rejected() {
        let mut assembler = BookAssembler::new();
        let err = assembler.add_pdf_bytes("front cover", b"not a pdf").unwrap_err();
        assert!(err.to_string().contains("front cover"));
    }

    #[tokio::test]
    async fn load_pdf_reports_missing_file() {
        let err = load_pdf(Path::new("/nonexistent/interior.pdf")).await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/interior.pdf"));
    }
}
