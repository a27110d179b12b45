use lopdf::{dictionary, Dictionary, Document, Object, StringFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use slug::slugify;

const FALLBACK_SLUG: &str = "book";

// Anything that is neither a word character, whitespace nor a hyphen.
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").expect("non-word pattern is valid"));

/// Title and author of the book, written verbatim into the PDF Info dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
}

impl BookMetadata {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }

    /// Filesystem-safe name derived from the title, used for archive entries.
    pub fn slug(&self) -> String {
        slugify_title(&self.title)
    }

    pub(crate) fn info_dictionary(&self) -> Dictionary {
        dictionary! {
            "Title" => text_string(&self.title),
            "Author" => text_string(&self.author),
            "Producer" => text_string(concat!("pdfebook ", env!("CARGO_PKG_VERSION"))),
        }
    }

    /// Reads title and author back out of a document's Info dictionary.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let info = match doc.trailer.get(b"Info").ok()? {
            Object::Reference(id) => doc.get_dictionary(*id).ok()?,
            Object::Dictionary(dict) => dict,
            _ => return None,
        };
        let read = |key: &[u8]| match info.get(key).ok()? {
            Object::String(bytes, _) => decode_text_string(bytes),
            _ => None,
        };

        Some(Self {
            title: read(b"Title")?,
            author: read(b"Author")?,
        })
    }
}

/// Lowercase, ASCII-folded, punctuation dropped, separators collapsed to `_`.
pub fn slugify_title(title: &str) -> String {
    let stripped = NON_WORD.replace_all(title, "");
    let slug = slugify(stripped).replace('-', "_");
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Encodes a PDF text string: a literal for ASCII, UTF-16BE with a BOM otherwise.
pub(crate) fn text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::string_literal(value);
    }

    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn decode_text_string(bytes: &[u8]) -> Option<String> {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            if rest.len() % 2 != 0 {
                return None;
            }
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).ok()
        }
        // PDFDocEncoding agrees with Latin-1 for everything we write
        _ => Some(bytes.iter().map(|&b| b as char).collect()),
    }
}
