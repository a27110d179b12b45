use anyhow::Result;
use lopdf::{Dictionary, Document, Object, ObjectId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

pub const POINTS_PER_INCH: f64 = 72.0;

/// Named paper formats, in points.
const NAMED_FORMATS: &[(&str, f64, f64)] = &[
    ("a3", 841.89, 1190.55),
    ("a4", 595.28, 841.89),
    ("a5", 420.94, 595.28),
    ("letter", 612.0, 792.0),
    ("legal", 612.0, 1008.0),
];

// Guards against cyclic Parent links in malformed page trees.
const MAX_TREE_DEPTH: usize = 64;

static INCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d*)?|\.\d+)\s*[xX]\s*(\d+(?:\.\d*)?|\.\d+)\s*$")
        .expect("trim size pattern is valid")
});

#[derive(Debug, Error, PartialEq)]
pub enum TrimSizeError {
    #[error("Invalid trim size '{0}': expected one of A3, A4, A5, Letter, Legal or WIDTHxHEIGHT in inches (e.g. 6x9)")]
    InvalidFormat(String),

    #[error("Trim size must be positive, got {width} x {height} pt")]
    NonPositive { width: f64, height: f64 },

    #[error("Interior PDF has no pages")]
    NoPages,

    #[error("First page of the interior PDF has no usable MediaBox")]
    MissingMediaBox,
}

/// Final page dimensions of the book, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimSize {
    width: f64,
    height: f64,
}

impl TrimSize {
    pub fn new(width: f64, height: f64) -> Result<Self, TrimSizeError> {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(TrimSizeError::NonPositive { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn from_inches(width: f64, height: f64) -> Result<Self, TrimSizeError> {
        Self::new(width * POINTS_PER_INCH, height * POINTS_PER_INCH)
    }

    /// Case-insensitive lookup in the named format table.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        NAMED_FORMATS
            .iter()
            .find(|(known, _, _)| *known == name)
            .map(|&(_, width, height)| Self { width, height })
    }

    /// Parses a named format or a `WIDTHxHEIGHT` string in inches.
    pub fn parse(value: &str) -> Result<Self, TrimSizeError> {
        if let Some(size) = Self::from_name(value) {
            return Ok(size);
        }

        let caps = INCHES
            .captures(value)
            .ok_or_else(|| TrimSizeError::InvalidFormat(value.to_string()))?;
        let width = caps[1]
            .parse::<f64>()
            .map_err(|_| TrimSizeError::InvalidFormat(value.to_string()))?;
        let height = caps[2]
            .parse::<f64>()
            .map_err(|_| TrimSizeError::InvalidFormat(value.to_string()))?;

        Self::from_inches(width, height)
    }

    /// Uses the visible dimensions of the first page of `doc`.
    pub fn from_pdf(doc: &Document) -> Result<Self> {
        let pages = doc.get_pages();
        let page_id = *pages.values().next().ok_or(TrimSizeError::NoPages)?;

        let media_box = inherited_attribute(doc, page_id, b"MediaBox")
            .and_then(|obj| obj.as_array().ok())
            .filter(|rect| rect.len() == 4)
            .ok_or(TrimSizeError::MissingMediaBox)?;

        let coords = media_box
            .iter()
            .map(|obj| number(deref(doc, obj)))
            .collect::<Option<Vec<f64>>>()
            .ok_or(TrimSizeError::MissingMediaBox)?;

        let mut width = (coords[2] - coords[0]).abs();
        let mut height = (coords[3] - coords[1]).abs();

        let rotation = inherited_attribute(doc, page_id, b"Rotate")
            .and_then(|obj| obj.as_i64().ok())
            .unwrap_or(0);
        if rotation.rem_euclid(180) == 90 {
            std::mem::swap(&mut width, &mut height);
        }

        debug!("First interior page {:?} is {} x {} pt (rotate {})", page_id, width, height, rotation);
        Ok(Self::new(width, height)?)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// `[0 0 width height]`, ready to be used as a page box.
    pub fn rect(&self) -> Object {
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(self.width as _),
            Object::Real(self.height as _),
        ])
    }
}

impl FromStr for TrimSize {
    type Err = TrimSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TrimSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} x {:.2} pt", self.width, self.height)
    }
}

/// Picks the trim size from an explicit size string, or falls back to the interior.
pub fn resolve(size: Option<&str>, interior: &Document) -> Result<TrimSize> {
    match size {
        Some(value) => Ok(TrimSize::parse(value)?),
        None => TrimSize::from_pdf(interior),
    }
}

/// Looks `key` up on a page, walking up through its `Pages` ancestors.
pub(crate) fn inherited_attribute<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node: &Dictionary = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(deref(doc, value));
        }
        let parent = node.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn deref<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}
