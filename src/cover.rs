use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::fmt;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::TrimSize;

const IMAGE_NAME: &[u8] = b"Cover";

/// Which side of the book a cover image goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverPlacement {
    /// Image page first, then a blank page.
    Front,
    /// Blank page first, then the image page.
    Back,
}

impl fmt::Display for CoverPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverPlacement::Front => write!(f, "front"),
            CoverPlacement::Back => write!(f, "back"),
        }
    }
}

/// A decoded cover image, held as raw 8-bit samples.
pub struct CoverImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    samples: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

impl CoverImage {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let format = image::guess_format(data)
            .map_err(|e| anyhow!("Unsupported cover image format: {}", e))?;
        let decoded = image::load_from_memory_with_format(data, format)
            .map_err(|e| anyhow!("Failed to decode {:?} cover image: {}", format, e))?;

        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("Cover image is empty ({}x{})", width, height));
        }

        Ok(Self::from_image(decoded))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .await
            .map_err(|e| anyhow!("Failed to read cover image {}: {}", path.display(), e))?;

        Self::from_bytes(&data).map_err(|e| anyhow!("{}: {}", path.display(), e))
    }

    fn from_image(decoded: DynamicImage) -> Self {
        let (width, height) = decoded.dimensions();
        let color = decoded.color();

        match (color.has_color(), color.has_alpha()) {
            (true, false) => Self {
                width,
                height,
                color_space: "DeviceRGB",
                samples: decoded.to_rgb8().into_raw(),
                alpha: None,
            },
            (false, false) => Self {
                width,
                height,
                color_space: "DeviceGray",
                samples: decoded.to_luma8().into_raw(),
                alpha: None,
            },
            (true, true) => {
                let rgba = decoded.to_rgba8().into_raw();
                let mut samples = Vec::with_capacity(rgba.len() / 4 * 3);
                let mut alpha = Vec::with_capacity(rgba.len() / 4);
                for px in rgba.chunks_exact(4) {
                    samples.extend_from_slice(&px[..3]);
                    alpha.push(px[3]);
                }
                Self { width, height, color_space: "DeviceRGB", samples, alpha: Some(alpha) }
            }
            (false, true) => {
                let la = decoded.to_luma_alpha8().into_raw();
                let (samples, alpha): (Vec<u8>, Vec<u8>) = la.chunks_exact(2).map(|px| (px[0], px[1])).unzip();
                Self { width, height, color_space: "DeviceGray", samples, alpha: Some(alpha) }
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    /// Adds the image XObject (and its soft mask, if any) to `doc`.
    fn add_to(&self, doc: &mut Document) -> ObjectId {
        let mut dict = self.xobject_dictionary(self.color_space);
        if let Some(alpha) = &self.alpha {
            let smask_id = doc.add_object(Stream::new(self.xobject_dictionary("DeviceGray"), alpha.clone()));
            dict.set("SMask", smask_id);
        }
        doc.add_object(Stream::new(dict, self.samples.clone()))
    }

    fn xobject_dictionary(&self, color_space: &str) -> Dictionary {
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => Object::Integer(self.width as i64),
            "Height" => Object::Integer(self.height as i64),
            "ColorSpace" => color_space,
            "BitsPerComponent" => Object::Integer(8),
        }
    }
}

/// Builds the two-page cover document: the image stretched over a full page,
/// plus one blank page on the side facing the interior.
pub fn cover_document(size: TrimSize, image: &CoverImage, placement: CoverPlacement) -> Result<Document> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = image.add_to(&mut doc);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(size.width() as _),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(size.height() as _),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_NAME.to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_data = content
        .encode()
        .map_err(|e| anyhow!("Failed to encode cover page content: {}", e))?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content_data));

    let mut xobjects = Dictionary::new();
    xobjects.set(IMAGE_NAME.to_vec(), image_id);

    let image_page = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => size.rect(),
        "Contents" => content_id,
        "Resources" => dictionary! { "XObject" => xobjects },
    });
    let blank_page = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => size.rect(),
        "Resources" => Dictionary::new(),
    });

    let kids = match placement {
        CoverPlacement::Front => vec![image_page, blank_page],
        CoverPlacement::Back => vec![blank_page, image_page],
    };
    debug!("Cover ({}) pages: {:?}", placement, kids);

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => Object::Integer(2),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    Ok(doc)
}

/// Renders `image_path` into an in-memory two-page cover PDF.
pub async fn build_cover_pdf(size: TrimSize, image_path: &Path, placement: CoverPlacement) -> Result<Vec<u8>> {
    let image = CoverImage::load(image_path).await?;
    info!(
        "Rendering {} cover from {} ({}x{} px) at {}",
        placement,
        image_path.display(),
        image.width(),
        image.height(),
        size
    );

    let mut doc = cover_document(size, &image, placement)?;
    let mut data = Vec::new();
    doc.save_to(&mut data)
        .map_err(|e| anyhow!("Failed to serialize {} cover PDF: {}", placement, e))?;

    Ok(data)
}
