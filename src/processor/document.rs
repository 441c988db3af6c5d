//! PDF assembly
//!
//! Each processed frame becomes one page whose media box matches the frame's
//! own pixel size at [`REFERENCE_DPI`]. The frame is embedded as a JPEG
//! XObject painted across the whole page.

use crate::error::AssemblyError;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use serde::Serialize;
use tracing::debug;

/// Pixel density used to turn frame pixels into physical page size
pub const REFERENCE_DPI: f32 = 96.0;

/// PDF points per inch
const POINTS_PER_INCH: f32 = 72.0;

/// JPEG quality for embedded frames
pub const JPEG_QUALITY: u8 = 90;

/// Page orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Height ≥ width
    Portrait,
    /// Width > height
    Landscape,
}

/// Physical layout of one output page
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageLayout {
    /// Frame width in pixels
    pub width_px: u32,
    /// Frame height in pixels
    pub height_px: u32,
    /// Page width in points
    pub width_pt: f32,
    /// Page height in points
    pub height_pt: f32,
    /// Derived orientation
    pub orientation: Orientation,
}

impl PageLayout {
    /// Layout for a frame of the given pixel size
    pub fn from_pixels(width_px: u32, height_px: u32) -> Self {
        let to_pt = |px: u32| px as f32 * POINTS_PER_INCH / REFERENCE_DPI;
        let orientation = if width_px > height_px {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        };
        Self {
            width_px,
            height_px,
            width_pt: to_pt(width_px),
            height_pt: to_pt(height_px),
            orientation,
        }
    }
}

/// Incremental PDF writer, one frame per page
pub struct DocumentBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
    layouts: Vec<PageLayout>,
}

impl DocumentBuilder {
    /// Start an empty document
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            layouts: Vec::new(),
        }
    }

    /// Number of pages added so far
    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Append `image` as a new page; `index` is only used in errors
    pub fn add_page(&mut self, image: &DynamicImage, index: usize) -> Result<PageLayout, AssemblyError> {
        let layout = PageLayout::from_pixels(image.width(), image.height());

        let rgb = image.to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&rgb)
            .map_err(|e| AssemblyError::Encode {
                index,
                reason: e.to_string(),
            })?;

        let image_stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => layout.width_px as i64,
                "Height" => layout.height_px as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        )
        .with_compression(false);
        let image_id = self.doc.add_object(image_stream);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(layout.width_pt),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(layout.height_pt),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| AssemblyError::Pdf(e.to_string()))?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(layout.width_pt),
                Object::Real(layout.height_pt),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });

        self.kids.push(page_id.into());
        self.layouts.push(layout);
        debug!(
            index,
            width = layout.width_px,
            height = layout.height_px,
            "Added page"
        );
        Ok(layout)
    }

    /// Serialize the document
    pub fn finish(mut self) -> Result<(Vec<u8>, Vec<PageLayout>), AssemblyError> {
        if self.kids.is_empty() {
            return Err(AssemblyError::NoFrames);
        }

        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(|e| AssemblyError::Pdf(e.to_string()))?;
        Ok((bytes, self.layouts))
    }
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
