use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageReader;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Decoded-enough image returned by an image capability.
///
/// Every artifact gets a fresh id, so two responses with identical bytes
/// are still distinct resources.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub id: Uuid,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

impl ImageArtifact {
    /// Sniffs the format from the bytes themselves; the response content
    /// type is not trusted.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .context("failed reading image bytes")?;
        let Some(format) = reader.format() else {
            anyhow::bail!("response is not a recognized image format");
        };
        let (width, height) = reader
            .into_dimensions()
            .context("failed decoding image dimensions")?;
        let extension = format.extensions_str().first().copied().unwrap_or("bin");
        let sha256 = hex::encode(Sha256::digest(&bytes));
        Ok(Self {
            id: Uuid::new_v4(),
            mime_type: format.to_mime_type().to_string(),
            extension,
            width,
            height,
            sha256,
            bytes,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:` URL suitable for an `<img src>` or any renderer that takes URLs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }

    pub fn default_file_name(&self) -> String {
        let id = self.id.simple().to_string();
        format!("easel-{}.{}", &id[..12], self.extension)
    }

    /// Writes the image to `path`, or into it when `path` is a directory.
    pub fn write_to(&self, path: &Path) -> Result<PathBuf> {
        let target = if path.is_dir() {
            path.join(self.default_file_name())
        } else {
            path.to_path_buf()
        };
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        fs::write(&target, &self.bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(target)
    }
}

impl std::fmt::Debug for ImageArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageArtifact")
            .field("id", &self.id)
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultArtifact {
    Image(ImageArtifact),
    /// Assistant reply, already appended to the conversation.
    Message(String),
}

impl ResultArtifact {
    pub fn as_image(&self) -> Option<&ImageArtifact> {
        match self {
            ResultArtifact::Image(image) => Some(image),
            ResultArtifact::Message(_) => None,
        }
    }

    pub fn as_message(&self) -> Option<&str> {
        match self {
            ResultArtifact::Message(text) => Some(text),
            ResultArtifact::Image(_) => None,
        }
    }
}

#[cfg(test)]
pub(crate) fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 90]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("png fixture encodes");
    out.into_inner()
}
