use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::capabilities::CapabilityKind;
use crate::failure::{ValidationError, ValidationReason};
use crate::policy::ContentPolicy;

pub const MAX_PROMPT_CHARS: usize = 500;

/// Uploaded image handed to an image-driven capability.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: Option<String>,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_for_file_name(&file_name).map(str::to_string);
        Self {
            bytes,
            file_name,
            mime_type,
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image.png")
            .to_string();
        Ok(Self::new(bytes, file_name))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageInput")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestInput {
    /// Text prompt for text-to-image.
    Prompt(String),
    /// Image upload plus an optional instruction for image-to-image.
    Upload {
        image: Option<ImageInput>,
        instruction: Option<String>,
    },
    /// Next user turn of a conversation.
    Message(String),
}

impl RequestInput {
    pub fn prompt(text: impl Into<String>) -> Self {
        RequestInput::Prompt(text.into())
    }

    pub fn message(text: impl Into<String>) -> Self {
        RequestInput::Message(text.into())
    }

    pub fn upload(image: Option<ImageInput>, instruction: Option<String>) -> Self {
        RequestInput::Upload { image, instruction }
    }

    pub fn kind(&self) -> CapabilityKind {
        match self {
            RequestInput::Prompt(_) => CapabilityKind::TextToImage,
            RequestInput::Upload { .. } => CapabilityKind::ImageToImage,
            RequestInput::Message(_) => CapabilityKind::Chat,
        }
    }
}

/// Checks `input` against the rules of `capability`.
pub fn validate_input(
    capability: CapabilityKind,
    input: &RequestInput,
    policy: &dyn ContentPolicy,
) -> Result<(), ValidationError> {
    if input.kind() != capability {
        return Err(ValidationError::with_message(
            ValidationReason::CapabilityMismatch,
            format!(
                "Expected {} input, got {} input.",
                capability.as_str(),
                input.kind().as_str()
            ),
        ));
    }
    match input {
        RequestInput::Prompt(text) | RequestInput::Message(text) => validate_prompt(text, policy),
        RequestInput::Upload { image, .. } => match image {
            Some(image) if !image.is_empty() => Ok(()),
            _ => Err(ValidationError::new(ValidationReason::MissingImage)),
        },
    }
}

pub fn validate_prompt(text: &str, policy: &dyn ContentPolicy) -> Result<(), ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::new(ValidationReason::Empty));
    }
    if text.chars().count() > MAX_PROMPT_CHARS {
        return Err(ValidationError::new(ValidationReason::TooLong));
    }
    policy
        .check(text)
        .map_err(|_| ValidationError::new(ValidationReason::RestrictedContent))
}

pub fn mime_for_file_name(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|value| value.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
