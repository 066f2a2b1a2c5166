use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    TextToImage,
    ImageToImage,
    Chat,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::TextToImage => "text_to_image",
            CapabilityKind::ImageToImage => "image_to_image",
            CapabilityKind::Chat => "chat",
        }
    }

    pub fn response_shape(&self) -> ResponseShape {
        match self {
            CapabilityKind::TextToImage | CapabilityKind::ImageToImage => ResponseShape::ImageBytes,
            CapabilityKind::Chat => ResponseShape::ChatMessage,
        }
    }
}

/// How a successful response body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    ImageBytes,
    ChatMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySpec {
    pub name: String,
    pub kind: CapabilityKind,
    pub model: String,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>, kind: CapabilityKind, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            model: model.into(),
        }
    }

    pub fn response_shape(&self) -> ResponseShape {
        self.kind.response_shape()
    }

    /// Hosted endpoint for this capability under `api_base`.
    pub fn endpoint(&self, api_base: &str) -> String {
        let base = api_base.trim().trim_end_matches('/');
        let model = self.model.trim().trim_matches('/');
        match self.kind {
            CapabilityKind::Chat => format!("{base}/{model}/v1/chat/completions"),
            CapabilityKind::TextToImage | CapabilityKind::ImageToImage => {
                format!("{base}/{model}")
            }
        }
    }

    pub fn with_model(&self, model: &str) -> Self {
        let trimmed = model.trim();
        if trimmed.is_empty() {
            return self.clone();
        }
        Self {
            model: trimmed.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    capabilities: IndexMap<String, CapabilitySpec>,
}

impl CapabilityRegistry {
    pub fn new(capabilities: Option<IndexMap<String, CapabilitySpec>>) -> Self {
        Self {
            capabilities: capabilities.unwrap_or_else(default_capabilities),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CapabilitySpec> {
        self.capabilities.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &CapabilitySpec> {
        self.capabilities.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn first_of_kind(&self, kind: CapabilityKind) -> Option<&CapabilitySpec> {
        self.capabilities.values().find(|spec| spec.kind == kind)
    }

    /// First capability of `kind`, with its model replaced by `model_override`
    /// when one is given.
    pub fn resolve(
        &self,
        kind: CapabilityKind,
        model_override: Option<&str>,
    ) -> anyhow::Result<CapabilitySpec> {
        let Some(spec) = self.first_of_kind(kind) else {
            anyhow::bail!("No capability registered for '{}'.", kind.as_str());
        };
        Ok(match model_override {
            Some(model) => spec.with_model(model),
            None => spec.clone(),
        })
    }

    pub fn register(&mut self, spec: CapabilitySpec) {
        self.capabilities.insert(spec.name.clone(), spec);
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_capabilities() -> IndexMap<String, CapabilitySpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, kind: CapabilityKind, model: &str| {
        map.insert(name.to_string(), CapabilitySpec::new(name, kind, model));
    };

    insert(
        "text-to-image",
        CapabilityKind::TextToImage,
        "runwayml/stable-diffusion-v1-5",
    );
    insert(
        "upscale",
        CapabilityKind::ImageToImage,
        "stabilityai/stable-diffusion-x4-upscaler",
    );
    insert("chat", CapabilityKind::Chat, "HuggingFaceH4/zephyr-7b-beta");

    map
}
