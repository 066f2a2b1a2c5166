use std::env;

pub const DEFAULT_API_BASE: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_CHAT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_UPSCALE_INSTRUCTION: &str = "upscale this image";

const CREDENTIAL_ENV_KEYS: &[&str] = &["HUGGINGFACE_API_KEY", "VITE_HUGGINGFACE_API_KEY"];

/// Bearer token for the inference service. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    /// Returns `None` for empty or whitespace-only values.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Present(ApiToken),
    Absent,
}

impl Credential {
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.and_then(ApiToken::new) {
            Some(token) => Credential::Present(token),
            None => Credential::Absent,
        }
    }

    pub fn token(&self) -> Option<&ApiToken> {
        match self {
            Credential::Present(token) => Some(token),
            Credential::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Credential::Present(_))
    }
}

/// Everything the controller reads from the outside world, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub credential: Credential,
    pub api_base: String,
    pub chat_max_tokens: u32,
    pub upscale_instruction: String,
}

impl EngineConfig {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            api_base: DEFAULT_API_BASE.to_string(),
            chat_max_tokens: DEFAULT_CHAT_MAX_TOKENS,
            upscale_instruction: DEFAULT_UPSCALE_INSTRUCTION.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = CREDENTIAL_ENV_KEYS.iter().find_map(|key| lookup(key));
        let mut config = Self::new(Credential::from_raw(token.as_deref()));
        if let Some(base) = lookup("HUGGINGFACE_API_BASE") {
            config = config.with_api_base(&base);
        }
        if let Some(cap) = lookup("EASEL_CHAT_MAX_TOKENS")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .filter(|value| *value > 0)
        {
            config.chat_max_tokens = cap;
        }
        if let Some(instruction) = lookup("EASEL_UPSCALE_INSTRUCTION") {
            config = config.with_upscale_instruction(&instruction);
        }
        config
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        let normalized = api_base.trim().trim_end_matches('/');
        if !normalized.is_empty() {
            self.api_base = normalized.to_string();
        }
        self
    }

    pub fn with_chat_max_tokens(mut self, cap: u32) -> Self {
        self.chat_max_tokens = cap.max(1);
        self
    }

    pub fn with_upscale_instruction(mut self, instruction: &str) -> Self {
        let trimmed = instruction.trim();
        if !trimmed.is_empty() {
            self.upscale_instruction = trimmed.to_string();
        }
        self
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_present()
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
