use easel_contracts::capabilities::{CapabilityKind, CapabilitySpec};
use easel_contracts::chat::ConversationHistory;
use easel_contracts::failure::{ValidationError, ValidationReason};
use easel_contracts::input::RequestInput;
use serde_json::json;

use crate::config::{ApiToken, EngineConfig};
use crate::transport::{OutboundRequest, RequestBody};

/// Shapes the single outbound request for `input`.
///
/// For chat, `history` must already contain the new user turn; the whole
/// conversation is sent every time.
pub fn build_request(
    capability: &CapabilitySpec,
    config: &EngineConfig,
    token: &ApiToken,
    input: &RequestInput,
    history: &ConversationHistory,
) -> Result<OutboundRequest, ValidationError> {
    let body = match (capability.kind, input) {
        (CapabilityKind::TextToImage, RequestInput::Prompt(prompt)) => {
            RequestBody::Json(json!({ "inputs": prompt }))
        }
        (CapabilityKind::ImageToImage, RequestInput::Upload { image, instruction }) => {
            let Some(image) = image.clone() else {
                return Err(ValidationError::new(ValidationReason::MissingImage));
            };
            let instruction = instruction
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(config.upscale_instruction.as_str());
            RequestBody::Multipart {
                image,
                fields: vec![("inputs".to_string(), instruction.to_string())],
            }
        }
        (CapabilityKind::Chat, RequestInput::Message(_)) => RequestBody::Json(json!({
            "model": capability.model,
            "messages": history.to_messages(),
            "max_tokens": config.chat_max_tokens,
            "stream": false,
        })),
        _ => return Err(ValidationError::new(ValidationReason::CapabilityMismatch)),
    };

    Ok(OutboundRequest {
        url: capability.endpoint(&config.api_base),
        token: token.clone(),
        body,
    })
}
