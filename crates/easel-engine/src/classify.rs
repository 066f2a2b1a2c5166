use easel_contracts::capabilities::ResponseShape;
use easel_contracts::failure::FailureDetail;
use serde_json::Value;

use crate::artifact::{ImageArtifact, ResultArtifact};
use crate::transport::TransportResponse;

pub const UNEXPECTED_SHAPE_MESSAGE: &str = "unexpected response from inference service";

/// Turns a received response into an artifact or an upstream failure.
pub fn classify_response(
    shape: ResponseShape,
    response: TransportResponse,
) -> Result<ResultArtifact, FailureDetail> {
    let status = response.status;
    if !response.is_success() {
        return Err(FailureDetail::upstream(
            Some(status),
            upstream_error_message(&response.body),
        ));
    }

    match shape {
        ResponseShape::ImageBytes => classify_image(response),
        ResponseShape::ChatMessage => classify_chat(response),
    }
}

fn classify_image(response: TransportResponse) -> Result<ResultArtifact, FailureDetail> {
    let status = response.status;
    if let Some(message) = upstream_error_message(&response.body) {
        return Err(FailureDetail::upstream(Some(status), Some(message)));
    }
    if response.is_json() {
        return Err(FailureDetail::upstream(
            Some(status),
            Some(UNEXPECTED_SHAPE_MESSAGE.to_string()),
        ));
    }
    ImageArtifact::from_bytes(response.body)
        .map(ResultArtifact::Image)
        .map_err(|err| {
            log::debug!("image response rejected: {err:#}");
            FailureDetail::upstream(Some(status), Some(UNEXPECTED_SHAPE_MESSAGE.to_string()))
        })
}

fn classify_chat(response: TransportResponse) -> Result<ResultArtifact, FailureDetail> {
    let status = response.status;
    let shape_error =
        || FailureDetail::upstream(Some(status), Some(UNEXPECTED_SHAPE_MESSAGE.to_string()));
    let Ok(payload) = serde_json::from_slice::<Value>(&response.body) else {
        return Err(shape_error());
    };
    if let Some(message) = extract_chat_message(&payload) {
        return Ok(ResultArtifact::Message(message));
    }
    if let Some(message) = error_field(&payload) {
        return Err(FailureDetail::upstream(Some(status), Some(message)));
    }
    Err(shape_error())
}

/// Reads the generated reply from a chat-completions payload, or from the
/// text-generation shapes (`{generated_text}` / `[{generated_text}]`).
pub fn extract_chat_message(payload: &Value) -> Option<String> {
    if let Some(content) = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return Some(content.to_string());
    }
    payload
        .get("generated_text")
        .or_else(|| payload.pointer("/0/generated_text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Best-effort error text from an upstream body. `None` when the body is
/// empty, not JSON, or has no recognizable error field.
pub fn upstream_error_message(body: &[u8]) -> Option<String> {
    let payload: Value = serde_json::from_slice(body).ok()?;
    error_field(&payload)
}

fn error_field(payload: &Value) -> Option<String> {
    let text = match payload.get("error") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::Array(rows)) => {
            let parts: Vec<&str> = rows.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
    .or_else(|| {
        payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    })?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use easel_contracts::capabilities::ResponseShape;
    use easel_contracts::failure::{FailureKind, GENERIC_UPSTREAM_MESSAGE};
    use serde_json::json;

    use super::{classify_response, extract_chat_message, UNEXPECTED_SHAPE_MESSAGE};
    use crate::artifact::{png_fixture, ResultArtifact};
    use crate::transport::TransportResponse;

    fn response(status: u16, content_type: &str, body: Vec<u8>) -> TransportResponse {
        TransportResponse {
            status,
            content_type: Some(content_type.to_string()),
            body,
        }
    }

    #[test]
    fn image_success_yields_image_artifact() {
        let result = classify_response(
            ResponseShape::ImageBytes,
            response(200, "image/jpeg", png_fixture(4, 4)),
        );
        let Ok(ResultArtifact::Image(image)) = result else {
            panic!("expected image artifact");
        };
        assert_eq!(image.mime_type, "image/png");
        assert_eq!((image.width, image.height), (4, 4));
    }

    #[test]
    fn rate_limit_body_is_surfaced_with_status() {
        let detail = classify_response(
            ResponseShape::ImageBytes,
            response(429, "application/json", br#"{"error":"rate limited"}"#.to_vec()),
        )
        .unwrap_err();
        assert_eq!(detail.kind, FailureKind::Upstream);
        assert_eq!(detail.status_code, Some(429));
        assert!(detail.message.contains("rate limited"));
        assert!(detail.message.contains("429"));
    }

    #[test]
    fn nested_and_message_error_fields_are_read() {
        let nested = classify_response(
            ResponseShape::ChatMessage,
            response(
                400,
                "application/json",
                br#"{"error":{"message":"bad model"}}"#.to_vec(),
            ),
        )
        .unwrap_err();
        assert_eq!(nested.upstream_message.as_deref(), Some("bad model"));

        let message = classify_response(
            ResponseShape::ChatMessage,
            response(500, "application/json", br#"{"message":"boom"}"#.to_vec()),
        )
        .unwrap_err();
        assert_eq!(message.upstream_message.as_deref(), Some("boom"));

        let list = classify_response(
            ResponseShape::ImageBytes,
            response(422, "application/json", br#"{"error":["a","b"]}"#.to_vec()),
        )
        .unwrap_err();
        assert_eq!(list.upstream_message.as_deref(), Some("a; b"));
    }

    #[test]
    fn unstructured_error_body_falls_back_to_generic() {
        let detail = classify_response(
            ResponseShape::ImageBytes,
            response(502, "text/html", b"<html>Bad Gateway</html>".to_vec()),
        )
        .unwrap_err();
        assert_eq!(detail.status_code, Some(502));
        assert!(detail.message.contains(GENERIC_UPSTREAM_MESSAGE));
        assert_eq!(detail.upstream_message, None);
    }

    #[test]
    fn json_on_image_success_is_an_upstream_error() {
        let detail = classify_response(
            ResponseShape::ImageBytes,
            response(
                200,
                "application/json",
                br#"{"error":"Model is currently loading"}"#.to_vec(),
            ),
        )
        .unwrap_err();
        assert_eq!(detail.status_code, Some(200));
        assert!(detail.message.contains("Model is currently loading"));
    }

    #[test]
    fn error_body_without_content_type_keeps_upstream_text() {
        let detail = classify_response(
            ResponseShape::ImageBytes,
            TransportResponse {
                status: 200,
                content_type: None,
                body: br#"{"error":"Model is currently loading"}"#.to_vec(),
            },
        )
        .unwrap_err();
        assert_eq!(detail.kind, FailureKind::Upstream);
        assert_eq!(
            detail.upstream_message.as_deref(),
            Some("Model is currently loading")
        );
        assert!(!detail.message.contains(UNEXPECTED_SHAPE_MESSAGE));
    }

    #[test]
    fn undecodable_image_is_a_shape_mismatch() {
        let detail = classify_response(
            ResponseShape::ImageBytes,
            response(200, "image/png", b"not an image".to_vec()),
        )
        .unwrap_err();
        assert_eq!(detail.kind, FailureKind::Upstream);
        assert!(detail.message.contains(UNEXPECTED_SHAPE_MESSAGE));
    }

    #[test]
    fn chat_success_extracts_message() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello there!"}}]
        });
        let result = classify_response(
            ResponseShape::ChatMessage,
            response(200, "application/json", serde_json::to_vec(&body).unwrap()),
        );
        assert_eq!(result, Ok(ResultArtifact::Message("Hello there!".to_string())));
    }

    #[test]
    fn chat_missing_fields_is_a_shape_mismatch() {
        for body in [br#"{"choices":[]}"#.to_vec(), b"not json".to_vec()] {
            let detail = classify_response(
                ResponseShape::ChatMessage,
                response(200, "application/json", body),
            )
            .unwrap_err();
            assert_eq!(detail.status_code, Some(200));
            assert!(detail.message.contains(UNEXPECTED_SHAPE_MESSAGE));
        }
    }

    #[test]
    fn text_generation_shapes_are_accepted() {
        assert_eq!(
            extract_chat_message(&json!([{"generated_text": "hi"}])),
            Some("hi".to_string())
        );
        assert_eq!(
            extract_chat_message(&json!({"generated_text": "yo"})),
            Some("yo".to_string())
        );
        assert_eq!(extract_chat_message(&json!({"choices": [{}]})), None);
    }
}
