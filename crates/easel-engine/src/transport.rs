use anyhow::Context;
use easel_contracts::input::ImageInput;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::config::ApiToken;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// One `image` file part plus plain text fields.
    Multipart {
        image: ImageInput,
        fields: Vec<(String, String)>,
    },
}

impl RequestBody {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => "json",
            RequestBody::Multipart { .. } => "multipart",
        }
    }
}

/// One fully-shaped POST to the inference service.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub url: String,
    pub token: ApiToken,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|value| value.to_ascii_lowercase().contains("json"))
            .unwrap_or(false)
    }
}

/// No response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(error_chain_text(err, 512))
    }
}

/// Seam between the controller and the network.
pub trait InferenceTransport: Send + Sync {
    fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    /// Client without a request timeout; a call that never resolves keeps
    /// the controller in flight.
    pub fn new() -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(None::<std::time::Duration>)
            .build()
            .context("failed building HTTP client")?;
        Ok(Self { http })
    }

    fn multipart_form(
        image: &ImageInput,
        fields: &[(String, String)],
    ) -> Result<MultipartForm, TransportError> {
        let mut form = MultipartForm::new();
        for (key, value) in fields {
            form = form.text(key.clone(), value.clone());
        }
        let mut part = MultipartPart::bytes(image.bytes.clone()).file_name(image.file_name.clone());
        if let Some(mime) = image.mime_type.as_deref() {
            part = part
                .mime_str(mime)
                .map_err(|err| TransportError::new(format!("invalid mime '{mime}': {err}")))?;
        }
        Ok(form.part("image", part))
    }
}

impl InferenceTransport for HttpTransport {
    fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let builder = self
            .http
            .post(&request.url)
            .bearer_auth(request.token.expose());
        let builder = match &request.body {
            RequestBody::Json(payload) => builder.json(payload),
            RequestBody::Multipart { image, fields } => {
                builder.multipart(Self::multipart_form(image, fields)?)
            }
        };

        let response = builder
            .send()
            .map_err(|err| TransportError::from_error(&err))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .map_err(|err| TransportError::from_error(&err))?
            .to_vec();
        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Joins an error and its sources, skipping blank and repeated links.
pub fn error_chain_text(err: &(dyn std::error::Error + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    if parts.is_empty() {
        return easel_contracts::failure::truncate_text(&err.to_string(), max_chars);
    }
    easel_contracts::failure::truncate_text(&parts.join(" | caused by: "), max_chars)
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    use easel_contracts::input::ImageInput;
    use serde_json::json;

    use super::{
        error_chain_text, HttpTransport, InferenceTransport, OutboundRequest, RequestBody,
        TransportResponse,
    };
    use crate::config::ApiToken;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    /// Accepts one connection, records the raw request and answers with
    /// the given status, content type and body.
    fn serve_once(
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> anyhow::Result<(String, JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return String::new();
            };
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                head.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut request_body = vec![0u8; content_length];
            let _ = reader.read_exact(&mut request_body);
            head.push_str(&String::from_utf8_lossy(&request_body));

            let mut stream = reader.into_inner();
            let header = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes());
            let _ = stream.write_all(&body);
            let _ = stream.flush();
            head
        });
        Ok((format!("http://{addr}/models/test"), handle))
    }

    fn token() -> ApiToken {
        ApiToken::new("hf_test_token").unwrap()
    }

    #[test]
    fn json_request_carries_bearer_and_body() -> anyhow::Result<()> {
        let (url, server) = serve_once(200, "image/png", vec![1, 2, 3])?;
        let transport = HttpTransport::new()?;
        let response = transport.send(&OutboundRequest {
            url,
            token: token(),
            body: RequestBody::Json(json!({"inputs": "a cat in a spacesuit"})),
        })?;
        let raw = server.join().unwrap_or_default();

        assert_eq!(
            response,
            TransportResponse {
                status: 200,
                content_type: Some("image/png".to_string()),
                body: vec![1, 2, 3],
            }
        );
        assert!(raw.starts_with("POST /models/test"));
        assert!(raw
            .to_ascii_lowercase()
            .contains("authorization: bearer hf_test_token"));
        assert!(raw.contains("\"inputs\":\"a cat in a spacesuit\""));
        Ok(())
    }

    #[test]
    fn multipart_request_carries_image_and_fields() -> anyhow::Result<()> {
        let (url, server) = serve_once(503, "application/json", br#"{"error":"busy"}"#.to_vec())?;
        let transport = HttpTransport::new()?;
        let response = transport.send(&OutboundRequest {
            url,
            token: token(),
            body: RequestBody::Multipart {
                image: ImageInput::new(b"PNGDATA".to_vec(), "input.png"),
                fields: vec![("inputs".to_string(), "sharpen".to_string())],
            },
        })?;
        let raw = server.join().unwrap_or_default();

        assert_eq!(response.status, 503);
        assert!(response.is_json());
        assert!(!response.is_success());
        assert!(raw.contains("name=\"image\"; filename=\"input.png\""));
        assert!(raw.contains("name=\"inputs\""));
        assert!(raw.contains("sharpen"));
        assert!(raw.contains("PNGDATA"));
        Ok(())
    }

    #[test]
    fn refused_connection_is_a_transport_error() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let transport = HttpTransport::new()?;
        let err = transport
            .send(&OutboundRequest {
                url: format!("http://{addr}/models/test"),
                token: token(),
                body: RequestBody::Json(json!({"inputs": "x"})),
            })
            .unwrap_err();
        assert!(!err.message.is_empty());
        assert!(err.message.contains("127.0.0.1"));
        Ok(())
    }

    #[test]
    fn error_chain_text_joins_sources() {
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(
            error_chain_text(&err, 200),
            "outer failure | caused by: connection refused"
        );
        let short = error_chain_text(&err, 5);
        assert_eq!(short, "outer…");
    }
}
