//! Outbound HTTP POST requests.
//!
//! Requests are plain data (`OutboundRequest`) so the dispatcher can be driven
//! by a fake transport in tests. `UreqTransport` is the production transport.

use rand::RngCore;
use std::time::Duration;

use crate::transport::retry::AttemptOutcome;

#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Clone, Debug)]
pub enum RequestBody {
    Json(serde_json::Value),
    Multipart(MultipartForm),
}

/// `multipart/form-data` body with text fields and file parts.
#[derive(Clone, Debug, Default)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

#[derive(Clone, Debug)]
pub struct FilePart {
    pub name: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        self.files.push(FilePart {
            name: name.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode the body using `boundary`.
    pub fn encode(&self, boundary: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            out.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    escape_quotes(name)
                )
                .as_bytes(),
            );
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        for file in &self.files {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            out.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    escape_quotes(&file.name),
                    escape_quotes(&file.filename)
                )
                .as_bytes(),
            );
            out.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes());
            out.extend_from_slice(&file.bytes);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        out
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "%22").replace(['\r', '\n'], " ")
}

fn random_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("dwell-{}", hex::encode(bytes))
}

/// Executes one HTTP attempt. Retrying is the caller's concern.
pub trait HttpTransport: Send + Sync {
    fn post(&self, request: &OutboundRequest) -> AttemptOutcome;
}

/// Blocking transport backed by a `ureq` agent with a per-request timeout.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn post(&self, request: &OutboundRequest) -> AttemptOutcome {
        let mut req = self.agent.post(&request.url);
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }

        let result = match &request.body {
            RequestBody::Json(value) => match serde_json::to_vec(value) {
                Ok(bytes) => req
                    .set("Content-Type", "application/json")
                    .send_bytes(&bytes),
                Err(e) => return AttemptOutcome::TransportError(format!("encode json: {}", e)),
            },
            RequestBody::Multipart(form) => {
                let boundary = random_boundary();
                req.set(
                    "Content-Type",
                    &format!("multipart/form-data; boundary={boundary}"),
                )
                .send_bytes(&form.encode(&boundary))
            }
        };

        match result {
            Ok(response) if (200..300).contains(&response.status()) => AttemptOutcome::Delivered {
                status: response.status(),
            },
            Ok(response) => AttemptOutcome::Rejected {
                status: response.status(),
            },
            Err(ureq::Error::Status(status, _)) => AttemptOutcome::Rejected { status },
            Err(ureq::Error::Transport(err)) => AttemptOutcome::TransportError(err.to_string()),
        }
    }
}
