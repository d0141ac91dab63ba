//! Stream registration with the external catalogue service.
//!
//! The relay announces where viewers can pull the stream once it is being
//! published. Registration is best-effort: every failure is logged and
//! reported as an outcome, never as an error.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const REGISTER_PATH: &str = "/api/streams";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRegistration {
    pub stream_name: String,
    pub rtsp_url: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered { status: u16, body: String },
    Rejected { status: u16, body: String },
    Failed { error: String },
}

impl RegistrationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

impl fmt::Display for RegistrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { status, .. } => write!(f, "registered (HTTP {})", status),
            Self::Rejected { status, .. } => write!(f, "rejected (HTTP {})", status),
            Self::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// `rtsp://host:port/path` as the media server re-publishes the stream.
pub fn rtsp_access_url(host: &str, port: u16, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!("rtsp://{}:{}{}", host, port, path)
}

pub struct RegistryClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl RegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .redirects(0)
            .build();
        Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), REGISTER_PATH),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn register(&self, registration: &StreamRegistration) -> RegistrationOutcome {
        let outcome = self.send(registration);
        match &outcome {
            RegistrationOutcome::Registered { status, body } => {
                log::info!("stream '{}' registered (HTTP {})", registration.stream_name, status);
                log::debug!("registry response: {}", body);
            }
            RegistrationOutcome::Rejected { status, body } => {
                log::error!(
                    "failed to register stream '{}': server responded with HTTP {}: {}",
                    registration.stream_name,
                    status,
                    body
                );
            }
            RegistrationOutcome::Failed { error } => {
                log::error!("error during stream registration: {}", error);
            }
        }
        outcome
    }

    fn send(&self, registration: &StreamRegistration) -> RegistrationOutcome {
        let body = match serde_json::to_string(registration) {
            Ok(body) => body,
            Err(err) => {
                return RegistrationOutcome::Failed {
                    error: format!("serialize registration: {}", err),
                }
            }
        };
        log::info!("sending registration to {}: {}", self.endpoint, body);
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&body);
        let (status, response) = match response {
            Ok(response) => (response.status(), response),
            Err(ureq::Error::Status(status, response)) => (status, response),
            Err(err) => {
                return RegistrationOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        let body = response.into_string().unwrap_or_default();
        if (200..300).contains(&status) {
            RegistrationOutcome::Registered { status, body }
        } else {
            RegistrationOutcome::Rejected { status, body }
        }
    }
}
