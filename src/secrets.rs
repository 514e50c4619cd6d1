use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, InvalidHeaderValue};
use std::path::{Path, PathBuf};

const API_KEY_SUFFIX: &str = "api key";
const API_ENDPOINT_SUFFIX: &str = "api endpoint";

/// Files checked, in order, when no secrets file is given explicitly.
pub const DEFAULT_SECRETS_PATHS: &[&str] = &["secrets.md", "../secrets.md"];

#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("secrets file not found. Tried: {tried}")]
    NotFound { tried: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("api key is not a valid header value")]
    InvalidKey(#[from] InvalidHeaderValue),
}

/// Upstream credentials. The endpoint always ends in `/v1`.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_endpoint: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_endpoint", &self.api_endpoint)
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_endpoint: &str) -> Result<Self, SecretsError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(SecretsError::MissingField { field: "api key" });
        }
        let api_endpoint = normalize_endpoint(api_endpoint);
        if api_endpoint == "/v1" {
            return Err(SecretsError::MissingField {
                field: "api endpoint",
            });
        }
        let credentials = Credentials {
            api_key,
            api_endpoint,
        };
        credentials.auth_headers()?;
        Ok(credentials)
    }

    pub fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_endpoint)
    }

    pub fn auth_headers(&self) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Parse `key = value` lines. The first key ending in "api key" and the
    /// first ending in "api endpoint" (case-insensitive) are used.
    pub fn parse(content: &str) -> Result<Self, SecretsError> {
        let mut api_key = None;
        let mut api_endpoint = None;
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            if key.ends_with(API_KEY_SUFFIX) && api_key.is_none() {
                api_key = Some(value.to_string());
            } else if key.ends_with(API_ENDPOINT_SUFFIX) && api_endpoint.is_none() {
                api_endpoint = Some(value.to_string());
            }
        }
        let api_key = api_key.ok_or(SecretsError::MissingField { field: "api key" })?;
        let api_endpoint = api_endpoint.ok_or(SecretsError::MissingField {
            field: "api endpoint",
        })?;
        Self::new(api_key, &api_endpoint)
    }

    pub fn from_file(path: &Path) -> Result<Self, SecretsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SecretsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Load from an explicit file, or the first existing default location.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, SecretsError> {
        let candidates: Vec<PathBuf> = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => DEFAULT_SECRETS_PATHS.iter().map(PathBuf::from).collect(),
        };
        for path in &candidates {
            let exists = path.is_file();
            log::info!("{} {}", if exists { "found" } else { "missing" }, path.display());
            if exists {
                log::info!("Reading secrets from {}", path.display());
                return Self::from_file(path);
            }
        }
        Err(SecretsError::NotFound {
            tried: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.ends_with("/v1") {
        endpoint.to_string()
    } else {
        format!("{}/v1", endpoint)
    }
}
