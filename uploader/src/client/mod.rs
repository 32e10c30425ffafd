//! Client for the remote contact ingestion endpoint.
//!
//! `POST {api_url}/contacts/upload` with a multipart body:
//!
//! | field            | value                                         |
//! |------------------|-----------------------------------------------|
//! | `arquivo`        | the chunk as a UTF-8 text file                |
//! | `incluir_nome`   | `"true"` / `"false"`                          |
//! | `pais_preferido` | locale hint or `"auto"`                       |
//! | `campaign_id`    | omitted when there is no campaign             |
//!
//! The response carries `contatos_validos`, `contatos_invalidos` and
//! `contatos_duplicados`.
//!
//! The client is an explicit value built from [`UploaderConfig`]; the
//! orchestrator only depends on the [`IngestClient`] trait.

use std::future::Future;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::UploaderConfig;
use crate::error::{ChunkTransportError, ConfigError, ConfigResult, TransportResult};

/// Parameters shared by every chunk of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    /// Target campaign; `None` uploads without an associated campaign
    pub campaign_id: Option<String>,
    /// Country hint for number normalization, `"auto"` to let the server decide
    pub country: String,
    /// Whether the file carries a name column
    pub include_name: bool,
    /// Original file name, used to name chunk files
    pub file_name: String,
}

impl Default for UploadParams {
    fn default() -> Self {
        Self {
            campaign_id: None,
            country: "auto".to_string(),
            include_name: false,
            file_name: "contatos.txt".to_string(),
        }
    }
}

/// One chunk materialized as an independent upload unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub chunk_index: usize,
    /// File name sent in the `arquivo` part
    pub file_name: String,
    /// Chunk lines, newline-terminated
    pub payload: Vec<u8>,
    /// Number of lines in `payload`
    pub line_count: usize,
    pub params: UploadParams,
}

impl ChunkRequest {
    /// Build the multipart form expected by the endpoint.
    pub fn to_form(&self) -> TransportResult<Form> {
        let part = Part::bytes(self.payload.clone())
            .file_name(self.file_name.clone())
            .mime_str("text/plain; charset=utf-8")
            .map_err(|e| ChunkTransportError::Transport(e.to_string()))?;

        let mut form = Form::new()
            .part("arquivo", part)
            .text("incluir_nome", self.params.include_name.to_string())
            .text("pais_preferido", self.params.country.clone());

        if let Some(ref campaign_id) = self.params.campaign_id {
            form = form.text("campaign_id", campaign_id.clone());
        }

        Ok(form)
    }
}

/// Name of the file carrying chunk `index` of `original`.
///
/// `lista.csv`, chunk 0 → `lista_part0001.csv`
pub fn chunk_file_name(original: &str, index: usize) -> String {
    let (stem, ext) = match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (original, "txt"),
    };
    format!("{}_part{:04}.{}", stem, index + 1, ext)
}

/// Raw endpoint response. Every count is optional; extra fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub contatos_validos: Option<usize>,
    #[serde(default)]
    pub contatos_invalidos: Option<usize>,
    #[serde(default)]
    pub contatos_duplicados: Option<usize>,
}

/// Counts reported for one chunk, plus the names of fields that were
/// missing and defaulted to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestCounts {
    pub valid: usize,
    pub invalid: usize,
    pub duplicate: usize,
    pub missing_fields: Vec<&'static str>,
}

impl IngestCounts {
    pub fn new(valid: usize, invalid: usize, duplicate: usize) -> Self {
        Self {
            valid,
            invalid,
            duplicate,
            missing_fields: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.valid + self.invalid + self.duplicate
    }
}

impl From<IngestResponse> for IngestCounts {
    fn from(response: IngestResponse) -> Self {
        let mut missing_fields = Vec::new();
        let mut take = |value: Option<usize>, name: &'static str| {
            value.unwrap_or_else(|| {
                missing_fields.push(name);
                0
            })
        };

        let valid = take(response.contatos_validos, "contatos_validos");
        let invalid = take(response.contatos_invalidos, "contatos_invalidos");
        let duplicate = take(response.contatos_duplicados, "contatos_duplicados");

        Self {
            valid,
            invalid,
            duplicate,
            missing_fields,
        }
    }
}

/// Parse a 2xx body into counts.
pub fn parse_counts(body: &str) -> TransportResult<IngestCounts> {
    serde_json::from_str::<IngestResponse>(body)
        .map(IngestCounts::from)
        .map_err(|e| ChunkTransportError::InvalidBody(e.to_string()))
}

/// Something that can ingest one chunk.
pub trait IngestClient: Send + Sync {
    /// Send one chunk and return the counts reported for it.
    fn upload_chunk(
        &self,
        request: &ChunkRequest,
    ) -> impl Future<Output = TransportResult<IngestCounts>> + Send;
}

/// `reqwest`-backed client for the real endpoint.
#[derive(Debug, Clone)]
pub struct HttpIngestClient {
    http: reqwest::Client,
    upload_url: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpIngestClient {
    /// Build a client from configuration.
    pub fn new(config: &UploaderConfig) -> ConfigResult<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("listload/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            http,
            upload_url: config.upload_url(),
            api_token: config.api_token.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    fn map_error(&self, err: reqwest::Error) -> ChunkTransportError {
        if err.is_timeout() {
            ChunkTransportError::Timeout(self.timeout)
        } else {
            ChunkTransportError::Transport(err.to_string())
        }
    }
}

impl IngestClient for HttpIngestClient {
    async fn upload_chunk(&self, request: &ChunkRequest) -> TransportResult<IngestCounts> {
        let mut builder = self
            .http
            .post(&self.upload_url)
            .header("Accept", "application/json")
            .multipart(request.to_form()?);

        if let Some(ref token) = self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            return Err(ChunkTransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        parse_counts(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_deserialization() {
        let body = r#"{
            "contatos_validos": 480,
            "contatos_invalidos": 15,
            "contatos_duplicados": 5,
            "total_linhas": 500,
            "mensagem": "ok"
        }"#;

        let counts = parse_counts(body).unwrap();
        assert_eq!(counts, IngestCounts::new(480, 15, 5));
        assert_eq!(counts.total(), 500);
    }

    #[test]
    fn test_missing_counts_default_to_zero() {
        let counts = parse_counts(r#"{"contatos_validos": 10}"#).unwrap();
        assert_eq!(counts.valid, 10);
        assert_eq!(counts.invalid, 0);
        assert_eq!(counts.duplicate, 0);
        assert_eq!(
            counts.missing_fields,
            vec!["contatos_invalidos", "contatos_duplicados"]
        );
    }

    #[test]
    fn test_non_json_body_is_invalid() {
        let err = parse_counts("<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ChunkTransportError::InvalidBody(_)));
    }

    #[test]
    fn test_chunk_file_name() {
        assert_eq!(chunk_file_name("lista.csv", 0), "lista_part0001.csv");
        assert_eq!(chunk_file_name("base.final.txt", 153), "base.final_part0154.txt");
        assert_eq!(chunk_file_name("numeros", 2), "numeros_part0003.txt");
    }

    #[test]
    fn test_client_rejects_bad_url() {
        let config = UploaderConfig {
            api_url: "not a url".to_string(),
            ..UploaderConfig::default()
        };
        assert!(HttpIngestClient::new(&config).is_err());
    }

    #[test]
    fn test_client_upload_url() {
        let config = UploaderConfig {
            api_url: "http://127.0.0.1:9000/".to_string(),
            ..UploaderConfig::default()
        };
        let client = HttpIngestClient::new(&config).unwrap();
        assert_eq!(client.upload_url(), "http://127.0.0.1:9000/contacts/upload");
    }

    #[test]
    fn test_form_builds_without_campaign() {
        let request = ChunkRequest {
            chunk_index: 0,
            file_name: "lista_part0001.txt".to_string(),
            payload: b"11999990001\n".to_vec(),
            line_count: 1,
            params: UploadParams::default(),
        };
        assert!(request.to_form().is_ok());
    }
}
