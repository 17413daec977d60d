//! SEFAZ status web service client (`NFeConsultaProtocolo4`).
mod status;

pub use status::*;

use crate::{
    config::{Config, EnvironmentType, STATUS_URL_VAR},
    document::AccessKey,
    tls::TrustBundle,
};
use reqwest::{blocking::Client, header::CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Per-call timeout, connection included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// SOAP action advertised in the `Content-Type` of status queries.
pub const SOAP_ACTION: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/NfeConsultaNFe4/nfeConsultaNF";

const SERVICE_NAME: &str = "CONSULTAR";

/// Errors returned by the SEFAZ client.
#[derive(Error, Debug)]
pub enum SefazError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Client state error: {0}")]
    ClientState(String),
}

/// Status query request body for `key`.
///
/// The envelope is emitted without any whitespace between elements; some SEFAZ endpoints
/// reject bodies that contain it.
pub fn status_request_body(env: EnvironmentType, key: &AccessKey) -> String {
    format!(
        concat!(
            r#"<soap12:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:soap12="http://www.w3.org/2003/05/soap-envelope">"#,
            r#"<soap12:Body>"#,
            r#"<nfeDadosMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/NFeConsultaProtocolo4">"#,
            r#"<consSitNFe xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">"#,
            r#"<tpAmb>{tp_amb}</tpAmb><xServ>{service}</xServ><chNFe>{key}</chNFe>"#,
            r#"</consSitNFe></nfeDadosMsg></soap12:Body></soap12:Envelope>"#,
        ),
        tp_amb = env.tp_amb(),
        service = SERVICE_NAME,
        key = key.as_str(),
    )
}

/// `Content-Type` header value for status queries.
pub fn status_content_type() -> String {
    format!("application/soap+xml; charset=utf-8; action=\"{SOAP_ACTION}\"")
}

/// Blocking SEFAZ client authenticated with a [`TrustBundle`].
///
/// Connections are pooled and reused across queries; a single client can be shared between
/// threads.
///
/// # Examples
/// ```rust,no_run
/// use nfe_core::api::SefazClient;
/// use nfe_core::config::{Config, EnvironmentType};
/// use nfe_core::document::AccessKey;
/// use nfe_core::tls::TrustStoreBuilder;
///
/// let config = Config::load(EnvironmentType::Production, std::path::Path::new("."))?;
/// let trust = TrustStoreBuilder::from_config(&config).build()?;
/// let client = SefazClient::from_config(&config, &trust)?;
/// let key = AccessKey::parse("35250732409620000175550010000037471011544648")?;
/// let status = client.query_status(&key)?;
/// println!("{} {}", status.code(), status.message());
/// # Ok::<(), nfe_core::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct SefazClient {
    client: Client,
    env: EnvironmentType,
    status_url: String,
}

impl SefazClient {
    /// Build a client for the status endpoint at `status_url`.
    ///
    /// # Errors
    /// Returns [`SefazError::Http`] if the TLS configuration is rejected by the HTTP client.
    pub fn new(
        trust: &TrustBundle,
        env: EnvironmentType,
        status_url: impl Into<String>,
    ) -> Result<Self, SefazError> {
        let builder = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST);
        let client = trust.configure(builder).build()?;
        Ok(Self {
            client,
            env,
            status_url: status_url.into(),
        })
    }

    /// Build a client from the configured status URL and environment.
    ///
    /// # Errors
    /// Returns [`SefazError::ClientState`] when no status URL is configured.
    pub fn from_config(config: &Config, trust: &TrustBundle) -> Result<Self, SefazError> {
        let url = config
            .status_url()
            .ok_or_else(|| SefazError::ClientState(format!("{STATUS_URL_VAR} is not configured")))?;
        Self::new(trust, config.env(), url)
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    /// Ask SEFAZ for the current status of `key`.
    ///
    /// A single attempt is made. Any body that comes back is decoded, whatever the HTTP status.
    ///
    /// # Errors
    /// Returns [`SefazError::Network`] if the request cannot be sent or the body cannot be read.
    pub fn query_status(&self, key: &AccessKey) -> Result<RemoteStatus, SefazError> {
        debug!(url = %self.status_url, %key, env = self.env.as_str(), "querying SEFAZ status");
        let response = self
            .client
            .post(&self.status_url)
            .header(CONTENT_TYPE, status_content_type())
            .body(status_request_body(self.env, key))
            .send()
            .map_err(|e| SefazError::Network(format!("request to {} failed: {e}", self.status_url)))?;

        let http_status = response.status();
        let body = response
            .text()
            .map_err(|e| SefazError::Network(format!("failed to read SEFAZ response: {e}")))?;
        debug!(%http_status, %body, "SEFAZ response");
        if !http_status.is_success() {
            warn!(%http_status, "SEFAZ answered with a non-success status");
        }

        Ok(RemoteStatus::from_response(&body))
    }
}
