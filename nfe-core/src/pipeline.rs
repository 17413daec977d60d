//! Multi-phase NF-e validation: schema, parse, access key, SEFAZ status.
use crate::{
    api::{RemoteStatus, SefazClient, SefazError},
    config::Config,
    document::{
        AccessKey, Envelope, KeyError, ParsedFields,
        parse::{ParseError, parse_document},
        schema::{SchemaError, SchemaValidator, XsdSchemaValidator},
    },
    tls::TrustStoreBuilder,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    SchemaCheck,
    Parse,
    KeyDerive,
    RemoteQuery,
    Done,
}

/// How far the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Schema check only.
    SchemaOnly,
    /// Schema, parse and access key; no network.
    Offline,
    /// Every phase, including the SEFAZ status query.
    #[default]
    Full,
}

impl ValidationMode {
    pub fn parses(&self) -> bool {
        !matches!(self, ValidationMode::SchemaOnly)
    }

    pub fn queries_remote(&self) -> bool {
        matches!(self, ValidationMode::Full)
    }
}

/// Per-call pipeline options.
///
/// # Examples
/// ```rust
/// use nfe_core::pipeline::{ValidationMode, ValidationOptions};
///
/// let options = ValidationOptions::new(ValidationMode::Offline).require_access_key(false);
/// assert_eq!(options.mode(), ValidationMode::Offline);
/// assert!(!options.requires_access_key());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    mode: ValidationMode,
    require_access_key: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self::new(ValidationMode::default())
    }
}

impl ValidationOptions {
    /// Options for `mode`; a missing access key is an error.
    pub fn new(mode: ValidationMode) -> Self {
        Self {
            mode,
            require_access_key: true,
        }
    }

    /// Whether a document without a derivable access key fails at [`Phase::KeyDerive`].
    ///
    /// When disabled such a document finishes with its parsed fields and no remote query.
    pub fn require_access_key(mut self, required: bool) -> Self {
        self.require_access_key = required;
        self
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn requires_access_key(&self) -> bool {
        self.require_access_key
    }
}

/// Terminal error of a pipeline run, tagged by the phase that produced it.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("XML does not conform to the XSD: {0}")]
    Schema(#[from] SchemaError),
    #[error("failed to parse NF-e: {0}")]
    Parse(#[from] ParseError),
    #[error("access key not found in the XML (infNFe/@Id)")]
    MissingAccessKey,
    #[error("invalid access key {key}: {source}")]
    AccessKey {
        key: String,
        #[source]
        source: KeyError,
    },
    #[error("SEFAZ communication failed: {0}")]
    Remote(#[from] SefazError),
    #[error("SEFAZ client is not configured")]
    RemoteUnavailable,
}

impl PhaseError {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseError::Schema(_) => Phase::SchemaCheck,
            PhaseError::Parse(_) => Phase::Parse,
            PhaseError::MissingAccessKey | PhaseError::AccessKey { .. } => Phase::KeyDerive,
            PhaseError::Remote(_) | PhaseError::RemoteUnavailable => Phase::RemoteQuery,
        }
    }
}

/// Outcome of one pipeline run.
///
/// Output of every phase that completed is kept even when a later phase fails.
#[derive(Debug)]
pub struct ValidationResult {
    mode: ValidationMode,
    schema_valid: bool,
    envelope: Option<Envelope>,
    fields: Option<ParsedFields>,
    access_key: Option<AccessKey>,
    remote_status: Option<RemoteStatus>,
    error: Option<PhaseError>,
}

impl ValidationResult {
    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn schema_valid(&self) -> bool {
        self.schema_valid
    }

    pub fn envelope(&self) -> Option<Envelope> {
        self.envelope
    }

    pub fn fields(&self) -> Option<&ParsedFields> {
        self.fields.as_ref()
    }

    pub fn access_key(&self) -> Option<&AccessKey> {
        self.access_key.as_ref()
    }

    pub fn remote_status(&self) -> Option<&RemoteStatus> {
        self.remote_status.as_ref()
    }

    pub fn error(&self) -> Option<&PhaseError> {
        self.error.as_ref()
    }

    /// Phase that terminated the run, if any failed.
    pub fn failed_phase(&self) -> Option<Phase> {
        self.error.as_ref().map(PhaseError::phase)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Serializable view with the stable report keys.
    pub fn report(&self) -> ValidationReport {
        let remote = match (&self.remote_status, &self.error) {
            (Some(status), _) => StatusReport::from(status),
            (None, None) if !self.mode.queries_remote() => StatusReport::not_queried(),
            _ => StatusReport::default(),
        };
        ValidationReport {
            document_type: self
                .fields
                .as_ref()
                .map_or(DEFAULT_DOCUMENT_TYPE, ParsedFields::document_type)
                .to_string(),
            access_key: self
                .access_key
                .as_ref()
                .map(|key| key.as_str().to_string())
                .unwrap_or_default(),
            schema_valid: self.schema_valid,
            remote,
            fields: self.fields.clone(),
            error: self.error.as_ref().map(ToString::to_string),
        }
    }
}

const DEFAULT_DOCUMENT_TYPE: &str = "nfe";
const NOT_QUERIED_CODE: &str = "N/A";
const NOT_QUERIED_MESSAGE: &str = "SEFAZ status not queried";

/// Wire shape of a [`ValidationResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(rename = "tipo")]
    document_type: String,
    #[serde(rename = "chave_acesso")]
    access_key: String,
    #[serde(rename = "valido_xsd")]
    schema_valid: bool,
    #[serde(rename = "sefaz")]
    remote: StatusReport,
    #[serde(rename = "dados_xml", default, skip_serializing_if = "Option::is_none")]
    fields: Option<ParsedFields>,
    #[serde(rename = "erro", default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ValidationReport {
    /// Report for a failure that happened before any phase ran (e.g. an unreadable file).
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            document_type: DEFAULT_DOCUMENT_TYPE.to_string(),
            access_key: String::new(),
            schema_valid: false,
            remote: StatusReport::default(),
            fields: None,
            error: Some(message.into()),
        }
    }

    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn schema_valid(&self) -> bool {
        self.schema_valid
    }

    pub fn remote(&self) -> &StatusReport {
        &self.remote
    }

    pub fn fields(&self) -> Option<&ParsedFields> {
        self.fields.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Wire shape of the SEFAZ status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "autorizado")]
    authorized: bool,
    #[serde(rename = "codigo")]
    code: String,
    #[serde(rename = "mensagem")]
    message: String,
}

impl StatusReport {
    fn not_queried() -> Self {
        Self {
            authorized: false,
            code: NOT_QUERIED_CODE.to_string(),
            message: NOT_QUERIED_MESSAGE.to_string(),
        }
    }

    pub fn authorized(&self) -> bool {
        self.authorized
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&RemoteStatus> for StatusReport {
    fn from(status: &RemoteStatus) -> Self {
        Self {
            authorized: status.is_authorized(),
            code: status.code().to_string(),
            message: status.message().to_string(),
        }
    }
}

/// Output accumulated while phases run; frozen into a [`ValidationResult`] at the end.
struct Progress {
    mode: ValidationMode,
    schema_valid: bool,
    envelope: Option<Envelope>,
    fields: Option<ParsedFields>,
    access_key: Option<AccessKey>,
    remote_status: Option<RemoteStatus>,
}

impl Progress {
    fn new(mode: ValidationMode) -> Self {
        Self {
            mode,
            schema_valid: false,
            envelope: None,
            fields: None,
            access_key: None,
            remote_status: None,
        }
    }

    fn finish(self, error: Option<PhaseError>) -> ValidationResult {
        ValidationResult {
            mode: self.mode,
            schema_valid: self.schema_valid,
            envelope: self.envelope,
            fields: self.fields,
            access_key: self.access_key,
            remote_status: self.remote_status,
            error,
        }
    }
}

/// Runs the validation phases in order.
///
/// The pipeline holds no per-call state; one instance can validate many documents, from
/// several threads when `S` allows it.
///
/// # Examples
/// ```rust,no_run
/// use nfe_core::config::{Config, EnvironmentType};
/// use nfe_core::document::schema::XsdSchemaValidator;
/// use nfe_core::pipeline::{ValidationOptions, ValidationPipeline};
/// use std::path::Path;
///
/// let config = Config::load(EnvironmentType::Production, Path::new("."))?;
/// let pipeline = ValidationPipeline::connect(
///     XsdSchemaValidator,
///     "schemas/procNFe_v4.00.xsd",
///     &config,
/// )?;
/// let result = pipeline.validate_file(Path::new("nota.xml"), ValidationOptions::default())?;
/// println!("{}", serde_json::to_string_pretty(&result.report())?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct ValidationPipeline<S = XsdSchemaValidator> {
    schema: S,
    schema_path: PathBuf,
    sefaz: Option<SefazClient>,
}

impl<S: SchemaValidator> ValidationPipeline<S> {
    /// Pipeline without a SEFAZ client; full-mode runs stop at [`Phase::RemoteQuery`].
    pub fn new(schema: S, schema_path: impl Into<PathBuf>) -> Self {
        Self {
            schema,
            schema_path: schema_path.into(),
            sefaz: None,
        }
    }

    pub fn with_sefaz(mut self, client: SefazClient) -> Self {
        self.sefaz = Some(client);
        self
    }

    /// Build the trust store and SEFAZ client from `config`.
    ///
    /// # Errors
    /// Fails with [`crate::Error::Trust`] if the certificates cannot be loaded and
    /// [`crate::Error::Api`] if the client cannot be built or no status URL is configured.
    pub fn connect(
        schema: S,
        schema_path: impl Into<PathBuf>,
        config: &Config,
    ) -> Result<Self, crate::Error> {
        let trust = TrustStoreBuilder::from_config(config).build()?;
        let client = SefazClient::from_config(config, &trust)?;
        Ok(Self::new(schema, schema_path).with_sefaz(client))
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    pub fn sefaz(&self) -> Option<&SefazClient> {
        self.sefaz.as_ref()
    }

    /// Validate an in-memory document.
    ///
    /// Never fails: the terminal error, if any, is part of the returned result.
    pub fn validate(&self, document: &[u8], options: ValidationOptions) -> ValidationResult {
        let mut progress = Progress::new(options.mode());
        let outcome = self.run(document, options, &mut progress);
        if let Err(err) = &outcome {
            info!(phase = ?err.phase(), error = %err, "validation stopped");
        }
        progress.finish(outcome.err())
    }

    /// Read and validate a document file.
    ///
    /// # Errors
    /// Returns the I/O error if the file cannot be read; no phase has run at that point.
    pub fn validate_file(
        &self,
        path: &Path,
        options: ValidationOptions,
    ) -> std::io::Result<ValidationResult> {
        let document = std::fs::read(path)?;
        debug!(path = %path.display(), bytes = document.len(), "validating file");
        Ok(self.validate(&document, options))
    }

    /// Query SEFAZ for a caller-supplied key, without a document.
    ///
    /// # Errors
    /// Returns [`PhaseError::AccessKey`] for a malformed key, [`PhaseError::RemoteUnavailable`]
    /// without a client and [`PhaseError::Remote`] if the query fails.
    pub fn check_key(&self, key: &str) -> Result<RemoteStatus, PhaseError> {
        let key = AccessKey::parse(key).map_err(|source| PhaseError::AccessKey {
            key: key.trim().to_string(),
            source,
        })?;
        self.query(&key)
    }

    fn run(
        &self,
        document: &[u8],
        options: ValidationOptions,
        progress: &mut Progress,
    ) -> Result<(), PhaseError> {
        debug!(phase = ?Phase::SchemaCheck, schema = %self.schema_path.display());
        self.schema.validate(document, &self.schema_path)?;
        progress.schema_valid = true;
        if !options.mode().parses() {
            debug!(phase = ?Phase::Done, "schema-only run finished");
            return Ok(());
        }

        debug!(phase = ?Phase::Parse);
        let parsed = parse_document(document)?;
        progress.envelope = Some(parsed.envelope());
        let derived = parsed.access_key();
        progress.fields = Some(parsed.into_fields());

        debug!(phase = ?Phase::KeyDerive);
        let Some(key) = derived else {
            if options.requires_access_key() {
                return Err(PhaseError::MissingAccessKey);
            }
            warn!("document has no derivable access key, skipping remote query");
            return Ok(());
        };
        let checked = key.validate();
        progress.access_key = Some(key.clone());
        checked.map_err(|source| PhaseError::AccessKey {
            key: key.as_str().to_string(),
            source,
        })?;

        if !options.mode().queries_remote() {
            debug!(phase = ?Phase::Done, "offline run finished");
            return Ok(());
        }

        debug!(phase = ?Phase::RemoteQuery);
        progress.remote_status = Some(self.query(&key)?);
        debug!(phase = ?Phase::Done);
        Ok(())
    }

    fn query(&self, key: &AccessKey) -> Result<RemoteStatus, PhaseError> {
        let client = self.sefaz.as_ref().ok_or(PhaseError::RemoteUnavailable)?;
        let status = client.query_status(key)?;
        info!(%key, code = status.code(), category = ?status.category(), "SEFAZ status received");
        Ok(status)
    }
}
