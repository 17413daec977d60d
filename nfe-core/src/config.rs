//! Configuration and environment selection.
use crate::document::only_digits;
use java_properties::read;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::warn;

/// SEFAZ environment selection.
/// This determines the environment indicator (`tpAmb`) sent in status queries and which
/// `.env.<label>` file [`Config::load`] reads.
/// - Production: documents with legal validity.
/// - Homologation: SEFAZ's test environment, documents carry no fiscal value.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use nfe_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("homolog")?;
/// assert_eq!(env, EnvironmentType::Homologation);
/// assert_eq!(env.tp_amb(), 2);
/// # Ok::<(), nfe_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvironmentType {
    #[default]
    Production,
    Homologation,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(EnvironmentType::Production),
            "homolog" | "homologation" | "homologacao" => Ok(EnvironmentType::Homologation),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "production",
            EnvironmentType::Homologation => "homolog",
        }
    }

    /// Value of the `tpAmb` field in SEFAZ requests.
    pub fn tp_amb(&self) -> u8 {
        match self {
            EnvironmentType::Production => 1,
            EnvironmentType::Homologation => 2,
        }
    }

    pub fn env_file_name(&self) -> String {
        format!(".env.{}", self.as_str())
    }
}

/// Errors raised while assembling a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Environment(#[from] EnvironmentParseError),

    #[error("failed to open environment file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse environment file '{path}': {source}")]
    PropertiesRead {
        path: PathBuf,
        #[source]
        source: java_properties::PropertiesError,
    },

    #[error("missing required configuration variable '{key}'")]
    MissingVariable { key: &'static str },
}

pub const CERT_DIR_VAR: &str = "NFE_CERT_DIR";
pub const CERT_KEY_FILE_VAR: &str = "NFE_CERT_KEY_FILE";
pub const CERT_PUB_FILE_VAR: &str = "NFE_CERT_PUB_FILE";
pub const CNPJ_VAR: &str = "NFE_CNPJ";
pub const UF_VAR: &str = "NFE_UF_IBGE";
pub const STATUS_URL_VAR: &str = "SEFAZ_CONSULTA_URL";
pub const DISTRIBUTION_URL_VAR: &str = "SEFAZ_DIST_URL";

/// Configuration for the trust store and the SEFAZ client.
///
/// Built once at the program entry point and passed by reference; nothing in this crate reads
/// process-wide state after that.
///
/// # Examples
/// ```rust
/// use nfe_core::config::{Config, EnvironmentType};
///
/// let config = Config::new(EnvironmentType::Homologation, "cert", "key.pem", "cert.pem")
///     .with_status_url("https://homologacao.nfe.fazenda.sp.gov.br/ws/nfeconsultaprotocolo4.asmx")
///     .with_jurisdiction("35");
/// assert_eq!(config.key_path(), std::path::Path::new("cert/key.pem"));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    env: EnvironmentType,
    cert_dir: PathBuf,
    key_file: String,
    cert_file: String,
    cnpj: Option<String>,
    jurisdiction: Option<String>,
    status_url: Option<String>,
    distribution_url: Option<String>,
    system_roots: bool,
}

impl Config {
    pub fn new(
        env: EnvironmentType,
        cert_dir: impl Into<PathBuf>,
        key_file: impl Into<String>,
        cert_file: impl Into<String>,
    ) -> Self {
        Self {
            env,
            cert_dir: cert_dir.into(),
            key_file: key_file.into(),
            cert_file: cert_file.into(),
            cnpj: None,
            jurisdiction: None,
            status_url: None,
            distribution_url: None,
            system_roots: true,
        }
    }

    /// Load configuration for `env`, reading `<dir>/.env.<env>` when present.
    ///
    /// Process environment variables win over values from the file. A missing file only logs
    /// a warning.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file exists but cannot be read or parsed, or if a required
    /// variable is absent from both sources.
    pub fn load(env: EnvironmentType, dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(env.env_file_name());
        let file_vars = read_env_file(&path)?.unwrap_or_else(|| {
            warn!(path = %path.display(), "environment file not found, using process environment");
            HashMap::new()
        });
        Self::from_lookup(env, |key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingVariable`] when one of the certificate variables is
    /// absent or blank.
    pub fn from_lookup(
        env: EnvironmentType,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::MissingVariable { key });

        let mut config = Self::new(
            env,
            required(CERT_DIR_VAR)?,
            required(CERT_KEY_FILE_VAR)?,
            required(CERT_PUB_FILE_VAR)?,
        );
        config.cnpj = get(CNPJ_VAR).map(|value| only_digits(&value));
        config.jurisdiction = get(UF_VAR);
        config.status_url = get(STATUS_URL_VAR);
        config.distribution_url = get(DISTRIBUTION_URL_VAR);
        Ok(config)
    }

    pub fn with_status_url(mut self, url: impl Into<String>) -> Self {
        self.status_url = Some(url.into());
        self
    }

    pub fn with_distribution_url(mut self, url: impl Into<String>) -> Self {
        self.distribution_url = Some(url.into());
        self
    }

    pub fn with_jurisdiction(mut self, uf: impl Into<String>) -> Self {
        self.jurisdiction = Some(uf.into());
        self
    }

    pub fn with_cnpj(mut self, cnpj: &str) -> Self {
        self.cnpj = Some(only_digits(cnpj));
        self
    }

    /// Merge the platform's default roots into the trust pool (enabled by default).
    pub fn with_system_roots(mut self, enabled: bool) -> Self {
        self.system_roots = enabled;
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    pub fn key_file(&self) -> &str {
        &self.key_file
    }

    pub fn cert_file(&self) -> &str {
        &self.cert_file
    }

    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join(&self.key_file)
    }

    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join(&self.cert_file)
    }

    pub fn cnpj(&self) -> Option<&str> {
        self.cnpj.as_deref()
    }

    pub fn jurisdiction(&self) -> Option<&str> {
        self.jurisdiction.as_deref()
    }

    pub fn status_url(&self) -> Option<&str> {
        self.status_url.as_deref()
    }

    pub fn distribution_url(&self) -> Option<&str> {
        self.distribution_url.as_deref()
    }

    pub fn system_roots(&self) -> bool {
        self.system_roots
    }
}

/// Read a dotenv-style file. Returns `Ok(None)` when the file does not exist.
fn read_env_file(path: &Path) -> Result<Option<HashMap<String, String>>, ConfigError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let vars = read(BufReader::new(file)).map_err(|source| ConfigError::PropertiesRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(
        vars.into_iter()
            .map(|(key, value)| (key, unquote(&value).to_string()))
            .collect(),
    ))
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    ['"', '\'']
        .iter()
        .find_map(|quote| {
            value
                .strip_prefix(*quote)
                .and_then(|rest| rest.strip_suffix(*quote))
        })
        .unwrap_or(value)
}
