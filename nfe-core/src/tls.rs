//! Mutual-TLS trust material for the SEFAZ web services.
use crate::config::Config;
use reqwest::{
    blocking::ClientBuilder,
    tls::{Identity, Version},
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use x509_cert::{
    Certificate,
    der::{Decode, Encode},
};

/// File extensions recognised as trust anchors (compared case-insensitively).
pub const CERTIFICATE_EXTENSIONS: [&str; 3] = ["pem", "crt", "cer"];

/// Only protocol version SEFAZ endpoints negotiate reliably.
pub const PROTOCOL_VERSION: Version = Version::TLS_1_2;

/// Errors that prevent a [`TrustBundle`] from being built.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("client certificate error ({}): {message}", path.display())]
    ClientCert { path: PathBuf, message: String },
    #[error("failed to list certificate directory {}: {source}", path.display())]
    CertDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Trust-anchor file that was skipped while building the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustWarning {
    path: PathBuf,
    reason: String,
}

impl TrustWarning {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Certificate added to the trust pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    path: PathBuf,
    subject: String,
}

impl TrustAnchor {
    /// File the certificate was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Builds a [`TrustBundle`] from a certificate directory.
///
/// The directory holds the client certificate, its PKCS#8 private key and any number of
/// authority certificates (`.pem`, `.crt` or `.cer`, PEM bundles or single DER files).
///
/// # Examples
/// ```rust,no_run
/// use nfe_core::tls::TrustStoreBuilder;
///
/// let bundle = TrustStoreBuilder::new("cert", "client-key.pem", "client.pem").build()?;
/// for warning in bundle.warnings() {
///     eprintln!("skipped {}: {}", warning.path().display(), warning.reason());
/// }
/// # Ok::<(), nfe_core::tls::TrustError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TrustStoreBuilder {
    cert_dir: PathBuf,
    key_file: String,
    cert_file: String,
    system_roots: bool,
}

impl TrustStoreBuilder {
    pub fn new(
        cert_dir: impl Into<PathBuf>,
        key_file: impl Into<String>,
        cert_file: impl Into<String>,
    ) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            key_file: key_file.into(),
            cert_file: cert_file.into(),
            system_roots: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cert_dir(), config.key_file(), config.cert_file())
            .system_roots(config.system_roots())
    }

    /// Merge the platform's default roots into the pool (enabled by default).
    pub fn system_roots(mut self, enabled: bool) -> Self {
        self.system_roots = enabled;
        self
    }

    /// Load the client identity and every readable trust anchor.
    ///
    /// # Errors
    /// Returns [`TrustError::ClientCert`] if the key pair cannot be loaded or the key does not
    /// belong to the certificate, and
    /// [`TrustError::CertDir`] if the directory cannot be listed. Individual anchor files that
    /// fail to parse are recorded as warnings instead.
    pub fn build(&self) -> Result<TrustBundle, TrustError> {
        let (identity, client_subject) = self.load_identity()?;
        let scan = scan_anchors(&self.cert_dir, &self.key_file)?;

        info!(
            dir = %self.cert_dir.display(),
            anchors = scan.anchors.len(),
            skipped = scan.warnings.len(),
            system_roots = self.system_roots,
            "trust store ready"
        );

        Ok(TrustBundle {
            identity,
            client_subject,
            roots: scan.roots,
            anchors: scan.anchors,
            warnings: scan.warnings,
            system_roots: self.system_roots,
        })
    }

    fn load_identity(&self) -> Result<(Identity, String), TrustError> {
        let cert_path = self.cert_dir.join(&self.cert_file);
        let key_path = self.cert_dir.join(&self.key_file);
        let client_error = |path: &Path, message: String| TrustError::ClientCert {
            path: path.to_path_buf(),
            message,
        };

        let cert_pem = fs::read(&cert_path).map_err(|e| client_error(&cert_path, e.to_string()))?;
        let key_pem = fs::read(&key_path).map_err(|e| client_error(&key_path, e.to_string()))?;

        if cert_pem.trim_ascii().is_empty() {
            return Err(client_error(&cert_path, "file is empty".into()));
        }
        let chain = Certificate::load_pem_chain(&cert_pem)
            .map_err(|e| client_error(&cert_path, format!("invalid PEM certificate: {e}")))?;
        let leaf = chain
            .first()
            .ok_or_else(|| client_error(&cert_path, "no certificate found".into()))?;
        let subject = leaf.tbs_certificate.subject.to_string();

        let not_after = leaf.tbs_certificate.validity.not_after.to_system_time();
        if not_after < SystemTime::now() {
            warn!(path = %cert_path.display(), %subject, "client certificate has expired");
        }

        let identity = Identity::from_pkcs8_pem(&cert_pem, &key_pem).map_err(|e| {
            client_error(&key_path, format!("invalid PKCS#8 key pair: {e}"))
        })?;
        check_key_pair(&identity).map_err(|e| {
            client_error(&key_path, format!("private key does not match the certificate: {e}"))
        })?;
        debug!(%subject, "loaded client identity");
        Ok((identity, subject))
    }
}

/// The native backend only pairs key and certificate when a client is built.
fn check_key_pair(identity: &Identity) -> Result<(), reqwest::Error> {
    ClientBuilder::new()
        .use_native_tls()
        .identity(identity.clone())
        .build()
        .map(drop)
}

/// Client identity plus the trusted authority pool, ready to configure an HTTP client.
///
/// Immutable after [`TrustStoreBuilder::build`]; rebuild it to pick up new certificates.
#[derive(Clone)]
pub struct TrustBundle {
    identity: Identity,
    client_subject: String,
    roots: Vec<reqwest::Certificate>,
    anchors: Vec<TrustAnchor>,
    warnings: Vec<TrustWarning>,
    system_roots: bool,
}

impl fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBundle")
            .field("client_subject", &self.client_subject)
            .field("anchors", &self.anchors)
            .field("warnings", &self.warnings)
            .field("system_roots", &self.system_roots)
            .finish_non_exhaustive()
    }
}

impl TrustBundle {
    /// Subject of the client (leaf) certificate.
    pub fn client_subject(&self) -> &str {
        &self.client_subject
    }

    pub fn anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }

    pub fn warnings(&self) -> &[TrustWarning] {
        &self.warnings
    }

    pub fn uses_system_roots(&self) -> bool {
        self.system_roots
    }

    pub fn protocol_version(&self) -> Version {
        PROTOCOL_VERSION
    }

    /// Apply identity, roots and protocol pinning to an HTTP client builder.
    ///
    /// The native TLS backend is selected because SEFAZ servers renegotiate mid-session and
    /// that backend permits it.
    pub(crate) fn configure(&self, builder: ClientBuilder) -> ClientBuilder {
        let builder = builder
            .use_native_tls()
            .identity(self.identity.clone())
            .tls_built_in_root_certs(self.system_roots)
            .min_tls_version(PROTOCOL_VERSION)
            .max_tls_version(PROTOCOL_VERSION);
        self.roots
            .iter()
            .cloned()
            .fold(builder, |builder, root| builder.add_root_certificate(root))
    }
}

#[derive(Default)]
struct AnchorScan {
    roots: Vec<reqwest::Certificate>,
    anchors: Vec<TrustAnchor>,
    warnings: Vec<TrustWarning>,
}

fn scan_anchors(dir: &Path, key_file: &str) -> Result<AnchorScan, TrustError> {
    let dir_error = |source| TrustError::CertDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(dir_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(dir_error)?;
    entries.sort_by_key(|entry| entry.path());

    let mut scan = AnchorScan::default();
    for entry in entries {
        let path = entry.path();
        if path.is_dir() || entry.file_name().to_str() == Some(key_file) {
            continue;
        }
        if !has_certificate_extension(&path) {
            continue;
        }

        match load_anchor_file(&path) {
            Ok(certificates) => {
                for (root, subject) in certificates {
                    debug!(path = %path.display(), %subject, "trust anchor added");
                    scan.roots.push(root);
                    scan.anchors.push(TrustAnchor {
                        path: path.clone(),
                        subject,
                    });
                }
            }
            Err(reason) => {
                warn!(path = %path.display(), %reason, "skipping trust anchor");
                scan.warnings.push(TrustWarning { path, reason });
            }
        }
    }
    Ok(scan)
}

fn has_certificate_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            CERTIFICATE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Parse a PEM bundle or a single DER certificate.
fn load_anchor_file(path: &Path) -> Result<Vec<(reqwest::Certificate, String)>, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    if bytes.trim_ascii().is_empty() {
        return Err("file is empty".into());
    }
    let certificates = if bytes.starts_with(b"-----BEGIN")
        || String::from_utf8_lossy(&bytes).contains("-----BEGIN CERTIFICATE-----")
    {
        Certificate::load_pem_chain(&bytes).map_err(|e| format!("invalid PEM: {e}"))?
    } else {
        vec![Certificate::from_der(&bytes).map_err(|e| format!("invalid DER: {e}"))?]
    };
    if certificates.is_empty() {
        return Err("no certificates found".into());
    }

    certificates
        .into_iter()
        .map(|cert| {
            let der = cert.to_der().map_err(|e| format!("re-encoding failed: {e}"))?;
            let root = reqwest::Certificate::from_der(&der).map_err(|e| e.to_string())?;
            Ok((root, cert.tbs_certificate.subject.to_string()))
        })
        .collect()
}
