//! Decoding and classification of SEFAZ status responses.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::warn;

/// Code reported when the response carries no `<cStat>`.
pub const UNDECODABLE_CODE: &str = "999";

/// Message reported when the response carries no `<xMotivo>`.
pub const UNDECODABLE_MESSAGE: &str = "response not understood";

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<cStat>(\d+)</cStat>").expect("valid cStat pattern"));
static MESSAGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<xMotivo>(.*?)</xMotivo>").expect("valid xMotivo pattern"));

const MESSAGE_OPEN: &str = "<xMotivo>";
const MESSAGE_CLOSE: &str = "</xMotivo>";

/// Named outcome of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCategory {
    /// 100: authorized use.
    Authorized,
    /// 101: cancellation registered.
    Canceled,
    /// 102: numbering range voided.
    Voided,
    /// 110: use denied.
    Denied,
    /// 217: not present in the SEFAZ database.
    NotFound,
    /// Any other code starting with 2 to 6.
    Rejected,
    /// Response had no recognisable status code.
    Undecodable,
    Other,
}

impl StatusCategory {
    /// Classify a code that was actually present in a response.
    pub fn from_code(code: &str) -> Self {
        match code {
            "100" => StatusCategory::Authorized,
            "101" => StatusCategory::Canceled,
            "102" => StatusCategory::Voided,
            "110" => StatusCategory::Denied,
            "217" => StatusCategory::NotFound,
            _ if code.starts_with(['2', '3', '4', '5', '6']) => StatusCategory::Rejected,
            _ => StatusCategory::Other,
        }
    }
}

/// Status of an access key as reported by SEFAZ.
///
/// The category is always derived from the code, deserialization included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatusRecord")]
pub struct RemoteStatus {
    code: String,
    message: String,
    category: StatusCategory,
}

#[derive(Deserialize)]
struct StatusRecord {
    code: String,
    message: String,
    #[serde(default)]
    category: Option<StatusCategory>,
}

impl From<StatusRecord> for RemoteStatus {
    fn from(record: StatusRecord) -> Self {
        match record.category {
            Some(StatusCategory::Undecodable) if record.code == UNDECODABLE_CODE => Self {
                code: record.code,
                message: record.message,
                category: StatusCategory::Undecodable,
            },
            _ => Self::new(record.code, record.message),
        }
    }
}

impl RemoteStatus {
    /// Build a status from a code known to come from SEFAZ.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let category = StatusCategory::from_code(&code);
        Self {
            code,
            message: message.into(),
            category,
        }
    }

    /// Decode a raw response body.
    ///
    /// The body is scanned rather than parsed, since SEFAZ does not always return well-formed
    /// XML. The message falls back to a plain split on the `<xMotivo>` markers when the
    /// pattern does not match (e.g. multi-line or unterminated text). A body without a status
    /// code decodes to [`UNDECODABLE_CODE`] with [`StatusCategory::Undecodable`].
    ///
    /// # Examples
    /// ```rust
    /// use nfe_core::api::{RemoteStatus, StatusCategory};
    ///
    /// let status = RemoteStatus::from_response(
    ///     "<cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo>",
    /// );
    /// assert_eq!(status.code(), "100");
    /// assert_eq!(status.message(), "Autorizado o uso da NF-e");
    /// assert!(status.is_authorized());
    /// assert_eq!(status.category(), StatusCategory::Authorized);
    /// ```
    pub fn from_response(body: &str) -> Self {
        let message = MESSAGE_PATTERN
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .or_else(|| {
                body.split_once(MESSAGE_OPEN).map(|(_, rest)| {
                    rest.split_once(MESSAGE_CLOSE)
                        .map_or(rest, |(message, _)| message)
                })
            })
            .unwrap_or(UNDECODABLE_MESSAGE);

        match CODE_PATTERN.captures(body).and_then(|caps| caps.get(1)) {
            Some(code) => Self::new(code.as_str(), message),
            None => {
                warn!(len = body.len(), "SEFAZ response has no status code");
                Self {
                    code: UNDECODABLE_CODE.to_string(),
                    message: message.to_string(),
                    category: StatusCategory::Undecodable,
                }
            }
        }
    }

    /// Three-digit status code (`cStat`).
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Reason text (`xMotivo`).
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> StatusCategory {
        self.category
    }

    /// True for codes 100 and 110.
    pub fn is_authorized(&self) -> bool {
        matches!(self.code.as_str(), "100" | "110")
    }

    /// The document exists in SEFAZ records: authorized or canceled.
    pub fn is_valid(&self) -> bool {
        matches!(
            self.category,
            StatusCategory::Authorized | StatusCategory::Canceled
        )
    }

    pub fn is_canceled(&self) -> bool {
        self.category == StatusCategory::Canceled
    }

    pub fn is_denied(&self) -> bool {
        self.category == StatusCategory::Denied
    }

    pub fn is_not_found(&self) -> bool {
        self.category == StatusCategory::NotFound
    }

    pub fn is_rejected(&self) -> bool {
        self.category == StatusCategory::Rejected
    }

    pub fn is_undecodable(&self) -> bool {
        self.category == StatusCategory::Undecodable
    }
}
