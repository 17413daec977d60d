//! NF-e document model: envelope shapes, extracted fields and the access key.
pub mod access_key;
pub mod parse;
pub mod schema;

pub use access_key::{AccessKey, KeyError};

use libxml::{
    parser::{Parser, ParserOptions, XmlParseError},
    tree::Document,
};
use serde::{Deserialize, Serialize};

/// On-the-wire shape a document arrived in.
///
/// Documents returned by SEFAZ after authorization are wrapped in `<nfeProc>` together with the
/// authorization protocol; documents produced before submission are a bare `<NFe>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Envelope {
    Enveloped,
    Bare,
}

impl Envelope {
    /// Shapes in the order decoders try them.
    pub const PRIORITY: [Envelope; 2] = [Envelope::Enveloped, Envelope::Bare];

    pub fn root_element(&self) -> &'static str {
        match self {
            Envelope::Enveloped => "nfeProc",
            Envelope::Bare => "NFe",
        }
    }

    /// Element path from the document root down to `infNFe`.
    pub(crate) fn info_path(&self) -> &'static [&'static str] {
        match self {
            Envelope::Enveloped => &["nfeProc", "NFe", "infNFe"],
            Envelope::Bare => &["NFe", "infNFe"],
        }
    }
}

/// Fields extracted from `infNFe`.
///
/// The total is kept as the literal decimal text from the document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedFields {
    #[serde(rename = "modelo")]
    model: String,
    #[serde(rename = "serie")]
    series: String,
    #[serde(rename = "numero")]
    number: String,
    #[serde(rename = "emitente_cnpj")]
    issuer_id: String,
    #[serde(rename = "emitente_razao")]
    issuer_name: String,
    #[serde(rename = "destinatario_doc")]
    recipient_id: String,
    #[serde(rename = "destinatario_nome")]
    recipient_name: String,
    #[serde(rename = "valor_total_nota")]
    total_value: String,
}

impl ParsedFields {
    /// Document model code (`55` = NF-e, `65` = NFC-e).
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn recipient_name(&self) -> &str {
        &self.recipient_name
    }

    pub fn total_value(&self) -> &str {
        &self.total_value
    }

    /// Short type tag used in reports: `nfce` for model 65, `nfe` otherwise.
    pub fn document_type(&self) -> &'static str {
        if self.model == "65" { "nfce" } else { "nfe" }
    }
}

/// Successfully decoded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    envelope: Envelope,
    identifier: String,
    fields: ParsedFields,
}

impl ParsedDocument {
    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    /// Raw `infNFe/@Id` attribute, e.g. `NFe3525...`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn fields(&self) -> &ParsedFields {
        &self.fields
    }

    pub fn into_fields(self) -> ParsedFields {
        self.fields
    }

    /// Access key derived from the identifier, if it has one of the accepted forms.
    pub fn access_key(&self) -> Option<AccessKey> {
        AccessKey::from_identifier(&self.identifier)
    }
}

/// Parse XML with libxml's recovery mode off, so any well-formedness error is fatal.
pub(crate) fn parse_strict(bytes: &[u8]) -> Result<Document, XmlParseError> {
    Parser::default().parse_string_with_options(
        bytes,
        ParserOptions {
            recover: false,
            ..ParserOptions::default()
        },
    )
}

/// Strip everything that is not an ASCII digit.
pub fn only_digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// First value that is non-blank after trimming, or an empty string.
pub(crate) fn first_non_blank<'a>(values: impl IntoIterator<Item = &'a str>) -> &'a str {
    values
        .into_iter()
        .find(|value| !value.trim().is_empty())
        .unwrap_or_default()
}
