//! XML parsing for NF-e documents in either envelope shape.
use crate::document::{
    Envelope, ParsedDocument, ParsedFields, first_non_blank, only_digits, parse_strict,
};
use libxml::{tree::Document, xpath};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors emitted while parsing NF-e documents.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed NF-e document: {0}")]
    Malformed(String),
    #[error("infNFe/@Id attribute is missing or empty")]
    MissingIdentifier,
}

/// Outcome of decoding the document as one particular envelope shape.
enum Attempt {
    Decoded(ParsedDocument),
    /// Root element belongs to this shape but `infNFe/@Id` is empty.
    MissingIdentifier,
    /// Root element belongs to another shape.
    ShapeMismatch,
}

/// Parse an NF-e from raw bytes, accepting both `<nfeProc>` and bare `<NFe>` documents.
///
/// Shapes are tried in [`Envelope::PRIORITY`] order and the first one that yields a non-empty
/// identifier wins. Element names are matched by local name so documents with or without the
/// portal namespace are accepted alike.
///
/// # Examples
/// ```rust
/// use nfe_core::document::{Envelope, parse::parse_document};
///
/// let xml = br#"<NFe xmlns="http://www.portalfiscal.inf.br/nfe">
///   <infNFe versao="4.00" Id="NFe35250732409620000175550010000037471011544648">
///     <ide><mod>55</mod><serie>1</serie><nNF>3747</nNF></ide>
///     <total><ICMSTot><vNF>10.00</vNF></ICMSTot></total>
///   </infNFe>
/// </NFe>"#;
/// let document = parse_document(xml)?;
/// assert_eq!(document.envelope(), Envelope::Bare);
/// assert_eq!(document.fields().total_value(), "10.00");
/// # Ok::<(), nfe_core::document::parse::ParseError>(())
/// ```
pub fn parse_document(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let doc = parse_strict(bytes).map_err(|e| ParseError::Malformed(format!("{e:?}")))?;
    let root = doc
        .get_root_element()
        .ok_or_else(|| ParseError::Malformed("document has no root element".into()))?
        .get_name();

    let mut missing_identifier = false;
    for envelope in Envelope::PRIORITY {
        match decode(&doc, &root, envelope)? {
            Attempt::Decoded(parsed) => {
                debug!(?envelope, id = parsed.identifier(), "decoded NF-e");
                return Ok(parsed);
            }
            Attempt::MissingIdentifier => missing_identifier = true,
            Attempt::ShapeMismatch => {}
        }
    }

    if missing_identifier {
        return Err(ParseError::MissingIdentifier);
    }
    Err(ParseError::Malformed(format!(
        "unexpected root element <{root}>, expected <nfeProc> or <NFe>"
    )))
}

/// Parse an NF-e from a file.
pub fn parse_document_file(path: &Path) -> Result<ParsedDocument, ParseError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ParseError::Malformed(format!("{}: {e}", path.display())))?;
    parse_document(&bytes)
}

fn decode(doc: &Document, root: &str, envelope: Envelope) -> Result<Attempt, ParseError> {
    if root != envelope.root_element() {
        return Ok(Attempt::ShapeMismatch);
    }

    let ctx = xpath::Context::new(doc)
        .map_err(|e| ParseError::Malformed(format!("XPath context: {e:?}")))?;
    let info = local_path(envelope.info_path());
    let field = |relative: &[&str]| xpath_text(&ctx, &format!("{info}{}", local_path(relative)));

    let identifier = xpath_text(&ctx, &format!("{info}/@Id"))?;
    if identifier.is_empty() {
        return Ok(Attempt::MissingIdentifier);
    }

    let issuer_cnpj = only_digits(&field(&["emit", "CNPJ"])?);
    let issuer_cpf = only_digits(&field(&["emit", "CPF"])?);
    let recipient_cnpj = only_digits(&field(&["dest", "CNPJ"])?);
    let recipient_cpf = only_digits(&field(&["dest", "CPF"])?);

    let fields = ParsedFields {
        model: field(&["ide", "mod"])?,
        series: field(&["ide", "serie"])?,
        number: field(&["ide", "nNF"])?,
        issuer_id: first_non_blank([issuer_cnpj.as_str(), issuer_cpf.as_str()]).to_string(),
        issuer_name: field(&["emit", "xNome"])?,
        recipient_id: first_non_blank([recipient_cnpj.as_str(), recipient_cpf.as_str()])
            .to_string(),
        recipient_name: field(&["dest", "xNome"])?,
        total_value: field(&["total", "ICMSTot", "vNF"])?,
    };

    Ok(Attempt::Decoded(ParsedDocument {
        envelope,
        identifier,
        fields,
    }))
}

/// Namespace-agnostic absolute path, one `local-name()` step per segment.
fn local_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| format!("/*[local-name()='{segment}']"))
        .collect()
}

/// Trimmed text of the first node matching `expr`, or an empty string.
fn xpath_text(ctx: &xpath::Context, expr: &str) -> Result<String, ParseError> {
    let nodes = ctx
        .evaluate(expr)
        .map_err(|e| ParseError::Malformed(format!("XPath {expr}: {e:?}")))?
        .get_nodes_as_vec();
    Ok(nodes
        .first()
        .map(|node| node.get_content().trim().to_string())
        .unwrap_or_default())
}
