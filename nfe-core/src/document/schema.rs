//! XSD conformance checking.
use crate::document::parse_strict;
use libxml::{
    error::StructuredError,
    schemas::{SchemaParserContext, SchemaValidationContext},
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced by a [`SchemaValidator`].
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("XSD file not found: {}", path.display())]
    SchemaNotFound { path: PathBuf },
    #[error("failed to load XSD {}: {message}", path.display())]
    SchemaLoad { path: PathBuf, message: String },
    #[error("document is not well-formed XML: {message}")]
    NotWellFormed { message: String },
    #[error("schema violation{}: {message}", describe_line(.line))]
    Violation { line: Option<u32>, message: String },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_line(line: &Option<u32>) -> String {
    line.map(|line| format!(" (line {line})")).unwrap_or_default()
}

/// Schema conformance capability consumed by the validation pipeline.
pub trait SchemaValidator {
    /// Check `document` against the schema at `schema`.
    fn validate(&self, document: &[u8], schema: &Path) -> Result<(), SchemaError>;
}

impl<T: SchemaValidator + ?Sized> SchemaValidator for &T {
    fn validate(&self, document: &[u8], schema: &Path) -> Result<(), SchemaError> {
        (**self).validate(document, schema)
    }
}

/// libxml2-backed XSD validator.
///
/// The schema is compiled on every call; libxml contexts are neither `Send` nor `Sync`.
///
/// # Examples
/// ```rust,no_run
/// use nfe_core::document::schema::{SchemaValidator, XsdSchemaValidator};
/// use std::path::Path;
///
/// let xml = std::fs::read("nota.xml")?;
/// XsdSchemaValidator.validate(&xml, Path::new("schemas/procNFe_v4.00.xsd"))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct XsdSchemaValidator;

impl SchemaValidator for XsdSchemaValidator {
    fn validate(&self, document: &[u8], schema: &Path) -> Result<(), SchemaError> {
        let mut validation_ctx = build_validation_context(schema)?;
        let doc = parse_strict(document).map_err(|e| SchemaError::NotWellFormed {
            message: format!("{e:?}"),
        })?;

        validation_ctx
            .validate_document(&doc)
            .map_err(|errors| first_violation(&errors))
    }
}

fn build_validation_context(schema: &Path) -> Result<SchemaValidationContext, SchemaError> {
    // libxml only reports a generic failure for a missing file
    if !schema.exists() {
        return Err(SchemaError::SchemaNotFound {
            path: schema.to_path_buf(),
        });
    }
    let xsd_path = schema.to_str().ok_or_else(|| SchemaError::SchemaLoad {
        path: schema.to_path_buf(),
        message: "path is not valid UTF-8".into(),
    })?;

    let mut parser_ctx = SchemaParserContext::from_file(xsd_path);
    SchemaValidationContext::from_parser(&mut parser_ctx).map_err(|errors| {
        SchemaError::SchemaLoad {
            path: schema.to_path_buf(),
            message: errors
                .first()
                .and_then(|e| e.message.as_deref())
                .map(str::trim)
                .unwrap_or("invalid schema")
                .to_string(),
        }
    })
}

fn first_violation(errors: &[StructuredError]) -> SchemaError {
    let first = errors.first();
    SchemaError::Violation {
        line: first
            .and_then(|e| e.line)
            .and_then(|line| u32::try_from(line).ok()),
        message: first
            .and_then(|e| e.message.as_deref())
            .map(str::trim)
            .unwrap_or("document does not conform to schema")
            .to_string(),
    }
}

/// Validate several files against one schema, in order.
///
/// Unreadable files are reported per path instead of aborting the batch.
pub fn validate_batch<V: SchemaValidator>(
    validator: &V,
    paths: &[PathBuf],
    schema: &Path,
) -> Vec<(PathBuf, Result<(), SchemaError>)> {
    paths
        .iter()
        .map(|path| {
            let outcome = std::fs::read(path)
                .map_err(|source| SchemaError::Io {
                    path: path.clone(),
                    source,
                })
                .and_then(|bytes| validator.validate(&bytes, schema));
            (path.clone(), outcome)
        })
        .collect()
}
