mod common;

use httpmock::prelude::*;
use nfe_core::api::{SefazClient, SefazError};
use nfe_core::config::{Config, EnvironmentType};
use nfe_core::document::{
    Envelope, KeyError,
    parse::ParseError,
    schema::{SchemaError, SchemaValidator, XsdSchemaValidator},
};
use nfe_core::pipeline::{
    Phase, PhaseError, ValidationMode, ValidationOptions, ValidationPipeline,
};
use std::path::Path;

struct AcceptAll;

impl SchemaValidator for AcceptAll {
    fn validate(&self, _: &[u8], _: &Path) -> Result<(), SchemaError> {
        Ok(())
    }
}

struct RejectAll;

impl SchemaValidator for RejectAll {
    fn validate(&self, _: &[u8], _: &Path) -> Result<(), SchemaError> {
        Err(SchemaError::Violation {
            line: Some(1),
            message: "rejected".into(),
        })
    }
}

fn offline() -> ValidationOptions {
    ValidationOptions::new(ValidationMode::Offline)
}

fn xsd_pipeline() -> ValidationPipeline {
    ValidationPipeline::new(XsdSchemaValidator, common::schema_path())
}

fn pipeline_with_client(url: String) -> (tempfile::TempDir, ValidationPipeline) {
    let (dir, trust) = common::trust_bundle();
    let client = SefazClient::new(&trust, EnvironmentType::Production, url).expect("client");
    (dir, xsd_pipeline().with_sefaz(client))
}

#[test]
fn offline_run_collects_fields_and_key() {
    let result = xsd_pipeline().validate(&common::read_document("nfe-proc.xml"), offline());

    assert!(result.is_success(), "{:?}", result.error());
    assert!(result.schema_valid());
    assert_eq!(result.envelope(), Some(Envelope::Enveloped));
    assert_eq!(
        result.access_key().map(|key| key.as_str()),
        Some(common::ACCESS_KEY)
    );
    assert_eq!(
        result.fields().map(|fields| fields.total_value()),
        Some("1234.50")
    );
    assert!(result.remote_status().is_none());

    let json = serde_json::to_value(result.report()).expect("json");
    assert_eq!(json["tipo"], "nfe");
    assert_eq!(json["chave_acesso"], common::ACCESS_KEY);
    assert_eq!(json["valido_xsd"], true);
    assert_eq!(json["sefaz"]["codigo"], "N/A");
    assert_eq!(json["sefaz"]["autorizado"], false);
    assert_eq!(json["dados_xml"]["emitente_cnpj"], "32409620000175");
    assert_eq!(json["dados_xml"]["destinatario_doc"], "11222333000181");
    assert_eq!(json["dados_xml"]["valor_total_nota"], "1234.50");
    assert!(json.get("erro").is_none());
}

#[test]
fn schema_failure_stops_before_parsing() {
    let result = xsd_pipeline().validate(&common::read_document("nfe-invalid-model.xml"), offline());

    assert!(!result.schema_valid());
    assert_eq!(result.failed_phase(), Some(Phase::SchemaCheck));
    assert!(result.fields().is_none());
    assert!(result.access_key().is_none());
    assert!(result.remote_status().is_none());

    let report = result.report();
    assert!(!report.schema_valid());
    assert!(report.fields().is_none());
    assert!(report.error().is_some_and(|e| e.contains("XSD")));
}

#[test]
fn schema_only_mode_skips_parsing() {
    let pipeline = ValidationPipeline::new(AcceptAll, "unused.xsd");
    let result = pipeline.validate(
        b"not even xml",
        ValidationOptions::new(ValidationMode::SchemaOnly),
    );
    assert!(result.is_success());
    assert!(result.schema_valid());
    assert!(result.fields().is_none());
    assert_eq!(result.report().remote().code(), "N/A");
}

#[test]
fn parse_failure_keeps_schema_verdict() {
    let pipeline = ValidationPipeline::new(AcceptAll, "unused.xsd");
    let result = pipeline.validate(&common::read_document("nfe-empty-id.xml"), offline());

    assert!(result.schema_valid());
    assert_eq!(result.failed_phase(), Some(Phase::Parse));
    assert!(matches!(
        result.error(),
        Some(PhaseError::Parse(ParseError::MissingIdentifier))
    ));
    assert!(result.access_key().is_none());
    assert!(result.fields().is_none());
}

#[test]
fn missing_access_key_is_fatal_only_when_required() {
    let pipeline = ValidationPipeline::new(AcceptAll, "unused.xsd");
    let document = br#"<NFe><infNFe Id="NFe123"><ide><mod>55</mod></ide></infNFe></NFe>"#;

    let strict = pipeline.validate(document, ValidationOptions::default());
    assert!(matches!(strict.error(), Some(PhaseError::MissingAccessKey)));
    assert_eq!(strict.failed_phase(), Some(Phase::KeyDerive));
    assert!(strict.fields().is_some());
    assert!(strict.access_key().is_none());

    let lenient = pipeline.validate(document, ValidationOptions::default().require_access_key(false));
    assert!(lenient.is_success());
    assert!(lenient.fields().is_some());
    assert!(lenient.access_key().is_none());
    assert!(lenient.remote_status().is_none());
}

#[test]
fn wrong_check_digit_stops_at_key_derivation() {
    let server = match common::try_start_server() {
        Some(server) => server,
        None => return,
    };
    let mock = server.mock(|when, then| {
        when.method(POST);
        then.status(200).body(common::AUTHORIZED_RESPONSE);
    });
    let (_dir, pipeline) = pipeline_with_client(server.url(common::STATUS_PATH));

    let result = pipeline.validate(
        &common::read_document("nfe-bad-check-digit.xml"),
        ValidationOptions::default(),
    );

    assert_eq!(result.failed_phase(), Some(Phase::KeyDerive));
    assert!(matches!(
        result.error(),
        Some(PhaseError::AccessKey {
            source: KeyError::CheckDigitMismatch {
                expected: 8,
                found: 7
            },
            ..
        })
    ));
    assert_eq!(
        result.access_key().map(|key| key.as_str()),
        Some("35250732409620000175550010000037471011544647")
    );
    assert!(result.fields().is_some());
    assert!(result.remote_status().is_none());
    mock.assert_hits(0);
}

#[test]
fn full_run_queries_sefaz() {
    let server = match common::try_start_server() {
        Some(server) => server,
        None => return,
    };
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path(common::STATUS_PATH)
            .body_contains(common::ACCESS_KEY);
        then.status(200).body(common::AUTHORIZED_RESPONSE);
    });
    let (_dir, pipeline) = pipeline_with_client(server.url(common::STATUS_PATH));

    let result = pipeline.validate(&common::read_document("nfe.xml"), ValidationOptions::default());

    mock.assert();
    assert!(result.is_success(), "{:?}", result.error());
    let status = result.remote_status().expect("remote status");
    assert!(status.is_authorized());

    let json = serde_json::to_value(result.report()).expect("json");
    assert_eq!(json["sefaz"]["autorizado"], true);
    assert_eq!(json["sefaz"]["codigo"], "100");
    assert_eq!(json["sefaz"]["mensagem"], "Autorizado o uso da NF-e");
    assert_eq!(json["dados_xml"]["modelo"], "55");
}

#[test]
fn remote_failure_keeps_earlier_output() {
    let (_dir, pipeline) = pipeline_with_client(common::refused_url());

    let result = pipeline.validate(&common::read_document("nfe.xml"), ValidationOptions::default());

    assert!(result.schema_valid());
    assert_eq!(result.failed_phase(), Some(Phase::RemoteQuery));
    assert!(matches!(
        result.error(),
        Some(PhaseError::Remote(SefazError::Network(_)))
    ));
    assert!(result.fields().is_some());
    assert_eq!(
        result.access_key().map(|key| key.as_str()),
        Some(common::ACCESS_KEY)
    );
    assert!(result.remote_status().is_none());

    let report = result.report();
    assert_eq!(report.remote().code(), "");
    assert!(report.error().is_some_and(|e| e.contains("SEFAZ")));
}

#[test]
fn full_mode_without_client_is_remote_unavailable() {
    let result = xsd_pipeline().validate(&common::read_document("nfe.xml"), ValidationOptions::default());
    assert!(matches!(result.error(), Some(PhaseError::RemoteUnavailable)));
    assert!(result.fields().is_some());
}

#[test]
fn check_key_validates_before_querying() {
    let pipeline = ValidationPipeline::new(RejectAll, "unused.xsd");
    let err = pipeline.check_key("123").expect_err("short key");
    assert_eq!(err.phase(), Phase::KeyDerive);
    assert!(matches!(
        err,
        PhaseError::AccessKey {
            source: KeyError::Format { .. },
            ..
        }
    ));

    let err = pipeline
        .check_key(common::ACCESS_KEY)
        .expect_err("no client");
    assert!(matches!(err, PhaseError::RemoteUnavailable));
}

#[test]
fn check_key_returns_remote_status() {
    let server = match common::try_start_server() {
        Some(server) => server,
        None => return,
    };
    let mock = server.mock(|when, then| {
        when.method(POST).body_contains(common::ACCESS_KEY);
        then.status(200)
            .body("<cStat>217</cStat><xMotivo>Rejeicao: NF-e nao consta na base de dados da SEFAZ</xMotivo>");
    });
    let (_dir, pipeline) = pipeline_with_client(server.url(common::STATUS_PATH));

    let status = pipeline.check_key(common::ACCESS_KEY).expect("status");
    mock.assert();
    assert!(status.is_not_found());
    assert!(!status.is_authorized());
}

#[test]
fn validate_file_reports_unreadable_input() {
    let err = xsd_pipeline()
        .validate_file(&common::document_path("missing.xml"), offline())
        .expect_err("missing file");
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);

    let result = xsd_pipeline()
        .validate_file(&common::document_path("nfe.xml"), offline())
        .expect("readable");
    assert!(result.is_success());
}

#[test]
fn connect_builds_client_from_config() {
    let (dir, _) = common::trust_bundle();
    let config = Config::new(
        EnvironmentType::Homologation,
        dir.path(),
        common::CLIENT_KEY_FILE,
        common::CLIENT_CERT_FILE,
    )
    .with_system_roots(false);

    let err = ValidationPipeline::connect(XsdSchemaValidator, common::schema_path(), &config)
        .expect_err("no status url");
    assert!(matches!(err, nfe_core::Error::Api(SefazError::ClientState(_))));

    let pipeline = ValidationPipeline::connect(
        XsdSchemaValidator,
        common::schema_path(),
        &config.with_status_url("https://homologacao.nfe.fazenda.sp.gov.br/ws/nfeconsultaprotocolo4.asmx"),
    )
    .expect("pipeline");
    assert_eq!(
        pipeline.sefaz().map(|client| client.env()),
        Some(EnvironmentType::Homologation)
    );

    let bad = Config::new(
        EnvironmentType::Homologation,
        dir.path().join("missing"),
        common::CLIENT_KEY_FILE,
        common::CLIENT_CERT_FILE,
    );
    let err = ValidationPipeline::connect(XsdSchemaValidator, common::schema_path(), &bad)
        .expect_err("no certificates");
    assert!(matches!(err, nfe_core::Error::Trust(_)));
}

#[test]
fn connect_rejects_mismatched_client_key_as_trust_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    common::write_client_identity(dir.path());
    common::write_foreign_client_key(dir.path());
    let config = Config::new(
        EnvironmentType::Production,
        dir.path(),
        common::CLIENT_KEY_FILE,
        common::CLIENT_CERT_FILE,
    )
    .with_system_roots(false)
    .with_status_url("https://nfe.fazenda.sp.gov.br/ws/nfeconsultaprotocolo4.asmx");

    let err = ValidationPipeline::connect(XsdSchemaValidator, common::schema_path(), &config)
        .expect_err("mismatched key");
    assert!(matches!(err, nfe_core::Error::Trust(_)), "{err:?}");
}
