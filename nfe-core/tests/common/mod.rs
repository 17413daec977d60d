use httpmock::MockServer;
use nfe_core::tls::{TrustBundle, TrustStoreBuilder};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
};
use std::path::{Path, PathBuf};

#[allow(dead_code)]
pub const ACCESS_KEY: &str = "35250732409620000175550010000037471011544648";
#[allow(dead_code)]
pub const CLIENT_CERT_FILE: &str = "client.pem";
#[allow(dead_code)]
pub const CLIENT_KEY_FILE: &str = "client-key.pem";
#[allow(dead_code)]
pub const STATUS_PATH: &str = "/ws/nfeconsultaprotocolo4.asmx";
#[allow(dead_code)]
pub const AUTHORIZED_RESPONSE: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body>"#,
    r#"<nfeResultMsg xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/NFeConsultaProtocolo4">"#,
    r#"<retConsSitNFe versao="4.00" xmlns="http://www.portalfiscal.inf.br/nfe">"#,
    r#"<tpAmb>2</tpAmb><verAplic>SP_NFE_PL009_V4</verAplic>"#,
    r#"<cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo><cUF>35</cUF>"#,
    r#"<chNFe>35250732409620000175550010000037471011544648</chNFe>"#,
    r#"</retConsSitNFe></nfeResultMsg></soap:Body></soap:Envelope>"#,
);

#[allow(dead_code)]
pub fn fixture(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative)
}

#[allow(dead_code)]
pub fn document_path(name: &str) -> PathBuf {
    fixture("documents").join(name)
}

#[allow(dead_code)]
pub fn read_document(name: &str) -> Vec<u8> {
    std::fs::read(document_path(name)).expect("read document fixture")
}

#[allow(dead_code)]
pub fn schema_path() -> PathBuf {
    fixture("schemas").join("nfe-lite.xsd")
}

#[allow(dead_code)]
fn named(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    name.push(DnType::CountryName, "BR");
    name
}

/// Self-signed certificate authority.
#[allow(dead_code)]
pub fn authority(common_name: &str) -> (Certificate, KeyPair) {
    let mut params = CertificateParams::default();
    params.distinguished_name = named(common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().expect("authority key generation");
    let cert = params.self_signed(&key).expect("authority certificate");
    (cert, key)
}

/// Write a client certificate (signed by a throwaway CA) and its PKCS#8 key into `dir`.
#[allow(dead_code)]
pub fn write_client_identity(dir: &Path) {
    let (ca, ca_key) = authority("AC Teste Cliente");
    let mut params =
        CertificateParams::new(vec!["cliente.nfe.test".to_string()]).expect("client params");
    params.distinguished_name = named("COMERCIAL PAULISTA:32409620000175");
    let key = KeyPair::generate().expect("client key generation");
    let cert = params
        .signed_by(&key, &ca, &ca_key)
        .expect("client certificate");
    std::fs::write(dir.join(CLIENT_CERT_FILE), cert.pem()).expect("write client cert");
    std::fs::write(dir.join(CLIENT_KEY_FILE), key.serialize_pem()).expect("write client key");
}

/// Replace the client key in `dir` with a freshly generated one that matches no certificate.
#[allow(dead_code)]
pub fn write_foreign_client_key(dir: &Path) {
    let key = KeyPair::generate().expect("foreign key generation");
    std::fs::write(dir.join(CLIENT_KEY_FILE), key.serialize_pem()).expect("write foreign key");
}

/// Write a PEM-encoded authority certificate and return its path.
#[allow(dead_code)]
pub fn write_authority_pem(dir: &Path, file_name: &str, common_name: &str) -> PathBuf {
    let (cert, _) = authority(common_name);
    let path = dir.join(file_name);
    std::fs::write(&path, cert.pem()).expect("write authority pem");
    path
}

/// Write a DER-encoded authority certificate and return its path.
#[allow(dead_code)]
pub fn write_authority_der(dir: &Path, file_name: &str, common_name: &str) -> PathBuf {
    let (cert, _) = authority(common_name);
    let path = dir.join(file_name);
    std::fs::write(&path, cert.der().as_ref()).expect("write authority der");
    path
}

/// Certificate directory with a client identity and one root, plus the built bundle.
#[allow(dead_code)]
pub fn trust_bundle() -> (tempfile::TempDir, TrustBundle) {
    let dir = tempfile::tempdir().expect("tempdir");
    write_client_identity(dir.path());
    write_authority_pem(dir.path(), "ac-raiz.crt", "AC Raiz Teste");
    let bundle = TrustStoreBuilder::new(dir.path(), CLIENT_KEY_FILE, CLIENT_CERT_FILE)
        .system_roots(false)
        .build()
        .expect("trust bundle");
    (dir, bundle)
}

/// URL on localhost where nothing is listening.
#[allow(dead_code)]
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}{STATUS_PATH}")
}

#[allow(dead_code)]
pub fn try_start_server() -> Option<MockServer> {
    std::panic::catch_unwind(MockServer::start).ok()
}
