//! Throwaway PKI for TLS tests.

#![allow(clippy::disallowed_methods)]

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

pub(crate) struct TestPki {
    pub ca_cert: CertificateDer<'static>,
    pub ca_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
    pub client_bundle_pem: String,
    pub server_cert: CertificateDer<'static>,
    pub server_key: Vec<u8>,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "fieldvault test ca");
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let server = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .signed_by(&server_key, &ca, &ca_key)
            .unwrap();

        let client_key = KeyPair::generate().unwrap();
        let client = CertificateParams::new(vec!["fieldvault-client".to_string()])
            .unwrap()
            .signed_by(&client_key, &ca, &ca_key)
            .unwrap();

        let ca_pem = ca.pem();
        let client_cert_pem = client.pem();
        let client_key_pem = client_key.serialize_pem();
        let client_bundle_pem = format!("{client_cert_pem}{client_key_pem}{ca_pem}");

        Self {
            ca_cert: ca.der().clone(),
            ca_pem,
            client_cert_pem,
            client_key_pem,
            client_bundle_pem,
            server_cert: server.der().clone(),
            server_key: server_key.serialize_der(),
        }
    }

    pub fn server_key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.clone()))
    }
}
