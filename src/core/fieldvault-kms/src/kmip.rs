//! Network KMS provider speaking KMIP 1.0 over mutual TLS.
//!
//! The master secret is fetched with a single `Get` per wrap or unwrap. The
//! returned 96-byte secret then wraps DEKs exactly like a local master key.

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use zeroize::Zeroizing;

use fieldvault_crypto::LocalMasterKey;
use fieldvault_storage::{KeyId, MasterKeyDescriptor};

use crate::error::KmsError;
use crate::provider::parse_host_port;
use crate::trust_bundle::TrustBundle;
use crate::ttlv::{self, tag, Item, Value};
use crate::wrap::{unwrap_with_master, wrap_with_master, KeyWrapper};

/// Largest response accepted from the server.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

const OPERATION_GET: u32 = 0x0A;
const RESULT_STATUS_SUCCESS: u32 = 0;

/// Wraps DEKs with a secret held by a KMIP server.
pub struct KmipWrapper {
    descriptor: MasterKeyDescriptor,
    endpoint: String,
    host: String,
    tls: TrustBundle,
    key_id: String,
}

impl KmipWrapper {
    /// Creates a wrapper for the secret `key_id` on `endpoint` (`host:port`).
    pub fn new(
        descriptor: MasterKeyDescriptor,
        endpoint: &str,
        tls: TrustBundle,
        key_id: &str,
    ) -> Result<Self, KmsError> {
        let (host, _) =
            parse_host_port(endpoint).map_err(|reason| KmsError::InvalidProviderConfig {
                provider: descriptor.provider.clone(),
                reason,
            })?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        Ok(Self {
            descriptor,
            endpoint: endpoint.to_string(),
            host,
            tls,
            key_id: key_id.to_string(),
        })
    }

    /// Retrieves the master secret.
    pub async fn fetch_master_key(&self) -> Result<LocalMasterKey, KmsError> {
        debug!(
            provider = %self.descriptor.provider,
            endpoint = %self.endpoint,
            key_id = %self.key_id,
            "Fetching KMIP secret"
        );

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| KmsError::Transport(format!("invalid server name {}: {e}", self.host)))?;

        let tcp = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| KmsError::Transport(format!("connect {}: {e}", self.endpoint)))?;

        let connector = TlsConnector::from(self.tls.client_config());
        let mut stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| KmsError::Transport(format!("TLS handshake failed: {e}")))?;

        stream
            .write_all(&get_request(&self.key_id).encode())
            .await
            .map_err(|e| KmsError::Transport(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| KmsError::Transport(e.to_string()))?;

        let response = read_message(&mut stream).await?;
        let secret = secret_from_response(&response)?;

        LocalMasterKey::from_bytes(&secret)
            .map_err(|e| KmsError::Protocol(format!("KMIP secret {}: {e}", self.key_id)))
    }
}

#[async_trait]
impl KeyWrapper for KmipWrapper {
    fn descriptor(&self) -> MasterKeyDescriptor {
        self.descriptor.clone()
    }

    async fn wrap(&self, key_id: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let master_key = self.fetch_master_key().await?;
        wrap_with_master(&master_key, key_id, plaintext)
    }

    async fn unwrap(
        &self,
        key_id: &KeyId,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let master_key = self.fetch_master_key().await?;
        unwrap_with_master(&master_key, key_id, wrapped)
    }
}

/// Builds a KMIP 1.0 `Get` request for `unique_id`.
pub fn get_request(unique_id: &str) -> Item {
    Item::structure(
        tag::REQUEST_MESSAGE,
        vec![
            Item::structure(
                tag::REQUEST_HEADER,
                vec![
                    Item::structure(
                        tag::PROTOCOL_VERSION,
                        vec![
                            Item::new(tag::PROTOCOL_VERSION_MAJOR, Value::Integer(1)),
                            Item::new(tag::PROTOCOL_VERSION_MINOR, Value::Integer(0)),
                        ],
                    ),
                    Item::new(tag::BATCH_COUNT, Value::Integer(1)),
                ],
            ),
            Item::structure(
                tag::BATCH_ITEM,
                vec![
                    Item::new(tag::OPERATION, Value::Enumeration(OPERATION_GET)),
                    Item::structure(
                        tag::REQUEST_PAYLOAD,
                        vec![Item::new(
                            tag::UNIQUE_IDENTIFIER,
                            Value::TextString(unique_id.to_string()),
                        )],
                    ),
                ],
            ),
        ],
    )
}

/// Reads one length-prefixed TTLV message.
pub async fn read_message<R>(reader: &mut R) -> Result<Item, KmsError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; ttlv::HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| KmsError::Transport(format!("reading KMIP header: {e}")))?;

    let total = ttlv::encoded_len(&header)?;
    if total > MAX_MESSAGE_LEN {
        return Err(KmsError::Protocol(format!(
            "KMIP message of {total} bytes exceeds {MAX_MESSAGE_LEN}"
        )));
    }

    let mut buf = vec![0u8; total];
    buf[..ttlv::HEADER_LEN].copy_from_slice(&header);
    reader
        .read_exact(&mut buf[ttlv::HEADER_LEN..])
        .await
        .map_err(|e| KmsError::Transport(format!("reading KMIP body: {e}")))?;

    Item::decode(&buf)
}

/// Extracts the secret bytes from a `Get` response.
pub fn secret_from_response(response: &Item) -> Result<Zeroizing<Vec<u8>>, KmsError> {
    if response.tag != tag::RESPONSE_MESSAGE {
        return Err(KmsError::Protocol(format!(
            "expected response message, got tag {:#08x}",
            response.tag
        )));
    }

    let batch = response
        .child(tag::BATCH_ITEM)
        .ok_or_else(|| KmsError::Protocol("response has no batch item".into()))?;

    match batch.child(tag::RESULT_STATUS).map(|i| &i.value) {
        Some(Value::Enumeration(RESULT_STATUS_SUCCESS)) => {}
        Some(Value::Enumeration(status)) => {
            let message = match batch.child(tag::RESULT_MESSAGE).map(|i| &i.value) {
                Some(Value::TextString(message)) => message.as_str(),
                _ => "no result message",
            };
            return Err(KmsError::Protocol(format!(
                "KMIP Get failed with status {status}: {message}"
            )));
        }
        _ => return Err(KmsError::Protocol("response has no result status".into())),
    }

    let key_value = batch
        .path(&[
            tag::RESPONSE_PAYLOAD,
            tag::SECRET_DATA,
            tag::KEY_BLOCK,
            tag::KEY_VALUE,
        ])
        .ok_or_else(|| KmsError::Protocol("response carries no secret data".into()))?;

    let material = match &key_value.value {
        Value::ByteString(bytes) => bytes,
        Value::Structure(_) => match key_value.child(tag::KEY_MATERIAL).map(|i| &i.value) {
            Some(Value::ByteString(bytes)) => bytes,
            _ => return Err(KmsError::Protocol("key value has no key material".into())),
        },
        _ => return Err(KmsError::Protocol("unexpected key value type".into())),
    };

    Ok(Zeroizing::new(material.clone()))
}
