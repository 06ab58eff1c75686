//! Cloud KMS wrapper over HTTPS.
//!
//! Speaks the `:encrypt` / `:decrypt` REST shape:
//! `POST {endpoint}/v1/{key_ref}:encrypt` with `{"plaintext": "<b64>"}`
//! answers `{"ciphertext": "<b64>"}`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use fieldvault_storage::{KeyId, MasterKeyDescriptor};

use crate::error::KmsError;
use crate::provider::CloudCredentials;
use crate::wrap::KeyWrapper;

/// Public endpoint used when the provider sets no override.
pub const DEFAULT_ENDPOINT: &str = "https://cloudkms.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptRequest {
    plaintext: String,
    additional_authenticated_data: String,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptRequest {
    ciphertext: String,
    additional_authenticated_data: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

/// Wraps DEKs with a cloud KMS key.
pub struct CloudWrapper {
    descriptor: MasterKeyDescriptor,
    client: reqwest::Client,
    base_url: String,
    token: Zeroizing<String>,
}

impl CloudWrapper {
    /// Creates a wrapper for `key_ref`.
    pub fn new(
        descriptor: MasterKeyDescriptor,
        key_ref: &str,
        endpoint: Option<&str>,
        credentials: &CloudCredentials,
    ) -> Result<Self, KmsError> {
        let token = credentials
            .token()
            .ok_or_else(|| KmsError::Credential("missing access token".into()))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| KmsError::Transport(e.to_string()))?;

        let endpoint = endpoint.unwrap_or(DEFAULT_ENDPOINT).trim_end_matches('/');

        Ok(Self {
            descriptor,
            client,
            base_url: format!("{endpoint}/v1/{}", key_ref.trim_start_matches('/')),
            token: Zeroizing::new(token.to_string()),
        })
    }

    async fn call<Req, Resp>(&self, action: &str, body: &Req) -> Result<Resp, KmsError>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}:{action}", self.base_url);
        debug!(provider = %self.descriptor.provider, action = action, "Calling cloud KMS");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| KmsError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(KmsError::Credential(format!(
                "cloud KMS rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(KmsError::Transport(format!(
                "cloud KMS {action} failed ({status}): {text}"
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| KmsError::Protocol(format!("invalid {action} response: {e}")))
    }
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>, KmsError> {
    BASE64
        .decode(value)
        .map_err(|e| KmsError::Protocol(format!("{field} is not base64: {e}")))
}

#[async_trait]
impl KeyWrapper for CloudWrapper {
    fn descriptor(&self) -> MasterKeyDescriptor {
        self.descriptor.clone()
    }

    async fn wrap(&self, key_id: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let request = EncryptRequest {
            plaintext: BASE64.encode(plaintext),
            additional_authenticated_data: key_id.to_base64(),
        };
        let response: EncryptResponse = self.call("encrypt", &request).await?;
        decode_field("ciphertext", &response.ciphertext)
    }

    async fn unwrap(
        &self,
        key_id: &KeyId,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let request = DecryptRequest {
            ciphertext: BASE64.encode(wrapped),
            additional_authenticated_data: key_id.to_base64(),
        };
        let response: DecryptResponse = self.call("decrypt", &request).await?;
        Ok(Zeroizing::new(decode_field("plaintext", &response.plaintext)?))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use fieldvault_storage::MasterKeyLocation;
    use mockito::Matcher;

    const KEY_REF: &str = "projects/p/locations/global/keyRings/r/cryptoKeys/k";

    fn wrapper(endpoint: &str, token: &str) -> CloudWrapper {
        CloudWrapper::new(
            MasterKeyDescriptor {
                provider: "gcp".into(),
                location: MasterKeyLocation::Cloud {
                    key: KEY_REF.into(),
                    region: "global".into(),
                    endpoint: Some(endpoint.into()),
                },
            },
            KEY_REF,
            Some(endpoint),
            &CloudCredentials::access_token(token),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_wrap_posts_plaintext() {
        let mut server = mockito::Server::new_async().await;
        let id = KeyId::generate();
        let mock = server
            .mock("POST", format!("/v1/{KEY_REF}:encrypt").as_str())
            .match_header("authorization", "Bearer tok-123")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "plaintext": BASE64.encode([7u8; 96]),
                "additionalAuthenticatedData": id.to_base64(),
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({ "ciphertext": "AQIDBA==" }).to_string())
            .create_async()
            .await;

        let wrapped = wrapper(&server.url(), "tok-123")
            .wrap(&id, &[7u8; 96])
            .await
            .unwrap();

        assert_eq!(wrapped, vec![1, 2, 3, 4]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unwrap_decodes_plaintext() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", format!("/v1/{KEY_REF}:decrypt").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({ "plaintext": BASE64.encode([9u8; 96]) }).to_string())
            .create_async()
            .await;

        let plain = wrapper(&server.url(), "tok")
            .unwrap(&KeyId::generate(), &[1, 2, 3, 4])
            .await
            .unwrap();

        assert_eq!(plain.as_slice(), &[9u8; 96][..]);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", format!("/v1/{KEY_REF}:encrypt").as_str())
            .with_status(403)
            .with_body("permission denied")
            .create_async()
            .await;

        let result = wrapper(&server.url(), "bad").wrap(&KeyId::generate(), &[0u8; 96]).await;
        assert!(matches!(result, Err(KmsError::Credential(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", format!("/v1/{KEY_REF}:encrypt").as_str())
            .with_status(503)
            .create_async()
            .await;

        let result = wrapper(&server.url(), "tok").wrap(&KeyId::generate(), &[0u8; 96]).await;
        assert!(matches!(result, Err(KmsError::Transport(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", format!("/v1/{KEY_REF}:encrypt").as_str())
            .with_status(200)
            .with_body(serde_json::json!({ "ciphertext": "***" }).to_string())
            .create_async()
            .await;

        let result = wrapper(&server.url(), "tok").wrap(&KeyId::generate(), &[0u8; 96]).await;
        assert!(matches!(result, Err(KmsError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let result = wrapper("http://127.0.0.1:1", "tok")
            .wrap(&KeyId::generate(), &[0u8; 96])
            .await;
        assert!(matches!(result, Err(KmsError::Transport(_))));
    }
}
