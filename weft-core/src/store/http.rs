//! HTTP implementation of the envelope store client
//!
//! Talks to the backend REST boundary:
//!
//! - `POST   /metadata/store`                       -> `{success, id}`
//! - `GET    /metadata/cid/{id}`                    -> `{success, metadata}`
//! - `GET    /metadata/recipient/{id}?limit&offset` -> `{success, metadata: []}`
//! - `DELETE /metadata/{id}` body `{userId}`        -> `{success}`
//! - `GET    /public-key?userId=`                   -> `{success, publicKey}`
//!
//! The base URL and request timeout are injected through [`StoreConfig`];
//! there is no hard-coded origin and no retry at this layer.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::EnvelopeStore;
use crate::config::StoreConfig;
use crate::envelope::{Envelope, UserId};
use crate::error::{P2pError, P2pResult};

#[derive(Debug, Deserialize)]
struct CreateResponse {
    success: bool,
    #[allow(dead_code)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    success: bool,
    metadata: Option<Envelope>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    success: bool,
    #[serde(default)]
    metadata: Vec<Envelope>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyResponse {
    success: bool,
    public_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    user_id: &'a str,
}

/// reqwest-backed store client.
pub struct HttpEnvelopeStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEnvelopeStore {
    /// Build a client from the injected configuration.
    pub fn new(config: &StoreConfig) -> P2pResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("weft-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| P2pError::StoreUnavailable(e.to_string()))?;
        Ok(HttpEnvelopeStore {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl EnvelopeStore for HttpEnvelopeStore {
    async fn create(&self, envelope: &Envelope) -> P2pResult<()> {
        envelope.validate()?;

        let res = self
            .client
            .post(self.url("/metadata/store"))
            .json(envelope)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(P2pError::StoreUnavailable(format!(
                "store returned {}",
                res.status()
            )));
        }
        let body: CreateResponse = res.json().await?;
        if !body.success {
            return Err(P2pError::StoreUnavailable(
                "backend rejected envelope".to_string(),
            ));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> P2pResult<Envelope> {
        let res = self
            .client
            .get(self.url(&format!("/metadata/cid/{}", id)))
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(P2pError::NotFound(id.to_string()));
        }
        if !res.status().is_success() {
            return Err(P2pError::StoreUnavailable(format!(
                "store returned {}",
                res.status()
            )));
        }
        let body: FetchResponse = res.json().await?;
        match body.metadata {
            Some(envelope) if body.success => Ok(envelope),
            _ => Err(P2pError::NotFound(id.to_string())),
        }
    }

    async fn list_for_recipient(
        &self,
        recipient: &str,
        limit: usize,
        offset: usize,
    ) -> P2pResult<Vec<Envelope>> {
        let res = self
            .client
            .get(self.url(&format!("/metadata/recipient/{}", recipient)))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(P2pError::StoreUnavailable(format!(
                "store returned {}",
                res.status()
            )));
        }
        let body: ListResponse = res.json().await?;
        if !body.success {
            return Err(P2pError::StoreUnavailable(
                "backend rejected listing".to_string(),
            ));
        }
        Ok(body.metadata)
    }

    async fn delete(&self, id: &str, requester: &str) -> P2pResult<()> {
        let res = self
            .client
            .delete(self.url(&format!("/metadata/{}", id)))
            .json(&DeleteRequest { user_id: requester })
            .send()
            .await?;
        match res.status() {
            StatusCode::NOT_FOUND => return Err(P2pError::NotFound(id.to_string())),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(P2pError::DeleteRejected)
            }
            s if !s.is_success() => {
                return Err(P2pError::StoreUnavailable(format!("store returned {}", s)))
            }
            _ => {}
        }
        let body: DeleteResponse = res.json().await?;
        if !body.success {
            // The only in-protocol rejection is the sender check.
            return Err(P2pError::DeleteRejected);
        }
        Ok(())
    }

    async fn public_key_of(&self, user_id: &UserId) -> P2pResult<String> {
        let res = self
            .client
            .get(self.url("/public-key"))
            .query(&[("userId", user_id)])
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(P2pError::RecipientKeyUnavailable(user_id.clone()));
        }
        if !res.status().is_success() {
            return Err(P2pError::StoreUnavailable(format!(
                "store returned {}",
                res.status()
            )));
        }
        let body: KeyResponse = res.json().await?;
        match body.public_key {
            Some(key) if body.success => Ok(key),
            _ => Err(P2pError::RecipientKeyUnavailable(user_id.clone())),
        }
    }
}
