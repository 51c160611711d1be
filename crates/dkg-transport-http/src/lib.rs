//! HTTP transport
//!
//! [`Transport`] and [`BeaconNodeClient`] implementations that carry the
//! ceremony protocol's signed JSON envelopes over plain `reqwest` POSTs,
//! one request per round per operator.

use async_trait::async_trait;
use dkg_core::beacon::BeaconNodeClient;
use dkg_core::transport::Transport;
use dkg_core::wire::SignedTransport;
use dkg_core::{Error, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// HTTP-based operator transport: POSTs a [`SignedTransport`] envelope to
/// the route matching its message kind and deserializes the operator's
/// signed reply.
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route for a message kind, matching the operator service's router.
    fn route_for(kind: &'static str) -> Result<&'static str> {
        match kind {
            "init" => Ok("init"),
            "reshare" => Ok("reshare"),
            "exchange_set" => Ok("dkg"),
            "resign" => Ok("resign"),
            "result" => Ok("results"),
            "ping" => Ok("health_check"),
            other => Err(Error::WrongMessageType {
                expected: "init|reshare|exchange_set|resign|result|ping",
                actual: other,
            }),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, envelope), fields(ceremony = %envelope.ceremony_id))]
    async fn send(&self, endpoint: &str, envelope: SignedTransport) -> Result<SignedTransport> {
        let route = Self::route_for(envelope.message.kind())?;
        let url = format!("{}/{route}", endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&envelope)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "{url} returned {status}: {body}"
            )));
        }

        debug!(%url, "round-trip complete");
        response
            .json::<SignedTransport>()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

/// REST beacon-node client consulted by a resign ceremony to learn a
/// validator's current active epoch. The endpoint is expected to expose a
/// `GET <base>/eth/v1/beacon/states/head/validators/<pubkey>` style lookup
/// returning `{"data": {"index": "<epoch>"}}`; the concrete beacon-node REST
/// schema is an external collaborator's concern, so only the single field
/// this ceremony needs is parsed out.
pub struct HttpBeaconNodeClient {
    client: Client,
    base_url: String,
}

impl HttpBeaconNodeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(serde::Deserialize)]
struct ActiveEpochResponse {
    data: ActiveEpochData,
}

#[derive(serde::Deserialize)]
struct ActiveEpochData {
    epoch: String,
}

#[async_trait]
impl BeaconNodeClient for HttpBeaconNodeClient {
    #[instrument(skip(self))]
    async fn active_epoch(&self, validator_pubkey: &[u8; 48]) -> Result<u64> {
        let url = format!(
            "{}/eth/v1/beacon/states/head/validators/0x{}",
            self.base_url.trim_end_matches('/'),
            hex::encode(validator_pubkey)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "beacon node returned {}",
                response.status()
            )));
        }
        let parsed: ActiveEpochResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        parsed
            .data
            .epoch
            .parse()
            .map_err(|_| Error::Transport("beacon node returned a non-numeric epoch".into()))
    }
}
