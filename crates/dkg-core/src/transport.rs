//! Transport contract between the initiator and an operator endpoint.
//!
//! The concrete HTTP binding (request building, retries, connection pooling)
//! is an external collaborator out of this crate's scope; this trait is the
//! seam it plugs into.

use crate::wire::SignedTransport;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a signed envelope to `endpoint` and return the operator's
    /// signed response envelope.
    async fn send(&self, endpoint: &str, envelope: SignedTransport) -> Result<SignedTransport>;
}

/// In-memory transport for tests: dispatches directly into a
/// [`crate::switch::Switch`] per endpoint, with no network round trip.
pub mod memory {
    use super::*;
    use crate::switch::Switch;
    use crate::wire::Message;
    use crate::Error;
    use std::collections::HashMap;
    use std::sync::Arc;

    pub struct InMemoryTransport {
        switches: HashMap<String, Arc<Switch>>,
    }

    impl InMemoryTransport {
        pub fn new(switches: HashMap<String, Arc<Switch>>) -> Self {
            Self { switches }
        }
    }

    #[async_trait]
    impl Transport for InMemoryTransport {
        async fn send(&self, endpoint: &str, envelope: SignedTransport) -> Result<SignedTransport> {
            let switch = self
                .switches
                .get(endpoint)
                .ok_or_else(|| Error::Transport(format!("no operator registered at {endpoint}")))?;

            match &envelope.message {
                Message::Init(_) => switch.handle_init(envelope),
                Message::Reshare(_) => switch.handle_reshare(envelope),
                Message::ExchangeSet(_) => switch.handle_exchange_set(envelope),
                Message::Result(_) => switch.handle_result(envelope).await,
                Message::Resign(_) => switch.handle_resign(envelope),
                Message::Ping(_) => switch.handle_ping(envelope),
                other => Err(Error::WrongMessageType {
                    expected: "init|reshare|resign|exchange_set|result|ping",
                    actual: other.kind(),
                }),
            }
        }
    }
}
