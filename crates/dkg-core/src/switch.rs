//! Operator-side ceremony registry: dispatches inbound signed envelopes to
//! the right [`Instance`], creating and tearing it down across its lifetime.
//!
//! A concurrent map keyed by ceremony identifier, one instance per
//! in-flight ceremony, serving as a request/response dispatcher since
//! operators answer the initiator synchronously rather than polling a
//! shared store.

use crate::blobstore::{keys, BlobStore};
use crate::config::CeremonyTimeouts;
use crate::crypto::bls::{partial_sign, scalar_from_bytes, ThresholdPublicKey};
use crate::crypto::rsa_primitives::{decrypt_share, sign_envelope, verify_envelope};
use crate::crypto::RsaKeyPair;
use crate::directory::OperatorDirectory;
use crate::instance::{Instance, State};
use crate::types::{CeremonyId, OperatorId, ReshareInput};
use crate::wire::{envelope::INITIATOR_ID, Message, ResignOutputMessage, SignedProof, SignedTransport};
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Owns every in-flight ceremony instance for one operator process.
pub struct Switch {
    self_id: OperatorId,
    keypair: Arc<RsaKeyPair>,
    initiator_pub_der: Vec<u8>,
    timeouts: CeremonyTimeouts,
    instances: DashMap<CeremonyId, Instance>,
    blob_store: Arc<dyn BlobStore>,
}

impl Switch {
    pub fn new(
        self_id: OperatorId,
        keypair: Arc<RsaKeyPair>,
        initiator_pub_der: Vec<u8>,
        timeouts: CeremonyTimeouts,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            self_id,
            keypair,
            initiator_pub_der,
            timeouts,
            instances: DashMap::new(),
            blob_store,
        }
    }

    /// Verify the envelope came from the initiator, routing only if so.
    fn authenticate_initiator(&self, envelope: &SignedTransport) -> Result<()> {
        if envelope.signer != INITIATOR_ID {
            return Err(Error::UnknownOperator(envelope.signer));
        }
        envelope.verify(&self.initiator_pub_der)
    }

    /// Handle a request on the `/init` route: start a fresh-DKG instance.
    #[instrument(skip(self, envelope), fields(ceremony = %envelope.ceremony_id))]
    pub fn handle_init(&self, envelope: SignedTransport) -> Result<SignedTransport> {
        self.authenticate_initiator(&envelope)?;
        envelope.expect_kind("init")?;
        let Message::Init(input) = envelope.message else {
            unreachable!("expect_kind checked the variant");
        };

        if self.instances.contains_key(&envelope.ceremony_id) {
            return Err(Error::DuplicateCeremony(envelope.ceremony_id.to_string()));
        }
        if !input.operators.contains(self.self_id) {
            return Err(Error::UnknownOperator(self.self_id));
        }

        let directory = OperatorDirectory::new(input.operators.operators().to_vec());
        let deposit_message = deposit_signing_root(&input);
        let owner_nonce_message = owner_nonce_binding(&input);

        let mut instance = Instance::new_dkg(
            envelope.ceremony_id,
            self.self_id,
            &input.operators,
            directory,
            self.keypair.clone(),
            deposit_message,
            owner_nonce_message,
            input.owner_address,
            self.timeouts,
        );
        let exchange = instance.handle_init(&input)?;
        self.instances.insert(envelope.ceremony_id, instance);

        info!("started DKG instance");
        SignedTransport::sign(
            envelope.ceremony_id,
            self.self_id,
            Message::Exchange(exchange),
            &self.keypair,
        )
    }

    /// Handle a request on the `/reshare` route. A reshare additionally
    /// requires a quorum of signed proofs from the old operator set before
    /// seeding the new polynomial; this is enforced by requiring at least
    /// the old set's threshold worth of `old_proofs` entries to be present,
    /// each RSA-signed by a distinct old dealer, and verified against that
    /// dealer's public key.
    #[instrument(skip(self, envelope), fields(ceremony = %envelope.ceremony_id))]
    pub fn handle_reshare(&self, envelope: SignedTransport) -> Result<SignedTransport> {
        self.authenticate_initiator(&envelope)?;
        envelope.expect_kind("reshare")?;
        let Message::Reshare(input) = envelope.message else {
            unreachable!("expect_kind checked the variant");
        };

        if self.instances.contains_key(&envelope.ceremony_id) {
            return Err(Error::DuplicateCeremony(envelope.ceremony_id.to_string()));
        }
        let in_old = input.old_operators.contains(self.self_id);
        let in_new = input.new_operators.contains(self.self_id);
        if !in_old && !in_new {
            return Err(Error::UnknownOperator(self.self_id));
        }
        verify_old_proofs_quorum(&envelope.ceremony_id, &input)?;

        let old_group_public_key = ThresholdPublicKey::from_compressed(&input.old_group_public_key)?;
        let directory = OperatorDirectory::new(input.new_operators.operators().to_vec());
        let deposit_message = reshare_deposit_signing_root(&input);
        let owner_nonce_message = reshare_owner_nonce_binding(&input);

        let mut instance = Instance::new_reshare(
            envelope.ceremony_id,
            self.self_id,
            &input.old_operators,
            &input.new_operators,
            old_group_public_key,
            directory,
            self.keypair.clone(),
            deposit_message,
            owner_nonce_message,
            self.timeouts,
        );
        let exchange = instance.handle_reshare_init(&input)?;
        self.instances.insert(envelope.ceremony_id, instance);

        info!(in_old, in_new, "started reshare instance");
        SignedTransport::sign(
            envelope.ceremony_id,
            self.self_id,
            Message::Exchange(exchange),
            &self.keypair,
        )
    }

    /// Handle a request on the `/dkg` route: the relayed bundle of every
    /// dealer's exchange message.
    #[instrument(skip(self, envelope), fields(ceremony = %envelope.ceremony_id))]
    pub fn handle_exchange_set(&self, envelope: SignedTransport) -> Result<SignedTransport> {
        self.authenticate_initiator(&envelope)?;
        envelope.expect_kind("exchange_set")?;
        let Message::ExchangeSet(bundle) = envelope.message else {
            unreachable!("expect_kind checked the variant");
        };

        let mut instance = self
            .instances
            .get_mut(&envelope.ceremony_id)
            .ok_or_else(|| Error::UnknownCeremony(envelope.ceremony_id.to_string()))?;
        let output = instance.handle_exchange_set(&bundle)?;

        SignedTransport::sign(
            envelope.ceremony_id,
            self.self_id,
            Message::Output(output),
            &self.keypair,
        )
    }

    /// Handle a request on the `/results` route: the initiator's final,
    /// aggregated result. On success the instance is removed, its
    /// encrypted share/proof/result are persisted to the blob store, and
    /// it is dropped (zeroizing its final share); on failure it is removed
    /// as ABORTED without persisting anything. Returns this operator's
    /// signed acknowledgment so the initiator can verify every operator
    /// actually received and accepted the result (spec §4.6 step 4).
    #[instrument(skip(self, envelope), fields(ceremony = %envelope.ceremony_id))]
    pub async fn handle_result(&self, envelope: SignedTransport) -> Result<SignedTransport> {
        self.authenticate_initiator(&envelope)?;
        envelope.expect_kind("result")?;
        let Message::Result(result) = envelope.message else {
            unreachable!("expect_kind checked the variant");
        };
        let ceremony_id = envelope.ceremony_id;

        let outcome = {
            let mut instance = self
                .instances
                .get_mut(&ceremony_id)
                .ok_or_else(|| Error::UnknownCeremony(ceremony_id.to_string()))?;
            instance.handle_result(&result)
        };
        self.instances.remove(&ceremony_id);

        let record = outcome?;
        self.save_result_data(&ceremony_id, &record).await?;

        SignedTransport::sign(
            ceremony_id,
            self.self_id,
            Message::Pong(crate::wire::PongMessage { operator: self.self_id, nonce: 0 }),
            &self.keypair,
        )
    }

    /// Persist the terminal artifacts of a completed ceremony: this
    /// operator's own encrypted final share, its signed proof of
    /// participation, and the archived result record.
    async fn save_result_data(
        &self,
        ceremony_id: &CeremonyId,
        record: &crate::instance::TerminationRecord,
    ) -> Result<()> {
        let proof = self.sign_proof(record)?;
        let proof_bytes = serde_json::to_vec(&proof)?;
        self.blob_store
            .put(&keys::proof(&ceremony_id.to_string(), self.self_id), proof_bytes)
            .await?;
        self.blob_store
            .put(
                &keys::final_share(&ceremony_id.to_string(), self.self_id),
                record.encrypted_final_share.clone(),
            )
            .await?;
        self.blob_store
            .put(
                &keys::result(&ceremony_id.to_string()),
                serde_json::to_vec(record)?,
            )
            .await?;
        info!(ceremony = %ceremony_id, "persisted ceremony result");
        Ok(())
    }

    fn sign_proof(&self, record: &crate::instance::TerminationRecord) -> Result<SignedProof> {
        let digest = proof_signing_digest(
            self.self_id,
            &record.group_public_key,
            &record.encrypted_final_share,
            &record.owner_address,
        );
        let signature = sign_envelope(&self.keypair, &digest)?;
        Ok(SignedProof {
            dealer: self.self_id,
            validator: record.group_public_key,
            encrypted_share: record.encrypted_final_share.clone(),
            share_pub_key: record.public_share,
            owner_address: record.owner_address,
            signature,
        })
    }

    /// Handle a request on the `/resign` route: a single-round, stateless
    /// reply — no [`Instance`] is created, since resigning an existing
    /// validator never reruns key generation. This operator decrypts its
    /// own previously-issued key share from the keyshares file and
    /// partial-signs the voluntary-exit message; no re-verification of
    /// `old_proofs`/commitments is performed here (see DESIGN.md).
    #[instrument(skip(self, envelope), fields(ceremony = %envelope.ceremony_id))]
    pub fn handle_resign(&self, envelope: SignedTransport) -> Result<SignedTransport> {
        self.authenticate_initiator(&envelope)?;
        envelope.expect_kind("resign")?;
        let Message::Resign(msg) = envelope.message else {
            unreachable!("expect_kind checked the variant");
        };
        let input = msg.input;

        if !input.operators.contains(self.self_id) {
            return Err(Error::UnknownOperator(self.self_id));
        }

        let plaintext = decrypt_share(&self.keypair, &input.encrypted_key_share)
            .map_err(|e| Error::CryptoFail(format!("old share decryption failed: {e}")))?;
        let bytes: [u8; 32] = plaintext
            .try_into()
            .map_err(|_| Error::CryptoFail("decrypted share has wrong length".into()))?;
        let share = scalar_from_bytes(&bytes)?;

        let exit_message =
            voluntary_exit_signing_root(input.epoch, input.validator_index, input.target_fork_epoch);
        let partial_exit_sig = partial_sign(share, &exit_message);
        let public_share = ThresholdPublicKey::from_secret(share).to_compressed();

        info!("produced resign partial signature");
        SignedTransport::sign(
            envelope.ceremony_id,
            self.self_id,
            Message::ResignOutput(ResignOutputMessage {
                signer: self.self_id,
                partial_exit_sig: partial_exit_sig.to_compressed(),
                public_share,
            }),
            &self.keypair,
        )
    }

    /// Handle a `/health_check` ping: answered directly, without touching
    /// any instance.
    pub fn handle_ping(&self, envelope: SignedTransport) -> Result<SignedTransport> {
        self.authenticate_initiator(&envelope)?;
        envelope.expect_kind("ping")?;
        let Message::Ping(ping) = envelope.message else {
            unreachable!("expect_kind checked the variant");
        };
        SignedTransport::sign(
            envelope.ceremony_id,
            self.self_id,
            Message::Pong(crate::wire::PongMessage {
                operator: self.self_id,
                nonce: ping.nonce,
            }),
            &self.keypair,
        )
    }

    /// Current state of a ceremony instance, for diagnostics/tests.
    pub fn instance_state(&self, ceremony_id: &CeremonyId) -> Option<State> {
        self.instances.get(ceremony_id).map(|i| i.state().clone())
    }

    pub fn active_ceremony_count(&self) -> usize {
        self.instances.len()
    }
}

/// Reject a reshare unless at least the old set's threshold worth of
/// `old_proofs` are present, each signed by a distinct dealer from the old
/// operator set, and each RSA signature verifies against that dealer's
/// public key — otherwise a forged proof could authorize a reshare nobody
/// in the old set actually vouched for.
fn verify_old_proofs_quorum(ceremony_id: &CeremonyId, input: &ReshareInput) -> Result<()> {
    let threshold = input.old_operators.threshold();
    if input.old_proofs.len() < threshold {
        return Err(Error::ProtocolViolation(format!(
            "reshare requires {threshold} old proofs, got {}",
            input.old_proofs.len()
        )));
    }
    let mut seen = std::collections::HashSet::new();
    for proof in &input.old_proofs {
        let dealer_record = input.old_operators.get(proof.dealer).ok_or_else(|| {
            Error::ProtocolViolation(format!(
                "old proof from {} is not a member of the old operator set",
                proof.dealer
            ))
        })?;
        if !seen.insert(proof.dealer) {
            return Err(Error::ProtocolViolation(format!(
                "duplicate old proof from dealer {}",
                proof.dealer
            )));
        }
        let digest = proof_signing_digest(
            proof.dealer,
            &proof.validator_pubkey,
            &proof.encrypted_share,
            &proof.owner_address,
        );
        verify_envelope(&dealer_record.rsa_pub_der, &digest, &proof.signature).map_err(|e| {
            Error::SignatureInvalid(format!(
                "old proof from dealer {} failed verification: {e}",
                proof.dealer
            ))
        })?;
    }
    info!(ceremony = %ceremony_id, count = input.old_proofs.len(), "verified old-set proof quorum");
    Ok(())
}

/// Deterministic deposit-message signing root: SHA-256 over the canonical
/// encoding of everything that makes a deposit unique.
pub(crate) fn deposit_signing_root(input: &crate::types::CeremonyInput) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"deposit");
    hasher.update(input.owner_address);
    hasher.update(input.withdrawal_credentials);
    hasher.update(input.fork_version);
    hasher.finalize().to_vec()
}

/// Binds an operator's final share to this ceremony's owner address and
/// nonce, so a stale share from an aborted or superseded ceremony can never
/// be replayed into a later one.
pub(crate) fn owner_nonce_binding(input: &crate::types::CeremonyInput) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"owner-nonce");
    hasher.update(input.owner_address);
    hasher.update(input.nonce.to_be_bytes());
    hasher.finalize().to_vec()
}

pub(crate) fn reshare_deposit_signing_root(input: &ReshareInput) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"reshare-deposit");
    hasher.update(input.old_group_public_key);
    hasher.finalize().to_vec()
}

pub(crate) fn reshare_owner_nonce_binding(input: &ReshareInput) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"reshare-owner-nonce");
    hasher.update(input.old_operators.hash());
    hasher.update(input.new_operators.hash());
    hasher.finalize().to_vec()
}

/// Signing root for a voluntary-exit message: `epoch || validator_index`,
/// bound to the target fork so a resign for one fork can never be replayed
/// as a resign for another.
pub fn voluntary_exit_signing_root(epoch: u64, validator_index: u64, target_fork_epoch: u64) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"voluntary-exit");
    hasher.update(epoch.to_be_bytes());
    hasher.update(validator_index.to_be_bytes());
    hasher.update(target_fork_epoch.to_be_bytes());
    hasher.finalize().to_vec()
}

/// Signing root for an operator's proof of participation: binds the dealer,
/// the validator (group) public key, its own encrypted final share and the
/// owner address together, so a proof from one ceremony can never be
/// replayed as a proof for a different validator or owner. Computed
/// identically at proof-issuance time ([`Switch::sign_proof`]) and at
/// reshare-verification time ([`verify_old_proofs_quorum`]).
pub fn proof_signing_digest(
    dealer: OperatorId,
    group_public_key: &[u8; 48],
    encrypted_share: &[u8],
    owner_address: &[u8; 20],
) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(crate::wire::domain::RESULT);
    hasher.update(dealer.to_be_bytes());
    hasher.update(group_public_key);
    hasher.update(encrypted_share);
    hasher.update(owner_address);
    hasher.finalize().to_vec()
}
