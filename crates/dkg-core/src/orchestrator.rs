//! Initiator-side orchestration: drives one ceremony end-to-end by fanning
//! rounds out to every operator, bounded by [`Concurrency`], with a
//! fail-first error policy: the whole round aborts on the first operator
//! error rather than waiting out stragglers.

use crate::beacon::BeaconNodeClient;
use crate::config::{CeremonyTimeouts, Concurrency};
use crate::crypto::bls::{combine_partial_signatures, ThresholdPublicKey};
use crate::crypto::ceremony_id::generate_ceremony_id;
use crate::crypto::RsaKeyPair;
use crate::switch::{deposit_signing_root, owner_nonce_binding, voluntary_exit_signing_root};
use crate::transport::Transport;
use crate::types::{
    CeremonyId, CeremonyInput, OperatorId, OperatorRecord, OperatorSet, ReshareInput, ResignInput,
};
use crate::wire::{
    envelope::INITIATOR_ID, ExchangeMessage, Message, OutputMessage, ResignMessage,
    ResignOutputMessage, ResultMessage, SignedTransport,
};
use crate::{Error, Result};
use bls12_381::G2Affine;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome of a completed DKG or reshare ceremony, ready to be written out
/// by the (out-of-scope) CLI file writers.
pub struct CeremonyOutcome {
    pub ceremony_id: CeremonyId,
    pub group_public_key: [u8; 48],
    pub deposit_signature: [u8; 96],
    pub encrypted_final_shares: Vec<(OperatorId, Vec<u8>)>,
    pub public_shares: Vec<(OperatorId, [u8; 48])>,
}

/// Outcome of re-signing a voluntary exit under an already-established
/// group key, written out as `validator-exit-<index>.json`.
pub struct ResignOutcome {
    pub validator_pubkey: [u8; 48],
    pub validator_index: u64,
    pub epoch: u64,
    pub signature: [u8; 96],
}

pub struct Orchestrator<T: Transport> {
    transport: Arc<T>,
    keypair: Arc<RsaKeyPair>,
    concurrency: Concurrency,
    timeouts: CeremonyTimeouts,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(
        transport: Arc<T>,
        keypair: Arc<RsaKeyPair>,
        concurrency: Concurrency,
        timeouts: CeremonyTimeouts,
    ) -> Self {
        Self {
            transport,
            keypair,
            concurrency,
            timeouts,
        }
    }

    /// Run a fresh DKG ceremony to completion.
    #[instrument(skip(self, input))]
    pub async fn run_dkg(&self, input: CeremonyInput) -> Result<CeremonyOutcome> {
        let ceremony_id = generate_ceremony_id();
        let operators = input.operators.clone();
        info!(ceremony = %ceremony_id, n = operators.len(), "starting DKG");

        let init_envelope = SignedTransport::sign(
            ceremony_id,
            INITIATOR_ID,
            Message::Init(input.clone()),
            &self.keypair,
        )?;
        let exchanges = self
            .fan_out(operators.operators(), init_envelope, |msg| match msg {
                Message::Exchange(e) => Ok(e),
                other => Err(wrong_kind("exchange", &other)),
            })
            .await?;

        let bundle: Vec<ExchangeMessage> = exchanges.into_iter().map(|(_, e)| e).collect();
        let exchange_set_envelope = SignedTransport::sign(
            ceremony_id,
            INITIATOR_ID,
            Message::ExchangeSet(bundle),
            &self.keypair,
        )?;
        let outputs = self
            .fan_out(operators.operators(), exchange_set_envelope, |msg| match msg {
                Message::Output(o) => Ok(o),
                other => Err(wrong_kind("output", &other)),
            })
            .await?;

        let deposit_message = deposit_signing_root(&input);
        let owner_nonce_message = owner_nonce_binding(&input);
        let outcome = self
            .finalize(ceremony_id, &operators, outputs, &deposit_message, &owner_nonce_message)
            .await?;

        info!(ceremony = %ceremony_id, "DKG complete");
        Ok(outcome)
    }

    /// Run a reshare ceremony to completion.
    #[instrument(skip(self, input))]
    pub async fn run_reshare(&self, input: ReshareInput) -> Result<CeremonyOutcome> {
        let ceremony_id = generate_ceremony_id();
        let new_operators = input.new_operators.clone();
        info!(ceremony = %ceremony_id, "starting reshare");

        let reshare_envelope = SignedTransport::sign(
            ceremony_id,
            INITIATOR_ID,
            Message::Reshare(input.clone()),
            &self.keypair,
        )?;
        // Old and new operator sets may overlap, and their union can exceed
        // the protocol's supported `OperatorSet` sizes, so the fan-out
        // target list for this round is a plain record list rather than a
        // protocol-bound `OperatorSet`: every old operator must deal even
        // if it is also a new recipient.
        let fan_out_targets = union_operator_records(&input.old_operators, &new_operators);
        let exchanges = self
            .fan_out(&fan_out_targets, reshare_envelope, |msg| match msg {
                Message::Exchange(e) => Ok(e),
                other => Err(wrong_kind("exchange", &other)),
            })
            .await?;

        let bundle: Vec<ExchangeMessage> = exchanges
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| !e.commitments.is_empty())
            .collect();
        let exchange_set_envelope = SignedTransport::sign(
            ceremony_id,
            INITIATOR_ID,
            Message::ExchangeSet(bundle),
            &self.keypair,
        )?;
        let outputs = self
            .fan_out(new_operators.operators(), exchange_set_envelope, |msg| match msg {
                Message::Output(o) => Ok(o),
                other => Err(wrong_kind("output", &other)),
            })
            .await?;

        let deposit_message = crate::switch::reshare_deposit_signing_root(&input);
        let owner_nonce_message = crate::switch::reshare_owner_nonce_binding(&input);
        let outcome = self
            .finalize(ceremony_id, &new_operators, outputs, &deposit_message, &owner_nonce_message)
            .await?;

        info!(ceremony = %ceremony_id, "reshare complete");
        Ok(outcome)
    }

    /// Re-sign a voluntary exit under an existing group key: no DKG round
    /// runs, each operator just decrypts its own previously-issued share
    /// from `encrypted_key_shares` and partial-signs directly. The
    /// validator's current active epoch is looked up from `beacon` and
    /// stamped into the signed exit message, per the beacon-chain
    /// voluntary-exit convention.
    #[instrument(skip(self, encrypted_key_shares, beacon))]
    #[allow(clippy::too_many_arguments)]
    pub async fn run_resign(
        &self,
        operators: OperatorSet,
        group_public_key: [u8; 48],
        validator_pubkey: [u8; 48],
        validator_index: u64,
        target_fork_epoch: u64,
        encrypted_key_shares: &HashMap<OperatorId, Vec<u8>>,
        beacon: &dyn BeaconNodeClient,
    ) -> Result<ResignOutcome> {
        let ceremony_id = generate_ceremony_id();
        let epoch = beacon.active_epoch(&validator_pubkey).await?;
        info!(ceremony = %ceremony_id, validator_index, epoch, "starting resign");

        let build_envelope = |record: &OperatorRecord| -> Result<SignedTransport> {
            let ciphertext = encrypted_key_shares
                .get(&record.id)
                .cloned()
                .ok_or(Error::UnknownOperator(record.id))?;
            let input = ResignInput {
                operators: operators.clone(),
                group_public_key,
                validator_pubkey,
                validator_index,
                target_fork_epoch,
                epoch,
                encrypted_key_share: ciphertext,
            };
            SignedTransport::sign(
                ceremony_id,
                INITIATOR_ID,
                Message::Resign(ResignMessage { input }),
                &self.keypair,
            )
        };

        let mut in_flight = FuturesUnordered::new();
        let mut pending: Vec<OperatorRecord> = operators.operators().to_vec();
        let mut results = Vec::with_capacity(pending.len());

        for _ in 0..self.concurrency.0.min(pending.len()) {
            if let Some(record) = pending.pop() {
                let envelope = build_envelope(&record)?;
                in_flight.push(self.dispatch_resign_one(record, envelope));
            }
        }
        while let Some(outcome) = in_flight.next().await {
            let (id, output) = outcome?;
            results.push((id, output));
            if let Some(record) = pending.pop() {
                let envelope = build_envelope(&record)?;
                in_flight.push(self.dispatch_resign_one(record, envelope));
            }
        }

        if results.len() < operators.threshold() {
            return Err(Error::QuorumFail {
                needed: operators.threshold(),
                got: results.len(),
            });
        }

        let pubkey = ThresholdPublicKey::from_compressed(&group_public_key)?;
        let exit_message = voluntary_exit_signing_root(epoch, validator_index, target_fork_epoch);
        let partials: Vec<(u64, G2Affine)> = results
            .iter()
            .map(|(id, out)| {
                let x = operators.evaluation_point(*id).ok_or(Error::UnknownOperator(*id))?;
                let sig = decompress_g2(&out.partial_exit_sig)?;
                Ok((x, sig))
            })
            .collect::<Result<_>>()?;
        let combined = combine_partial_signatures(&partials);
        if !pubkey.verify(&exit_message, combined) {
            return Err(Error::CryptoFail("combined exit signature failed verification".into()));
        }

        info!(ceremony = %ceremony_id, "resign complete");
        Ok(ResignOutcome {
            validator_pubkey,
            validator_index,
            epoch,
            signature: combined.to_compressed(),
        })
    }

    async fn dispatch_resign_one(
        &self,
        record: OperatorRecord,
        envelope: SignedTransport,
    ) -> Result<(OperatorId, ResignOutputMessage)> {
        let response = tokio::time::timeout(
            self.timeouts.crypto_round,
            self.transport.send(&record.endpoint, envelope),
        )
        .await
        .map_err(|_| Error::Timeout(format!("operator {}", record.id)))??;
        response.verify(&record.rsa_pub_der)?;
        match response.message {
            Message::ResignOutput(out) => Ok((record.id, out)),
            other => Err(wrong_kind("resign_output", &other)),
        }
    }

    /// Combine a quorum of [`OutputMessage`]s into the final deposit
    /// signature, verify it, and broadcast the [`ResultMessage`] back to
    /// every participant.
    async fn finalize(
        &self,
        ceremony_id: CeremonyId,
        operators: &OperatorSet,
        outputs: Vec<(OperatorId, OutputMessage)>,
        deposit_message: &[u8],
        owner_nonce_message: &[u8],
    ) -> Result<CeremonyOutcome> {
        if outputs.len() < operators.threshold() {
            return Err(Error::QuorumFail {
                needed: operators.threshold(),
                got: outputs.len(),
            });
        }

        let mut group_public_key = None;
        for (id, out) in &outputs {
            let claimed = ThresholdPublicKey::from_compressed(&out.group_public_key)?;
            match group_public_key {
                None => group_public_key = Some(claimed),
                Some(expected) if expected != claimed => {
                    return Err(Error::CryptoFail(format!(
                        "operator {id} derived a different group public key than the quorum"
                    )));
                }
                Some(_) => {}
            }
        }
        let group_public_key = group_public_key.ok_or_else(|| {
            Error::ProtocolViolation("no outputs to derive group public key from".into())
        })?;

        let deposit_partials: Vec<(u64, G2Affine)> = outputs
            .iter()
            .map(|(id, out)| {
                let x = operators.evaluation_point(*id).ok_or(Error::UnknownOperator(*id))?;
                let sig = decompress_g2(&out.partial_deposit_sig)?;
                Ok((x, sig))
            })
            .collect::<Result<_>>()?;
        let owner_nonce_partials: Vec<(u64, G2Affine)> = outputs
            .iter()
            .map(|(id, out)| {
                let x = operators.evaluation_point(*id).ok_or(Error::UnknownOperator(*id))?;
                let sig = decompress_g2(&out.partial_owner_nonce_sig)?;
                Ok((x, sig))
            })
            .collect::<Result<_>>()?;

        let deposit_signature = combine_partial_signatures(&deposit_partials);
        let owner_nonce_signature = combine_partial_signatures(&owner_nonce_partials);

        if !group_public_key.verify(deposit_message, deposit_signature) {
            return Err(Error::CryptoFail("combined deposit signature failed verification".into()));
        }
        if !group_public_key.verify(owner_nonce_message, owner_nonce_signature) {
            return Err(Error::CryptoFail("combined owner/nonce signature failed verification".into()));
        }

        let deposit_data_root = sha256(deposit_message);
        let result = ResultMessage {
            operators: operators.ids(),
            deposit_signature: deposit_signature.to_compressed(),
            group_public_key: group_public_key.to_compressed(),
            deposit_data_root,
        };
        let result_envelope = SignedTransport::sign(
            ceremony_id,
            INITIATOR_ID,
            Message::Result(result),
            &self.keypair,
        )?;
        self.broadcast_result(operators, result_envelope).await?;

        Ok(CeremonyOutcome {
            ceremony_id,
            group_public_key: group_public_key.to_compressed(),
            deposit_signature: deposit_signature.to_compressed(),
            encrypted_final_shares: outputs
                .iter()
                .map(|(id, o)| (*id, o.encrypted_final_share.clone()))
                .collect(),
            public_shares: outputs.iter().map(|(id, o)| (*id, o.public_share)).collect(),
        })
    }

    /// Send `envelope` to every operator in `operators` concurrently,
    /// bounded by `self.concurrency`, failing the whole round on the first
    /// error from any operator (fail-first fan-out).
    async fn fan_out<R>(
        &self,
        targets: &[OperatorRecord],
        envelope: SignedTransport,
        extract: impl Fn(Message) -> Result<R> + Send + Sync + Copy + 'static,
    ) -> Result<Vec<(OperatorId, R)>>
    where
        R: Send + 'static,
    {
        let mut in_flight = FuturesUnordered::new();
        let mut pending: Vec<_> = targets.to_vec();
        let mut results = Vec::with_capacity(targets.len());

        for _ in 0..self.concurrency.0.min(pending.len()) {
            if let Some(record) = pending.pop() {
                in_flight.push(self.dispatch_one(record, envelope.clone(), extract));
            }
        }

        while let Some(outcome) = in_flight.next().await {
            let (operator_id, response) = outcome?;
            results.push((operator_id, response));
            if let Some(record) = pending.pop() {
                in_flight.push(self.dispatch_one(record, envelope.clone(), extract));
            }
        }

        Ok(results)
    }

    async fn dispatch_one<R>(
        &self,
        record: OperatorRecord,
        envelope: SignedTransport,
        extract: impl Fn(Message) -> Result<R>,
    ) -> Result<(OperatorId, R)>
    where
        R: Send + 'static,
    {
        let response = tokio::time::timeout(
            self.timeouts.crypto_round,
            self.transport.send(&record.endpoint, envelope),
        )
        .await
        .map_err(|_| Error::Timeout(format!("operator {}", record.id)))??;
        response.verify(&record.rsa_pub_der)?;
        let extracted = extract(response.message)?;
        Ok((record.id, extracted))
    }

    /// Broadcast the final `Result` envelope to every operator and wait for
    /// all N signed acknowledgments (spec §4.6 step 4), failing first on the
    /// first operator whose acknowledgment doesn't arrive or doesn't verify.
    async fn broadcast_result(&self, operators: &OperatorSet, envelope: SignedTransport) -> Result<()> {
        let mut in_flight = FuturesUnordered::new();
        for record in operators.operators() {
            let envelope = envelope.clone();
            let record = record.clone();
            in_flight.push(async move {
                let ack = tokio::time::timeout(
                    self.timeouts.crypto_round,
                    self.transport.send(&record.endpoint, envelope),
                )
                .await
                .map_err(|_| Error::Timeout(format!("operator {} result ack", record.id)))??;
                ack.verify(&record.rsa_pub_der)
            });
        }
        while let Some(outcome) = in_flight.next().await {
            outcome?;
        }
        Ok(())
    }
}

fn union_operator_records(old: &OperatorSet, new: &OperatorSet) -> Vec<OperatorRecord> {
    let mut records = old.operators().to_vec();
    for record in new.operators() {
        if !records.iter().any(|r| r.id == record.id) {
            records.push(record.clone());
        }
    }
    records
}

fn wrong_kind(expected: &'static str, actual: &Message) -> Error {
    Error::WrongMessageType {
        expected,
        actual: actual.kind(),
    }
}

fn decompress_g2(bytes: &[u8; 96]) -> Result<G2Affine> {
    Option::<G2Affine>::from(G2Affine::from_compressed(bytes))
        .ok_or_else(|| Error::CryptoFail("invalid compressed G2 point".into()))
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}
