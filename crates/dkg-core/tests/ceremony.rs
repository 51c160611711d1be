//! End-to-end ceremony scenarios driven entirely over the in-memory
//! transport and an in-process blob store, with fixed RSA/BLS test keys.

use async_trait::async_trait;
use dashmap::DashMap;
use dkg_core::beacon::StaticBeaconNodeClient;
use dkg_core::blobstore::BlobStore;
use dkg_core::config::{CeremonyTimeouts, Concurrency};
use dkg_core::crypto::RsaKeyPair;
use dkg_core::error::Error;
use dkg_core::orchestrator::Orchestrator;
use dkg_core::switch::Switch;
use dkg_core::transport::memory::InMemoryTransport;
use dkg_core::types::{CeremonyInput, OperatorRecord, OperatorSet, ReshareInput};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use std::collections::HashMap;
use std::sync::Arc;

/// Plain `DashMap`-backed `BlobStore` for tests, avoiding a dev-dependency
/// cycle on `dkg-blobstore` (which itself depends on `dkg-core`).
#[derive(Default)]
struct TestBlobStore {
    data: DashMap<String, Vec<u8>>,
}

#[async_trait]
impl BlobStore for TestBlobStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> dkg_core::Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> dkg_core::Result<Vec<u8>> {
        self.data
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> dkg_core::Result<bool> {
        Ok(self.data.contains_key(key))
    }

    async fn delete(&self, key: &str) -> dkg_core::Result<()> {
        self.data.remove(key);
        Ok(())
    }
}

fn fresh_rsa_keypair() -> RsaKeyPair {
    let mut rng = rand::rngs::OsRng;
    let private = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
    let der = private.to_pkcs8_der().expect("pkcs8 encode");
    RsaKeyPair::from_pkcs8_der(der.as_bytes()).expect("parse keypair")
}

/// Stand up `n` operators, each with its own `Switch`, wired into one
/// `InMemoryTransport` keyed by `"op<id>"` endpoints. Returns the operator
/// set (for ceremony inputs) and the transport.
fn build_cluster(n: u64, initiator_pub_der: &[u8]) -> (OperatorSet, InMemoryTransport) {
    let mut records = Vec::with_capacity(n as usize);
    let mut switches = HashMap::new();

    for id in 0..n {
        let keypair = Arc::new(fresh_rsa_keypair());
        let endpoint = format!("op{id}");
        records.push(OperatorRecord {
            id,
            rsa_pub_der: keypair.public_der().to_vec(),
            endpoint: endpoint.clone(),
        });
        let blob_store: Arc<dyn BlobStore> = Arc::new(TestBlobStore::default());
        let switch = Switch::new(
            id,
            keypair,
            initiator_pub_der.to_vec(),
            CeremonyTimeouts::default(),
            blob_store,
        );
        switches.insert(endpoint, Arc::new(switch));
    }

    let operators = OperatorSet::new(records).expect("valid operator set size");
    (operators, InMemoryTransport::new(switches))
}

fn fixed_ceremony_input(operators: OperatorSet) -> CeremonyInput {
    CeremonyInput {
        owner_address: [0xAA; 20],
        withdrawal_credentials: [0x01; 32],
        fork_version: [0x00, 0x00, 0x00, 0x00],
        nonce: 0,
        operators,
    }
}

/// E1: a fresh N=4/t=3 DKG ceremony completes and produces a verifiable
/// group public key with one encrypted share per operator.
#[tokio::test]
async fn e1_dkg_happy_path_completes() {
    let initiator_keypair = Arc::new(fresh_rsa_keypair());
    let (operators, transport) = build_cluster(4, initiator_keypair.public_der());
    assert_eq!(operators.threshold(), 3);

    let orchestrator = Orchestrator::new(
        Arc::new(transport),
        initiator_keypair,
        Concurrency(4),
        CeremonyTimeouts::default(),
    );

    let outcome = orchestrator
        .run_dkg(fixed_ceremony_input(operators.clone()))
        .await
        .expect("dkg ceremony should complete");

    assert_eq!(outcome.public_shares.len(), 4);
    assert_eq!(outcome.encrypted_final_shares.len(), 4);
    for id in operators.ids() {
        assert!(outcome.public_shares.iter().any(|(pid, _)| *pid == id));
    }
}

/// E3: the same ceremony id cannot be initialized twice against a given
/// operator.
#[tokio::test]
async fn e3_duplicate_init_is_rejected() {
    let initiator_keypair = Arc::new(fresh_rsa_keypair());
    let (operators, transport) = build_cluster(4, initiator_keypair.public_der());

    let orchestrator = Orchestrator::new(
        Arc::new(transport),
        initiator_keypair.clone(),
        Concurrency(4),
        CeremonyTimeouts::default(),
    );

    // Run one ceremony to completion, then replay its very first round
    // (re-using the live transport's switches isn't possible here since
    // `run_dkg` generates a fresh ceremony id internally; instead this
    // drives a duplicate directly at a single operator to exercise the
    // same guard `Switch::handle_init` enforces).
    let (solo_operators, solo_transport) = build_cluster(4, initiator_keypair.public_der());
    let ceremony_id = dkg_core::types::CeremonyId::generate(1, [3u8; 16]);
    let input = fixed_ceremony_input(solo_operators.clone());
    let envelope = dkg_core::wire::SignedTransport::sign(
        ceremony_id,
        dkg_core::wire::envelope::INITIATOR_ID,
        dkg_core::wire::Message::Init(input.clone()),
        &initiator_keypair,
    )
    .unwrap();

    let first = dkg_core::transport::Transport::send(&solo_transport, "op0", envelope.clone()).await;
    assert!(first.is_ok());

    let second = dkg_core::transport::Transport::send(&solo_transport, "op0", envelope).await;
    assert!(matches!(second, Err(Error::DuplicateCeremony(_))));

    // orchestrator is kept alive only to exercise the happy path above too
    drop(orchestrator);
    let _ = operators;
}

/// E6: a completed DKG's group key survives a reshare from a 4-operator to
/// a 7-operator set.
#[tokio::test]
async fn e6_reshare_4_to_7_preserves_group_key() {
    let initiator_keypair = Arc::new(fresh_rsa_keypair());

    let mut old_records = Vec::new();
    let mut switches = HashMap::new();
    let mut old_keypairs = Vec::new();
    for id in 0..4u64 {
        let keypair = Arc::new(fresh_rsa_keypair());
        let endpoint = format!("old{id}");
        old_records.push(OperatorRecord {
            id,
            rsa_pub_der: keypair.public_der().to_vec(),
            endpoint: endpoint.clone(),
        });
        let blob_store: Arc<dyn BlobStore> = Arc::new(TestBlobStore::default());
        let switch = Switch::new(
            id,
            keypair.clone(),
            initiator_keypair.public_der().to_vec(),
            CeremonyTimeouts::default(),
            blob_store,
        );
        switches.insert(endpoint, Arc::new(switch));
        old_keypairs.push(keypair);
    }
    let old_operators = OperatorSet::new(old_records).unwrap();

    let mut new_records = Vec::new();
    for id in 0..7u64 {
        // New operators 0..4 reuse the old operators' identities and RSA
        // keys (same physical machines keep serving, plus three new ones),
        // matching how a reshare grows a cluster without discarding
        // existing operator identities.
        let keypair = if (id as usize) < old_keypairs.len() {
            old_keypairs[id as usize].clone()
        } else {
            Arc::new(fresh_rsa_keypair())
        };
        let endpoint = format!("old{id}");
        new_records.push(OperatorRecord {
            id,
            rsa_pub_der: keypair.public_der().to_vec(),
            endpoint: endpoint.clone(),
        });
        if (id as usize) >= old_keypairs.len() {
            let blob_store: Arc<dyn BlobStore> = Arc::new(TestBlobStore::default());
            let switch = Switch::new(
                id,
                keypair,
                initiator_keypair.public_der().to_vec(),
                CeremonyTimeouts::default(),
                blob_store,
            );
            switches.insert(endpoint, Arc::new(switch));
        }
    }
    let new_operators = OperatorSet::new(new_records).unwrap();

    let transport = InMemoryTransport::new(switches);
    let orchestrator = Orchestrator::new(
        Arc::new(transport),
        initiator_keypair.clone(),
        Concurrency(7),
        CeremonyTimeouts::default(),
    );

    let dkg_outcome = orchestrator
        .run_dkg(fixed_ceremony_input(old_operators.clone()))
        .await
        .expect("initial dkg should complete");

    // Each old dealer signs its own proof over the same digest
    // `Switch::sign_proof` uses, so `verify_old_proofs_quorum` on the new
    // operators accepts it as genuine.
    let old_proofs: Vec<dkg_core::types::SignedProofInput> = dkg_outcome
        .encrypted_final_shares
        .iter()
        .zip(dkg_outcome.public_shares.iter())
        .map(|((id, share), (_, pubkey))| {
            let owner_address = [0xAA; 20];
            let digest = dkg_core::switch::proof_signing_digest(
                *id,
                &dkg_outcome.group_public_key,
                share,
                &owner_address,
            );
            let signature =
                dkg_core::crypto::rsa_primitives::sign_envelope(&old_keypairs[*id as usize], &digest)
                    .expect("old dealer signs its proof");
            dkg_core::types::SignedProofInput {
                dealer: *id,
                validator_pubkey: dkg_outcome.group_public_key,
                encrypted_share: share.clone(),
                share_public_key: *pubkey,
                owner_address,
                signature,
            }
        })
        .collect();

    let reshare_input = ReshareInput {
        old_operators,
        new_operators,
        old_commitments: Vec::new(),
        old_proofs,
        old_group_public_key: dkg_outcome.group_public_key,
    };

    let reshare_outcome = orchestrator
        .run_reshare(reshare_input)
        .await
        .expect("reshare should complete");

    assert_eq!(reshare_outcome.group_public_key, dkg_outcome.group_public_key);
    assert_eq!(reshare_outcome.public_shares.len(), 7);
}

/// Resign: once a DKG has established a group key, each operator can
/// re-sign a voluntary exit for it without rerunning any DKG round.
#[tokio::test]
async fn resign_combines_to_a_verifiable_exit_signature() {
    let initiator_keypair = Arc::new(fresh_rsa_keypair());
    let (operators, transport) = build_cluster(4, initiator_keypair.public_der());

    let orchestrator = Orchestrator::new(
        Arc::new(transport),
        initiator_keypair.clone(),
        Concurrency(4),
        CeremonyTimeouts::default(),
    );

    let dkg_outcome = orchestrator
        .run_dkg(fixed_ceremony_input(operators.clone()))
        .await
        .expect("dkg should complete");

    let encrypted_key_shares: HashMap<u64, Vec<u8>> =
        dkg_outcome.encrypted_final_shares.into_iter().collect();

    let beacon = StaticBeaconNodeClient::new(1000).with_epoch(dkg_outcome.group_public_key, 1000);

    let resign_outcome = orchestrator
        .run_resign(
            operators,
            dkg_outcome.group_public_key,
            dkg_outcome.group_public_key,
            42,
            0,
            &encrypted_key_shares,
            &beacon,
        )
        .await
        .expect("resign should complete");

    assert_eq!(resign_outcome.epoch, 1000);
    assert_eq!(resign_outcome.validator_index, 42);
}
