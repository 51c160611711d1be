//! DKG initiator CLI
//!
//! Command-line interface driving an initiator through a DKG, reshare or
//! resign ceremony against a fixed set of operator endpoints, writing the
//! resulting deposit data, keyshares and proofs files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dkg_core::beacon::BeaconNodeClient;
use dkg_core::config::{CeremonyTimeouts, Concurrency};
use dkg_core::crypto::RsaKeyPair;
use dkg_core::orchestrator::{CeremonyOutcome, Orchestrator, ResignOutcome};
use dkg_core::output::{
    DepositData, KeyShareEntry, KeySharesFile, KeySharesPayload, ProofsFile, SignedVoluntaryExit,
    VoluntaryExit,
};
use dkg_core::types::{
    CeremonyInput, OperatorId, OperatorRecord, OperatorSet, ReshareInput, SignedProofInput,
};
use dkg_transport_http::{HttpBeaconNodeClient, HttpTransport};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "dkg-initiator-cli")]
#[command(about = "Initiator CLI for BLS threshold DKG ceremonies")]
#[command(version)]
struct Cli {
    /// Path to the initiator's own RSA private key, PKCS#8 DER
    #[arg(long, env = "INITIATOR_KEY")]
    initiator_key: PathBuf,

    /// Directory to write output files into
    #[arg(long, env = "DEST", default_value = "./out")]
    dest: PathBuf,

    /// Maximum operators (or validators, in batch mode) contacted concurrently
    #[arg(long, env = "MAX_CONCURRENCY", default_value = "4")]
    max_concurrency: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a fresh DKG ceremony
    Dkg {
        /// JSON file listing the operator set
        #[arg(long)]
        operators: PathBuf,
        #[arg(long)]
        owner_address: String,
        #[arg(long)]
        withdrawal_credentials: String,
        #[arg(long, default_value = "00000000")]
        fork_version: String,
        #[arg(long, default_value = "0")]
        nonce: u64,
    },

    /// Reshare an existing validator key to a new operator set
    Reshare {
        #[arg(long)]
        old_operators: PathBuf,
        #[arg(long)]
        new_operators: PathBuf,
        #[arg(long)]
        old_group_public_key: String,
        /// Proofs file written by the ceremony that produced the current key
        #[arg(long)]
        old_proofs: PathBuf,
    },

    /// Re-sign a voluntary exit under an already-established group key
    Resign {
        #[arg(long)]
        operators: PathBuf,
        #[arg(long)]
        keyshares: PathBuf,
        #[arg(long)]
        validator_index: u64,
        #[arg(long, default_value = "0")]
        target_fork_epoch: u64,
        #[arg(long)]
        beacon_url: String,
    },

    /// Re-sign voluntary exits for many validators concurrently, bounded by
    /// `--max-concurrency`, aborting the whole batch on the first failure.
    BatchResign {
        #[arg(long)]
        operators: PathBuf,
        /// JSON array of `{"keyshares": "...", "validator_index": N}` entries
        #[arg(long)]
        batch: PathBuf,
        #[arg(long, default_value = "0")]
        target_fork_epoch: u64,
        #[arg(long)]
        beacon_url: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct BatchResignEntry {
    keyshares: PathBuf,
    validator_index: u64,
}

/// One entry in an operator directory file: this operator's identity as a
/// ceremony-independent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OperatorDirectoryEntry {
    id: OperatorId,
    rsa_pub_der_hex: String,
    endpoint: String,
}

fn load_operator_set(path: &Path) -> Result<OperatorSet> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
    let entries: Vec<OperatorDirectoryEntry> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path:?}"))?;
    let records = entries
        .into_iter()
        .map(|e| -> Result<OperatorRecord> {
            Ok(OperatorRecord {
                id: e.id,
                rsa_pub_der: hex::decode(&e.rsa_pub_der_hex).context("decoding rsa_pub_der_hex")?,
                endpoint: e.endpoint,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(OperatorSet::new(records)?)
}

fn decode_fixed<const N: usize>(hex_str: &str, field: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x")).with_context(|| format!("decoding {field}"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("{field} must be {N} bytes"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.dest)?;

    let initiator_der = std::fs::read(&cli.initiator_key).context("reading initiator key")?;
    let keypair = Arc::new(RsaKeyPair::from_pkcs8_der(&initiator_der).context("parsing initiator key")?);
    let transport = Arc::new(HttpTransport::new());
    let orchestrator = Arc::new(Orchestrator::new(
        transport,
        keypair,
        Concurrency(cli.max_concurrency),
        CeremonyTimeouts::default(),
    ));

    match cli.command {
        Commands::Dkg {
            operators,
            owner_address,
            withdrawal_credentials,
            fork_version,
            nonce,
        } => {
            let operators = load_operator_set(&operators)?;
            let input = CeremonyInput {
                owner_address: decode_fixed(&owner_address, "owner_address")?,
                withdrawal_credentials: decode_fixed(&withdrawal_credentials, "withdrawal_credentials")?,
                fork_version: decode_fixed(&fork_version, "fork_version")?,
                nonce,
                operators,
            };
            info!(n = input.operators.len(), "starting DKG ceremony");
            let outcome = orchestrator.run_dkg(input).await?;
            write_dkg_outputs(&cli.dest, &outcome)?;
        }

        Commands::Reshare {
            old_operators,
            new_operators,
            old_group_public_key,
            old_proofs,
        } => {
            let old_operators = load_operator_set(&old_operators)?;
            let new_operators = load_operator_set(&new_operators)?;
            let proofs_file: ProofsFile = serde_json::from_str(
                &std::fs::read_to_string(&old_proofs).context("reading old proofs file")?,
            )?;
            let old_proofs = proofs_file
                .proofs
                .into_iter()
                .map(|p| -> Result<SignedProofInput> {
                    Ok(SignedProofInput {
                        dealer: p.dealer,
                        validator_pubkey: decode_fixed(&p.validator_pubkey, "validator_pubkey")?,
                        encrypted_share: hex::decode(&p.encrypted_share)?,
                        share_public_key: decode_fixed(&p.share_public_key, "share_public_key")?,
                        owner_address: decode_fixed(&p.owner_address, "owner_address")?,
                        signature: hex::decode(&p.signature)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let input = ReshareInput {
                old_operators,
                new_operators,
                old_commitments: Vec::new(),
                old_proofs,
                old_group_public_key: decode_fixed(&old_group_public_key, "old_group_public_key")?,
            };
            info!("starting reshare ceremony");
            let outcome = orchestrator.run_reshare(input).await?;
            write_dkg_outputs(&cli.dest, &outcome)?;
        }

        Commands::Resign {
            operators,
            keyshares,
            validator_index,
            target_fork_epoch,
            beacon_url,
        } => {
            let operator_set = load_operator_set(&operators)?;
            let beacon: Arc<dyn BeaconNodeClient> = Arc::new(HttpBeaconNodeClient::new(beacon_url));
            resign_one(
                &orchestrator,
                &operator_set,
                &keyshares,
                validator_index,
                target_fork_epoch,
                beacon.as_ref(),
                &cli.dest,
            )
            .await?;
        }

        Commands::BatchResign {
            operators,
            batch,
            target_fork_epoch,
            beacon_url,
        } => {
            let operator_set = load_operator_set(&operators)?;
            let entries: Vec<BatchResignEntry> = serde_json::from_str(
                &std::fs::read_to_string(&batch).context("reading batch file")?,
            )?;
            info!(n = entries.len(), "starting batch resign");

            let beacon: Arc<dyn BeaconNodeClient> = Arc::new(HttpBeaconNodeClient::new(beacon_url));
            let dest = cli.dest.clone();
            let max_concurrency = cli.max_concurrency;
            run_batch(max_concurrency, entries, move |entry| {
                let orchestrator = orchestrator.clone();
                let operator_set = operator_set.clone();
                let beacon = beacon.clone();
                let dest = dest.clone();
                async move {
                    resign_one(
                        &orchestrator,
                        &operator_set,
                        &entry.keyshares,
                        entry.validator_index,
                        target_fork_epoch,
                        beacon.as_ref(),
                        &dest,
                    )
                    .await
                }
            })
            .await?;
        }
    }

    Ok(())
}

/// Re-sign one validator's voluntary exit and write its output file.
async fn resign_one(
    orchestrator: &Orchestrator<HttpTransport>,
    operators: &OperatorSet,
    keyshares_path: &Path,
    validator_index: u64,
    target_fork_epoch: u64,
    beacon: &dyn BeaconNodeClient,
    dest: &Path,
) -> Result<()> {
    let keyshares_file: KeySharesFile = serde_json::from_str(
        &std::fs::read_to_string(keyshares_path).context("reading keyshares file")?,
    )?;
    let first = keyshares_file
        .shares
        .first()
        .context("keyshares file has no entries")?;
    let group_public_key: [u8; 48] = decode_fixed(&first.pubkey, "pubkey")?;
    let validator_pubkey = group_public_key;
    let encrypted_key_shares: HashMap<OperatorId, Vec<u8>> = keyshares_file
        .shares
        .iter()
        .map(|payload| -> Result<(OperatorId, Vec<u8>)> {
            Ok((payload.id, hex::decode(&payload.encrypted_key)?))
        })
        .collect::<Result<_>>()?;

    info!(validator_index, "starting resign");
    let outcome = orchestrator
        .run_resign(
            operators.clone(),
            group_public_key,
            validator_pubkey,
            validator_index,
            target_fork_epoch,
            &encrypted_key_shares,
            beacon,
        )
        .await?;
    write_resign_output(dest, &outcome)
}

fn write_dkg_outputs(dest: &Path, outcome: &CeremonyOutcome) -> Result<()> {
    let pubkey_hex = hex::encode(outcome.group_public_key);

    let deposit = DepositData {
        pubkey: pubkey_hex.clone(),
        withdrawal_credentials: String::new(),
        amount: 32_000_000_000,
        signature: hex::encode(outcome.deposit_signature),
        deposit_message_root: String::new(),
        deposit_data_root: String::new(),
        fork_version: String::new(),
        network_name: "mainnet".into(),
    };
    write_json(&dest.join(format!("deposit_data-{pubkey_hex}.json")), &deposit)?;

    let operator_entries: Vec<KeyShareEntry> = outcome
        .public_shares
        .iter()
        .map(|(id, pubkey)| KeyShareEntry {
            id: *id,
            public_key: hex::encode(pubkey),
        })
        .collect();

    let mut shares = Vec::new();
    for (id, ciphertext) in &outcome.encrypted_final_shares {
        let public_share = outcome
            .public_shares
            .iter()
            .find(|(pid, _)| pid == id)
            .map(|(_, pk)| hex::encode(pk))
            .unwrap_or_default();
        shares.push(KeySharesPayload {
            pubkey: pubkey_hex.clone(),
            id: *id,
            operators: operator_entries.clone(),
            encrypted_key: hex::encode(ciphertext),
            share_public_key: public_share,
        });
    }
    let keyshares_file = KeySharesFile {
        version: dkg_core::VERSION.to_string(),
        shares,
    };
    write_json(&dest.join(format!("keyshares-{pubkey_hex}.json")), &keyshares_file)?;

    info!(pubkey = %pubkey_hex, dest = ?dest, "ceremony outputs written");
    Ok(())
}

fn write_resign_output(dest: &Path, outcome: &ResignOutcome) -> Result<()> {
    let exit = SignedVoluntaryExit {
        exit: VoluntaryExit {
            epoch: outcome.epoch,
            validator_index: outcome.validator_index,
        },
        signature: hex::encode(outcome.signature),
    };
    write_json(
        &dest.join(format!("validator-exit-{}.json", outcome.validator_index)),
        &exit,
    )?;
    info!(validator_index = outcome.validator_index, "resign output written");
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {path:?}"))
}

/// Bounded, fail-first fan-out over a batch of independent ceremonies, one
/// per validator: up to `max_concurrency` run at a time, and the first
/// failure cancels the rest of the batch.
async fn run_batch<F, Fut, T>(max_concurrency: usize, items: Vec<T>, run_one: F) -> Result<Vec<()>>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    T: Send + 'static,
{
    let run_one = Arc::new(run_one);
    let mut in_flight = FuturesUnordered::new();
    let mut pending = items;
    let mut results = Vec::new();

    for _ in 0..max_concurrency.min(pending.len()) {
        if let Some(item) = pending.pop() {
            let run_one = run_one.clone();
            in_flight.push(tokio::spawn(async move { run_one(item).await }));
        }
    }
    while let Some(outcome) = in_flight.next().await {
        let outcome = outcome.map_err(|e| anyhow::anyhow!("ceremony task panicked: {e}"))?;
        outcome?;
        results.push(());
        if let Some(item) = pending.pop() {
            let run_one = run_one.clone();
            in_flight.push(tokio::spawn(async move { run_one(item).await }));
        }
    }
    Ok(results)
}
