//! # dkg-core
//!
//! Core ceremony engine for a BLS12-381 threshold DKG used to generate and
//! reshare validator signing keys across an operator cluster.
//!
//! This crate provides the fundamental building blocks for:
//! - Distributed Key Generation (fresh ceremony)
//! - Resharing (redistributing an existing key across a new operator set)
//! - Resigning (re-signing a voluntary exit under an existing group key)
//!
//! ## Protocol overview
//!
//! Every ceremony is a Pedersen/Feldman-style verifiable secret sharing run:
//! each dealer samples a random polynomial, commits to it on G1, and hands
//! every recipient an RSA-OAEP-encrypted evaluation of it. Recipients verify
//! the commitment, sum the shares they receive into their own final share,
//! and jointly hold a BLS12-381 threshold signing key whose group public
//! key no single operator ever learns the secret behind.
//!
//! Operators never talk to each other directly — the initiator is the only
//! relay, fanning each round out to every operator and collecting their
//! replies (see [`orchestrator`]). An operator's own view of one ceremony
//! is a small state machine (see [`instance`]) owned by its [`switch::Switch`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use dkg_core::orchestrator::Orchestrator;
//!
//! let outcome = orchestrator.run_dkg(ceremony_input).await?;
//! ```

pub mod beacon;
pub mod blobstore;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod instance;
pub mod orchestrator;
pub mod output;
pub mod switch;
pub mod transport;
pub mod types;
pub mod wire;

pub use error::{Error, Result};

/// Crate version, surfaced in health-check responses.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Supported operator-cluster sizes, re-exported at the crate root for
/// convenience.
pub use types::SUPPORTED_SET_SIZES;
