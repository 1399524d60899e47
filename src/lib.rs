//! Taxed Token Sequencer - client-side orchestrator for fee-bearing and
//! soulbound Token-2022 mints
//!
//! This library exposes the workflow sequencer and its collaborators for the
//! CLI and for integration testing.

pub mod config;
pub mod sequencer;
pub mod simulation;
pub mod state_tracker;
pub mod structured_logging;
pub mod tx_builder;
pub mod types;
pub mod wallet;

// Component modules with non-standard paths (directories with spaces)
#[path = "rpc manager/mod.rs"]
pub mod rpc_manager;

// Re-export commonly used types
pub use sequencer::Sequencer;
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
pub use tx_builder::{ErrorKind, WorkflowError};
pub use types::{ActionDetail, ActionReport, CreateMintParams, MintKind, ProgramIds};
