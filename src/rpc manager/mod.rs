//! Ledger transport
//!
//! The sequencer talks to the ledger only through [`LedgerTransport`]:
//! account reads, blockhash, submission and confirmation. [`RpcTransport`]
//! binds it to a JSON-RPC node; [`crate::simulation::LedgerSimulator`] is the
//! in-memory binding.

pub mod rpc_errors;
pub mod rpc_transport;

pub use rpc_errors::{TransportError, TransportResult};
pub use rpc_transport::{
    decode_mint, decode_token_account, ConfirmationStatus, LedgerTransport, RpcTransport,
};
