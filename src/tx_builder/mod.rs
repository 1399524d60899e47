//! Transaction building for the taxed / soulbound token workflow
//!
//! ## Architecture
//!
//! - **errors**: the workflow error taxonomy
//! - **codec**: hand-encoded fixed-layout payloads (transfer-with-fee,
//!   launchpad method calls)
//! - **resolver**: associated account derivation and existence checks
//! - **instructions**: per-action instruction planning and fee computation
//! - **output**: transaction assembly with extra-signer signing
//!
//! Planning is separated from submission: nothing in this module touches
//! the network except the resolver's existence check.

pub mod codec;
pub mod errors;
pub mod instructions;
pub mod output;
pub mod resolver;

pub use errors::{ErrorKind, WorkflowError};
pub use instructions::{compute_transfer_fee, expected_fee, OperationBuilder, PendingOperation};
pub use output::TxBuildOutput;
pub use resolver::{derive_associated_address, AccountResolver};
