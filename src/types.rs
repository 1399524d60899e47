//! Common types used throughout the sequencer
//!
//! Mint and account records, the workflow stage machine, program ids and the
//! result objects handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey, pubkey::Pubkey, signature::Signature};

use crate::tx_builder::errors::{ErrorKind, WorkflowError};

/// Default id of the launchpad program exposing `create_taxed_token` and
/// `create_soulbound_token`
pub const DEFAULT_LAUNCHPAD_PROGRAM_ID: Pubkey =
    pubkey!("9zZZdmpER8Pw9QJMwSyd8cvV8swbZWeqfJG3Gz2HhVGz");

/// Upper bound for a transfer fee rate (100%)
pub const MAX_FEE_BASIS_POINTS: u16 = 10_000;

/// Program identifiers the builder targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramIds {
    /// Remote program that creates taxed / soulbound mints
    pub launchpad: Pubkey,
    /// Token program supporting the fee and non-transferable extensions
    pub token: Pubkey,
    /// Associated token account program
    pub associated_token: Pubkey,
}

impl ProgramIds {
    pub fn with_launchpad(launchpad: Pubkey) -> Self {
        Self {
            launchpad,
            ..Self::default()
        }
    }
}

impl Default for ProgramIds {
    fn default() -> Self {
        Self {
            launchpad: DEFAULT_LAUNCHPAD_PROGRAM_ID,
            token: spl_token_2022::id(),
            associated_token: spl_associated_token_account::id(),
        }
    }
}

/// The two mutually exclusive kinds of mint this client creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MintKind {
    /// Every transfer withholds `min(maximum_fee, ceil(amount * bps / 10000))`
    Taxed {
        fee_basis_points: u16,
        maximum_fee: u64,
    },
    /// Transfers are rejected by the token program
    Soulbound,
}

impl MintKind {
    pub fn is_transferable(&self) -> bool {
        matches!(self, MintKind::Taxed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            MintKind::Taxed { .. } => "taxed",
            MintKind::Soulbound => "soulbound",
        }
    }
}

/// Parameters of a create-mint request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMintParams {
    pub decimals: u8,
    pub kind: MintKind,
    /// Fee-withdraw authority for taxed mints; the connected agent when unset
    #[serde(default)]
    pub fee_withdraw_authority: Option<Pubkey>,
}

impl CreateMintParams {
    pub fn taxed(decimals: u8, fee_basis_points: u16, maximum_fee: u64) -> Self {
        Self {
            decimals,
            kind: MintKind::Taxed {
                fee_basis_points,
                maximum_fee,
            },
            fee_withdraw_authority: None,
        }
    }

    pub fn soulbound(decimals: u8) -> Self {
        Self {
            decimals,
            kind: MintKind::Soulbound,
            fee_withdraw_authority: None,
        }
    }

    pub fn with_fee_withdraw_authority(mut self, authority: Pubkey) -> Self {
        self.fee_withdraw_authority = Some(authority);
        self
    }

    /// Reject values the token program cannot represent
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if let MintKind::Taxed {
            fee_basis_points, ..
        } = self.kind
        {
            if fee_basis_points > MAX_FEE_BASIS_POINTS {
                return Err(WorkflowError::Encoding(format!(
                    "fee basis points {} exceed maximum {}",
                    fee_basis_points, MAX_FEE_BASIS_POINTS
                )));
            }
        }
        if self.kind == MintKind::Soulbound && self.fee_withdraw_authority.is_some() {
            return Err(WorkflowError::Encoding(
                "soulbound mints carry no fee-withdraw authority".to_string(),
            ));
        }
        Ok(())
    }
}

/// A mint as known to this client. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRecord {
    pub address: Pubkey,
    pub decimals: u8,
    pub kind: MintKind,
    pub mint_authority: Option<Pubkey>,
    pub fee_withdraw_authority: Option<Pubkey>,
}

/// Associated account state observed by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub mint: Pubkey,
    /// Last observed balance (None until first inspected)
    pub balance: Option<u64>,
    /// Last observed withheld fee amount (fee-bearing mints only)
    pub withheld_amount: Option<u64>,
    pub last_observed: Option<DateTime<Utc>>,
}

/// Decoded token account as returned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccountState {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
    pub withheld_amount: Option<u64>,
}

/// Logical stage of the single-mint workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Uninitialized,
    MintCreated,
    AccountReady,
    Funded,
    TransferAttempted,
}

/// Requested action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateMint,
    SelectMint,
    CreateAccount,
    MintTo,
    TransferWithFee,
    Inspect,
    WithdrawWithheld,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateMint => "create_mint",
            ActionKind::SelectMint => "select_mint",
            ActionKind::CreateAccount => "create_account",
            ActionKind::MintTo => "mint_to",
            ActionKind::TransferWithFee => "transfer_with_fee",
            ActionKind::Inspect => "inspect",
            ActionKind::WithdrawWithheld => "withdraw_withheld",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Success payload of an action entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionDetail {
    MintCreated {
        mint: MintRecord,
        signature: Signature,
    },
    MintSelected {
        mint: MintRecord,
    },
    AccountReady {
        address: Pubkey,
        owner: Pubkey,
        /// False when the account already existed and nothing was submitted
        created: bool,
        signature: Option<Signature>,
    },
    Minted {
        destination: Pubkey,
        amount: u64,
        /// Balance observed after confirmation
        balance: Option<u64>,
        signature: Signature,
    },
    Transferred {
        source: Pubkey,
        destination: Pubkey,
        amount: u64,
        expected_fee: u64,
        /// Change of the destination's withheld amount, when observable
        observed_withheld_delta: Option<u64>,
        net_received: Option<u64>,
        /// Observed withheld delta and net amount match the fee formula
        fee_verified: bool,
        signature: Signature,
    },
    Inspected {
        address: Pubkey,
        state: TokenAccountState,
    },
    WithheldWithdrawn {
        destination: Pubkey,
        harvested_accounts: usize,
        withdrawn: Option<u64>,
        signature: Signature,
    },
}

/// Serializable `{ok, detail}` / `{ok, error_kind, message}` result object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ActionDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl From<&Result<ActionDetail, WorkflowError>> for ActionReport {
    fn from(result: &Result<ActionDetail, WorkflowError>) -> Self {
        match result {
            Ok(detail) => Self {
                ok: true,
                detail: Some(detail.clone()),
                error_kind: None,
                message: None,
                signature: None,
            },
            Err(err) => Self {
                ok: false,
                detail: None,
                error_kind: Some(err.kind()),
                message: Some(err.to_string()),
                signature: err.signature(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_excess_basis_points() {
        let params = CreateMintParams::taxed(6, 10_001, 1_000);
        assert!(matches!(params.validate(), Err(WorkflowError::Encoding(_))));
        assert!(CreateMintParams::taxed(6, 10_000, 1_000).validate().is_ok());
    }

    #[test]
    fn test_soulbound_rejects_withdraw_authority() {
        let params = CreateMintParams::soulbound(6).with_fee_withdraw_authority(Pubkey::new_unique());
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(WorkflowStage::Uninitialized < WorkflowStage::MintCreated);
        assert!(WorkflowStage::Funded < WorkflowStage::TransferAttempted);
    }

    #[test]
    fn test_report_from_failure() {
        let result: Result<ActionDetail, WorkflowError> = Err(WorkflowError::NotConnected);
        let report = ActionReport::from(&result);
        assert!(!report.ok);
        assert_eq!(report.error_kind, Some(ErrorKind::NotConnected));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error_kind"], "not_connected");
        assert!(json.get("detail").is_none());
    }
}
