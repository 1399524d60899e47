//! JSON-RPC binding of the ledger transport
//!
//! Submission goes through `send_transaction` (preflight enabled), and
//! confirmation polls `get_signature_status` at a fixed interval until the
//! configured attempt budget is spent.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use spl_token_2022::extension::{
    non_transferable::NonTransferable,
    transfer_fee::{TransferFeeAmount, TransferFeeConfig},
    BaseStateWithExtensions, StateWithExtensions,
};
use spl_token_2022::state::{Account as TokenAccount, Mint};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::rpc_errors::{TransportError, TransportResult};
use crate::types::{MintKind, MintRecord, TokenAccountState};

/// Final status of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed,
    /// Landed but failed during execution
    Failed(String),
}

/// Abstract ledger access consumed by the sequencer
///
/// `submit` receives a fully signed transaction: additional signers (the
/// fresh mint identity) have already partially signed it and the signing
/// agent has added the fee payer signature.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Raw account lookup; `Ok(None)` when no account exists at `address`
    async fn get_account_info(&self, address: &Pubkey) -> TransportResult<Option<Account>>;

    async fn latest_blockhash(&self) -> TransportResult<Hash>;

    async fn submit(&self, transaction: &Transaction) -> TransportResult<Signature>;

    async fn confirm(&self, signature: &Signature) -> TransportResult<ConfirmationStatus>;

    /// Decoded token account; `AccountNotFound` when absent
    async fn query_token_account(&self, address: &Pubkey) -> TransportResult<TokenAccountState>;

    /// Decoded mint; `Ok(None)` when absent
    async fn query_mint(&self, address: &Pubkey) -> TransportResult<Option<MintRecord>>;
}

/// Transport over a Solana JSON-RPC endpoint
pub struct RpcTransport {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
    poll_interval: Duration,
    max_attempts: u32,
}

impl RpcTransport {
    pub fn new(
        url: String,
        timeout: Duration,
        commitment: CommitmentConfig,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_timeout_and_commitment(
                url, timeout, commitment,
            )),
            commitment,
            poll_interval,
            max_attempts,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    async fn fetch(&self, address: &Pubkey) -> TransportResult<Option<Account>> {
        Ok(self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await?
            .value)
    }
}

#[async_trait]
impl LedgerTransport for RpcTransport {
    #[instrument(skip(self))]
    async fn get_account_info(&self, address: &Pubkey) -> TransportResult<Option<Account>> {
        self.fetch(address).await
    }

    async fn latest_blockhash(&self) -> TransportResult<Hash> {
        Ok(self.client.get_latest_blockhash().await?)
    }

    #[instrument(skip(self, transaction))]
    async fn submit(&self, transaction: &Transaction) -> TransportResult<Signature> {
        let expected = transaction.signatures.first().copied();
        match self.client.send_transaction(transaction).await {
            Ok(signature) => {
                debug!(signature = %signature, "Transaction accepted");
                Ok(signature)
            }
            Err(err) => {
                let mapped = TransportError::from_send_error(&err, expected);
                warn!(error = %mapped, "Transaction submission failed");
                Err(mapped)
            }
        }
    }

    #[instrument(skip(self))]
    async fn confirm(&self, signature: &Signature) -> TransportResult<ConfirmationStatus> {
        for attempt in 1..=self.max_attempts {
            match self.client.get_signature_status(signature).await? {
                Some(Ok(())) => {
                    debug!(attempt, "Transaction confirmed");
                    return Ok(ConfirmationStatus::Confirmed);
                }
                Some(Err(tx_err)) => return Ok(ConfirmationStatus::Failed(tx_err.to_string())),
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }

        Err(TransportError::Timeout {
            signature: *signature,
            waited_ms: self.poll_interval.as_millis() as u64 * self.max_attempts as u64,
        })
    }

    async fn query_token_account(&self, address: &Pubkey) -> TransportResult<TokenAccountState> {
        let account = self
            .fetch(address)
            .await?
            .ok_or(TransportError::AccountNotFound { address: *address })?;
        decode_token_account(&account.data)
    }

    async fn query_mint(&self, address: &Pubkey) -> TransportResult<Option<MintRecord>> {
        let Some(account) = self.fetch(address).await? else {
            return Ok(None);
        };
        let epoch = self.client.get_epoch_info().await?.epoch;
        decode_mint(*address, &account.data, epoch).map(Some)
    }
}

/// Decode a token account, reading the withheld amount when the fee
/// extension is present
pub fn decode_token_account(data: &[u8]) -> TransportResult<TokenAccountState> {
    let state = StateWithExtensions::<TokenAccount>::unpack(data)
        .map_err(|e| TransportError::Decode(format!("not a token account: {}", e)))?;

    let withheld_amount = state
        .get_extension::<TransferFeeAmount>()
        .ok()
        .map(|ext| u64::from(ext.withheld_amount));

    Ok(TokenAccountState {
        mint: state.base.mint,
        owner: state.base.owner,
        amount: state.base.amount,
        withheld_amount,
    })
}

/// Decode a mint and recover its kind from the fee / non-transferable
/// extensions
///
/// A taxed mint carries two fee schedules; the one in force at `epoch` is
/// the one transfers are checked against.
pub fn decode_mint(address: Pubkey, data: &[u8], epoch: u64) -> TransportResult<MintRecord> {
    let state = StateWithExtensions::<Mint>::unpack(data)
        .map_err(|e| TransportError::Decode(format!("not a mint: {}", e)))?;

    let fee_config = state.get_extension::<TransferFeeConfig>().ok();
    let non_transferable = state.get_extension::<NonTransferable>().is_ok();

    let (kind, fee_withdraw_authority) = match (fee_config, non_transferable) {
        (Some(config), false) => {
            let fee = config.get_epoch_fee(epoch);
            (
                MintKind::Taxed {
                    fee_basis_points: u16::from(fee.transfer_fee_basis_points),
                    maximum_fee: u64::from(fee.maximum_fee),
                },
                Option::<Pubkey>::from(config.withdraw_withheld_authority),
            )
        }
        (None, true) => (MintKind::Soulbound, None),
        (Some(_), true) => {
            return Err(TransportError::Decode(format!(
                "mint {} carries both fee and non-transferable extensions",
                address
            )))
        }
        (None, false) => {
            return Err(TransportError::Decode(format!(
                "mint {} carries neither a transfer fee nor the non-transferable extension",
                address
            )))
        }
    };

    Ok(MintRecord {
        address,
        decimals: state.base.decimals,
        kind,
        mint_authority: Option::<Pubkey>::from(state.base.mint_authority),
        fee_withdraw_authority,
    })
}
