//! In-memory ledger
//!
//! [`LedgerSimulator`] implements [`LedgerTransport`] without a network. It
//! executes the instruction subset this client issues, with the enforcement
//! the real programs apply:
//!
//! - launchpad `create_taxed_token` / `create_soulbound_token`
//! - associated account creation (derived address checked)
//! - `MintTo` (mint authority checked)
//! - `TransferChecked` and `TransferCheckedWithFee` (fee recomputed and
//!   compared, non-transferable mints rejected, decimals checked)
//! - `HarvestWithheldTokensToMint`, `WithdrawWithheldTokensFromMint`
//!   (withdraw authority checked)
//!
//! Transactions are atomic: a failing instruction leaves no trace. With
//! preflight enabled (default) a failing transaction is rejected at submit;
//! with preflight skipped it is accepted and fails at confirmation.

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::CompiledInstruction,
    message::Message,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::debug;

use crate::rpc_manager::{ConfirmationStatus, LedgerTransport, TransportError, TransportResult};
use crate::tx_builder::codec::{self, TRANSFER_FEE_EXTENSION};
use crate::tx_builder::instructions::compute_transfer_fee;
use crate::tx_builder::resolver::derive_associated_address;
use crate::types::{MintKind, MintRecord, ProgramIds, TokenAccountState};

const MINT_TO: u8 = 7;
const TRANSFER_CHECKED: u8 = 12;
const WITHDRAW_WITHHELD_FROM_MINT: u8 = 2;
const HARVEST_WITHHELD_TO_MINT: u8 = 4;

const ERR_OWNER_MISMATCH: &str = "Owner does not match";
const ERR_NON_TRANSFERABLE: &str = "Transfer is disabled for this mint";
const ERR_FEE_MISMATCH: &str = "Calculated fee does not match expected fee";
const ERR_DECIMALS: &str = "The provided decimals value different from the Mint decimals";
const ERR_MINT_MISMATCH: &str = "Account not associated with this Mint";
const ERR_INSUFFICIENT: &str = "Insufficient funds";
const ERR_IN_USE: &str = "account already in use";

#[derive(Debug, Clone)]
struct SimMint {
    decimals: u8,
    mint_authority: Pubkey,
    kind: MintKind,
    fee_withdraw_authority: Option<Pubkey>,
    withheld: u64,
}

#[derive(Debug, Clone)]
struct SimTokenAccount {
    mint: Pubkey,
    owner: Pubkey,
    amount: u64,
    withheld: u64,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    mints: HashMap<Pubkey, SimMint>,
    accounts: HashMap<Pubkey, SimTokenAccount>,
}

/// Accounts and signer flags of one compiled instruction
struct IxView<'a> {
    message: &'a Message,
    ix: &'a CompiledInstruction,
}

impl IxView<'_> {
    fn key(&self, position: usize) -> Result<Pubkey, String> {
        let index = *self
            .ix
            .accounts
            .get(position)
            .ok_or_else(|| format!("missing account at position {}", position))?;
        self.message
            .account_keys
            .get(index as usize)
            .copied()
            .ok_or_else(|| "account index out of range".to_string())
    }

    fn is_signer(&self, position: usize) -> bool {
        self.ix
            .accounts
            .get(position)
            .map(|&index| self.message.is_signer(index as usize))
            .unwrap_or(false)
    }

    fn account_count(&self) -> usize {
        self.ix.accounts.len()
    }
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64, String> {
    data.get(offset..offset + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| "invalid instruction data".to_string())
}

impl LedgerState {
    fn mint(&self, address: &Pubkey) -> Result<&SimMint, String> {
        self.mints
            .get(address)
            .ok_or_else(|| format!("mint {} not found", address))
    }

    fn account(&self, address: &Pubkey) -> Result<&SimTokenAccount, String> {
        self.accounts
            .get(address)
            .ok_or_else(|| format!("token account {} not found", address))
    }

    fn account_mut(&mut self, address: &Pubkey) -> Result<&mut SimTokenAccount, String> {
        self.accounts
            .get_mut(address)
            .ok_or_else(|| format!("token account {} not found", address))
    }

    fn create_mint(&mut self, view: &IxView<'_>, data: &[u8]) -> Result<(), String> {
        if data.len() < 9 {
            return Err("invalid instruction data".to_string());
        }
        let discriminator = &data[..8];
        let decimals = data[8];

        let (kind, fee_withdraw_authority, freeze_position) =
            if discriminator == codec::method_discriminator(codec::CREATE_TAXED_TOKEN) {
                let bps_bytes: [u8; 2] = data
                    .get(9..11)
                    .and_then(|b| b.try_into().ok())
                    .ok_or("invalid instruction data")?;
                let kind = MintKind::Taxed {
                    fee_basis_points: u16::from_le_bytes(bps_bytes),
                    maximum_fee: read_u64(data, 11)?,
                };
                (kind, Some(view.key(3)?), 4)
            } else if discriminator == codec::method_discriminator(codec::CREATE_SOULBOUND_TOKEN) {
                (MintKind::Soulbound, None, 3)
            } else {
                return Err("unknown launchpad method".to_string());
            };

        if !view.is_signer(0) || !view.is_signer(1) {
            return Err("missing required signature".to_string());
        }
        // freeze authority must be present even though it is not tracked
        view.key(freeze_position)?;

        let mint = view.key(1)?;
        if self.mints.contains_key(&mint) || self.accounts.contains_key(&mint) {
            return Err(ERR_IN_USE.to_string());
        }

        self.mints.insert(
            mint,
            SimMint {
                decimals,
                mint_authority: view.key(2)?,
                kind,
                fee_withdraw_authority,
                withheld: 0,
            },
        );
        Ok(())
    }

    fn create_associated(
        &mut self,
        view: &IxView<'_>,
        data: &[u8],
        token_program: &Pubkey,
    ) -> Result<(), String> {
        let idempotent = match data {
            [] | [0] => false,
            [1] => true,
            _ => return Err("invalid instruction data".to_string()),
        };
        if !view.is_signer(0) {
            return Err("missing required signature".to_string());
        }

        let address = view.key(1)?;
        let owner = view.key(2)?;
        let mint = view.key(3)?;
        if address != derive_associated_address(&mint, &owner, token_program) {
            return Err("Provided address does not match addressed derived from seeds".to_string());
        }
        self.mint(&mint)?;

        if let Some(existing) = self.accounts.get(&address) {
            return if idempotent && existing.owner == owner {
                Ok(())
            } else {
                Err(ERR_IN_USE.to_string())
            };
        }

        self.accounts.insert(
            address,
            SimTokenAccount {
                mint,
                owner,
                amount: 0,
                withheld: 0,
            },
        );
        Ok(())
    }

    fn mint_to(&mut self, view: &IxView<'_>, data: &[u8]) -> Result<(), String> {
        let amount = read_u64(data, 1)?;
        let mint = view.key(0)?;
        let destination = view.key(1)?;
        let authority = view.key(2)?;

        if self.mint(&mint)?.mint_authority != authority || !view.is_signer(2) {
            return Err(ERR_OWNER_MISMATCH.to_string());
        }
        let account = self.account_mut(&destination)?;
        if account.mint != mint {
            return Err(ERR_MINT_MISMATCH.to_string());
        }
        account.amount = account
            .amount
            .checked_add(amount)
            .ok_or("Operation overflowed")?;
        Ok(())
    }

    fn transfer(
        &mut self,
        view: &IxView<'_>,
        amount: u64,
        decimals: u8,
        stated_fee: Option<u64>,
    ) -> Result<(), String> {
        let source = view.key(0)?;
        let mint_address = view.key(1)?;
        let destination = view.key(2)?;
        let authority = view.key(3)?;

        let mint = self.mint(&mint_address)?;
        let fee = match mint.kind {
            MintKind::Soulbound => return Err(ERR_NON_TRANSFERABLE.to_string()),
            MintKind::Taxed {
                fee_basis_points,
                maximum_fee,
            } => compute_transfer_fee(amount, fee_basis_points, maximum_fee),
        };
        if decimals != mint.decimals {
            return Err(ERR_DECIMALS.to_string());
        }
        if let Some(stated) = stated_fee {
            if stated != fee {
                return Err(ERR_FEE_MISMATCH.to_string());
            }
        }

        let from = self.account(&source)?;
        if from.owner != authority || !view.is_signer(3) {
            return Err(ERR_OWNER_MISMATCH.to_string());
        }
        if from.mint != mint_address || self.account(&destination)?.mint != mint_address {
            return Err(ERR_MINT_MISMATCH.to_string());
        }
        if from.amount < amount {
            return Err(ERR_INSUFFICIENT.to_string());
        }

        self.account_mut(&source)?.amount -= amount;
        let to = self.account_mut(&destination)?;
        to.amount = to
            .amount
            .checked_add(amount - fee)
            .ok_or("Operation overflowed")?;
        to.withheld = to.withheld.checked_add(fee).ok_or("Operation overflowed")?;
        Ok(())
    }

    fn harvest(&mut self, view: &IxView<'_>) -> Result<(), String> {
        let mint_address = view.key(0)?;
        self.mint(&mint_address)?;

        let mut harvested = 0u64;
        for position in 1..view.account_count() {
            let source = view.key(position)?;
            // Sources of other mints are skipped, like the real program does
            if let Some(account) = self.accounts.get_mut(&source) {
                if account.mint == mint_address {
                    harvested = harvested
                        .checked_add(account.withheld)
                        .ok_or("Operation overflowed")?;
                    account.withheld = 0;
                }
            }
        }

        if let Some(mint) = self.mints.get_mut(&mint_address) {
            mint.withheld = mint
                .withheld
                .checked_add(harvested)
                .ok_or("Operation overflowed")?;
        }
        Ok(())
    }

    fn withdraw_from_mint(&mut self, view: &IxView<'_>) -> Result<(), String> {
        let mint_address = view.key(0)?;
        let destination = view.key(1)?;
        let authority = view.key(2)?;

        let mint = self.mint(&mint_address)?;
        if mint.fee_withdraw_authority != Some(authority) || !view.is_signer(2) {
            return Err(ERR_OWNER_MISMATCH.to_string());
        }
        let withheld = mint.withheld;

        let account = self.account_mut(&destination)?;
        if account.mint != mint_address {
            return Err(ERR_MINT_MISMATCH.to_string());
        }
        account.amount = account
            .amount
            .checked_add(withheld)
            .ok_or("Operation overflowed")?;

        if let Some(mint) = self.mints.get_mut(&mint_address) {
            mint.withheld = 0;
        }
        Ok(())
    }

    fn token_instruction(&mut self, view: &IxView<'_>, data: &[u8]) -> Result<(), String> {
        match data {
            [MINT_TO, ..] => self.mint_to(view, data),
            [TRANSFER_CHECKED, ..] => {
                let amount = read_u64(data, 1)?;
                let decimals = *data.get(9).ok_or("invalid instruction data")?;
                self.transfer(view, amount, decimals, None)
            }
            [TRANSFER_FEE_EXTENSION, codec::TRANSFER_CHECKED_WITH_FEE, ..] => {
                let args = codec::decode_transfer_with_fee(data).map_err(|e| e.to_string())?;
                self.transfer(view, args.amount, args.decimals, Some(args.fee))
            }
            [TRANSFER_FEE_EXTENSION, HARVEST_WITHHELD_TO_MINT] => self.harvest(view),
            [TRANSFER_FEE_EXTENSION, WITHDRAW_WITHHELD_FROM_MINT] => self.withdraw_from_mint(view),
            _ => Err("invalid instruction data".to_string()),
        }
    }
}

/// In-memory ledger implementing [`LedgerTransport`]
pub struct LedgerSimulator {
    program_ids: ProgramIds,
    state: Mutex<LedgerState>,
    statuses: Mutex<HashMap<Signature, ConfirmationStatus>>,
    skip_preflight: AtomicBool,
    fail_next: AtomicU32,
    calls: AtomicU64,
}

impl LedgerSimulator {
    pub fn new(program_ids: ProgramIds) -> Self {
        Self {
            program_ids,
            state: Mutex::new(LedgerState::default()),
            statuses: Mutex::new(HashMap::new()),
            skip_preflight: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Accept failing transactions at submit and report them at confirmation
    pub fn set_skip_preflight(&self, skip: bool) {
        self.skip_preflight.store(skip, Ordering::SeqCst);
    }

    /// Fail the next `count` transport calls with a network error
    pub fn fail_next_calls(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of transport calls received so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Withheld amount sitting on the mint itself
    pub fn mint_withheld(&self, mint: &Pubkey) -> Option<u64> {
        self.state.lock().mints.get(mint).map(|m| m.withheld)
    }

    fn enter(&self) -> TransportResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Network("simulated network failure".to_string()));
        }
        Ok(())
    }

    /// Run every instruction against a copy of the state; commit on success
    fn execute(&self, transaction: &Transaction) -> Result<(), String> {
        let message = &transaction.message;
        let mut state = self.state.lock();
        let mut next = state.clone();

        for (index, ix) in message.instructions.iter().enumerate() {
            let program = message
                .account_keys
                .get(ix.program_id_index as usize)
                .copied()
                .ok_or("program index out of range")?;
            let view = IxView { message, ix };

            let result = if program == self.program_ids.launchpad {
                next.create_mint(&view, &ix.data)
            } else if program == self.program_ids.associated_token {
                next.create_associated(&view, &ix.data, &self.program_ids.token)
            } else if program == self.program_ids.token {
                next.token_instruction(&view, &ix.data)
            } else {
                Err(format!("unsupported program {}", program))
            };

            result.map_err(|e| format!("Error processing Instruction {}: {}", index, e))?;
        }

        *state = next;
        Ok(())
    }
}

#[async_trait]
impl LedgerTransport for LedgerSimulator {
    async fn get_account_info(&self, address: &Pubkey) -> TransportResult<Option<Account>> {
        self.enter()?;
        let state = self.state.lock();
        let exists = state.mints.contains_key(address) || state.accounts.contains_key(address);
        Ok(exists.then(|| Account {
            lamports: 1,
            data: Vec::new(),
            owner: self.program_ids.token,
            executable: false,
            rent_epoch: 0,
        }))
    }

    async fn latest_blockhash(&self) -> TransportResult<Hash> {
        self.enter()?;
        Ok(Hash::new_unique())
    }

    async fn submit(&self, transaction: &Transaction) -> TransportResult<Signature> {
        self.enter()?;
        let signature = transaction.signatures.first().copied().unwrap_or_default();

        if transaction.verify().is_err() {
            return Err(TransportError::Rejected {
                signature: Some(signature),
                message: "signature verification failed".to_string(),
            });
        }

        let outcome = self.execute(transaction);
        debug!(signature = %signature, ok = outcome.is_ok(), "Simulated transaction");

        match outcome {
            Ok(()) => {
                self.statuses
                    .lock()
                    .insert(signature, ConfirmationStatus::Confirmed);
                Ok(signature)
            }
            Err(message) if self.skip_preflight.load(Ordering::SeqCst) => {
                self.statuses
                    .lock()
                    .insert(signature, ConfirmationStatus::Failed(message));
                Ok(signature)
            }
            Err(message) => Err(TransportError::Rejected {
                signature: Some(signature),
                message,
            }),
        }
    }

    async fn confirm(&self, signature: &Signature) -> TransportResult<ConfirmationStatus> {
        self.enter()?;
        self.statuses
            .lock()
            .get(signature)
            .cloned()
            .ok_or(TransportError::Timeout {
                signature: *signature,
                waited_ms: 0,
            })
    }

    async fn query_token_account(&self, address: &Pubkey) -> TransportResult<TokenAccountState> {
        self.enter()?;
        let state = self.state.lock();
        let account = state
            .accounts
            .get(address)
            .ok_or(TransportError::AccountNotFound { address: *address })?;
        let fee_bearing = state
            .mints
            .get(&account.mint)
            .map(|m| m.kind.is_transferable())
            .unwrap_or(false);

        Ok(TokenAccountState {
            mint: account.mint,
            owner: account.owner,
            amount: account.amount,
            withheld_amount: fee_bearing.then_some(account.withheld),
        })
    }

    async fn query_mint(&self, address: &Pubkey) -> TransportResult<Option<MintRecord>> {
        self.enter()?;
        Ok(self.state.lock().mints.get(address).map(|m| MintRecord {
            address: *address,
            decimals: m.decimals,
            kind: m.kind,
            mint_authority: Some(m.mint_authority),
            fee_withdraw_authority: m.fee_withdraw_authority,
        }))
    }
}
