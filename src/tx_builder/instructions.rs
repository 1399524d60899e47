//! Operation planning
//!
//! Translates a requested action plus the client's current view into an
//! ordered instruction list ([`PendingOperation`]):
//! - create mint: one launchpad call, taxed or soulbound, never both
//! - create associated account: zero instructions when it already exists
//! - mint-to: one token instruction
//! - transfer: hand-encoded transfer-checked-with-fee for taxed mints,
//!   plain transfer-checked for soulbound mints (the program rejects it)
//! - withdraw withheld: optional harvest into the mint, then withdraw
//!
//! Authority checks (mint authority, withdraw authority, fee agreement) are
//! left to the receiving programs.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use solana_system_interface::program as system_program;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use spl_token_2022::extension::transfer_fee::instruction::{
    harvest_withheld_tokens_to_mint, withdraw_withheld_tokens_from_mint,
};
use uuid::Uuid;

use crate::tx_builder::codec;
use crate::tx_builder::errors::WorkflowError;
use crate::tx_builder::resolver::AccountResolver;
use crate::types::{ActionKind, CreateMintParams, MintKind, MintRecord, ProgramIds};

/// Fee withheld by a transfer of `amount`:
/// `min(maximum_fee, ceil(amount * fee_basis_points / 10000))`
pub fn compute_transfer_fee(amount: u64, fee_basis_points: u16, maximum_fee: u64) -> u64 {
    let numerator = amount as u128 * fee_basis_points as u128;
    let raw = numerator.div_ceil(10_000);
    // raw <= amount whenever fee_basis_points <= 10000
    raw.min(maximum_fee as u128) as u64
}

/// Fee the client expects the token program to withhold for `mint`
pub fn expected_fee(mint: &MintRecord, amount: u64) -> u64 {
    match mint.kind {
        MintKind::Taxed {
            fee_basis_points,
            maximum_fee,
        } => compute_transfer_fee(amount, fee_basis_points, maximum_fee),
        MintKind::Soulbound => 0,
    }
}

/// An action with its resolved instructions and additional signers
///
/// Transient: built, submitted once, then dropped.
#[derive(Debug)]
pub struct PendingOperation {
    pub id: Uuid,
    pub action: ActionKind,
    pub instructions: Vec<Instruction>,
    /// Signers besides the connected agent (fresh mint identities)
    pub extra_signers: Vec<Keypair>,
    /// Associated accounts this operation creates, as (owner, address)
    pub creates_accounts: Vec<(Pubkey, Pubkey)>,
}

impl PendingOperation {
    pub fn new(action: ActionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            instructions: Vec::new(),
            extra_signers: Vec::new(),
            creates_accounts: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Append another operation's instructions after this one's
    pub fn merge(mut self, other: PendingOperation) -> Self {
        self.instructions.extend(other.instructions);
        self.extra_signers.extend(other.extra_signers);
        self.creates_accounts.extend(other.creates_accounts);
        self
    }

    /// Public keys that must sign besides the fee payer
    pub fn required_signers(&self) -> Vec<Pubkey> {
        self.extra_signers.iter().map(|k| k.pubkey()).collect()
    }
}

fn token_error(program: &str, err: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::Encoding(format!("{} instruction could not be built: {}", program, err))
}

/// Builds the instruction lists for each workflow action
#[derive(Clone)]
pub struct OperationBuilder {
    program_ids: ProgramIds,
    resolver: AccountResolver,
}

impl OperationBuilder {
    pub fn new(program_ids: ProgramIds, resolver: AccountResolver) -> Self {
        Self {
            program_ids,
            resolver,
        }
    }

    pub fn program_ids(&self) -> &ProgramIds {
        &self.program_ids
    }

    pub fn resolver(&self) -> &AccountResolver {
        &self.resolver
    }

    /// Allocate a fresh mint identity and call the launchpad
    ///
    /// `authority` becomes mint authority, freeze authority and (unless the
    /// params name another) fee-withdraw authority. Returns the operation and
    /// the record the mint will have once confirmed.
    pub fn build_create_mint(
        &self,
        payer: &Pubkey,
        authority: &Pubkey,
        params: &CreateMintParams,
    ) -> Result<(PendingOperation, MintRecord), WorkflowError> {
        params.validate()?;

        let mint = Keypair::new();
        let mint_address = mint.pubkey();

        let mut accounts = vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(mint_address, true),
            AccountMeta::new_readonly(*authority, false),
        ];

        let (data, fee_withdraw_authority) = match params.kind {
            MintKind::Taxed {
                fee_basis_points,
                maximum_fee,
            } => {
                let withdraw = params.fee_withdraw_authority.unwrap_or(*authority);
                accounts.push(AccountMeta::new_readonly(withdraw, false));
                (
                    codec::encode_create_taxed_token(params.decimals, fee_basis_points, maximum_fee),
                    Some(withdraw),
                )
            }
            MintKind::Soulbound => (codec::encode_create_soulbound_token(params.decimals), None),
        };

        accounts.extend([
            AccountMeta::new_readonly(*authority, false),
            AccountMeta::new_readonly(self.program_ids.token, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ]);

        let mut op = PendingOperation::new(ActionKind::CreateMint);
        op.instructions.push(Instruction::new_with_bytes(
            self.program_ids.launchpad,
            &data,
            accounts,
        ));
        op.extra_signers.push(mint);

        let record = MintRecord {
            address: mint_address,
            decimals: params.decimals,
            kind: params.kind,
            mint_authority: Some(*authority),
            fee_withdraw_authority,
        };
        Ok((op, record))
    }

    /// Zero instructions when the account exists, otherwise one create
    /// instruction funded by `payer` (which may differ from `owner`)
    pub async fn build_create_associated_account(
        &self,
        payer: &Pubkey,
        mint: &Pubkey,
        owner: &Pubkey,
    ) -> Result<PendingOperation, WorkflowError> {
        let address = self.resolver.derive(mint, owner);
        let mut op = PendingOperation::new(ActionKind::CreateAccount);

        if self.resolver.exists(&address).await? {
            return Ok(op);
        }

        op.instructions.push(create_associated_token_account_idempotent(
            payer,
            owner,
            mint,
            &self.program_ids.token,
        ));
        op.creates_accounts.push((*owner, address));
        Ok(op)
    }

    pub fn build_mint_to(
        &self,
        mint: &MintRecord,
        destination: &Pubkey,
        authority: &Pubkey,
        amount: u64,
    ) -> Result<PendingOperation, WorkflowError> {
        let ix = spl_token_2022::instruction::mint_to(
            &self.program_ids.token,
            &mint.address,
            destination,
            authority,
            &[],
            amount,
        )
        .map_err(|e| token_error("mint_to", e))?;

        let mut op = PendingOperation::new(ActionKind::MintTo);
        op.instructions.push(ix);
        Ok(op)
    }

    /// Transfer `amount` from `source` (owned by `owner`) to `destination`
    ///
    /// The fee is computed here and sent explicitly; the token program
    /// recomputes it and fails the transfer on mismatch.
    pub fn build_transfer_with_fee(
        &self,
        source: &Pubkey,
        mint: &MintRecord,
        destination: &Pubkey,
        owner: &Pubkey,
        amount: u64,
    ) -> Result<PendingOperation, WorkflowError> {
        let ix = match mint.kind {
            MintKind::Taxed { .. } => {
                let fee = expected_fee(mint, amount);
                Instruction::new_with_bytes(
                    self.program_ids.token,
                    &codec::encode_transfer_with_fee(amount, mint.decimals, fee),
                    vec![
                        AccountMeta::new(*source, false),
                        AccountMeta::new_readonly(mint.address, false),
                        AccountMeta::new(*destination, false),
                        AccountMeta::new_readonly(*owner, true),
                    ],
                )
            }
            MintKind::Soulbound => spl_token_2022::instruction::transfer_checked(
                &self.program_ids.token,
                source,
                &mint.address,
                destination,
                owner,
                &[],
                amount,
                mint.decimals,
            )
            .map_err(|e| token_error("transfer_checked", e))?,
        };

        let mut op = PendingOperation::new(ActionKind::TransferWithFee);
        op.instructions.push(ix);
        Ok(op)
    }

    /// Move withheld fees into `destination`
    ///
    /// Fees withheld on `harvest_sources` are first swept into the mint, then
    /// the mint's withheld pool is withdrawn by `withdraw_authority`.
    pub fn build_withdraw_withheld(
        &self,
        mint: &MintRecord,
        destination: &Pubkey,
        withdraw_authority: &Pubkey,
        harvest_sources: &[Pubkey],
    ) -> Result<PendingOperation, WorkflowError> {
        if !mint.kind.is_transferable() {
            return Err(WorkflowError::PreconditionMissing(format!(
                "mint {} has no transfer fee configuration",
                mint.address
            )));
        }

        let mut op = PendingOperation::new(ActionKind::WithdrawWithheld);

        if !harvest_sources.is_empty() {
            let sources: Vec<&Pubkey> = harvest_sources.iter().collect();
            op.instructions.push(
                harvest_withheld_tokens_to_mint(&self.program_ids.token, &mint.address, &sources)
                    .map_err(|e| token_error("harvest_withheld_tokens_to_mint", e))?,
            );
        }

        op.instructions.push(
            withdraw_withheld_tokens_from_mint(
                &self.program_ids.token,
                &mint.address,
                destination,
                withdraw_authority,
                &[],
            )
            .map_err(|e| token_error("withdraw_withheld_tokens_from_mint", e))?,
        );
        Ok(op)
    }
}
