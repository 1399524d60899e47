//! Sequencer - orchestration entry point of the token workflow
//!
//! Each action runs as an independent async unit:
//!
//! 1. Preconditions are checked against the [`WorkflowContext`] (agent
//!    connected, mint selected, account known). Failures here never reach
//!    the network.
//! 2. The [`OperationBuilder`] plans the instructions.
//! 3. The transaction is signed and sent by the connected agent, then
//!    confirmed through the transport. These are the only suspension points
//!    besides the existence and balance reads.
//! 4. On confirmation the [`StateTracker`] receives one atomic batch; on
//!    failure nothing is recorded except a rejected transfer attempt.
//!
//! Several actions may be in flight at once; they are not serialized
//! against each other. Every outcome is appended to the [`ActivityLog`].

use parking_lot::RwLock;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::rpc_manager::{ConfirmationStatus, LedgerTransport, TransportError};
use crate::state_tracker::{StateTracker, TrackerUpdate};
use crate::structured_logging::{ActivityLog, OperationContext};
use crate::tx_builder::{
    expected_fee, AccountResolver, OperationBuilder, PendingOperation, TxBuildOutput,
    WorkflowError,
};
use crate::types::{
    ActionDetail, ActionKind, CreateMintParams, MintRecord, ProgramIds, TokenAccountState,
    WorkflowStage,
};
use crate::wallet::SigningAgent;

/// Explicit state every action reads its preconditions from
pub struct WorkflowContext {
    agent: RwLock<Option<Arc<dyn SigningAgent>>>,
    tracker: StateTracker,
    log: ActivityLog,
}

impl WorkflowContext {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            agent: RwLock::new(None),
            tracker: StateTracker::new(),
            log: ActivityLog::new(log_capacity),
        }
    }

    /// Connected agent or `NotConnected`
    pub fn require_agent(&self) -> Result<Arc<dyn SigningAgent>, WorkflowError> {
        self.agent.read().clone().ok_or(WorkflowError::NotConnected)
    }
}

/// Orchestrates the taxed / soulbound token workflow
pub struct Sequencer {
    transport: Arc<dyn LedgerTransport>,
    builder: OperationBuilder,
    context: WorkflowContext,
}

impl Sequencer {
    pub fn new(
        transport: Arc<dyn LedgerTransport>,
        program_ids: ProgramIds,
        log_capacity: usize,
    ) -> Self {
        let resolver = AccountResolver::new(transport.clone(), program_ids.token);
        Self {
            builder: OperationBuilder::new(program_ids, resolver),
            transport,
            context: WorkflowContext::new(log_capacity),
        }
    }

    pub fn connect(&self, agent: Arc<dyn SigningAgent>) {
        let pubkey = agent.pubkey();
        *self.context.agent.write() = Some(agent);
        self.context
            .log
            .info(None, format!("Signing agent connected: {}", pubkey));
    }

    pub fn disconnect(&self) {
        if self.context.agent.write().take().is_some() {
            self.context.log.info(None, "Signing agent disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.context.agent.read().is_some()
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.context.tracker
    }

    /// Read-only log feed
    pub fn log(&self) -> &ActivityLog {
        &self.context.log
    }

    /// Associated account address of `owner` for the active mint
    pub fn associated_address(&self, owner: &Pubkey) -> Result<Pubkey, WorkflowError> {
        let mint = self.context.tracker.require_mint()?;
        Ok(self.builder.resolver().derive(&mint.address, owner))
    }

    /// Create a taxed or soulbound mint and make it the active mint
    #[instrument(skip(self), fields(kind = params.kind.label()))]
    pub async fn create_mint(&self, params: CreateMintParams) -> Result<ActionDetail, WorkflowError> {
        let ctx = OperationContext::new(ActionKind::CreateMint);
        let result = self.create_mint_inner(&ctx, params).await;
        self.finish(&ctx, result)
    }

    async fn create_mint_inner(
        &self,
        ctx: &OperationContext,
        params: CreateMintParams,
    ) -> Result<ActionDetail, WorkflowError> {
        let agent = self.context.require_agent()?;
        let payer = agent.pubkey();

        let (op, mint) = self.builder.build_create_mint(&payer, &payer, &params)?;
        let signature = self.submit_and_confirm(ctx, agent.as_ref(), op).await?;

        self.context.tracker.record_mint_created(mint, payer);
        Ok(ActionDetail::MintCreated { mint, signature })
    }

    /// Adopt an existing mint as the active mint
    #[instrument(skip(self))]
    pub async fn select_mint(&self, address: Pubkey) -> Result<ActionDetail, WorkflowError> {
        let ctx = OperationContext::new(ActionKind::SelectMint);
        let result = self.select_mint_inner(address).await;
        self.finish(&ctx, result)
    }

    async fn select_mint_inner(&self, address: Pubkey) -> Result<ActionDetail, WorkflowError> {
        let agent = self.context.require_agent()?;

        let mint = self
            .transport
            .query_mint(&address)
            .await?
            .ok_or_else(|| WorkflowError::PreconditionMissing(format!("mint {} not found", address)))?;

        self.context.tracker.record_mint_created(mint, agent.pubkey());
        Ok(ActionDetail::MintSelected { mint })
    }

    /// Make sure `owner` has an associated account for the active mint
    ///
    /// Succeeds without submitting anything when the account already exists.
    #[instrument(skip(self))]
    pub async fn ensure_associated_account(
        &self,
        owner: Pubkey,
    ) -> Result<ActionDetail, WorkflowError> {
        let ctx = OperationContext::new(ActionKind::CreateAccount);
        let result = self.ensure_associated_account_inner(&ctx, owner).await;
        self.finish(&ctx, result)
    }

    async fn ensure_associated_account_inner(
        &self,
        ctx: &OperationContext,
        owner: Pubkey,
    ) -> Result<ActionDetail, WorkflowError> {
        let agent = self.context.require_agent()?;
        let mint = self.context.tracker.require_mint()?;
        let payer = agent.pubkey();

        let address = self.builder.resolver().derive(&mint.address, &owner);
        let op = self
            .builder
            .build_create_associated_account(&payer, &mint.address, &owner)
            .await?;

        let created = !op.is_empty();
        let signature = if created {
            Some(self.submit_and_confirm(ctx, agent.as_ref(), op).await?)
        } else {
            debug!(address = %address, "Associated account already exists");
            None
        };

        self.context.tracker.apply_for_mint(
            &mint.address,
            vec![TrackerUpdate::AccountCreated {
                mint: mint.address,
                owner,
                address,
            }],
        );

        Ok(ActionDetail::AccountReady {
            address,
            owner,
            created,
            signature,
        })
    }

    /// Mint `amount` base units into the payer's associated account
    #[instrument(skip(self))]
    pub async fn mint_tokens(&self, amount: u64) -> Result<ActionDetail, WorkflowError> {
        let ctx = OperationContext::new(ActionKind::MintTo);
        let result = self.mint_tokens_inner(&ctx, amount).await;
        self.finish(&ctx, result)
    }

    async fn mint_tokens_inner(
        &self,
        ctx: &OperationContext,
        amount: u64,
    ) -> Result<ActionDetail, WorkflowError> {
        let agent = self.context.require_agent()?;
        let mint = self.context.tracker.require_mint()?;
        let payer = agent.pubkey();
        let destination = self.context.tracker.require_account(&payer)?.address;

        let op = self
            .builder
            .build_mint_to(&mint, &destination, &payer, amount)?;
        let signature = self.submit_and_confirm(ctx, agent.as_ref(), op).await?;

        let observed = self.observe(ctx, &destination).await;
        let mut updates = vec![TrackerUpdate::Stage(WorkflowStage::Funded)];
        if let Some(state) = observed {
            updates.push(balance_update(&destination, &state));
        }
        self.context.tracker.apply_for_mint(&mint.address, updates);

        Ok(ActionDetail::Minted {
            destination,
            amount,
            balance: observed.map(|s| s.amount),
            signature,
        })
    }

    /// Transfer `amount` from the payer to `destination_owner`'s associated
    /// account, creating that account in the same transaction when missing
    ///
    /// A rejected transfer still counts as an attempt. On soulbound mints
    /// the rejection is the expected outcome and is reported as a failure.
    #[instrument(skip(self))]
    pub async fn transfer_with_fee(
        &self,
        destination_owner: Pubkey,
        amount: u64,
    ) -> Result<ActionDetail, WorkflowError> {
        let ctx = OperationContext::new(ActionKind::TransferWithFee);
        let result = self
            .transfer_with_fee_inner(&ctx, destination_owner, amount)
            .await;
        self.finish(&ctx, result)
    }

    async fn transfer_with_fee_inner(
        &self,
        ctx: &OperationContext,
        destination_owner: Pubkey,
        amount: u64,
    ) -> Result<ActionDetail, WorkflowError> {
        let agent = self.context.require_agent()?;
        let mint = self.context.tracker.require_mint()?;
        let payer = agent.pubkey();
        let source = self.context.tracker.require_account(&payer)?.address;
        let destination = self.builder.resolver().derive(&mint.address, &destination_owner);

        let create = self
            .builder
            .build_create_associated_account(&payer, &mint.address, &destination_owner)
            .await?;
        let baseline = if create.is_empty() {
            let state = self.transport.query_token_account(&destination).await?;
            (state.amount, state.withheld_amount.unwrap_or(0))
        } else {
            (0, 0)
        };

        let transfer =
            self.builder
                .build_transfer_with_fee(&source, &mint, &destination, &payer, amount)?;
        let mut op = create.merge(transfer);
        op.action = ActionKind::TransferWithFee;

        let fee = expected_fee(&mint, amount);
        let signature = match self.submit_and_confirm(ctx, agent.as_ref(), op).await {
            Ok(signature) => signature,
            Err(err) => {
                if matches!(err, WorkflowError::SubmissionRejected { .. }) {
                    self.context.tracker.apply_for_mint(
                        &mint.address,
                        vec![TrackerUpdate::Stage(WorkflowStage::TransferAttempted)],
                    );
                    if !mint.kind.is_transferable() {
                        self.context.log.info(
                            Some(ctx.operation_id),
                            format!("Transfer rejected as expected: mint {} is non-transferable", mint.address),
                        );
                    }
                }
                return Err(err);
            }
        };

        if !mint.kind.is_transferable() {
            self.context.log.error(
                Some(ctx.operation_id),
                format!("Non-transferable mint {} accepted a transfer", mint.address),
            );
        }

        let after = self.observe(ctx, &destination).await;
        let source_after = self.observe(ctx, &source).await;

        let mut updates = vec![TrackerUpdate::AccountCreated {
            mint: mint.address,
            owner: destination_owner,
            address: destination,
        }];
        updates.extend(after.iter().map(|s| balance_update(&destination, s)));
        updates.extend(source_after.iter().map(|s| balance_update(&source, s)));
        updates.push(TrackerUpdate::Stage(WorkflowStage::TransferAttempted));
        self.context.tracker.apply_for_mint(&mint.address, updates);

        let observed_withheld_delta =
            after.and_then(|s| s.withheld_amount.unwrap_or(0).checked_sub(baseline.1));
        let net_received = after.and_then(|s| s.amount.checked_sub(baseline.0));
        let fee_verified =
            observed_withheld_delta == Some(fee) && net_received == amount.checked_sub(fee);

        if fee_verified {
            self.context.log.info(
                Some(ctx.operation_id),
                format!("Withheld fee verified: {} of {}", fee, amount),
            );
        } else {
            self.context.log.warn(
                Some(ctx.operation_id),
                format!(
                    "Withheld fee not verified: expected {}, observed {:?}, net {:?}",
                    fee, observed_withheld_delta, net_received
                ),
            );
        }

        Ok(ActionDetail::Transferred {
            source,
            destination,
            amount,
            expected_fee: fee,
            observed_withheld_delta,
            net_received,
            fee_verified,
            signature,
        })
    }

    /// Read balance and withheld amount of any token account
    ///
    /// Refreshes the tracked record when the account belongs to the active
    /// mint; never changes the workflow stage.
    #[instrument(skip(self))]
    pub async fn inspect_account(&self, address: Pubkey) -> Result<ActionDetail, WorkflowError> {
        let ctx = OperationContext::new(ActionKind::Inspect);
        let result = self.inspect_account_inner(address).await;
        self.finish(&ctx, result)
    }

    async fn inspect_account_inner(&self, address: Pubkey) -> Result<ActionDetail, WorkflowError> {
        self.context.require_agent()?;

        let state = self.transport.query_token_account(&address).await?;
        self.context
            .tracker
            .apply_for_mint(&state.mint, vec![balance_update(&address, &state)]);

        Ok(ActionDetail::Inspected { address, state })
    }

    /// Sweep withheld fees into the mint and withdraw them to
    /// `destination_owner`'s associated account
    ///
    /// The connected agent signs as fee-withdraw authority; the token
    /// program rejects the withdrawal when it is not.
    #[instrument(skip(self))]
    pub async fn withdraw_withheld_fees(
        &self,
        destination_owner: Pubkey,
    ) -> Result<ActionDetail, WorkflowError> {
        let ctx = OperationContext::new(ActionKind::WithdrawWithheld);
        let result = self
            .withdraw_withheld_fees_inner(&ctx, destination_owner)
            .await;
        self.finish(&ctx, result)
    }

    async fn withdraw_withheld_fees_inner(
        &self,
        ctx: &OperationContext,
        destination_owner: Pubkey,
    ) -> Result<ActionDetail, WorkflowError> {
        let agent = self.context.require_agent()?;
        let mint = self.context.tracker.require_mint()?;
        let destination = self
            .context
            .tracker
            .require_account(&destination_owner)?
            .address;

        let sources: Vec<Pubkey> = self
            .context
            .tracker
            .accounts_with_withheld()
            .into_iter()
            .map(|r| r.address)
            .collect();
        let op = self.builder.build_withdraw_withheld(
            &mint,
            &destination,
            &agent.pubkey(),
            &sources,
        )?;

        let baseline = self.transport.query_token_account(&destination).await?.amount;
        let signature = self.submit_and_confirm(ctx, agent.as_ref(), op).await?;

        let after = self.observe(ctx, &destination).await;
        let mut updates: Vec<TrackerUpdate> = after
            .iter()
            .map(|s| balance_update(&destination, s))
            .collect();
        for source in sources.iter().filter(|s| **s != destination) {
            if let Some(state) = self.observe(ctx, source).await {
                updates.push(balance_update(source, &state));
            }
        }
        self.context.tracker.apply_for_mint(&mint.address, updates);

        Ok(ActionDetail::WithheldWithdrawn {
            destination,
            harvested_accounts: sources.len(),
            withdrawn: after.and_then(|s| s.amount.checked_sub(baseline)),
            signature,
        })
    }

    /// Assemble, sign-and-send through the agent, then await confirmation
    async fn submit_and_confirm(
        &self,
        ctx: &OperationContext,
        agent: &dyn SigningAgent,
        op: PendingOperation,
    ) -> Result<Signature, WorkflowError> {
        if op.is_empty() {
            return Err(WorkflowError::PreconditionMissing(format!(
                "{} has no instructions to submit",
                op.action
            )));
        }

        let blockhash = self.transport.latest_blockhash().await?;
        let output = TxBuildOutput::assemble(op, &agent.pubkey(), blockhash)?;
        ctx.log_submitted(output.tx.message.instructions.len());

        let signature = agent.sign_and_send_transaction(output.tx).await?;
        self.context.log.info(
            Some(ctx.operation_id),
            format!("{} submitted: {}", ctx.action, signature),
        );

        let status = self
            .transport
            .confirm(&signature)
            .await
            .map_err(|e| with_signature(e, signature))?;

        match status {
            ConfirmationStatus::Confirmed => {
                ctx.log_confirmed(&signature.to_string());
                Ok(signature)
            }
            ConfirmationStatus::Failed(message) => {
                Err(WorkflowError::rejected(Some(signature), message))
            }
        }
    }

    /// Post-confirmation read; a failure is logged, not returned
    async fn observe(&self, ctx: &OperationContext, address: &Pubkey) -> Option<TokenAccountState> {
        match self.transport.query_token_account(address).await {
            Ok(state) => Some(state),
            Err(err) => {
                self.context.log.warn(
                    Some(ctx.operation_id),
                    format!("Could not observe account {}: {}", address, err),
                );
                None
            }
        }
    }

    fn finish(
        &self,
        ctx: &OperationContext,
        result: Result<ActionDetail, WorkflowError>,
    ) -> Result<ActionDetail, WorkflowError> {
        match &result {
            Ok(detail) => self
                .context
                .log
                .info(Some(ctx.operation_id), describe(detail)),
            Err(err) => {
                ctx.log_failure(err.category(), &err.to_string());
                let message = if err.is_local() {
                    format!("{} failed before submission: {}", ctx.action, err)
                } else {
                    format!("{} failed: {}", ctx.action, err)
                };
                self.context.log.error(Some(ctx.operation_id), message);
            }
        }
        result
    }
}

fn balance_update(address: &Pubkey, state: &TokenAccountState) -> TrackerUpdate {
    TrackerUpdate::Balance {
        address: *address,
        amount: state.amount,
        withheld_amount: state.withheld_amount,
    }
}

/// Attach the submitted signature to a confirmation failure
fn with_signature(err: TransportError, signature: Signature) -> WorkflowError {
    match WorkflowError::from(err) {
        WorkflowError::TransportFailure {
            signature: None,
            message,
        } => WorkflowError::TransportFailure {
            signature: Some(signature),
            message,
        },
        other => other,
    }
}

fn describe(detail: &ActionDetail) -> String {
    match detail {
        ActionDetail::MintCreated { mint, .. } => describe_mint("Created", mint),
        ActionDetail::MintSelected { mint } => describe_mint("Selected", mint),
        ActionDetail::AccountReady {
            address,
            owner,
            created: true,
            ..
        } => format!("Created associated account {} for {}", address, owner),
        ActionDetail::AccountReady { address, owner, .. } => {
            format!("Associated account {} for {} already exists", address, owner)
        }
        ActionDetail::Minted {
            destination,
            amount,
            ..
        } => format!("Minted {} to {}", amount, destination),
        ActionDetail::Transferred {
            destination,
            amount,
            expected_fee,
            ..
        } => format!(
            "Transferred {} to {} (fee {})",
            amount, destination, expected_fee
        ),
        ActionDetail::Inspected { address, state } => format!(
            "Account {}: balance {}, withheld {}",
            address,
            state.amount,
            state.withheld_amount.unwrap_or(0)
        ),
        ActionDetail::WithheldWithdrawn {
            destination,
            harvested_accounts,
            withdrawn,
            ..
        } => format!(
            "Withdrew withheld fees to {} ({} accounts harvested, {:?} received)",
            destination, harvested_accounts, withdrawn
        ),
    }
}

fn describe_mint(verb: &str, mint: &MintRecord) -> String {
    format!(
        "{} {} mint {} ({} decimals)",
        verb,
        mint.kind.label(),
        mint.address,
        mint.decimals
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::LedgerSimulator;
    use crate::tx_builder::ErrorKind;
    use crate::wallet::{KeypairAgent, WalletManager};
    use solana_sdk::signature::Keypair;

    fn sequencer() -> (Sequencer, Arc<LedgerSimulator>) {
        let ids = ProgramIds::default();
        let simulator = Arc::new(LedgerSimulator::new(ids));
        (Sequencer::new(simulator.clone(), ids, 50), simulator)
    }

    fn connect(sequencer: &Sequencer, simulator: &Arc<LedgerSimulator>) -> Pubkey {
        let wallet = WalletManager::from_keypair(Keypair::new());
        let payer = wallet.pubkey();
        sequencer.connect(Arc::new(KeypairAgent::new(wallet, simulator.clone())));
        payer
    }

    #[tokio::test]
    async fn test_precondition_order() {
        let (sequencer, simulator) = sequencer();
        let err = sequencer.mint_tokens(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);

        connect(&sequencer, &simulator);
        let err = sequencer.mint_tokens(1).await.unwrap_err();
        assert_eq!(err, WorkflowError::no_active_mint());

        sequencer
            .create_mint(CreateMintParams::taxed(6, 100, 1_000_000))
            .await
            .unwrap();
        let calls = simulator.call_count();
        let err = sequencer.mint_tokens(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionMissing);
        assert_eq!(simulator.call_count(), calls);
    }

    #[tokio::test]
    async fn test_stage_follows_confirmed_actions() {
        let (sequencer, simulator) = sequencer();
        let payer = connect(&sequencer, &simulator);

        sequencer
            .create_mint(CreateMintParams::taxed(6, 100, 1_000_000))
            .await
            .unwrap();
        assert_eq!(sequencer.tracker().stage(), WorkflowStage::MintCreated);

        sequencer.ensure_associated_account(payer).await.unwrap();
        assert_eq!(sequencer.tracker().stage(), WorkflowStage::AccountReady);

        sequencer.mint_tokens(1_000_000).await.unwrap();
        assert_eq!(sequencer.tracker().stage(), WorkflowStage::Funded);

        sequencer
            .transfer_with_fee(Pubkey::new_unique(), 100_000)
            .await
            .unwrap();
        assert_eq!(sequencer.tracker().stage(), WorkflowStage::TransferAttempted);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_state_untouched() {
        let (sequencer, simulator) = sequencer();
        connect(&sequencer, &simulator);

        simulator.fail_next_calls(1);
        let err = sequencer
            .create_mint(CreateMintParams::soulbound(0))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_local());
        assert!(sequencer.tracker().active_mint().is_none());
        assert_eq!(sequencer.tracker().stage(), WorkflowStage::Uninitialized);

        let last = sequencer.log().snapshot().pop().unwrap();
        assert!(last.message.contains("create_mint failed: "));
    }

    #[tokio::test]
    async fn test_select_mint() {
        let (sequencer, simulator) = sequencer();
        connect(&sequencer, &simulator);

        let created = match sequencer
            .create_mint(CreateMintParams::soulbound(2))
            .await
            .unwrap()
        {
            ActionDetail::MintCreated { mint, .. } => mint,
            other => panic!("unexpected detail {:?}", other),
        };
        sequencer
            .create_mint(CreateMintParams::taxed(6, 50, 10))
            .await
            .unwrap();

        let detail = sequencer.select_mint(created.address).await.unwrap();
        assert_eq!(detail, ActionDetail::MintSelected { mint: created });
        assert_eq!(sequencer.tracker().active_mint(), Some(created));

        let err = sequencer.select_mint(Pubkey::new_unique()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionMissing);
    }

    #[tokio::test]
    async fn test_every_outcome_is_logged() {
        let (sequencer, simulator) = sequencer();
        let _ = sequencer.mint_tokens(5).await;
        connect(&sequencer, &simulator);

        let entries = sequencer.log().snapshot();
        assert!(entries[0].message.contains("mint_to failed before submission"));
        assert!(entries[1].message.contains("connected"));
    }
}
