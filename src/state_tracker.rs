//! State Tracker - the client's view of which on-chain objects exist
//!
//! Holds at most one active mint context. State changes only through the
//! `record_*` methods, or inside the crate through a batch of the same
//! records applied under a single write lock: the result of one completed
//! operation is never observed half written, even with several operations
//! in flight.
//!
//! ## Usage Example
//!
//! ```no_run
//! use taxed_token_sequencer::state_tracker::StateTracker;
//! # use taxed_token_sequencer::types::{MintKind, MintRecord};
//! # use solana_sdk::pubkey::Pubkey;
//! # let mint = MintRecord { address: Pubkey::new_unique(), decimals: 6,
//! #     kind: MintKind::Soulbound, mint_authority: None, fee_withdraw_authority: None };
//! let payer = Pubkey::new_unique();
//! let tracker = StateTracker::new();
//!
//! tracker.record_mint_created(mint, payer);
//! tracker.record_account_created(mint.address, payer, Pubkey::new_unique());
//! ```

use chrono::Utc;
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;

use crate::tx_builder::errors::WorkflowError;
use crate::types::{AccountRecord, MintRecord, WorkflowStage};

/// One state change produced by a confirmed operation
///
/// The first three mirror `record_mint_created`, `record_account_created`
/// and `record_balance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackerUpdate {
    /// Replaces the active mint and discards all account state
    MintSelected { mint: MintRecord, payer: Pubkey },
    AccountCreated {
        mint: Pubkey,
        owner: Pubkey,
        address: Pubkey,
    },
    Balance {
        address: Pubkey,
        amount: u64,
        withheld_amount: Option<u64>,
    },
    /// Moves the stage forward; never backwards
    Stage(WorkflowStage),
}

/// Point-in-time copy of the tracker
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    pub mint: Option<MintRecord>,
    pub stage: WorkflowStage,
    pub accounts: Vec<AccountRecord>,
}

#[derive(Debug)]
struct TrackerInner {
    mint: Option<MintRecord>,
    payer: Option<Pubkey>,
    stage: WorkflowStage,
    /// Associated accounts of the active mint, keyed by owner
    accounts: HashMap<Pubkey, AccountRecord>,
}

impl TrackerInner {
    fn apply(&mut self, update: TrackerUpdate) {
        match update {
            TrackerUpdate::MintSelected { mint, payer } => {
                self.mint = Some(mint);
                self.payer = Some(payer);
                self.accounts.clear();
                self.stage = WorkflowStage::MintCreated;
            }
            TrackerUpdate::AccountCreated {
                mint,
                owner,
                address,
            } => {
                // Accounts of a mint that is no longer active are dropped
                if self.mint.map(|m| m.address) != Some(mint) {
                    return;
                }
                self.accounts.entry(owner).or_insert(AccountRecord {
                    address,
                    owner,
                    mint,
                    balance: None,
                    withheld_amount: None,
                    last_observed: None,
                });
                if Some(owner) == self.payer {
                    self.advance(WorkflowStage::AccountReady);
                }
            }
            TrackerUpdate::Balance {
                address,
                amount,
                withheld_amount,
            } => {
                if let Some(record) = self.accounts.values_mut().find(|r| r.address == address) {
                    record.balance = Some(amount);
                    record.withheld_amount = withheld_amount;
                    record.last_observed = Some(Utc::now());
                }
            }
            TrackerUpdate::Stage(stage) => self.advance(stage),
        }
    }

    fn advance(&mut self, stage: WorkflowStage) {
        if self.mint.is_some() && stage > self.stage {
            self.stage = stage;
        }
    }
}

/// Single source of truth for what this client believes exists
#[derive(Debug)]
pub struct StateTracker {
    inner: RwLock<TrackerInner>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TrackerInner {
                mint: None,
                payer: None,
                stage: WorkflowStage::Uninitialized,
                accounts: HashMap::new(),
            }),
        }
    }

    /// Apply all updates of one completed operation atomically
    pub(crate) fn apply(&self, updates: Vec<TrackerUpdate>) {
        let mut inner = self.inner.write();
        for update in updates {
            inner.apply(update);
        }
    }

    /// Apply a batch produced while `mint` was active
    ///
    /// The whole batch is dropped when another mint was selected in the
    /// meantime. Returns whether it was applied.
    pub(crate) fn apply_for_mint(&self, mint: &Pubkey, updates: Vec<TrackerUpdate>) -> bool {
        let mut inner = self.inner.write();
        if inner.mint.map(|m| m.address) != Some(*mint) {
            return false;
        }
        for update in updates {
            inner.apply(update);
        }
        true
    }

    pub fn record_mint_created(&self, mint: MintRecord, payer: Pubkey) {
        self.apply(vec![TrackerUpdate::MintSelected { mint, payer }]);
    }

    pub fn record_account_created(&self, mint: Pubkey, owner: Pubkey, address: Pubkey) {
        self.apply(vec![TrackerUpdate::AccountCreated {
            mint,
            owner,
            address,
        }]);
    }

    pub fn record_balance(&self, address: Pubkey, amount: u64, withheld_amount: Option<u64>) {
        self.apply(vec![TrackerUpdate::Balance {
            address,
            amount,
            withheld_amount,
        }]);
    }

    pub fn active_mint(&self) -> Option<MintRecord> {
        self.inner.read().mint
    }

    /// Active mint or `PreconditionMissing`
    pub fn require_mint(&self) -> Result<MintRecord, WorkflowError> {
        self.active_mint().ok_or_else(WorkflowError::no_active_mint)
    }

    pub fn account_for(&self, owner: &Pubkey) -> Option<AccountRecord> {
        self.inner.read().accounts.get(owner).cloned()
    }

    /// Tracked account of `owner` or `PreconditionMissing`
    pub fn require_account(&self, owner: &Pubkey) -> Result<AccountRecord, WorkflowError> {
        self.account_for(owner)
            .ok_or_else(|| WorkflowError::missing_account(owner))
    }

    /// Tracked accounts whose last observation showed withheld fees
    pub fn accounts_with_withheld(&self) -> Vec<AccountRecord> {
        let inner = self.inner.read();
        let mut records: Vec<AccountRecord> = inner
            .accounts
            .values()
            .filter(|r| r.withheld_amount.unwrap_or(0) > 0)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.address);
        records
    }

    pub fn stage(&self) -> WorkflowStage {
        self.inner.read().stage
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let inner = self.inner.read();
        let mut accounts: Vec<AccountRecord> = inner.accounts.values().cloned().collect();
        accounts.sort_by_key(|r| r.address);
        TrackerSnapshot {
            mint: inner.mint,
            stage: inner.stage,
            accounts,
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MintKind;

    fn taxed_mint() -> MintRecord {
        MintRecord {
            address: Pubkey::new_unique(),
            decimals: 6,
            kind: MintKind::Taxed {
                fee_basis_points: 100,
                maximum_fee: 1_000_000,
            },
            mint_authority: None,
            fee_withdraw_authority: None,
        }
    }

    #[test]
    fn test_new_tracker_is_uninitialized() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.stage(), WorkflowStage::Uninitialized);
        assert!(matches!(
            tracker.require_mint(),
            Err(WorkflowError::PreconditionMissing(_))
        ));
    }

    #[test]
    fn test_stage_progression() {
        let tracker = StateTracker::new();
        let payer = Pubkey::new_unique();
        let mint = taxed_mint();

        tracker.record_mint_created(mint, payer);
        assert_eq!(tracker.stage(), WorkflowStage::MintCreated);

        // A non-payer account does not make the workflow ready
        tracker.record_account_created(mint.address, Pubkey::new_unique(), Pubkey::new_unique());
        assert_eq!(tracker.stage(), WorkflowStage::MintCreated);

        tracker.record_account_created(mint.address, payer, Pubkey::new_unique());
        assert_eq!(tracker.stage(), WorkflowStage::AccountReady);

        tracker.apply(vec![TrackerUpdate::Stage(WorkflowStage::Funded)]);
        tracker.apply(vec![TrackerUpdate::Stage(WorkflowStage::AccountReady)]);
        assert_eq!(tracker.stage(), WorkflowStage::Funded);
    }

    #[test]
    fn test_stage_requires_mint() {
        let tracker = StateTracker::new();
        tracker.apply(vec![TrackerUpdate::Stage(WorkflowStage::Funded)]);
        assert_eq!(tracker.stage(), WorkflowStage::Uninitialized);
    }

    #[test]
    fn test_switching_mints_discards_accounts() {
        let tracker = StateTracker::new();
        let payer = Pubkey::new_unique();
        let first = taxed_mint();
        tracker.record_mint_created(first, payer);
        tracker.record_account_created(first.address, payer, Pubkey::new_unique());
        assert!(tracker.account_for(&payer).is_some());

        let second = taxed_mint();
        tracker.record_mint_created(second, payer);
        assert!(tracker.account_for(&payer).is_none());
        assert_eq!(tracker.stage(), WorkflowStage::MintCreated);

        // Late result for the previous mint is ignored
        tracker.record_account_created(first.address, payer, Pubkey::new_unique());
        assert!(tracker.account_for(&payer).is_none());
    }

    #[test]
    fn test_record_balance() {
        let tracker = StateTracker::new();
        let payer = Pubkey::new_unique();
        let mint = taxed_mint();
        let address = Pubkey::new_unique();
        tracker.record_mint_created(mint, payer);
        tracker.record_account_created(mint.address, payer, address);

        tracker.record_balance(address, 99_000, Some(1_000));
        let record = tracker.require_account(&payer).unwrap();
        assert_eq!(record.balance, Some(99_000));
        assert_eq!(record.withheld_amount, Some(1_000));
        assert!(record.last_observed.is_some());
        assert_eq!(tracker.accounts_with_withheld().len(), 1);

        // Unknown addresses are not tracked
        tracker.record_balance(Pubkey::new_unique(), 5, None);
        assert_eq!(tracker.snapshot().accounts.len(), 1);
    }

    #[test]
    fn test_batch_is_applied_as_one() {
        let tracker = StateTracker::new();
        let payer = Pubkey::new_unique();
        let mint = taxed_mint();
        let address = Pubkey::new_unique();
        tracker.record_mint_created(mint, payer);

        tracker.apply(vec![
            TrackerUpdate::AccountCreated {
                mint: mint.address,
                owner: payer,
                address,
            },
            TrackerUpdate::Balance {
                address,
                amount: 1_000_000,
                withheld_amount: Some(0),
            },
            TrackerUpdate::Stage(WorkflowStage::Funded),
        ]);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.stage, WorkflowStage::Funded);
        assert_eq!(snapshot.accounts[0].balance, Some(1_000_000));
    }

    #[test]
    fn test_batch_matches_record_calls() {
        let payer = Pubkey::new_unique();
        let mint = taxed_mint();
        let address = Pubkey::new_unique();

        let recorded = StateTracker::new();
        recorded.record_mint_created(mint, payer);
        recorded.record_account_created(mint.address, payer, address);
        recorded.record_balance(address, 42, Some(1));

        let batched = StateTracker::new();
        batched.apply(vec![
            TrackerUpdate::MintSelected { mint, payer },
            TrackerUpdate::AccountCreated {
                mint: mint.address,
                owner: payer,
                address,
            },
            TrackerUpdate::Balance {
                address,
                amount: 42,
                withheld_amount: Some(1),
            },
        ]);

        let (a, b) = (recorded.snapshot(), batched.snapshot());
        assert_eq!(a.mint, b.mint);
        assert_eq!(a.stage, b.stage);
        assert_eq!(a.accounts.len(), 1);
        assert_eq!(b.accounts[0].balance, a.accounts[0].balance);
        assert_eq!(b.accounts[0].withheld_amount, a.accounts[0].withheld_amount);
    }

    #[test]
    fn test_stale_batch_is_dropped() {
        let tracker = StateTracker::new();
        let payer = Pubkey::new_unique();
        let first = taxed_mint();
        let second = taxed_mint();
        tracker.record_mint_created(first, payer);
        tracker.record_mint_created(second, payer);

        let applied = tracker.apply_for_mint(
            &first.address,
            vec![TrackerUpdate::Stage(WorkflowStage::Funded)],
        );
        assert!(!applied);
        assert_eq!(tracker.stage(), WorkflowStage::MintCreated);

        assert!(tracker.apply_for_mint(
            &second.address,
            vec![TrackerUpdate::Stage(WorkflowStage::Funded)],
        ));
        assert_eq!(tracker.stage(), WorkflowStage::Funded);
    }
}
