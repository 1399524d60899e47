//! Several actions in flight on one sequencer
//!
//! Actions are not serialized against each other; each one's tracker batch
//! must land whole.

use futures::future::join_all;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::sync::Arc;
use taxed_token_sequencer::simulation::LedgerSimulator;
use taxed_token_sequencer::types::{ActionDetail, WorkflowStage};
use taxed_token_sequencer::wallet::{KeypairAgent, WalletManager};
use taxed_token_sequencer::{CreateMintParams, ProgramIds, Sequencer};

async fn funded_sequencer() -> (Arc<Sequencer>, Pubkey) {
    let ids = ProgramIds::default();
    let simulator = Arc::new(LedgerSimulator::new(ids));
    let sequencer = Arc::new(Sequencer::new(simulator.clone(), ids, 100));
    let wallet = WalletManager::from_keypair(Keypair::new());
    let payer = wallet.pubkey();
    sequencer.connect(Arc::new(KeypairAgent::new(wallet, simulator)));

    sequencer
        .create_mint(CreateMintParams::taxed(6, 100, 1_000_000))
        .await
        .unwrap();
    sequencer.ensure_associated_account(payer).await.unwrap();
    sequencer.mint_tokens(1_000_000).await.unwrap();
    (sequencer, payer)
}

#[tokio::test]
async fn test_joined_transfers_all_land() {
    let (sequencer, payer) = funded_sequencer().await;
    let recipients: Vec<Pubkey> = (0..4).map(|_| Pubkey::new_unique()).collect();

    let results = join_all(
        recipients
            .iter()
            .map(|r| sequencer.transfer_with_fee(*r, 10_000)),
    )
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let snapshot = sequencer.tracker().snapshot();
    assert_eq!(snapshot.accounts.len(), recipients.len() + 1);
    assert_eq!(snapshot.stage, WorkflowStage::TransferAttempted);
    for recipient in &recipients {
        let record = sequencer.tracker().require_account(recipient).unwrap();
        assert_eq!(record.balance, Some(9_900));
        assert_eq!(record.withheld_amount, Some(100));
    }

    let payer_account = sequencer.associated_address(&payer).unwrap();
    match sequencer.inspect_account(payer_account).await.unwrap() {
        ActionDetail::Inspected { state, .. } => assert_eq!(state.amount, 960_000),
        other => panic!("Expected Inspected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_spawned_actions_share_one_tracker() {
    let (sequencer, payer) = funded_sequencer().await;

    let transfer = {
        let sequencer = sequencer.clone();
        tokio::spawn(async move { sequencer.transfer_with_fee(Pubkey::new_unique(), 50_000).await })
    };
    let mint = {
        let sequencer = sequencer.clone();
        tokio::spawn(async move { sequencer.mint_tokens(50_000).await })
    };

    let (transfer, mint) = (transfer.await.unwrap(), mint.await.unwrap());
    assert!(transfer.is_ok());
    assert!(mint.is_ok());

    let payer_account = sequencer.associated_address(&payer).unwrap();
    match sequencer.inspect_account(payer_account).await.unwrap() {
        ActionDetail::Inspected { state, .. } => assert_eq!(state.amount, 1_000_000),
        other => panic!("Expected Inspected, got {:?}", other),
    }
    assert!(sequencer.tracker().account_for(&payer).is_some());
}

#[tokio::test]
async fn test_failure_in_one_action_does_not_affect_another() {
    let (sequencer, _) = funded_sequencer().await;
    let recipient = Pubkey::new_unique();

    let (ok, overdraw) = futures::join!(
        sequencer.transfer_with_fee(recipient, 10_000),
        sequencer.transfer_with_fee(Pubkey::new_unique(), 5_000_000),
    );
    assert!(ok.is_ok());
    assert!(overdraw.is_err());

    let record = sequencer.tracker().require_account(&recipient).unwrap();
    assert_eq!(record.balance, Some(9_900));
    assert_eq!(sequencer.tracker().snapshot().accounts.len(), 2);
}
