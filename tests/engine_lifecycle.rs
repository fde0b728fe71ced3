//! End-to-end wagering lifecycle tests through the service layer.
//! Validates placement, oracle settlement, expiry refunds, payout delivery
//! and that the escrow books stay balanced throughout.

use croupier::errors::ProtocolError;
use croupier::feeds::{FeeConverter, LinearFeeEstimator, StaticRateFeed};
use croupier::oracle::SequentialEntropySource;
use croupier::service::RecordingSink;
use croupier::{
    derive_outcome, CasinoConfig, CasinoService, EngineError, GameKind, ManualContext, PayoutKind,
    PlacedWager, Selection, ServiceWorkers, WagerEngine, WagerRequest, WagerStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn build_service(bankroll: u64) -> (CasinoService, Arc<ManualContext>) {
    let config = CasinoConfig::integration_test();
    let converter = FeeConverter::new(
        Arc::new(StaticRateFeed::new(1_000_000_000, 9)),
        None,
        Arc::new(LinearFeeEstimator { overhead_gas: 0 }),
        config.timing.recovery_grace_period_secs,
    );
    let mut engine =
        WagerEngine::new(config, converter, Arc::new(SequentialEntropySource::new()));
    engine
        .deposit_bankroll(bankroll)
        .expect("failed to seed bankroll");

    let context = Arc::new(ManualContext::new(1_000, 1));
    let service = CasinoService::new(engine, context.clone());
    (service, context)
}

fn coin_flip(stake: u64) -> WagerRequest {
    WagerRequest {
        player: "itest".to_string(),
        kind: GameKind::CoinFlip,
        selection: Selection::Mask(0b01),
        stake,
        attached: stake,
    }
}

/// First-byte search for an oracle value that settles the wager the wanted
/// way.
async fn entropy_for(service: &CasinoService, receipt: &PlacedWager, want_win: bool) -> [u8; 32] {
    let engine = service.engine();
    let engine = engine.lock().await;
    let wager = engine.wager(receipt.wager_id).expect("wager missing");
    for byte in 0u8..=255 {
        let mut value = [0u8; 32];
        value[0] = byte;
        let outcome = derive_outcome(&value, &wager.salt, wager.kind.modulo());
        if wager.selection.wins(outcome) == want_win {
            return value;
        }
    }
    panic!("no entropy value found in first-byte search");
}

#[tokio::test]
async fn test_settlement_round_trip() {
    let (service, context) = build_service(1_000_000);

    // === PHASE 1: placement locks the reservation ===
    let receipt = service
        .place_wager(&coin_flip(10_000))
        .await
        .expect("placement failed");
    assert_eq!(receipt.reserved_payout, 19_600);
    {
        let engine = service.engine();
        let engine = engine.lock().await;
        assert_eq!(engine.escrow().total(), 1_010_000);
        assert_eq!(engine.escrow().locked(), 19_600);
        assert!(engine
            .wager(receipt.wager_id)
            .expect("wager missing")
            .is_awaiting());
    }

    // === PHASE 2: the oracle answers with a winning value ===
    let value = entropy_for(&service, &receipt, true).await;
    context.advance_time(1);
    context.advance_marker(1);
    let record = service
        .fulfill(receipt.request_token, value)
        .await
        .expect("fulfillment failed");
    assert!(record.win);
    assert_eq!(record.payout, 19_600);

    // Waiting after the fact returns the same settlement from the store.
    let waited = service
        .wait_for_settlement(receipt.wager_id, Duration::from_millis(10))
        .await
        .expect("settled record not available");
    assert_eq!(waited.outcome, record.outcome);
    assert_eq!(waited.payout, record.payout);

    // Anyone can recompute the result from stored facts.
    {
        let engine = service.engine();
        let engine = engine.lock().await;
        assert!(engine
            .verify_settlement(&record)
            .expect("verification errored"));
    }

    // === PHASE 3: the win leaves through the payout ledger ===
    let sink = RecordingSink::new();
    assert_eq!(service.drain_payouts_once(&sink).await, 1);
    let delivered = sink.delivered();
    assert_eq!(delivered[0].amount, 19_600);
    assert_eq!(delivered[0].kind, PayoutKind::Win);

    assert!(service.audit().await);
    assert_eq!(service.total_payouts_owed().await, 0);

    let stats = service.stats().await;
    assert_eq!(stats.bet_count, 1);
    assert_eq!(stats.win_count, 1);
    assert_eq!(stats.total_paid_out, 19_600);
}

#[tokio::test]
async fn test_expiry_refund_round_trip() {
    let (service, context) = build_service(1_000_000);
    let receipt = service
        .place_wager(&coin_flip(25_000))
        .await
        .expect("placement failed");

    // === PHASE 1: too early for a refund ===
    context.advance_time(1);
    let err = service.refund_wager(receipt.wager_id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Protocol(ProtocolError::CooldownActive { .. })
    ));

    // === PHASE 2: cooldown elapsed, the sweep refunds the wager ===
    context.advance_time(2);
    assert_eq!(service.sweep_expired().await, 1);
    {
        let engine = service.engine();
        let engine = engine.lock().await;
        let wager = engine.wager(receipt.wager_id).expect("wager missing");
        assert_eq!(wager.status, WagerStatus::Refunded);
        assert_eq!(engine.escrow().total(), 1_000_000);
        assert_eq!(engine.escrow().locked(), 0);
    }

    // A very late oracle callback cannot reopen the wager.
    let value = entropy_for(&service, &receipt, true).await;
    context.advance_marker(1);
    let err = service
        .fulfill(receipt.request_token, value)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Protocol(ProtocolError::AlreadyFinalized { .. })
    ));

    // === PHASE 3: the stake comes back through the payout ledger ===
    let sink = RecordingSink::new();
    assert_eq!(service.drain_payouts_once(&sink).await, 1);
    let delivered = sink.delivered();
    assert_eq!(delivered[0].kind, PayoutKind::Refund);
    assert_eq!(delivered[0].amount, 25_000);
    assert!(service.audit().await);
}

#[tokio::test]
async fn test_concurrent_players_keep_books_balanced() {
    let (service, context) = build_service(10_000_000);

    // === PHASE 1: four players place concurrently ===
    let mut handles = Vec::new();
    for player in 0..4u64 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let mut receipts = Vec::new();
            for i in 0..5u64 {
                let mut request = coin_flip(10_000 + player * 1_000 + i);
                request.player = format!("player_{}", player);
                let receipt = service
                    .place_wager(&request)
                    .await
                    .expect("placement failed");
                receipts.push(receipt);
            }
            receipts
        }));
    }

    let mut receipts = Vec::new();
    for handle in handles {
        receipts.extend(handle.await.expect("placement task panicked"));
    }
    assert_eq!(receipts.len(), 20);
    let total_staked: u128 = receipts.iter().map(|r| r.stake as u128).sum();

    // === PHASE 2: the oracle answers every request ===
    context.advance_time(1);
    context.advance_marker(1);
    let mut paid: u128 = 0;
    let mut wins = 0usize;
    for (i, receipt) in receipts.iter().enumerate() {
        let mut value = [0u8; 32];
        value[0] = i as u8;
        value[1] = 0xAB;
        let record = service
            .fulfill(receipt.request_token, value)
            .await
            .expect("fulfillment failed");
        paid += record.payout as u128;
        if record.win {
            wins += 1;
        }
    }

    // === PHASE 3: every unit is accounted for ===
    let stats = service.stats().await;
    assert_eq!(stats.bet_count, 20);
    assert_eq!(stats.win_count, wins as u64);
    assert_eq!(stats.total_wagered, total_staked);
    assert_eq!(stats.total_paid_out, paid);

    {
        let engine = service.engine();
        let engine = engine.lock().await;
        let expected_total = 10_000_000u128 + total_staked - paid;
        assert_eq!(engine.escrow().total() as u128, expected_total);
        assert_eq!(engine.escrow().locked(), 0);
        assert!(engine.audit());
    }

    // Wins stay owed through the ledger until delivered.
    assert_eq!(service.total_payouts_owed().await, paid);
    let sink = RecordingSink::new();
    assert_eq!(service.drain_payouts_once(&sink).await, wins);
    assert_eq!(service.total_payouts_owed().await, 0);
}

#[tokio::test]
async fn test_background_workers_recover_stuck_wagers() {
    let (service, context) = build_service(5_000_000);
    let sink = Arc::new(RecordingSink::new());
    let workers = ServiceWorkers::spawn(service.clone(), sink.clone());

    // === PHASE 1: two wagers, only one gets its randomness ===
    let lucky = service
        .place_wager(&coin_flip(10_000))
        .await
        .expect("placement failed");
    let stuck = service
        .place_wager(&coin_flip(20_000))
        .await
        .expect("placement failed");

    let value = entropy_for(&service, &lucky, true).await;
    context.advance_time(1);
    context.advance_marker(1);
    let record = service
        .fulfill(lucky.request_token, value)
        .await
        .expect("fulfillment failed");

    // === PHASE 2: expiry passes; the workers refund and deliver ===
    context.advance_time(5);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sink.delivered().len() < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "workers did not deliver in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    workers.stop();

    let delivered = sink.delivered();
    let win = delivered
        .iter()
        .find(|p| p.kind == PayoutKind::Win)
        .expect("win not delivered");
    let refund = delivered
        .iter()
        .find(|p| p.kind == PayoutKind::Refund)
        .expect("refund not delivered");
    assert_eq!(win.amount, record.payout);
    assert_eq!(win.wager_id, lucky.wager_id);
    assert_eq!(refund.amount, 20_000);
    assert_eq!(refund.wager_id, stuck.wager_id);

    {
        let engine = service.engine();
        let engine = engine.lock().await;
        assert_eq!(
            engine
                .wager(stuck.wager_id)
                .expect("wager missing")
                .status,
            WagerStatus::Refunded
        );
        assert!(engine.audit());
    }
    assert_eq!(service.total_payouts_owed().await, 0);
}

#[tokio::test]
async fn test_hashroll_threshold_settlement() {
    let (service, context) = build_service(5_000_000);

    let request = WagerRequest {
        player: "itest".to_string(),
        kind: GameKind::HashRoll,
        selection: Selection::Threshold {
            value: 30,
            over: true,
        },
        stake: 100_000,
        attached: 100_000,
    };
    let receipt = service
        .place_wager(&request)
        .await
        .expect("placement failed");
    // 1% edge on hashroll; 69 of 100 outcomes win: floor(99_000 * 100 / 69).
    assert_eq!(receipt.reserved_payout, 143_478);

    let waiter = {
        let service = service.clone();
        let wager_id = receipt.wager_id;
        tokio::spawn(async move {
            service
                .wait_for_settlement(wager_id, Duration::from_secs(5))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let value = entropy_for(&service, &receipt, true).await;
    context.advance_time(1);
    context.advance_marker(1);
    let record = service
        .fulfill(receipt.request_token, value)
        .await
        .expect("fulfillment failed");
    assert!(record.outcome > 30);

    let waited = waiter.await.expect("waiter panicked").expect("waiter failed");
    assert_eq!(waited.payout, 143_478);
    assert_eq!(waited.outcome, record.outcome);
    assert!(service.audit().await);
}
