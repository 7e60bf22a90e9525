use billing_core::application::gateway::{CallbackOutcome, sign_payload};
use billing_core::application::ingestor::IngestOutcome;
use billing_core::application::reconciler::ResolutionFilter;
use billing_core::domain::integration::IntegrationState;
use billing_core::domain::money::Amount;
use billing_core::domain::payment::{GatewayOrderParams, OrderStatus};
use billing_core::domain::principal::Principal;
use billing_core::domain::transaction::TransactionKind;
use billing_core::error::BillingError;
use rust_decimal_macros::dec;

mod common;

fn callback(params: &GatewayOrderParams) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "gateway_order_id": params.gateway_order_id,
        "gateway_payment_id": "pay_123",
        "amount": params.amount,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_free_quota_then_fee() {
    let h = common::harness();
    let tenant = common::tenant(&h.core, "acme", 3, dec!(10)).await;
    let integration = common::active_integration(&h.core, &tenant, "int-1").await;

    for i in 1..=3 {
        let outcome = h
            .core
            .ingestor
            .ingest(common::delivery(&integration, &format!("evt-{i}")))
            .await
            .unwrap();
        match outcome {
            IngestOutcome::Accepted { wallet, transaction, .. } => {
                assert!(transaction.is_free());
                assert_eq!(wallet.balance.value(), dec!(10));
                assert_eq!(wallet.free_quota_remaining, 3 - i);
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    let outcome = h
        .core
        .ingestor
        .ingest(common::delivery(&integration, "evt-4"))
        .await
        .unwrap();
    let IngestOutcome::Accepted { wallet, transaction, .. } = outcome else {
        panic!("fourth event should be charged");
    };
    assert_eq!(transaction.kind, TransactionKind::DebitMetering);
    assert_eq!(transaction.amount.value(), dec!(-2));
    assert_eq!(wallet.balance.value(), dec!(8));
    assert_eq!(wallet.free_quota_remaining, 0);

    let outcome = h
        .core
        .ingestor
        .ingest(common::delivery(&integration, "evt-5"))
        .await
        .unwrap();
    let IngestOutcome::Accepted { wallet, .. } = outcome else {
        panic!("fifth event should be charged");
    };
    assert_eq!(wallet.balance.value(), dec!(6));

    // A redelivery of the fifth event is reported, not charged.
    let outcome = h
        .core
        .ingestor
        .ingest(common::delivery(&integration, "evt-5"))
        .await
        .unwrap();
    assert!(matches!(outcome, IngestOutcome::Duplicate { .. }));

    let wallet = h.core.ledger.verify(&tenant).await.unwrap();
    assert_eq!(wallet.balance.value(), dec!(6));
    assert_eq!(wallet.free_quota_remaining, 0);
    let metered = h
        .core
        .ledger
        .transactions(&tenant)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::DebitMetering)
        .count();
    assert_eq!(metered, 5);
}

#[tokio::test]
async fn test_exhausted_wallet_pauses_until_recharge_and_resume() {
    let h = common::harness();
    let tenant = common::tenant(&h.core, "acme", 0, dec!(1)).await;
    let integration = common::active_integration(&h.core, &tenant, "int-1").await;
    let entries_before = h.core.ledger.transactions(&tenant).await.unwrap().len();

    let outcome = h
        .core
        .ingestor
        .ingest(common::delivery(&integration, "evt-1"))
        .await
        .unwrap();
    match outcome {
        IngestOutcome::InsufficientBalance { integration, wallet, .. } => {
            assert_eq!(integration.state, IntegrationState::Paused);
            assert!(wallet.is_paused);
            assert_eq!(wallet.balance.value(), dec!(1));
        }
        other => panic!("expected insufficient balance, got {other:?}"),
    }
    assert_eq!(
        h.core.ledger.transactions(&tenant).await.unwrap().len(),
        entries_before
    );

    // Paused integrations refuse further deliveries.
    let refused = h
        .core
        .ingestor
        .ingest(common::delivery(&integration, "evt-2"))
        .await;
    assert!(matches!(refused, Err(BillingError::Authentication(_))));

    let owner = Principal::Tenant(tenant.clone());
    assert!(h.core.registry.resume(&owner, &integration).await.is_err());

    let params = h
        .core
        .gateway
        .create_order(&owner, &tenant, Amount::new(dec!(100)).unwrap())
        .await
        .unwrap();
    let body = callback(&params);
    let signature = sign_payload(common::SECRET, &body).unwrap();
    let credited = h.core.gateway.handle_callback(&body, &signature).await.unwrap();
    let CallbackOutcome::Credited { wallet, .. } = credited else {
        panic!("recharge should credit");
    };
    assert_eq!(wallet.balance.value(), dec!(101));
    assert!(!wallet.is_paused);

    // No automatic resume: the integration waits for its owner.
    let still_paused = h.core.registry.get(&integration).await.unwrap();
    assert_eq!(still_paused.state, IntegrationState::Paused);

    h.core.registry.resume(&owner, &integration).await.unwrap();
    let outcome = h
        .core
        .ingestor
        .ingest(common::delivery(&integration, "evt-1"))
        .await
        .unwrap();
    let IngestOutcome::Accepted { wallet, .. } = outcome else {
        panic!("redelivery after recharge should be accepted");
    };
    assert_eq!(wallet.balance.value(), dec!(99));
}

#[tokio::test]
async fn test_tampered_recharge_is_resolved_manually() {
    let h = common::harness();
    let tenant = common::tenant(&h.core, "acme", 0, dec!(0)).await;
    let owner = Principal::Tenant(tenant.clone());

    let params = h
        .core
        .gateway
        .create_order(&owner, &tenant, Amount::new(dec!(500)).unwrap())
        .await
        .unwrap();
    let body = callback(&params);
    let mut signature = sign_payload(common::SECRET, &body).unwrap();
    // Flip the last hex digit.
    let last = if signature.ends_with('0') { "1" } else { "0" };
    signature.replace_range(signature.len() - 1.., last);

    let result = h.core.gateway.handle_callback(&body, &signature).await;
    assert!(matches!(result, Err(BillingError::SignatureVerification { .. })));

    let order = h.core.gateway.order(&owner, params.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    let wallet = h.core.ledger.wallet(&tenant).await.unwrap();
    assert_eq!(wallet.balance.value(), dec!(0));

    let pending = h
        .core
        .reconciler
        .list(&Principal::Admin, ResolutionFilter::Unresolved, 1, 20)
        .await
        .unwrap();
    assert_eq!(pending.total, 1);
    let failed = &pending.items[0];
    assert_eq!(failed.order_id, params.order_id);
    assert_eq!(failed.amount.value(), dec!(500));

    let resolved = h
        .core
        .reconciler
        .resolve(
            &Principal::Admin,
            failed.id,
            Some("customer refunded by bank".to_string()),
        )
        .await
        .unwrap();
    assert!(resolved.resolved);
    assert!(resolved.resolved_at.is_some());
    assert_eq!(resolved.admin_notes.as_deref(), Some("customer refunded by bank"));

    // Resolution never moves money.
    let wallet = h.core.ledger.wallet(&tenant).await.unwrap();
    assert_eq!(wallet.balance.value(), dec!(0));
    assert!(h.core.ledger.transactions(&tenant).await.unwrap().is_empty());
}
