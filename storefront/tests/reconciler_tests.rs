mod test_utils;

use std::error::Error;

use storefront::{
    error::StoreError,
    model::{OrderStatus, PaymentStatus},
    reconciler::WebhookOutcome,
    storage::StoreStorage,
};
use test_utils::*;

#[tokio::test]
async fn test_completion_marks_order_paid() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    let reconciler = reconciler(&storage);

    let body = completion_event(&order.id.to_string(), "pi_123", 2700);
    let outcome = reconciler.handle(&body, Some(&sign(&body))).await?;
    assert_eq!(outcome, WebhookOutcome::Recorded { order_id: order.id });

    let detail = storage
        .get_order_detail(order.id)
        .await?
        .ok_or("order should exist")?;
    assert_eq!(detail.order.status, OrderStatus::Processing);
    let payment = detail.payment.ok_or("payment should be recorded")?;
    assert_eq!(payment.charge_id, "pi_123");
    assert_eq!(payment.amount, dec("27.00"));
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_delivery_records_once() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    let reconciler = reconciler(&storage);

    let body = completion_event(&order.id.to_string(), "pi_dup", 2700);
    let signature = sign(&body);

    let first = reconciler.handle(&body, Some(&signature)).await?;
    let second = reconciler.handle(&body, Some(&signature)).await?;
    assert_eq!(first, WebhookOutcome::Recorded { order_id: order.id });
    assert_eq!(second, WebhookOutcome::Duplicate { order_id: order.id });

    assert_eq!(payment_count(&storage, order.id).await, 1);
    let order = storage.get_order(order.id).await?.ok_or("order")?;
    assert_eq!(order.status, OrderStatus::Processing);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_deliveries_record_once() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    let reconciler = reconciler(&storage);

    let body = completion_event(&order.id.to_string(), "pi_race", 2700);
    let signature = sign(&body);

    let (r1, r2, r3) = tokio::join!(
        reconciler.handle(&body, Some(&signature)),
        reconciler.handle(&body, Some(&signature)),
        reconciler.handle(&body, Some(&signature)),
    );
    let outcomes = [r1?, r2?, r3?];
    let recorded = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, WebhookOutcome::Recorded { .. }))
        .count();
    assert_eq!(recorded, 1);
    assert_eq!(payment_count(&storage, order.id).await, 1);
    Ok(())
}

#[tokio::test]
async fn test_altered_byte_is_rejected() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    let reconciler = reconciler(&storage);

    let body = completion_event(&order.id.to_string(), "pi_123", 2700);
    let signature = sign(&body);
    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] ^= 0x01;

    let err = reconciler
        .handle(&tampered, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidSignature));

    let err = reconciler.handle(&body, None).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidSignature));

    let order = storage.get_order(order.id).await?.ok_or("order")?;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(payment_count(&storage, order.id).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_other_event_types_are_ignored() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    let reconciler = reconciler(&storage);

    let body = event_of_type("charge.failed", &order.id.to_string());
    let outcome = reconciler.handle(&body, Some(&sign(&body))).await?;
    assert_eq!(
        outcome,
        WebhookOutcome::Ignored {
            event_type: "charge.failed".to_string()
        }
    );

    let order = storage.get_order(order.id).await?.ok_or("order")?;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(payment_count(&storage, order.id).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_native_provider_events_are_acknowledged() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    let reconciler = reconciler(&storage);

    let bodies = [
        (
            "charge.failed",
            br#"{"event":"charge.failed","data":{"reference":"ref_1","gateway_response":"Declined"}}"#.to_vec(),
        ),
        (
            "charge.success",
            br#"{"event":"charge.success","data":{"reference":"ref_2","amount":2700,"status":"success"}}"#.to_vec(),
        ),
        ("transfer.success", br#"{"event":"transfer.success"}"#.to_vec()),
        (
            "charge.success",
            br#"{"type":"charge.success","event":"charge.success","data":[1,2,3]}"#.to_vec(),
        ),
    ];
    for (event_type, body) in bodies {
        let outcome = reconciler.handle(&body, Some(&sign(&body))).await?;
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                event_type: event_type.to_string()
            }
        );
    }

    let order = storage.get_order(order.id).await?.ok_or("order")?;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(payment_count(&storage, order.id).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_completion_with_both_type_fields_is_recorded() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    let reconciler = reconciler(&storage);

    let body = format!(
        r#"{{"type":"checkout.session.completed","event":"checkout.session.completed","data":{{"object":{{"client_reference_id":"{}","payment_intent":"pi_both","amount_total":2700}}}}}}"#,
        order.id
    )
    .into_bytes();
    let outcome = reconciler.handle(&body, Some(&sign(&body))).await?;
    assert_eq!(outcome, WebhookOutcome::Recorded { order_id: order.id });
    Ok(())
}

#[tokio::test]
async fn test_completion_without_object_is_invalid() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let reconciler = reconciler(&storage);

    let body = br#"{"type":"checkout.session.completed","data":{"reference":"ref_1"}}"#.to_vec();
    let err = reconciler.handle(&body, Some(&sign(&body))).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPayload(_)));
    Ok(())
}

#[tokio::test]
async fn test_malformed_payloads_are_invalid() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let reconciler = reconciler(&storage);

    let body = b"{not json".to_vec();
    let err = reconciler.handle(&body, Some(&sign(&body))).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPayload(_)));

    let body = br#"{"type":"checkout.session.completed","data":{"object":{"payment_intent":"pi_1"}}}"#.to_vec();
    let err = reconciler.handle(&body, Some(&sign(&body))).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPayload(_)));

    let body = completion_event("not-a-number", "pi_1", 100);
    let err = reconciler.handle(&body, Some(&sign(&body))).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidPayload(_)));
    Ok(())
}

#[tokio::test]
async fn test_unknown_order_is_reported() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let reconciler = reconciler(&storage);

    let body = completion_event("4040", "pi_lost", 1000);
    let err = reconciler.handle(&body, Some(&sign(&body))).await.unwrap_err();
    assert!(matches!(err, StoreError::UnknownOrder(ref reference) if reference == "4040"));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_order_is_not_paid() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    workflow(&storage).cancel(USER, order.id).await?;
    let reconciler = reconciler(&storage);

    let body = completion_event(&order.id.to_string(), "pi_late", 2700);
    let outcome = reconciler.handle(&body, Some(&sign(&body))).await?;
    assert_eq!(outcome, WebhookOutcome::NotPayable { order_id: order.id });

    let order = storage.get_order(order.id).await?.ok_or("order")?;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(payment_count(&storage, order.id).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_amount_falls_back_to_order_total() -> Result<(), Box<dyn Error + Send + Sync>> {
    let storage = setup_storage().await;
    let (order, _, _) = place_scenario_order(&storage).await;
    let reconciler = reconciler(&storage);

    let body = format!(
        r#"{{"type":"checkout.session.completed","data":{{"object":{{"client_reference_id":"{}","payment_intent":"pi_noamt"}}}}}}"#,
        order.id
    )
    .into_bytes();
    reconciler.handle(&body, Some(&sign(&body))).await?;

    let detail = storage
        .get_order_detail(order.id)
        .await?
        .ok_or("order should exist")?;
    assert_eq!(detail.payment.ok_or("payment")?.amount, dec("27.00"));
    Ok(())
}
