//! Integration tests for the billing lifecycle.
//!
//! These tests drive signed Stripe deliveries through the webhook ingress
//! and the HTTP router, backed by the in-memory ledger, Stripe mock and CRM
//! fake:
//! 1. Checkout → subscription → CRM contact/deal → invoice chain
//! 2. Delivery order and duplicate delivery do not change the outcome
//! 3. Per-category secrets and missing prerequisites
//! 4. The is_active invariant under arbitrary status sequences
//! 5. Routing, acknowledgment and authentication over HTTP

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{NaiveDate, Utc};
use proptest::prelude::*;
use serde_json::json;
use tower::ServiceExt;

use copydesk::adapters::http::{api_router, BillingAppState, JwtVerifier, WEBHOOK_ACK};
use copydesk::adapters::hubspot::InMemoryCrm;
use copydesk::adapters::memory::{InMemoryLedgerStore, InMemoryWebhookEventRepository};
use copydesk::adapters::stripe::MockPaymentProvider;
use copydesk::application::{
    CheckoutSettings, CrmSynchronizer, EventApplier, ReconciliationSweeper, WebhookIngress,
    WebhookSecrets,
};
use copydesk::config::{AuthConfig, SweeperConfig};
use copydesk::domain::billing::{
    signature_header, ApplyOutcome, CheckoutCompleted, EventCategory, LifecycleChange,
    LifecycleEvent, StatusChange, SubscriptionChanged, SubscriptionStatus, UpdateKind, User,
    WebhookError, WebhookResult,
};
use copydesk::domain::foundation::{Timestamp, UserId};
use secrecy::SecretString;

// =============================================================================
// Test Infrastructure
// =============================================================================

const SUBSCRIBED_SECRET: &str = "whsec_it_subscribed";
const PAYMENT_SECRET: &str = "whsec_it_payment";
const UPDATED_SECRET: &str = "whsec_it_updated";
const JWT_SECRET: &str = "integration-secret";

struct Harness {
    ledger: Arc<InMemoryLedgerStore>,
    payments: MockPaymentProvider,
    crm: InMemoryCrm,
    events: Arc<InMemoryWebhookEventRepository>,
    sync: Arc<CrmSynchronizer>,
    applier: Arc<EventApplier>,
    ingress: Arc<WebhookIngress>,
}

impl Harness {
    fn new() -> Self {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let payments = MockPaymentProvider::new();
        let crm = InMemoryCrm::new();
        let events = Arc::new(InMemoryWebhookEventRepository::new());
        let sync = Arc::new(CrmSynchronizer::new(Arc::new(crm.clone()), ledger.clone()));
        let applier = Arc::new(EventApplier::new(
            ledger.clone(),
            Arc::new(payments.clone()),
            sync.clone(),
        ));
        let secrets = WebhookSecrets {
            subscribed: SecretString::new(SUBSCRIBED_SECRET.to_string()),
            payment_succeeded: SecretString::new(PAYMENT_SECRET.to_string()),
            updated: SecretString::new(UPDATED_SECRET.to_string()),
        };
        let ingress = Arc::new(WebhookIngress::new(secrets, events.clone(), applier.clone()));

        Self {
            ledger,
            payments,
            crm,
            events,
            sync,
            applier,
            ingress,
        }
    }

    async fn user(&self, email: &str) -> User {
        let user = User::new(email, "Ana López");
        self.ledger.insert_user(user.clone()).await;
        user
    }

    fn stripe_has(&self, status: SubscriptionStatus) {
        let mut subscription = MockPaymentProvider::active_subscription("sub_1", "cus_1");
        subscription.status = status;
        self.payments.add_subscription(subscription);
    }

    async fn deliver(
        &self,
        category: EventCategory,
        secret: &str,
        body: &[u8],
    ) -> Result<WebhookResult, WebhookError> {
        let signature = signature_header(secret, Utc::now().timestamp(), body).unwrap();
        self.ingress.receive(category, body, Some(&signature)).await
    }

    fn router(&self) -> axum::Router {
        let state = BillingAppState {
            ledger: self.ledger.clone(),
            payment_provider: Arc::new(self.payments.clone()),
            ingress: self.ingress.clone(),
            checkout: CheckoutSettings {
                price_id: "price_test".to_string(),
                success_url: "http://localhost:5173/stripe/success".to_string(),
                cancel_url: "http://localhost:5173/stripe/cancel".to_string(),
            },
        };
        let verifier = JwtVerifier::new(&AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
            ..Default::default()
        });
        api_router(state, Arc::new(verifier))
    }
}

fn envelope(event_id: &str, event_type: &str, object: serde_json::Value) -> Vec<u8> {
    json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "livemode": false,
        "data": { "object": object }
    })
    .to_string()
    .into_bytes()
}

fn checkout_completed(event_id: &str, user_id: UserId) -> Vec<u8> {
    envelope(
        event_id,
        "checkout.session.completed",
        json!({
            "id": "cs_1",
            "customer": "cus_1",
            "subscription": "sub_1",
            "mode": "subscription",
            "metadata": { "user_id": user_id.to_string() }
        }),
    )
}

fn subscription_event(event_id: &str, event_type: &str, sub: &str, status: &str) -> Vec<u8> {
    envelope(
        event_id,
        event_type,
        json!({ "id": sub, "customer": "cus_1", "status": status }),
    )
}

fn invoice_paid(event_id: &str, event_type: &str, email: &str, amount: i64) -> Vec<u8> {
    envelope(
        event_id,
        event_type,
        json!({
            "id": "in_1",
            "customer": "cus_1",
            "customer_email": email,
            "subscription": "sub_1",
            "amount_paid": amount,
            "currency": "usd",
            "status_transitions": { "paid_at": Utc::now().timestamp() },
            "lines": { "data": [{
                "id": "il_1",
                "description": "Pro plan",
                "amount": amount,
                "quantity": 1,
                "price": { "id": "price_test", "unit_amount": amount }
            }]}
        }),
    )
}

// =============================================================================
// Lifecycle Scenarios
// =============================================================================

#[tokio::test]
async fn checkout_then_payment_builds_the_crm_chain() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;
    h.stripe_has(SubscriptionStatus::Active);

    let subscribed = h
        .deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &checkout_completed("evt_c1", user.id))
        .await
        .unwrap();
    let paid = h
        .deliver(
            EventCategory::PaymentSucceeded,
            PAYMENT_SECRET,
            &invoice_paid("evt_d1", "invoice.payment_succeeded", "ana@example.com", 4900),
        )
        .await
        .unwrap();

    assert_eq!(subscribed, WebhookResult::Processed(ApplyOutcome::SubscriptionCreated));
    assert_eq!(paid, WebhookResult::Processed(ApplyOutcome::InvoiceRecorded));

    let subscriptions = h.ledger.subscriptions().await;
    assert_eq!(subscriptions.len(), 1);
    assert!(subscriptions[0].is_active());

    let stored = h.ledger.user(&user.id).await.unwrap();
    let contact = stored.billing.crm_contact_id.clone().unwrap();
    let deal = stored.billing.crm_deal_id.clone().unwrap();
    assert_eq!(h.crm.contact_count(), 1);
    assert_eq!(h.crm.deal_count(), 1);
    assert_eq!(h.crm.deal(&deal).unwrap().stage.as_deref(), Some("contractsent"));

    let invoices = h.crm.invoices();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].properties.amount, 49.0);
    assert_eq!(invoices[0].contact, contact);
    assert_eq!(invoices[0].deal, deal);
    assert_eq!(h.crm.line_items().len(), 1);
    assert_eq!(h.crm.payments().len(), 1);
    assert!(stored.billing.crm_invoice_id.is_some());
}

#[tokio::test]
async fn invoice_paid_after_payment_succeeded_is_not_recorded_twice() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;
    h.stripe_has(SubscriptionStatus::Active);
    h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &checkout_completed("evt_c1", user.id))
        .await
        .unwrap();

    h.deliver(
        EventCategory::PaymentSucceeded,
        PAYMENT_SECRET,
        &invoice_paid("evt_d1", "invoice.payment_succeeded", "ana@example.com", 4900),
    )
    .await
    .unwrap();
    let second = h
        .deliver(
            EventCategory::PaymentSucceeded,
            PAYMENT_SECRET,
            &invoice_paid("evt_d2", "invoice.paid", "ana@example.com", 4900),
        )
        .await
        .unwrap();

    assert_eq!(second, WebhookResult::Processed(ApplyOutcome::DuplicateDelivery));
    assert_eq!(h.crm.invoices().len(), 1);
}

#[tokio::test]
async fn delivery_order_does_not_change_the_final_state() {
    async fn run(update_first: bool) -> (SubscriptionStatus, bool, Option<SubscriptionStatus>) {
        let h = Harness::new();
        let user = h.user("ana@example.com").await;
        h.stripe_has(SubscriptionStatus::PastDue);
        let subscribed = checkout_completed("evt_a", user.id);
        let updated =
            subscription_event("evt_b", "customer.subscription.updated", "sub_1", "past_due");

        if update_first {
            h.deliver(EventCategory::Updated, UPDATED_SECRET, &updated).await.unwrap();
            h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &subscribed).await.unwrap();
        } else {
            h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &subscribed).await.unwrap();
            h.deliver(EventCategory::Updated, UPDATED_SECRET, &updated).await.unwrap();
        }

        let subscriptions = h.ledger.subscriptions().await;
        assert_eq!(subscriptions.len(), 1);
        let stored = h.ledger.user(&user.id).await.unwrap();
        (
            subscriptions[0].status(),
            subscriptions[0].is_active(),
            stored.billing.lifecycle_status,
        )
    }

    let in_order = run(false).await;
    let reversed = run(true).await;

    assert_eq!(in_order, reversed);
    assert_eq!(in_order, (SubscriptionStatus::PastDue, false, Some(SubscriptionStatus::PastDue)));
}

#[tokio::test]
async fn duplicate_subscribed_under_new_event_id_creates_nothing_new() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;
    h.stripe_has(SubscriptionStatus::Active);

    h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &checkout_completed("evt_1", user.id))
        .await
        .unwrap();
    let deals_after_first = h.crm.deal_count();
    let second = h
        .deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &checkout_completed("evt_2", user.id))
        .await
        .unwrap();

    assert_eq!(second, WebhookResult::Processed(ApplyOutcome::DuplicateDelivery));
    assert_eq!(h.ledger.subscriptions().await.len(), 1);
    assert_eq!(h.crm.deal_count(), deals_after_first);
}

#[tokio::test]
async fn same_event_id_is_processed_once() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;
    h.stripe_has(SubscriptionStatus::Active);
    let body = checkout_completed("evt_same", user.id);

    h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &body).await.unwrap();
    let second = h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &body).await.unwrap();

    assert_eq!(second, WebhookResult::AlreadyProcessed);
    assert_eq!(h.payments.calls_to("get_subscription").len(), 1);
}

#[tokio::test]
async fn payment_before_linkage_makes_no_crm_call() {
    let h = Harness::new();
    h.user("ana@example.com").await;

    let result = h
        .deliver(
            EventCategory::PaymentSucceeded,
            PAYMENT_SECRET,
            &invoice_paid("evt_p", "invoice.paid", "ana@example.com", 4900),
        )
        .await
        .unwrap();

    assert_eq!(result, WebhookResult::Processed(ApplyOutcome::LinkageMissing));
    assert!(h.crm.calls().is_empty());
}

#[tokio::test]
async fn deleted_for_unknown_subscription_is_a_no_op() {
    let h = Harness::new();

    let result = h
        .deliver(
            EventCategory::Updated,
            UPDATED_SECRET,
            &subscription_event("evt_del", "customer.subscription.deleted", "sub_ghost", "canceled"),
        )
        .await
        .unwrap();

    assert_eq!(result, WebhookResult::Processed(ApplyOutcome::SubscriptionNotFound));
    assert!(h.ledger.subscriptions().await.is_empty());
}

#[tokio::test]
async fn payload_signed_for_another_category_is_rejected() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;
    h.stripe_has(SubscriptionStatus::Active);
    h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &checkout_completed("evt_1", user.id))
        .await
        .unwrap();

    let err = h
        .deliver(
            EventCategory::Updated,
            SUBSCRIBED_SECRET,
            &subscription_event("evt_2", "customer.subscription.deleted", "sub_1", "canceled"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WebhookError::InvalidSignature));
    assert!(h.ledger.subscriptions().await[0].is_active());
}

#[tokio::test]
async fn sweep_leaves_a_canceled_subscription_closed_lost() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;
    h.stripe_has(SubscriptionStatus::Active);
    h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &checkout_completed("evt_1", user.id))
        .await
        .unwrap();
    h.deliver(
        EventCategory::Updated,
        UPDATED_SECRET,
        &subscription_event("evt_2", "customer.subscription.deleted", "sub_1", "canceled"),
    )
    .await
    .unwrap();
    let deal = h.ledger.user(&user.id).await.unwrap().billing.crm_deal_id.unwrap();
    assert_eq!(h.crm.deal(&deal).unwrap().stage.as_deref(), Some("closedlost"));
    let sweeper = ReconciliationSweeper::new(h.sync.clone(), h.events.clone(), SweeperConfig::default());

    let report = sweeper
        .run_once(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        .await
        .unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.corrected, 0);
    assert_eq!(h.crm.deal(&deal).unwrap().stage.as_deref(), Some("closedlost"));
    assert_eq!(h.ledger.subscriptions().await[0].status(), SubscriptionStatus::Canceled);
}

#[tokio::test]
async fn sweep_does_not_override_the_stage_of_an_active_subscription() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;
    h.stripe_has(SubscriptionStatus::Active);
    h.deliver(EventCategory::Subscribed, SUBSCRIBED_SECRET, &checkout_completed("evt_1", user.id))
        .await
        .unwrap();
    let deal = h.ledger.user(&user.id).await.unwrap().billing.crm_deal_id.unwrap();
    let sweeper = ReconciliationSweeper::new(h.sync.clone(), h.events.clone(), SweeperConfig::default());

    let report = sweeper
        .run_once(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
        .await
        .unwrap();

    // Deals carry no start date until one is entered in the CRM.
    assert_eq!(report.corrected, 0);
    assert_eq!(h.crm.deal(&deal).unwrap().stage.as_deref(), Some("contractsent"));
}

// =============================================================================
// is_active Invariant
// =============================================================================

fn any_status() -> impl Strategy<Value = SubscriptionStatus> {
    prop_oneof![
        Just(SubscriptionStatus::Active),
        Just(SubscriptionStatus::PastDue),
        Just(SubscriptionStatus::Canceled),
        Just(SubscriptionStatus::Incomplete),
        Just(SubscriptionStatus::IncompleteExpired),
        Just(SubscriptionStatus::Unpaid),
    ]
}

fn lifecycle(event_id: String, change: LifecycleChange) -> LifecycleEvent {
    LifecycleEvent {
        event_id,
        occurred_at: Timestamp::now(),
        change,
        raw: json!({}),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn is_active_tracks_status_for_any_update_sequence(
        initial in any_status(),
        updates in prop::collection::vec(any_status(), 1..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = Harness::new();
            let user = h.user("ana@example.com").await;
            h.stripe_has(initial);

            h.applier
                .apply(&lifecycle(
                    "evt_sub".to_string(),
                    LifecycleChange::Subscribed(CheckoutCompleted {
                        user_id: user.id,
                        customer_id: "cus_1".to_string(),
                        subscription_id: "sub_1".to_string(),
                        metadata: json!({}),
                    }),
                ))
                .await
                .unwrap();

            for (i, status) in updates.iter().enumerate() {
                h.applier
                    .apply(&lifecycle(
                        format!("evt_{}", i),
                        LifecycleChange::Updated(SubscriptionChanged {
                            kind: UpdateKind::Updated,
                            subscription_id: "sub_1".to_string(),
                            customer_id: "cus_1".to_string(),
                            change: StatusChange::status_only(*status),
                        }),
                    ))
                    .await
                    .unwrap();

                for subscription in h.ledger.subscriptions().await {
                    assert_eq!(
                        subscription.is_active(),
                        subscription.status() == SubscriptionStatus::Active
                    );
                }
            }

            let last = *updates.last().unwrap();
            let subscriptions = h.ledger.subscriptions().await;
            assert_eq!(subscriptions.len(), 1);
            assert_eq!(subscriptions[0].status(), last);
            let stored = h.ledger.user(&user.id).await.unwrap();
            assert_eq!(stored.billing.lifecycle_status, Some(last));
        });
    }
}

// =============================================================================
// HTTP
// =============================================================================

fn bearer(user_id: UserId) -> String {
    let claims = json!({ "sub": user_id.to_string(), "exp": Utc::now().timestamp() + 3600 });
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn webhook_route_acknowledges_and_processes_in_background() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;
    h.stripe_has(SubscriptionStatus::Active);
    let body = checkout_completed("evt_http", user.id);
    let signature = signature_header(SUBSCRIBED_SECRET, Utc::now().timestamp(), &body).unwrap();

    let response = h
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripe/subscribed")
                .header("Stripe-Signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, WEBHOOK_ACK);

    for _ in 0..100 {
        if h.events.record_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.events.record_count().await, 1);
    assert_eq!(h.ledger.subscriptions().await.len(), 1);
}

#[tokio::test]
async fn webhook_route_acknowledges_bad_signatures_without_processing() {
    let h = Harness::new();

    let response = h
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripe/updated")
                .header("Stripe-Signature", "t=1,v1=deadbeef")
                .body(Body::from(subscription_event(
                    "evt_bad",
                    "customer.subscription.updated",
                    "sub_1",
                    "active",
                )))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.events.record_count().await, 0);
}

#[tokio::test]
async fn unknown_webhook_category_is_not_found() {
    let h = Harness::new();

    let response = h
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/stripe/canceled")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subscribe_requires_a_bearer_token() {
    let h = Harness::new();

    let response = h
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/subscriptions/subscribe")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn subscribe_returns_checkout_url() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;

    let response = h
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/subscriptions/subscribe")
                .header("Authorization", bearer(user.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(body["url"].as_str().unwrap().starts_with("https://checkout.stripe.test/"));
}

#[tokio::test]
async fn cancel_without_subscription_is_not_found() {
    let h = Harness::new();
    let user = h.user("ana@example.com").await;

    let response = h
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/subscriptions/cancel")
                .header("Authorization", bearer(user.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_is_ok() {
    let h = Harness::new();

    let response = h
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
