use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use zapvoice::{
    app::{AppStateBuilder, create_router},
    billing::payment::{GatewayOrder, PaymentGateway, payment_signature},
    config::Config,
    provider::{AgentSpec, OutboundCallRequest, OutboundCallResponse, VoiceProvider},
    webhook::{SIGNATURE_HEADER, signature::sign},
};

const WEBHOOK_SECRET: &str = "whsec_test";
const GATEWAY_SECRET: &str = "rzp_secret";

#[derive(Default)]
struct FakeProvider {
    calls: Mutex<Vec<OutboundCallRequest>>,
}

#[async_trait]
impl VoiceProvider for FakeProvider {
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String> {
        Ok(format!("el_{}", spec.name.to_lowercase().replace(' ', "_")))
    }

    async fn update_agent(&self, _provider_agent_id: &str, _spec: &AgentSpec) -> Result<()> {
        Ok(())
    }

    async fn delete_agent(&self, _provider_agent_id: &str) -> Result<()> {
        Ok(())
    }

    async fn place_call(&self, request: &OutboundCallRequest) -> Result<OutboundCallResponse> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(request.clone());
        Ok(OutboundCallResponse {
            conversation_id: Some(format!("conv_{}", calls.len())),
            call_sid: Some(format!("CA{:04}", calls.len())),
            message: None,
        })
    }
}

struct FakeGateway;

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn key_id(&self) -> &str {
        "rzp_test_key"
    }

    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        Ok(GatewayOrder {
            id: format!("order_{}", receipt.len()),
            amount: amount_minor,
            currency: currency.to_string(),
            status: "created".to_string(),
        })
    }

    fn verify_payment_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        payment_signature(GATEWAY_SECRET, order_id, payment_id).as_deref() == Some(signature)
    }
}

async fn test_app() -> (Router, Arc<FakeProvider>) {
    test_app_with_webhook_secret(WEBHOOK_SECRET).await
}

async fn test_app_with_webhook_secret(webhook_secret: &str) -> (Router, Arc<FakeProvider>) {
    let mut config = Config::default();
    config.database_url = "sqlite::memory:".to_string();
    config.session_secret = "integration-secret".to_string();
    config.provider.webhook_secret = webhook_secret.to_string();

    let db = zapvoice::models::create_db(&config.database_url)
        .await
        .unwrap();
    let provider = Arc::new(FakeProvider::default());
    let state = AppStateBuilder::new()
        .with_config(config)
        .with_database(db)
        .with_provider(provider.clone())
        .with_gateway(Arc::new(FakeGateway))
        .build()
        .await
        .unwrap();
    (create_router(state), provider)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn send_text(
    app: &Router,
    method: &str,
    uri: &str,
    token: &str,
    body: &str,
) -> (StatusCode, Option<String>, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn register(app: &Router, username: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "email": format!("{}@example.com", username),
            "username": username,
            "password": "correct-horse",
            "company": "Acme"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
    body["token"].as_str().unwrap().to_string()
}

async fn create_agent(app: &Router, token: &str) -> i64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/agents",
        Some(token),
        Some(json!({
            "name": "Sales Bot",
            "language": "en",
            "first_message": "Hi, this is Acme calling.",
            "phone_number_id": "phnum_1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "agent create failed: {}", body);
    assert_eq!(body["provider_agent_id"], "el_sales_bot");
    body["id"].as_i64().unwrap()
}

fn signed_webhook(body: &Value, secret: &str) -> Request<Body> {
    signed_webhook_at(body, secret, chrono::Utc::now().timestamp())
}

fn signed_webhook_at(body: &Value, secret: &str, timestamp: i64) -> Request<Body> {
    let raw = body.to_string();
    let signature = sign(secret, timestamp, raw.as_bytes());
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/voice")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
        .unwrap()
}

#[tokio::test]
async fn test_health_and_auth_required() {
    let (app, _) = test_app().await;

    let (status, body) = send(&app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, "GET", "/api/agents", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authentication required");

    let (status, _) = send(&app, "GET", "/api/auth/me", Some("1:1:bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_login_and_duplicates() {
    let (app, _) = test_app().await;
    let token = register(&app, "alice").await;

    let (status, me) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "alice");
    assert_eq!(me["plan"], "trial");
    assert!(me.get("password_hash").is_none());

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "email": "alice@example.com",
            "username": "alice2",
            "password": "correct-horse"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"identifier": "alice", "password": "wrong-password"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"identifier": "ALICE@example.com", "password": "correct-horse"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn test_campaign_flow_with_webhook_reconciliation() {
    let (app, provider) = test_app().await;
    let token = register(&app, "bob").await;
    let agent_id = create_agent(&app, &token).await;

    let (status, agents) = send(&app, "GET", "/api/agents", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agents["items"].as_array().unwrap().len(), 1);

    // Trial accounts hold a single agent.
    let (status, _) = send(
        &app,
        "POST",
        "/api/agents",
        Some(&token),
        Some(json!({"name": "Second", "phone_number_id": "phnum_2"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, campaign) = send(
        &app,
        "POST",
        "/api/campaigns",
        Some(&token),
        Some(json!({"name": "October leads", "agent_id": agent_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(campaign["status"], "draft");
    let campaign_id = campaign["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/campaigns/{}/start", campaign_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, report) = send(
        &app,
        "POST",
        &format!("/api/campaigns/{}/contacts", campaign_id),
        Some(&token),
        Some(json!([
            {"name": "Asha", "phone_number": "98765 43210"},
            {"name": "Ravi", "phone": "+91 98765 43211"},
            {"name": "Dup", "phone_number": "9876543210"},
            {"name": "Bad", "phone_number": "12"}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["imported"], 2);
    assert_eq!(report["rejected"].as_array().unwrap().len(), 2);
    assert_eq!(report["total_contacts"], 2);

    let (status, started) = send(
        &app,
        "POST",
        &format!("/api/campaigns/{}/start", campaign_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", started);
    assert_eq!(started["campaign"]["status"], "in_progress");
    assert_eq!(started["batch"]["placed"], 1);
    assert_eq!(provider.calls.lock().unwrap()[0].to_number, "+919876543210");

    // Contacts are frozen while the campaign runs.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/campaigns/{}/contacts", campaign_id),
        Some(&token),
        Some(json!([{"name": "Late", "phone_number": "9876543299"}])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, calls) = send(&app, "GET", "/api/calls", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(calls["total_items"], 1);
    assert_eq!(calls["items"][0]["status"], "initiated");
    assert_eq!(calls["items"][0]["conversation_id"], "conv_1");

    let event = json!({
        "type": "post_call_transcription",
        "data": {
            "agent_id": "el_sales_bot",
            "conversation_id": "conv_1",
            "status": "done",
            "transcript": [{"role": "agent", "message": "Hi"}],
            "metadata": {"call_duration_secs": 95},
            "analysis": {"transcript_summary": "Asked for pricing."}
        }
    });

    let forged = signed_webhook(&event, "not-the-secret");
    let response = app.clone().oneshot(forged).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(signed_webhook(&event, WEBHOOK_SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let outcome: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(outcome["result"], "reconciled");
    assert_eq!(outcome["status"], "completed");
    assert_eq!(outcome["billable_secs"], 120);

    // Redelivery must not bill twice.
    let response = app
        .clone()
        .oneshot(signed_webhook(&event, WEBHOOK_SECRET))
        .await
        .unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let outcome: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(outcome["result"], "duplicate");

    let (status, usage) = send(&app, "GET", "/api/usage", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage["minutes_used"], 2.0);
    assert_eq!(usage["minutes_included"], 10);

    let (status, detail) = send(
        &app,
        "GET",
        &format!("/api/campaigns/{}", campaign_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["campaign"]["completed_calls"], 1);
    assert_eq!(detail["in_flight_calls"], 0);
    assert_eq!(detail["pending_contacts"], 1);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let (app, _) = test_app().await;
    let owner = register(&app, "carol").await;
    let other = register(&app, "dave").await;
    let agent_id = create_agent(&app, &owner).await;

    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/agents/{}", agent_id),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        "/api/campaigns",
        Some(&other),
        Some(json!({"name": "Stolen agent", "agent_id": agent_id})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        "/api/calls/outbound",
        Some(&other),
        Some(json!({"agent_id": agent_id, "to_number": "9876543210"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wallet_topup_order_and_verification() {
    let (app, _) = test_app().await;
    let token = register(&app, "erin").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/billing/orders",
        Some(&token),
        Some(json!({"kind": "topup", "amount": 0.5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, order) = send(
        &app,
        "POST",
        "/api/billing/orders",
        Some(&token),
        Some(json!({"kind": "topup", "amount": 500})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["key_id"], "rzp_test_key");
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        "/api/billing/verify",
        Some(&token),
        Some(json!({
            "razorpay_order_id": order_id,
            "razorpay_payment_id": "pay_1",
            "razorpay_signature": "00ff"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let signature = payment_signature(GATEWAY_SECRET, &order_id, "pay_1").unwrap();
    let (status, txn) = send(
        &app,
        "POST",
        "/api/billing/verify",
        Some(&token),
        Some(json!({
            "order_id": order_id,
            "payment_id": "pay_1",
            "signature": signature
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(txn["status"], "completed");

    let (_, usage) = send(&app, "GET", "/api/usage", Some(&token), None).await;
    assert_eq!(usage["wallet_balance"], 500.0);

    let (status, history) =
        send(&app, "GET", "/api/billing/transactions", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_support_ticket_conversation() {
    let (app, _) = test_app().await;
    let token = register(&app, "frank").await;
    let other = register(&app, "grace").await;

    let (status, ticket) = send(
        &app,
        "POST",
        "/api/tickets",
        Some(&token),
        Some(json!({
            "subject": "Calls stuck in initiated",
            "priority": "high",
            "message": "Our campaign shows no progress."
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ticket["status"], "open");
    let ticket_id = ticket["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/tickets/{}", ticket_id),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, thread) = send(
        &app,
        "POST",
        &format!("/api/tickets/{}/messages", ticket_id),
        Some(&token),
        Some(json!({"body": "Any update?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thread["messages"].as_array().unwrap().len(), 2);

    // Status changes are reserved for support staff.
    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/api/tickets/{}", ticket_id),
        Some(&token),
        Some(json!({"status": "closed"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, list) = send(&app, "GET", "/api/tickets", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total_items"], 1);
}

#[tokio::test]
async fn test_agent_delete_waits_for_calls_and_keeps_history() {
    let (app, _) = test_app().await;
    let token = register(&app, "heidi").await;
    let agent_id = create_agent(&app, &token).await;

    let (status, call) = send(
        &app,
        "POST",
        "/api/calls/outbound",
        Some(&token),
        Some(json!({"agent_id": agent_id, "to_number": "9876543210"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "outbound failed: {}", call);
    let call_id = call["id"].as_i64().unwrap();

    let agent_uri = format!("/api/agents/{}", agent_id);
    let (status, _) = send(&app, "DELETE", &agent_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let event = json!({
        "type": "post_call_transcription",
        "data": {
            "agent_id": "el_sales_bot",
            "conversation_id": "conv_1",
            "status": "done",
            "transcript": [{"role": "agent", "message": "Hi"}],
            "metadata": {"call_duration_secs": 30}
        }
    });
    let response = app
        .clone()
        .oneshot(signed_webhook(&event, WEBHOOK_SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = send(&app, "DELETE", &agent_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "archived");

    let (status, agent) = send(&app, "GET", &agent_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agent["is_active"], false);
    assert!(agent["provider_agent_id"].is_null());
    let (status, _) = send(
        &app,
        "PATCH",
        &agent_uri,
        Some(&token),
        Some(json!({"is_active": true})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, call) = send(
        &app,
        "GET",
        &format!("/api/calls/{}", call_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(call["status"], "completed");
    assert_eq!(call["billable_secs"], 60);

    // The archived agent no longer counts against the plan.
    let (status, fresh) = send(
        &app,
        "POST",
        "/api/agents",
        Some(&token),
        Some(json!({"name": "Fresh", "phone_number_id": "phnum_2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let fresh_uri = format!("/api/agents/{}", fresh["id"]);
    let (status, body) = send(&app, "DELETE", &fresh_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "deleted");
    let (status, _) = send(&app, "GET", &fresh_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn transcription_event(conversation_id: &str, duration: i64) -> Value {
    json!({
        "type": "post_call_transcription",
        "data": {
            "agent_id": "el_sales_bot",
            "conversation_id": conversation_id,
            "status": "done",
            "transcript": [{"role": "agent", "message": "Hi"}],
            "metadata": {"call_duration_secs": duration}
        }
    })
}

#[tokio::test]
async fn test_webhook_unavailable_without_secret() {
    let (app, _) = test_app_with_webhook_secret("").await;
    let response = app
        .clone()
        .oneshot(signed_webhook(&transcription_event("conv_1", 30), WEBHOOK_SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_webhook_rejects_stale_timestamp() {
    let (app, _) = test_app().await;
    let event = transcription_event("conv_1", 30);
    let hour_ago = chrono::Utc::now().timestamp() - 3_600;
    let response = app
        .clone()
        .oneshot(signed_webhook_at(&event, WEBHOOK_SECRET, hour_ago))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["message"].as_str().unwrap().contains("window"));

    // The same body signed now is accepted and merely unknown.
    let response = app
        .clone()
        .oneshot(signed_webhook(&event, WEBHOOK_SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_csv_import_and_export() {
    let (app, _) = test_app().await;
    let token = register(&app, "ivan").await;
    let agent_id = create_agent(&app, &token).await;
    let (_, campaign) = send(
        &app,
        "POST",
        "/api/campaigns",
        Some(&token),
        Some(json!({"name": "CSV leads", "agent_id": agent_id})),
    )
    .await;
    let campaign_id = campaign["id"].as_i64().unwrap();
    let export_uri = format!("/api/campaigns/{}/export", campaign_id);

    let (status, content_type, csv) = send_text(&app, "GET", &export_uri, &token, "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/csv; charset=utf-8"));
    assert_eq!(
        csv,
        "name,phone_number,email,contact_status,call_status,duration_secs,outcome,summary\n"
    );

    let upload = "Name,Phone,Email,City\n\
        Asha,98765 43210,asha@example.com,Pune\n\
        Bad,12,,\n\
        Ravi,+91 98765 43211,,Delhi\n";
    let import_uri = format!("/api/campaigns/{}/contacts/import", campaign_id);
    let (status, _, report) = send_text(&app, "POST", &import_uri, &token, upload).await;
    assert_eq!(status, StatusCode::OK, "import failed: {}", report);
    let report: Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["imported"], 2);
    assert_eq!(report["rejected"].as_array().unwrap().len(), 1);
    assert_eq!(report["total_contacts"], 2);

    let (status, _, body) =
        send_text(&app, "POST", &import_uri, &token, "name,city\nAsha,Pune\n").await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "unexpected: {}", body);

    let (status, started) = send(
        &app,
        "POST",
        &format!("/api/campaigns/{}/start", campaign_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", started);
    let response = app
        .clone()
        .oneshot(signed_webhook(&transcription_event("conv_1", 95), WEBHOOK_SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _, csv) = send_text(&app, "GET", &export_uri, &token, "").await;
    assert_eq!(status, StatusCode::OK);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    let asha = lines.iter().find(|l| l.contains("+919876543210")).unwrap();
    assert!(asha.starts_with("Asha,+919876543210,asha@example.com,completed,completed,95,"));
    let ravi = lines.iter().find(|l| l.contains("+919876543211")).unwrap();
    assert!(ravi.contains(",pending,,"));

    // Other tenants cannot export the campaign.
    let other = register(&app, "judy").await;
    let (status, _, _) = send_text(&app, "GET", &export_uri, &other, "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plan_purchase_switches_plan() {
    let (app, _) = test_app().await;
    let token = register(&app, "kim").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/billing/orders",
        Some(&token),
        Some(json!({"kind": "plan", "plan": "platinum"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, order) = send(
        &app,
        "POST",
        "/api/billing/orders",
        Some(&token),
        Some(json!({"kind": "plan", "plan": "starter"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "order failed: {}", order);
    assert_eq!(order["kind"], "plan_purchase");
    let order_id = order["order_id"].as_str().unwrap().to_string();

    let signature = payment_signature(GATEWAY_SECRET, &order_id, "pay_plan").unwrap();
    let verify = json!({
        "order_id": order_id,
        "payment_id": "pay_plan",
        "signature": signature
    });
    let (status, txn) = send(
        &app,
        "POST",
        "/api/billing/verify",
        Some(&token),
        Some(verify.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(txn["status"], "completed");

    let (_, me) = send(&app, "GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(me["plan"], "starter");
    let (_, usage) = send(&app, "GET", "/api/usage", Some(&token), None).await;
    assert_eq!(usage["minutes_used"], 0.0);
    assert_eq!(usage["minutes_included"], 500);

    let (status, again) = send(
        &app,
        "POST",
        "/api/billing/verify",
        Some(&token),
        Some(verify),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], txn["id"]);
    let (_, history) =
        send(&app, "GET", "/api/billing/transactions", Some(&token), None).await;
    assert_eq!(history["items"].as_array().unwrap().len(), 1);
}
