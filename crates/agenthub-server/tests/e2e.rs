//! End-to-end tests for the AgentHub control plane.
//!
//! Each test starts a real server process with a fresh data directory,
//! drives it over HTTP, and asserts on the wire contract: attenuation,
//! cascade revocation, idempotent writes, budget governance and the
//! circuit breaker.
//!
//! Run with:
//!   cargo test -p agenthub-server --test e2e

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

const ACME_KEY: &str = "test-key";
const GLOBEX_KEY: &str = "globex-key";

// ── Server lifecycle ──────────────────────────────────────────────────────────

struct ServerGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_server(test_name: &str) -> (ServerGuard, String) {
    let data_dir = std::env::temp_dir().join(format!(
        "agenthub_e2e_{}_{}",
        test_name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();
    spawn_server_at(data_dir)
}

/// Spawn a server against an existing data directory (restart path).
fn spawn_server_at(data_dir: PathBuf) -> (ServerGuard, String) {
    let port = free_port();
    let base_url = format!("http://127.0.0.1:{port}");

    let bin = env!("CARGO_BIN_EXE_agenthub-server");
    let child = Command::new(bin)
        .args([
            "--data-dir",
            data_dir.to_str().unwrap(),
            "--http-addr",
            &format!("127.0.0.1:{port}"),
        ])
        .env("AGENTHUB_IDENTITY_SECRET", "e2e-identity-secret")
        .env("AGENTHUB_BEARER_SECRET", "e2e-bearer-secret")
        .env("AGENTHUB_POLICY_SECRET", "e2e-policy-secret")
        .env("AGENTHUB_PROVENANCE_SECRET", "e2e-provenance-secret")
        .env(
            "AGENTHUB_API_KEYS",
            r#"{"test-key":"owner-acme","globex-key":"owner-globex"}"#,
        )
        .env(
            "AGENTHUB_FEDERATION_DOMAIN_TOKENS",
            r#"{"partner.example":"fed-gateway-token"}"#,
        )
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn agenthub-server");

    (ServerGuard { child, data_dir }, base_url)
}

/// Poll until the diagnostics endpoint responds or the timeout elapses.
async fn wait_for_ready(client: &reqwest::Client, base_url: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let url = format!("{base_url}/v1/diagnostics/config");
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    false
}

async fn start(test_name: &str) -> (ServerGuard, String, reqwest::Client) {
    let (guard, base_url) = spawn_server(test_name);
    let client = reqwest::Client::new();
    assert!(
        wait_for_ready(&client, &base_url, Duration::from_secs(20)).await,
        "server did not become ready within 20 seconds"
    );
    (guard, base_url, client)
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

async fn post(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    api_key: &str,
    idempotency_key: Option<&str>,
    body: &Value,
) -> (u16, reqwest::header::HeaderMap, Value) {
    let mut request = client
        .post(format!("{base_url}{path}"))
        .header("X-API-Key", api_key)
        .json(body);
    if let Some(key) = idempotency_key {
        request = request.header("Idempotency-Key", key);
    }
    let resp = request.send().await.expect("request failed");
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let value = resp.json().await.unwrap_or(Value::Null);
    (status, headers, value)
}

async fn get(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    api_key: &str,
) -> (u16, Value) {
    let resp = client
        .get(format!("{base_url}{path}"))
        .header("X-API-Key", api_key)
        .send()
        .await
        .expect("request failed");
    let status = resp.status().as_u16();
    let value = resp.json().await.unwrap_or(Value::Null);
    (status, value)
}

fn detail_code(body: &Value) -> &str {
    body["detail"]["code"].as_str().unwrap_or("")
}

async fn register_agent(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    idempotency_key: &str,
) -> String {
    let (status, _, body) = post(
        client,
        base_url,
        "/v1/identity/agents",
        api_key,
        Some(idempotency_key),
        &json!({ "credential_type": "api_key" }),
    )
    .await;
    assert_eq!(status, 201, "agent registration failed: {body}");
    body["agent_id"].as_str().unwrap().to_string()
}

async fn issue_token(
    client: &reqwest::Client,
    base_url: &str,
    issuer: &str,
    subject: &str,
    scopes: &[&str],
    ttl: i64,
    parent: Option<&str>,
    max_budget_usd: Option<f64>,
) -> (u16, Value) {
    let mut body = json!({
        "issuer_agent_id": issuer,
        "subject_agent_id": subject,
        "delegated_scopes": scopes,
        "ttl_seconds": ttl,
    });
    if let Some(parent) = parent {
        body["parent_token_id"] = json!(parent);
    }
    if let Some(max) = max_budget_usd {
        body["max_budget_usd"] = json!(max);
    }
    let (status, _, value) = post(
        client,
        base_url,
        "/v1/identity/delegation-tokens",
        ACME_KEY,
        None,
        &body,
    )
    .await;
    (status, value)
}

// ── S1: attenuation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn attenuation_happy_path_and_widening_rejection() {
    let (_guard, base_url, client) = start("attenuation").await;

    let a = register_agent(&client, &base_url, ACME_KEY, "reg-a").await;
    let b = register_agent(&client, &base_url, ACME_KEY, "reg-b").await;

    // Parent token P: scopes [read, execute], ttl 3600.
    let (status, parent) = issue_token(
        &client, &base_url, &a, &b, &["read", "execute"], 3_600, None, None,
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(parent["chain_depth"], 0);
    let parent_id = parent["token_id"].as_str().unwrap();

    // Child C from P: scopes [read], ttl 600.
    let (status, child) = issue_token(
        &client,
        &base_url,
        &b,
        &b,
        &["read"],
        600,
        Some(parent_id),
        None,
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(child["chain_depth"], 1);

    // verify(C) → valid, effective_scopes = ["read"], chain of 2.
    let (status, _, verified) = post(
        &client,
        &base_url,
        "/v1/identity/delegation-tokens/verify",
        ACME_KEY,
        None,
        &json!({ "signed_token": child["signed_token"] }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(verified["valid"], true);
    assert_eq!(verified["effective_scopes"], json!(["read"]));
    assert_eq!(verified["chain"].as_array().unwrap().len(), 2);

    // Child D attempting [read, execute, admin] → 400 scope_not_attenuated.
    let (status, rejected) = issue_token(
        &client,
        &base_url,
        &b,
        &b,
        &["read", "execute", "admin"],
        600,
        Some(parent_id),
        None,
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(detail_code(&rejected), "identity.scope_not_attenuated");

    // The chain audit endpoint lists the token and its ancestor.
    let child_id = child["token_id"].as_str().unwrap();
    let (status, chain) = get(
        &client,
        &base_url,
        &format!("/v1/identity/delegation-tokens/{child_id}/chain"),
        ACME_KEY,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(chain["chain"].as_array().unwrap().len(), 2);
}

// ── S2: kill switch ───────────────────────────────────────────────────────────

#[tokio::test]
async fn kill_switch_cascades_to_credentials_and_chained_tokens() {
    let (_guard, base_url, client) = start("kill_switch").await;

    let x = register_agent(&client, &base_url, ACME_KEY, "reg-x").await;
    let y = register_agent(&client, &base_url, ACME_KEY, "reg-y").await;
    let z = register_agent(&client, &base_url, ACME_KEY, "reg-z").await;

    // Credential cx for x; the plaintext appears exactly here.
    let (status, _, cred) = post(
        &client,
        &base_url,
        &format!("/v1/identity/agents/{x}/credentials"),
        ACME_KEY,
        None,
        &json!({ "scopes": ["read", "execute"], "ttl_seconds": 3600 }),
    )
    .await;
    assert_eq!(status, 201);
    let cx_secret = cred["secret"].as_str().unwrap().to_string();

    // tx1: x → y; tx2: y → z chained from tx1.
    let (status, tx1) =
        issue_token(&client, &base_url, &x, &y, &["read", "execute"], 3_600, None, None).await;
    assert_eq!(status, 201);
    let (status, tx2) = issue_token(
        &client,
        &base_url,
        &y,
        &z,
        &["read"],
        600,
        Some(tx1["token_id"].as_str().unwrap()),
        None,
    )
    .await;
    assert_eq!(status, 201);

    // The credential authenticates before the kill switch.
    let authed = client
        .get(format!("{base_url}/v1/identity/agents/{x}"))
        .header("Authorization", format!("AgentCredential {cx_secret}"))
        .send()
        .await
        .unwrap();
    assert_eq!(authed.status().as_u16(), 200);

    // Kill switch on x.
    let (status, _, revoked) = post(
        &client,
        &base_url,
        &format!("/v1/identity/agents/{x}/revoke"),
        ACME_KEY,
        Some("kill-x"),
        &json!({ "reason": "security_incident" }),
    )
    .await;
    assert_eq!(status, 200);
    assert!(revoked["cascade_count"].as_u64().unwrap() >= 2);

    // Both tokens now fail verification with identity.revoked.
    for token in [&tx1, &tx2] {
        let (status, _, body) = post(
            &client,
            &base_url,
            "/v1/identity/delegation-tokens/verify",
            ACME_KEY,
            None,
            &json!({ "signed_token": token["signed_token"] }),
        )
        .await;
        assert_eq!(status, 401);
        assert_eq!(detail_code(&body), "identity.revoked");
    }

    // The credential is dead too.
    let dead = client
        .get(format!("{base_url}/v1/identity/agents/{x}"))
        .header("Authorization", format!("AgentCredential {cx_secret}"))
        .send()
        .await
        .unwrap();
    assert_eq!(dead.status().as_u16(), 401);

    // The revocation log records the cascade.
    let (status, log) = get(&client, &base_url, "/v1/identity/revocations", ACME_KEY).await;
    assert_eq!(status, 200);
    assert!(!log["events"].as_array().unwrap().is_empty());
}

// ── S3: idempotent delegation ─────────────────────────────────────────────────

#[tokio::test]
async fn idempotent_delegation_replays_and_conflicts() {
    let (_guard, base_url, client) = start("idempotency").await;

    let r = register_agent(&client, &base_url, ACME_KEY, "reg-r").await;
    let d = register_agent(&client, &base_url, ACME_KEY, "reg-d").await;

    let body = json!({
        "requester_agent_id": r,
        "delegate_agent_id": d,
        "task_spec": { "task": "summarize", "units": 3 },
        "estimated_cost_usd": 2.00,
        "max_budget_usd": 5.00,
    });

    // First submission runs the lifecycle to settlement.
    let (status, headers, first) = post(
        &client,
        &base_url,
        "/v1/delegations",
        ACME_KEY,
        Some("k1"),
        &body,
    )
    .await;
    assert_eq!(status, 201, "first submission failed: {first}");
    assert_eq!(first["status"], "settled");
    assert!(headers.get("X-Agenthub-Idempotent-Replay").is_none());
    let d1 = first["delegation_id"].as_str().unwrap().to_string();

    // Replay with the same key and body: same id, replay header set.
    let (status, headers, replay) = post(
        &client,
        &base_url,
        "/v1/delegations",
        ACME_KEY,
        Some("k1"),
        &body,
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(replay["delegation_id"].as_str().unwrap(), d1);
    assert_eq!(
        headers
            .get("X-Agenthub-Idempotent-Replay")
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );

    // Same key, different payload → 409.
    let mut other = body.clone();
    other["task_spec"]["units"] = json!(4);
    let (status, _, conflict) = post(
        &client,
        &base_url,
        "/v1/delegations",
        ACME_KEY,
        Some("k1"),
        &other,
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(
        detail_code(&conflict),
        "idempotency.key_reused_with_different_payload"
    );

    // Missing key on a guarded route → 400.
    let (status, _, missing) =
        post(&client, &base_url, "/v1/delegations", ACME_KEY, None, &body).await;
    assert_eq!(status, 400);
    assert_eq!(detail_code(&missing), "idempotency.key_required");

    // Status endpoint reports the settled record with its audit trail.
    let (status, report) = get(
        &client,
        &base_url,
        &format!("/v1/delegations/{d1}/status"),
        ACME_KEY,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(report["status"], "settled");
    assert!(!report["audit_events"].as_array().unwrap().is_empty());
}

// ── S4: budget hard stop ──────────────────────────────────────────────────────

#[tokio::test]
async fn budget_hard_stop_rejects_further_spend() {
    let (_guard, base_url, client) = start("budget").await;

    let a = register_agent(&client, &base_url, ACME_KEY, "reg-a").await;
    let b = register_agent(&client, &base_url, ACME_KEY, "reg-b").await;

    let (status, token) = issue_token(
        &client,
        &base_url,
        &a,
        &b,
        &["execute"],
        3_600,
        None,
        Some(10.00),
    )
    .await;
    assert_eq!(status, 201);
    let token_id = token["token_id"].as_str().unwrap();

    // Spend to $12.50 (ratio 1.25) across three events.
    for (i, cost) in [5.00, 4.00, 3.50].iter().enumerate() {
        let (status, _, body) = post(
            &client,
            &base_url,
            "/v1/budget/events",
            ACME_KEY,
            Some(&format!("budget-{i}")),
            &json!({ "token_id": token_id, "cost_usd": cost, "description": "llm usage" }),
        )
        .await;
        assert_eq!(status, 201, "event {i} failed: {body}");
    }

    // State is hard_stop at ratio 1.25.
    let (status, report) = get(
        &client,
        &base_url,
        &format!("/v1/budget/{token_id}"),
        ACME_KEY,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(report["state"], "hard_stop");
    assert!((report["spend_ratio"].as_f64().unwrap() - 1.25).abs() < 1e-9);

    // The next cost-bearing call is rejected with 402 budget.hard_stop.
    let (status, _, rejected) = post(
        &client,
        &base_url,
        "/v1/budget/events",
        ACME_KEY,
        Some("budget-overflow"),
        &json!({ "token_id": token_id, "cost_usd": 1.00 }),
    )
    .await;
    assert_eq!(status, 402);
    assert_eq!(detail_code(&rejected), "budget.hard_stop");
    assert!(
        (rejected["detail"]["fields"]["spend_ratio"].as_f64().unwrap() - 1.25).abs() < 1e-9
    );
}

// ── S5: breaker ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn breaker_opens_on_error_rate_and_rejects_new_work() {
    let (_guard, base_url, client) = start("breaker").await;

    let r = register_agent(&client, &base_url, ACME_KEY, "reg-r").await;
    let d = register_agent(&client, &base_url, ACME_KEY, "reg-d").await;

    // 8 successes.
    for i in 0..8 {
        let (status, _, body) = post(
            &client,
            &base_url,
            "/v1/delegations",
            ACME_KEY,
            Some(&format!("ok-{i}")),
            &json!({
                "requester_agent_id": r,
                "delegate_agent_id": d,
                "task_spec": { "task": "ok" },
                "estimated_cost_usd": 0.50,
                "max_budget_usd": 2.00,
            }),
        )
        .await;
        assert_eq!(status, 201, "success {i} failed: {body}");
    }

    // 4 delegate timeouts → error rate 4/12 ≈ 0.33.
    for i in 0..4 {
        let (status, _, body) = post(
            &client,
            &base_url,
            "/v1/delegations",
            ACME_KEY,
            Some(&format!("fail-{i}")),
            &json!({
                "requester_agent_id": r,
                "delegate_agent_id": d,
                "task_spec": { "task": "flaky", "simulated_outcome": "delegate_timeout" },
                "estimated_cost_usd": 0.50,
                "max_budget_usd": 2.00,
            }),
        )
        .await;
        assert_eq!(status, 201);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["last_error"], "delegate_timeout");
    }

    // Dashboard reports the open breaker.
    let (status, dashboard) = get(
        &client,
        &base_url,
        "/v1/reliability/slo-dashboard?window_size=50",
        ACME_KEY,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(dashboard["circuit_breaker"]["state"], "open");
    assert!(dashboard["metrics"]["error_rate"].as_f64().unwrap() >= 0.30);
    assert!(dashboard["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a == "breaker.open"));

    // New delegations are rejected while open.
    let (status, _, rejected) = post(
        &client,
        &base_url,
        "/v1/delegations",
        ACME_KEY,
        Some("blocked"),
        &json!({
            "requester_agent_id": r,
            "delegate_agent_id": d,
            "task_spec": { "task": "ok" },
            "estimated_cost_usd": 0.50,
            "max_budget_usd": 2.00,
        }),
    )
    .await;
    assert_eq!(status, 503);
    assert_eq!(detail_code(&rejected), "breaker.open");

    // Operator reset restores closed and work is admitted again.
    let (status, _, reset) = post(
        &client,
        &base_url,
        "/v1/reliability/breaker/reset",
        ACME_KEY,
        Some("reset-1"),
        &json!({}),
    )
    .await;
    assert_eq!(status, 200, "reset failed: {reset}");
    let (status, _, after) = post(
        &client,
        &base_url,
        "/v1/delegations",
        ACME_KEY,
        Some("after-reset"),
        &json!({
            "requester_agent_id": r,
            "delegate_agent_id": d,
            "task_spec": { "task": "ok" },
            "estimated_cost_usd": 0.50,
            "max_budget_usd": 2.00,
        }),
    )
    .await;
    assert_eq!(status, 201, "post-reset delegation failed: {after}");
}

// ── S6: cross-tenant policy ───────────────────────────────────────────────────

#[tokio::test]
async fn cross_tenant_delegation_is_denied_by_abac() {
    let (_guard, base_url, client) = start("abac").await;

    let acme_agent = register_agent(&client, &base_url, ACME_KEY, "reg-acme").await;
    let globex_agent = register_agent(&client, &base_url, GLOBEX_KEY, "reg-globex").await;

    let (status, _, denied) = post(
        &client,
        &base_url,
        "/v1/delegations",
        ACME_KEY,
        Some("cross-tenant"),
        &json!({
            "requester_agent_id": acme_agent,
            "delegate_agent_id": globex_agent,
            "task_spec": { "task": "exfiltrate" },
            "estimated_cost_usd": 1.00,
            "max_budget_usd": 2.00,
        }),
    )
    .await;
    assert_eq!(status, 403);
    assert!(denied["detail"]["fields"]["violations"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "abac.tenant_mismatch"));
}

// ── Federation ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn attestation_issue_and_verify() {
    let (_guard, base_url, client) = start("federation").await;

    let agent = register_agent(&client, &base_url, ACME_KEY, "reg-agent").await;

    let (status, _, domain) = post(
        &client,
        &base_url,
        "/v1/identity/trust-registry/domains",
        ACME_KEY,
        Some("dom-1"),
        &json!({
            "display_name": "partner.example",
            "trust_level": "verified",
            "allowed_scopes": ["read", "execute"],
        }),
    )
    .await;
    assert_eq!(status, 201, "domain registration failed: {domain}");
    let domain_id = domain["domain_id"].as_str().unwrap();

    let (status, _, attestation) = post(
        &client,
        &base_url,
        &format!("/v1/identity/agents/{agent}/attest"),
        ACME_KEY,
        Some("att-1"),
        &json!({
            "domain_id": domain_id,
            "claims": { "region": "eu-west" },
            "attested_scopes": ["read"],
        }),
    )
    .await;
    assert_eq!(status, 201, "attestation failed: {attestation}");
    let attestation_id = attestation["attestation_id"].as_str().unwrap();

    let (status, verdict) = get(
        &client,
        &base_url,
        &format!("/v1/identity/attestations/{attestation_id}/verify"),
        ACME_KEY,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(verdict["valid"], true);

    // Scopes above the domain ceiling are rejected at issue time.
    let (status, _, rejected) = post(
        &client,
        &base_url,
        &format!("/v1/identity/agents/{agent}/attest"),
        ACME_KEY,
        Some("att-2"),
        &json!({
            "domain_id": domain_id,
            "attested_scopes": ["read", "admin"],
        }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(detail_code(&rejected), "federation.scope_exceeded");
}

// ── Auth & secret hygiene ─────────────────────────────────────────────────────

#[tokio::test]
async fn credential_secret_appears_once_and_auth_is_fail_closed() {
    let (_guard, base_url, client) = start("auth").await;

    // Unknown API key → 401.
    let (status, _, body) = post(
        &client,
        &base_url,
        "/v1/identity/agents",
        "wrong-key",
        Some("reg-bad"),
        &json!({ "credential_type": "api_key" }),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(detail_code(&body), "auth.unknown_api_key");

    // Missing auth entirely → 401.
    let resp = client
        .post(format!("{base_url}/v1/identity/agents"))
        .header("Idempotency-Key", "reg-noauth")
        .json(&json!({ "credential_type": "api_key" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let agent = register_agent(&client, &base_url, ACME_KEY, "reg-agent").await;

    // Creation is the only response carrying the plaintext secret.
    let (status, _, cred) = post(
        &client,
        &base_url,
        &format!("/v1/identity/agents/{agent}/credentials"),
        ACME_KEY,
        None,
        &json!({ "scopes": ["read"], "ttl_seconds": 3600 }),
    )
    .await;
    assert_eq!(status, 201);
    let secret = cred["secret"].as_str().unwrap().to_string();
    assert!(!secret.is_empty());

    // The agent read-back carries no secret material.
    let (status, readback) = get(
        &client,
        &base_url,
        &format!("/v1/identity/agents/{agent}"),
        ACME_KEY,
    )
    .await;
    assert_eq!(status, 200);
    assert!(readback.get("secret").is_none());
    assert!(!readback.to_string().contains(&secret));

    // The secret authenticates as the agent.
    let resp = client
        .get(format!("{base_url}/v1/identity/agents/{agent}"))
        .header("Authorization", format!("AgentCredential {secret}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // Credential rotation returns a fresh secret; the old one keeps working
    // only within the overlap grace (still valid immediately after).
    let credential_id = cred["credential_id"].as_str().unwrap();
    let (status, _, rotated) = post(
        &client,
        &base_url,
        &format!("/v1/identity/credentials/{credential_id}/rotate"),
        ACME_KEY,
        None,
        &json!({}),
    )
    .await;
    assert_eq!(status, 201);
    assert_ne!(rotated["secret"].as_str().unwrap(), secret);
    assert_eq!(
        rotated["rotation_parent_id"].as_str().unwrap(),
        credential_id
    );

    // Diagnostics reports secret presence without values.
    let (status, diag) = get(&client, &base_url, "/v1/diagnostics/config", ACME_KEY).await;
    assert_eq!(status, 200);
    assert_eq!(diag["secrets"]["identity_secret"]["present"], true);
    assert!(diag["secrets"]["identity_secret"].get("value").is_none());
    assert_eq!(diag["access_mode"], "enforce");
}

// ── Restart durability ────────────────────────────────────────────────────────

#[tokio::test]
async fn restart_preserves_reservations_and_reclaims_running_rows() {
    use agenthub_core::delegation::{
        DelegationRecord, DelegationStatus, IdempotencyStatus, LifecycleStage,
    };
    use agenthub_core::types::{AgentId, DelegationId};
    use agenthub_store::StateDb;

    let (mut guard, base_url, client) = start("restart").await;

    let r = register_agent(&client, &base_url, ACME_KEY, "reg-r").await;
    let d = register_agent(&client, &base_url, ACME_KEY, "reg-d").await;

    let body = json!({
        "requester_agent_id": r,
        "delegate_agent_id": d,
        "task_spec": { "task": "summarize" },
        "estimated_cost_usd": 1.00,
        "max_budget_usd": 3.00,
    });
    let (status, _, first) = post(
        &client,
        &base_url,
        "/v1/delegations",
        ACME_KEY,
        Some("restart-k"),
        &body,
    )
    .await;
    assert_eq!(status, 201, "first submission failed: {first}");
    let d1 = first["delegation_id"].as_str().unwrap().to_string();

    // Kill the server; the data directory stays.
    guard.child.kill().unwrap();
    guard.child.wait().unwrap();

    // The reservation is durable, and a row stranded mid-execution (as if
    // the process died between stage transitions) goes in for the reaper.
    {
        let db = StateDb::open(&guard.data_dir).expect("open data dir after kill");
        let reservation = db
            .get_idempotency("owner-acme", "owner-acme", "POST", "/v1/delegations", "restart-k")
            .unwrap()
            .expect("reservation must survive restart");
        assert_eq!(reservation.status, IdempotencyStatus::Completed);

        let now = chrono_now();
        db.put_delegation(&DelegationRecord {
            delegation_id: DelegationId::new("del-stale"),
            requester_agent_id: AgentId::new(r.clone()),
            delegate_agent_id: AgentId::new(d.clone()),
            task_spec_json: r#"{"task":"summarize"}"#.into(),
            status: DelegationStatus::Running,
            stage: LifecycleStage::Execution,
            estimated_cost_cents: 50,
            max_budget_cents: 200,
            actual_cost_cents: None,
            escrow_cents: 50,
            token_id: None,
            attempt_count: 1,
            last_error: None,
            heartbeat_at: now - 120,
            cancel_requested: false,
            created_at: now - 120,
            updated_at: now - 120,
            completed_at: None,
            latency_ms: None,
            audit_events: vec![],
        })
        .unwrap();
        db.flush().unwrap();
        // Dropped here so the respawned server can take the sled lock.
    }

    // Respawn against the same data directory.
    let (_guard2, base_url2) = spawn_server_at(guard.data_dir.clone());
    assert!(
        wait_for_ready(&client, &base_url2, Duration::from_secs(20)).await,
        "server did not come back within 20 seconds"
    );

    // Replaying the pre-restart key returns the cached response,
    // byte-identical, with the replay header.
    let (status, headers, replay) = post(
        &client,
        &base_url2,
        "/v1/delegations",
        ACME_KEY,
        Some("restart-k"),
        &body,
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(replay["delegation_id"].as_str().unwrap(), d1);
    assert_eq!(
        headers
            .get("X-Agenthub-Idempotent-Replay")
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );

    // The reaper reclaims the stale running row and resumes it from its
    // last persisted stage to settlement.
    let deadline = Instant::now() + Duration::from_secs(15);
    let mut settled = false;
    while Instant::now() < deadline {
        let (status, report) = get(
            &client,
            &base_url2,
            "/v1/delegations/del-stale/status",
            ACME_KEY,
        )
        .await;
        if status == 200 && report["status"] == "settled" {
            assert_eq!(report["stage"], "feedback");
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    assert!(settled, "stale running delegation was not reclaimed after restart");
}

fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

// ── Contract endpoint ─────────────────────────────────────────────────────────

#[tokio::test]
async fn contract_endpoint_reports_version_and_limits() {
    let (_guard, base_url, client) = start("contract").await;

    // Public route: no auth header needed.
    let resp = client
        .get(format!("{base_url}/v1/delegations/contract"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["version"], "delegation-contract-v2");
    assert_eq!(body["budget_thresholds_percent"]["soft_alert"], 80);
    assert_eq!(body["budget_thresholds_percent"]["reauthorization_required"], 100);
    assert_eq!(body["budget_thresholds_percent"]["hard_stop"], 120);
    let matrix = body["retry_matrix"].as_array().unwrap();
    let transient = matrix
        .iter()
        .find(|m| m["class"] == "transient_network_error")
        .unwrap();
    assert_eq!(transient["max_retries"], 2);
    assert_eq!(transient["backoff_ms"], json!([100, 250]));
}
