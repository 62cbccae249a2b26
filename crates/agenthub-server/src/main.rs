//! agenthub-server — the AgentHub control-plane binary.
//!
//! Startup sequence:
//!   1. Validate the configuration snapshot (fail-closed: missing secrets
//!      refuse boot)
//!   2. Open the state database
//!   3. Build the engines and seed the circuit breaker from recent history
//!   4. Spawn the heartbeat reaper and outbox dispatcher
//!   5. Serve the /v1 HTTP surface

mod config;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use agenthub_api::{build_router, AppState};
use agenthub_core::delegation::DelegationStatus;
use agenthub_identity::{IdentityRegistry, RevocationEngine, TokenEngine, TrustRegistry};
use agenthub_lifecycle::{Breaker, BudgetEngine, LifecycleEngine, Sample};
use agenthub_policy::PolicyEvaluator;
use agenthub_store::StateDb;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agenthub=debug".parse().unwrap()),
        )
        .init();

    let args = config::Args::parse();
    info!("AgentHub control plane starting");

    // ── Configuration snapshot (fail-closed at boot) ──────────────────────────
    let (runtime, secrets) = config::load(&args)?;

    // ── State database ────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);

    // ── Engines ───────────────────────────────────────────────────────────────
    let registry = Arc::new(IdentityRegistry::new(
        Arc::clone(&db),
        secrets.identity.clone(),
    ));
    let tokens = Arc::new(TokenEngine::new(Arc::clone(&db), secrets.identity.clone()));
    let revocation = Arc::new(RevocationEngine::new(Arc::clone(&db)));
    let federation = Arc::new(TrustRegistry::new(
        Arc::clone(&db),
        secrets.identity.clone(),
    ));
    let policy = Arc::new(PolicyEvaluator::new(secrets.policy.clone()));
    let budget = Arc::new(BudgetEngine::new(Arc::clone(&db)));
    let lifecycle = Arc::new(LifecycleEngine::new(
        Arc::clone(&db),
        Arc::clone(&policy),
        Arc::clone(&budget),
        secrets.provenance.clone(),
    ));

    // ── Circuit breaker, rebuilt from persisted history ───────────────────────
    let mut breaker = Breaker::new(runtime.breaker_window, runtime.latency_slo_ms);
    let recent = db
        .recent_completed_delegations(runtime.breaker_window)
        .unwrap_or_default();
    if !recent.is_empty() {
        info!(samples = recent.len(), "seeding circuit breaker from store");
        breaker.seed(recent.iter().map(|d| Sample {
            success: d.status == DelegationStatus::Settled,
            hard_stop: d.last_error.as_deref() == Some("budget.hard_stop"),
            latency_ms: d.latency_ms.unwrap_or(0),
        }));
    }
    let breaker = Arc::new(Mutex::new(breaker));

    let state = AppState {
        db: Arc::clone(&db),
        registry,
        tokens,
        revocation,
        federation,
        policy,
        budget,
        lifecycle: Arc::clone(&lifecycle),
        breaker,
        config: Arc::new(runtime),
    };

    // ── Heartbeat reaper: resume stalled delegations ──────────────────────────
    {
        let lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now().timestamp();
                let reclaimed = lifecycle.reclaim_stale(now).await;
                if !reclaimed.is_empty() {
                    info!(count = reclaimed.len(), "reaper resumed stalled delegations");
                }
            }
        });
    }

    // ── Outbox dispatcher: at-least-once delivery to downstream consumers ─────
    {
        let db = Arc::clone(&db);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                match db.drain_outbox(100) {
                    Ok(events) => {
                        for event in events {
                            // Downstream consumers (billing, trust scoring,
                            // federation audit) subscribe out of process; the
                            // dispatch log is the delivery channel here.
                            info!(
                                kind = %event.kind,
                                event_id = %event.event_id,
                                payload = %event.payload_json,
                                "outbox event dispatched"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "outbox drain failed"),
                }
            }
        });
    }

    // ── HTTP surface ──────────────────────────────────────────────────────────
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(args.http_addr)
        .await
        .with_context(|| format!("binding {}", args.http_addr))?;
    info!(addr = %args.http_addr, "control plane ready");
    axum::serve(listener, app).await.context("serving HTTP")?;

    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
