use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use agenthub_api::{AccessMode, RuntimeConfig};
use agenthub_core::constants::{BREAKER_DEFAULT_WINDOW, DEFAULT_LATENCY_SLO_MS, REQUEST_TIMEOUT_SECS};
use agenthub_crypto::Secret;

#[derive(Parser, Debug)]
#[command(
    name = "agenthub-server",
    version,
    about = "AgentHub identity & delegation control plane"
)]
pub struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.agenthub/data")]
    pub data_dir: PathBuf,

    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub http_addr: SocketAddr,

    /// Identity signing secret (credentials, delegation tokens,
    /// attestations).
    #[arg(long, env = "AGENTHUB_IDENTITY_SECRET", hide_env_values = true)]
    pub identity_secret: String,

    /// Bearer-token signing secret.
    #[arg(long, env = "AGENTHUB_BEARER_SECRET", hide_env_values = true)]
    pub bearer_secret: String,

    /// Policy decision signing secret.
    #[arg(long, env = "AGENTHUB_POLICY_SECRET", hide_env_values = true)]
    pub policy_secret: String,

    /// Provenance signing secret (usage signals).
    #[arg(long, env = "AGENTHUB_PROVENANCE_SECRET", hide_env_values = true)]
    pub provenance_secret: String,

    /// Platform API keys as a JSON object: {"key": "owner"}.
    #[arg(long, env = "AGENTHUB_API_KEYS", hide_env_values = true)]
    pub api_keys: String,

    /// Federation domain tokens as a JSON object: {"domain": "token"}.
    #[arg(long, env = "AGENTHUB_FEDERATION_DOMAIN_TOKENS", hide_env_values = true)]
    pub federation_domain_tokens: String,

    /// Access-enforcement mode: enforce (default) or warn.
    #[arg(long, env = "AGENTHUB_ACCESS_MODE", default_value = "enforce")]
    pub access_mode: AccessMode,

    /// Circuit-breaker sliding-window size (1..=1000).
    #[arg(long, default_value_t = BREAKER_DEFAULT_WINDOW)]
    pub breaker_window: usize,

    /// p95 latency SLO in milliseconds.
    #[arg(long, default_value_t = DEFAULT_LATENCY_SLO_MS)]
    pub latency_slo_ms: u64,

    /// Per-request budget in seconds; expiry surfaces as 504.
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Dev credit granted to each new agent's delegation balance (USD).
    #[arg(long, default_value_t = 100.0)]
    pub initial_balance_usd: f64,
}

/// Secrets handed to the engine crates.
pub struct SigningSecrets {
    pub identity: Secret,
    pub policy: Secret,
    pub provenance: Secret,
}

/// Validate the startup inputs and freeze them into the process-wide
/// snapshot. Fail-closed: any absent or empty secret or map refuses boot.
pub fn load(args: &Args) -> anyhow::Result<(RuntimeConfig, SigningSecrets)> {
    for (name, value) in [
        ("identity secret", &args.identity_secret),
        ("bearer secret", &args.bearer_secret),
        ("policy secret", &args.policy_secret),
        ("provenance secret", &args.provenance_secret),
    ] {
        if value.trim().is_empty() {
            bail!("{name} is empty; refusing to start");
        }
    }

    let api_keys: HashMap<String, String> =
        serde_json::from_str(&args.api_keys).context("parsing AGENTHUB_API_KEYS")?;
    if api_keys.is_empty() {
        bail!("API key map is empty; refusing to start");
    }
    let federation_domain_tokens: HashMap<String, String> =
        serde_json::from_str(&args.federation_domain_tokens)
            .context("parsing AGENTHUB_FEDERATION_DOMAIN_TOKENS")?;
    if federation_domain_tokens.is_empty() {
        bail!("federation domain token map is empty; refusing to start");
    }

    let secret_lengths: BTreeMap<String, usize> = [
        ("identity_secret", args.identity_secret.len()),
        ("bearer_secret", args.bearer_secret.len()),
        ("policy_secret", args.policy_secret.len()),
        ("provenance_secret", args.provenance_secret.len()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let runtime = RuntimeConfig {
        api_keys,
        federation_domain_tokens,
        bearer_secret: Secret::from_str_value(&args.bearer_secret),
        access_mode: args.access_mode,
        latency_slo_ms: args.latency_slo_ms,
        breaker_window: args.breaker_window,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        initial_balance_cents: (args.initial_balance_usd * 100.0).round().max(0.0) as u64,
        secret_lengths,
    };
    let secrets = SigningSecrets {
        identity: Secret::from_str_value(&args.identity_secret),
        policy: Secret::from_str_value(&args.policy_secret),
        provenance: Secret::from_str_value(&args.provenance_secret),
    };
    Ok((runtime, secrets))
}
