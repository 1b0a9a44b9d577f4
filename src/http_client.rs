use std::time::Duration;

use reqwest::ClientBuilder;

use crate::config::PoeConfig;

const USER_AGENT: &str = concat!("poe-bridge/", env!("CARGO_PKG_VERSION"));

fn has_proxy_env() -> bool {
    [
        "HTTPS_PROXY",
        "https_proxy",
        "HTTP_PROXY",
        "http_proxy",
        "ALL_PROXY",
        "all_proxy",
    ]
    .iter()
    .any(|k| std::env::var(k).is_ok_and(|v| !v.trim().is_empty()))
}

fn should_bypass_proxy_impl(use_env_proxy: bool, proxy_env_present: bool) -> bool {
    proxy_env_present && !use_env_proxy
}

pub fn maybe_disable_proxy(builder: ClientBuilder, use_env_proxy: bool) -> ClientBuilder {
    let proxy_env_present = has_proxy_env();
    if should_bypass_proxy_impl(use_env_proxy, proxy_env_present) {
        tracing::debug!("Ignoring proxy environment for upstream calls");
        builder.no_proxy()
    } else {
        if proxy_env_present {
            tracing::debug!("Upstream calls go through the environment proxy");
        }
        builder
    }
}

/// Shared client for bot calls. Only connecting is bounded here; the reply itself is
/// bounded by the per-request deadline in the Poe client.
pub fn upstream_client(cfg: &PoeConfig) -> Result<reqwest::Client, reqwest::Error> {
    let builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .user_agent(USER_AGENT);
    maybe_disable_proxy(builder, cfg.use_env_proxy).build()
}
