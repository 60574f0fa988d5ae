use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use quill::{CUSTOM_EPOCH, Policy, QuillConfig, SnowflakeId};

use crate::server::limits::Policies;

/// Runtime configuration for the `quill-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single-instance
/// deployment backed by in-process stores.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "quill-server",
    version,
    about = "HTTP host for Quill IDs, rate limiting and page views"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Worker id embedded in every Snowflake ID issued by this process.
    ///
    /// Must be unique across every instance sharing the ID namespace; two
    /// processes with the same worker id can issue the same ID.
    ///
    /// Environment variable: `WORKER_ID`
    #[arg(long, env = "WORKER_ID", default_value_t = 0)]
    pub worker_id: u64,

    /// Seconds between page-view flushes.
    ///
    /// Environment variable: `FLUSH_INTERVAL_SECS`
    #[arg(long, env = "FLUSH_INTERVAL_SECS", default_value_t = 10)]
    pub flush_interval_secs: u64,

    /// Redis URL for shared rate-limit counters and persisted page views.
    /// In-process stores are used when unset.
    ///
    /// Environment variable: `REDIS_URL`
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Let requests through when the counter store is unreachable, instead
    /// of answering 503.
    ///
    /// Environment variable: `RATE_LIMIT_FAIL_OPEN`
    #[arg(long, env = "RATE_LIMIT_FAIL_OPEN", default_value_t = false)]
    pub rate_limit_fail_open: bool,

    /// Count against an in-process store while Redis is unreachable. Only
    /// meaningful together with `REDIS_URL`.
    ///
    /// Environment variable: `RATE_LIMIT_LOCAL_FALLBACK`
    #[arg(long, env = "RATE_LIMIT_LOCAL_FALLBACK", default_value_t = false)]
    pub rate_limit_local_fallback: bool,

    /// Take the client address from the first `X-Forwarded-For` hop. Only
    /// enable behind a reverse proxy that overwrites the header; otherwise
    /// clients can pick their own rate-limit bucket.
    ///
    /// Environment variable: `TRUST_PROXY`
    #[arg(long, env = "TRUST_PROXY", default_value_t = false)]
    pub trust_proxy: bool,

    /// Window of the policy applied to every request.
    ///
    /// Environment variable: `RATE_LIMIT_DEFAULT_WINDOW_SECS`
    #[arg(long, env = "RATE_LIMIT_DEFAULT_WINDOW_SECS", default_value_t = 60)]
    pub default_window_secs: u64,

    /// Requests per window allowed by the default policy.
    ///
    /// Environment variable: `RATE_LIMIT_DEFAULT_MAX`
    #[arg(long, env = "RATE_LIMIT_DEFAULT_MAX", default_value_t = 300)]
    pub default_max: u64,

    /// Window of the policy applied to POST, PUT, PATCH and DELETE.
    ///
    /// Environment variable: `RATE_LIMIT_MUTATING_WINDOW_SECS`
    #[arg(long, env = "RATE_LIMIT_MUTATING_WINDOW_SECS", default_value_t = 60)]
    pub mutating_window_secs: u64,

    /// Requests per window allowed by the mutating policy.
    ///
    /// Environment variable: `RATE_LIMIT_MUTATING_MAX`
    #[arg(long, env = "RATE_LIMIT_MUTATING_MAX", default_value_t = 60)]
    pub mutating_max: u64,

    /// Window of the policy applied to ID issuing.
    ///
    /// Environment variable: `RATE_LIMIT_SENSITIVE_WINDOW_SECS`
    #[arg(long, env = "RATE_LIMIT_SENSITIVE_WINDOW_SECS", default_value_t = 60)]
    pub sensitive_window_secs: u64,

    /// Requests per window allowed by the sensitive policy.
    ///
    /// Environment variable: `RATE_LIMIT_SENSITIVE_MAX`
    #[arg(long, env = "RATE_LIMIT_SENSITIVE_MAX", default_value_t = 10)]
    pub sensitive_max: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub quill: QuillConfig,
    pub redis_url: Option<String>,
    pub fail_open: bool,
    pub local_fallback: bool,
    pub trust_proxy: bool,
    pub policies: Policies,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.worker_id > SnowflakeId::MAX_WORKER_ID {
            bail!(
                "WORKER_ID ({}) exceeds the Snowflake worker id space (max = {})",
                args.worker_id,
                SnowflakeId::MAX_WORKER_ID
            );
        }

        if args.flush_interval_secs == 0 {
            bail!("FLUSH_INTERVAL_SECS must be greater than 0");
        }

        if args.redis_url.is_some() && !cfg!(feature = "redis") {
            bail!("REDIS_URL is set but quill-server was built without the `redis` feature");
        }

        if args.rate_limit_local_fallback && args.redis_url.is_none() {
            bail!("RATE_LIMIT_LOCAL_FALLBACK requires REDIS_URL");
        }

        let default = policy("default", args.default_window_secs, args.default_max)?;
        let mutating = policy("mutating", args.mutating_window_secs, args.mutating_max)?;
        let sensitive = policy("sensitive", args.sensitive_window_secs, args.sensitive_max)?;

        // Narrower scopes must not be looser than the scopes they sit inside.
        if mutating.max > default.max {
            bail!(
                "RATE_LIMIT_MUTATING_MAX ({}) must not exceed RATE_LIMIT_DEFAULT_MAX ({})",
                mutating.max,
                default.max
            );
        }
        if sensitive.max > mutating.max {
            bail!(
                "RATE_LIMIT_SENSITIVE_MAX ({}) must not exceed RATE_LIMIT_MUTATING_MAX ({})",
                sensitive.max,
                mutating.max
            );
        }

        Ok(Self {
            server_addr: args.server_addr,
            quill: QuillConfig {
                worker_id: args.worker_id,
                epoch: CUSTOM_EPOCH,
                flush_interval: Duration::from_secs(args.flush_interval_secs),
            },
            redis_url: args.redis_url,
            fail_open: args.rate_limit_fail_open,
            local_fallback: args.rate_limit_local_fallback,
            trust_proxy: args.trust_proxy,
            policies: Policies {
                default,
                mutating,
                sensitive,
            },
        })
    }
}

fn policy(name: &'static str, window_secs: u64, max: u64) -> anyhow::Result<Policy> {
    if window_secs == 0 {
        bail!("{name} rate-limit window must be greater than 0");
    }
    if max == 0 {
        bail!("{name} rate-limit max must be greater than 0");
    }
    Ok(Policy::per_seconds(name, window_secs, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = std::iter::once("quill-server").chain(args.iter().copied());
        let args = CliArgs::try_parse_from(argv)?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.quill.worker_id, 0);
        assert_eq!(config.quill.flush_interval, Duration::from_secs(10));
        assert_eq!(config.policies.sensitive.max, 10);
        assert!(!config.fail_open);
        assert!(!config.trust_proxy);
    }

    #[test]
    fn rejects_out_of_range_worker_id() {
        let err = parse(&["--worker-id", "1024"]).unwrap_err();
        assert!(err.to_string().contains("WORKER_ID"));
    }

    #[test]
    fn rejects_zero_flush_interval_and_window() {
        assert!(parse(&["--flush-interval-secs", "0"]).is_err());
        assert!(parse(&["--default-window-secs", "0"]).is_err());
        assert!(parse(&["--sensitive-max", "0"]).is_err());
    }

    #[test]
    fn rejects_sensitive_looser_than_mutating() {
        let err = parse(&["--sensitive-max", "100"]).unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_SENSITIVE_MAX"));
    }

    #[test]
    fn local_fallback_needs_redis() {
        assert!(parse(&["--rate-limit-local-fallback"]).is_err());
    }
}
