use std::path::PathBuf;
use std::time::Duration;

use artery_engine::DownloadConfig;
use url::Url;

use crate::cli::CliArgs;
use crate::error::AppError;

/// Upstream used when none is configured.
pub const DEFAULT_UPSTREAM: &str = "https://repo1.maven.org/maven2/";

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub store_root: PathBuf,
    pub upstreams: Vec<Url>,
    pub failed_path_cache: Duration,
}

impl ProxyConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self, AppError> {
        let upstreams = if args.upstreams.is_empty() {
            vec![Url::parse(DEFAULT_UPSTREAM).map_err(|source| AppError::InvalidUpstream {
                url: DEFAULT_UPSTREAM.to_string(),
                source,
            })?]
        } else {
            args.upstreams
                .iter()
                .map(|raw| {
                    Url::parse(raw).map_err(|source| AppError::InvalidUpstream {
                        url: raw.clone(),
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            port: args.port,
            store_root: args.store_root.clone(),
            upstreams,
            failed_path_cache: Duration::from_secs(args.failed_path_cache_minutes * 60),
        })
    }

    /// Engine-side view of this configuration.
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            upstreams: self.upstreams.clone(),
            failed_path_ttl: self.failed_path_cache,
            ..DownloadConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_resolve() {
        let args = CliArgs::parse_from(["artery"]);
        let config = ProxyConfig::from_args(&args).unwrap();
        assert_eq!(config.port, 5956);
        assert_eq!(config.upstreams.len(), 1);
        assert_eq!(config.upstreams[0].as_str(), DEFAULT_UPSTREAM);
        assert_eq!(config.failed_path_cache, Duration::from_secs(300));
    }

    #[test]
    fn repeated_upstream_flags_are_ordered() {
        let args = CliArgs::parse_from([
            "artery",
            "--upstream",
            "https://mirror-a.example/repo/",
            "--upstream",
            "https://mirror-b.example/repo/",
        ]);
        let config = ProxyConfig::from_args(&args).unwrap();
        assert_eq!(config.upstreams.len(), 2);
        assert!(config.upstreams[0].as_str().contains("mirror-a"));
    }

    #[test]
    fn bad_upstream_is_rejected() {
        let args = CliArgs::parse_from(["artery", "--upstream", "not a url"]);
        assert!(ProxyConfig::from_args(&args).is_err());
    }
}
