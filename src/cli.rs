use clap::Parser;
use std::path::PathBuf;

/// Proxy settings: where to listen, where the store lives, which
/// upstream mirrors to race, and how long failed paths stay cached.
#[derive(Parser)]
#[command(
    version,
    about = "Caching proxy for Maven-style artifact repositories",
    long_about = "A small caching forward proxy for Maven-style artifact repositories.\n\
                  \n\
                  Artifact requests are answered from a local store when possible;\n\
                  misses are fetched from every configured upstream mirror in\n\
                  parallel, the first successful response is cached and streamed\n\
                  back, and the remaining fetches are cancelled."
)]
pub struct CliArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = 5956, help = "Port the proxy listens on")]
    pub port: u16,

    /// Directory for cached artifacts
    #[arg(
        short,
        long,
        default_value = "./artery-store",
        help = "Directory where cached artifacts are stored"
    )]
    pub store_root: PathBuf,

    /// Upstream repository base URL; repeat the flag for multiple mirrors
    #[arg(
        short,
        long = "upstream",
        help = "Upstream repository base URL (repeatable; default: Maven Central)"
    )]
    pub upstreams: Vec<String>,

    /// Minutes a path that failed on every upstream stays negative-cached
    #[arg(
        long,
        default_value_t = 5,
        help = "Minutes to remember that a path failed on every upstream"
    )]
    pub failed_path_cache_minutes: u64,

    /// Log at debug level, including per-upstream fetch outcomes
    #[arg(
        short,
        long,
        help = "Log at debug level, including per-upstream fetch outcomes"
    )]
    pub verbose: bool,
}
