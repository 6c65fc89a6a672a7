//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,stream_player=info,player_cli=info";

/// Targets whose warnings are known-benign decoder chatter.
///
/// A rule is skipped when `RUST_LOG` already names its target.
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("symphonia_bundle_mp3", "error"),
    ("symphonia_codec_aac", "error"),
    ("symphonia_format_isomp4", "error"),
    ("symphonia_format_ogg", "error"),
    ("symphonia_core::probe", "error"),
];

/// Build the filter from `RUST_LOG` (or the default) plus the quiet-target rules.
pub fn build_filter(env: Option<&str>) -> EnvFilter {
    let base = env
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_FILTER);
    let mut filter = EnvFilter::try_new(base).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    for (target, level) in QUIET_TARGETS {
        if base.contains(target) {
            continue;
        }
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the global `fmt` subscriber. Logs go to stderr so they do not
/// interleave with command output.
pub fn init() {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(env.as_deref()))
        .with_writer(std::io::stderr)
        .init();
}
