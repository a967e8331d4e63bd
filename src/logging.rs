//! Tracing subscriber setup for applications embedding the graph.
//!
//! Engine events are emitted under the `spillgraph` target. A bare level such
//! as `"debug"` is scoped to that target so dependencies stay quiet; anything
//! else is taken as a full `EnvFilter` directive list.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{GraphError, Result};

/// Filter used when neither a level nor `RUST_LOG` is given.
pub const DEFAULT_DIRECTIVE: &str = "spillgraph=info";

/// Builds the filter for `level`.
///
/// An empty `level` defers to `RUST_LOG`, then to [`DEFAULT_DIRECTIVE`].
pub fn log_filter(level: &str) -> Result<EnvFilter> {
    let level = level.trim();
    if level.is_empty() {
        return Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)));
    }
    let directive = match level.parse::<LevelFilter>() {
        Ok(bare) => format!("spillgraph={bare}"),
        Err(_) => level.to_string(),
    };
    EnvFilter::try_new(&directive)
        .map_err(|e| GraphError::Config(format!("invalid log filter '{directive}': {e}")))
}

/// Installs a global fmt subscriber filtered through [`log_filter`].
///
/// Thread names are printed so eviction workers (`spillgraph-evict-N`) and
/// the monitor can be told apart.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(log_filter(level)?)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(|_| GraphError::Config("logging already initialized".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(level: &str) -> String {
        log_filter(level).unwrap().to_string()
    }

    #[test]
    fn bare_levels_scope_to_the_crate() {
        assert_eq!(rendered("debug"), EnvFilter::new("spillgraph=debug").to_string());
        assert_eq!(rendered(" WARN "), EnvFilter::new("spillgraph=warn").to_string());
        assert_eq!(
            rendered("spillgraph::storage::refs=trace,rusqlite=warn"),
            EnvFilter::new("spillgraph::storage::refs=trace,rusqlite=warn").to_string()
        );
    }

    #[test]
    fn rejects_bad_filter_and_double_init() {
        assert!(matches!(
            log_filter("spillgraph=notalevel"),
            Err(GraphError::Config(_))
        ));
        let _ = init_logging("warn");
        assert!(init_logging("warn").is_err());
    }
}
