use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn";

/// `--log-filter` wins over `RUST_LOG`; blank values count as unset.
fn filter_directives(explicit: Option<&str>, from_env: Option<&str>) -> String {
    explicit
        .or(from_env)
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVES)
        .to_string()
}

pub fn init_logging(explicit: Option<&str>) -> Result<()> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directives = filter_directives(explicit, from_env.as_deref());
    let filter_layer = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter '{directives}'"))?;

    // Targets stay on so sqlx and classifier lines can be told apart.
    let fmt_layer = fmt::layer()
        .compact()
        .with_ansi(false)
        .with_target(true)
        .boxed();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn explicit_filter_beats_environment() {
        assert_eq!(
            filter_directives(Some("debug"), Some("warn")),
            "debug".to_string()
        );
        assert_eq!(filter_directives(None, Some("warn")), "warn".to_string());
    }

    #[test]
    fn blank_filters_fall_back_to_defaults() {
        assert_eq!(filter_directives(None, None), DEFAULT_DIRECTIVES.to_string());
        assert_eq!(
            filter_directives(Some("  "), None),
            DEFAULT_DIRECTIVES.to_string()
        );
    }
}
