use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

pub fn init_tracing(verbosity: u8) -> Result<()> {
    let default_directive = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("tracing subscriber already initialized");
    }

    Ok(())
}

pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let cwd = env::current_dir().expect("cwd");
        assert_eq!(resolve_path(Path::new("out")).expect("resolve"), cwd.join("out"));
        assert_eq!(
            resolve_path(Path::new("/tmp/out")).expect("resolve"),
            PathBuf::from("/tmp/out")
        );
    }
}
