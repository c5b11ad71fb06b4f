use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub query: Option<QueryConfig>,
    pub network: Option<NetworkConfig>,
    pub paths: Option<PathsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    pub num_hits: Option<usize>,
    pub title_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub min_interval_secs: Option<f64>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub cache_dir: Option<String>,
    pub output_dir: Option<String>,
}

/// Platform config directory path: `<config_dir>/dblpify/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dblpify").join("config.toml"))
}

/// Load config by cascading CWD `.dblpify.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".dblpify.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bq, oq) = (base.query.unwrap_or_default(), overlay.query.unwrap_or_default());
    let (bn, on) = (
        base.network.unwrap_or_default(),
        overlay.network.unwrap_or_default(),
    );
    let (bp, op) = (base.paths.unwrap_or_default(), overlay.paths.unwrap_or_default());

    ConfigFile {
        query: Some(QueryConfig {
            num_hits: oq.num_hits.or(bq.num_hits),
            title_threshold: oq.title_threshold.or(bq.title_threshold),
        }),
        network: Some(NetworkConfig {
            min_interval_secs: on.min_interval_secs.or(bn.min_interval_secs),
            timeout_secs: on.timeout_secs.or(bn.timeout_secs),
            user_agent: on.user_agent.or(bn.user_agent),
        }),
        paths: Some(PathsConfig {
            cache_dir: op.cache_dir.or(bp.cache_dir),
            output_dir: op.output_dir.or(bp.output_dir),
        }),
    }
}

impl ConfigFile {
    /// Cache directory from the `[paths]` section, if set.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.paths
            .as_ref()
            .and_then(|p| p.cache_dir.as_ref())
            .map(PathBuf::from)
    }

    /// Overwrite `config` fields that are set in this file.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(query) = &self.query {
            if let Some(n) = query.num_hits {
                config.num_hits = n;
            }
            if let Some(t) = query.title_threshold {
                config.title_threshold = t;
            }
        }
        if let Some(network) = &self.network {
            if let Some(secs) = network.min_interval_secs
                && secs.is_finite()
                && secs >= 0.0
            {
                config.min_interval = Duration::from_secs_f64(secs);
            }
            if let Some(secs) = network.timeout_secs {
                config.timeout = Duration::from_secs(secs);
            }
            if let Some(ua) = &network.user_agent {
                config.user_agent = ua.clone();
            }
        }
        if let Some(dir) = self.paths.as_ref().and_then(|p| p.output_dir.as_ref()) {
            config.output_dir = PathBuf::from(dir);
        }
    }
}
