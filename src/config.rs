use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub proxy: ProxyConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
  /// File this configuration was read from; `None` for built-in defaults
  #[serde(skip)]
  pub source: Option<PathBuf>,
}

/// Deploy-time routing tables and store version. Never mutated after load.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
  /// Name of the current store; changing it resets the cache on next activation
  pub version_tag: String,
  /// Origin the proxied site is served from; relative table entries resolve against it
  pub origin: Url,
  /// Served network-first: code and data that must track the latest deployment
  pub network_first: Vec<String>,
  /// Served cache-first: shell, pages and large static assets
  pub cache_first: Vec<String>,
  /// Hosts whose every URL is cache-first (third-party fonts)
  pub cache_first_hosts: Vec<String>,
  /// Regex matched against the full URL; matches are network-first
  pub project_data_pattern: String,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      version_tag: "portfolio-v2".to_string(),
      origin: Url::parse("http://localhost:8080/").expect("static origin parses"),
      network_first: [
        "/assets/css/base.css",
        "/assets/css/components.css",
        "/assets/css/effects.css",
        "/assets/css/gallery.css",
        "/assets/css/layout.css",
        "/assets/css/project-detail.css",
        "/assets/js/app.js",
        "/assets/js/config.js",
        "/assets/js/effects.js",
        "/assets/js/features.js",
        "/assets/js/gallery.js",
        "/assets/js/interactions.js",
        "/assets/js/main.js",
        "/assets/js/utils.js",
      ]
      .map(String::from)
      .to_vec(),
      cache_first: [
        "/",
        "/index.html",
        "/404.html",
        "/sw.js",
        "/favicon.png",
        "/assets/cursors/handgrabbing.svg",
        "/assets/cursors/handopen.svg",
        "/assets/cursors/handpointing.svg",
        "/assets/images/embed.png",
        "/assets/images/pc.jpeg",
        "/assets/images/pfp400x400.jpg",
        "/discord/",
        "https://fonts.googleapis.com/css2?family=Special+Gothic+Condensed+One&family=Special+Gothic+Expanded+One&display=swap",
      ]
      .map(String::from)
      .to_vec(),
      cache_first_hosts: vec![
        "fonts.googleapis.com".to_string(),
        "fonts.gstatic.com".to_string(),
      ],
      project_data_pattern: r"/projects/post\d+\.json$".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/swcache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub user_agent: String,
  /// Request timeout; unset means the client never times out on its own
  pub timeout_secs: Option<u64>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      user_agent: concat!("swcache/", env!("CARGO_PKG_VERSION")).to_string(),
      timeout_secs: None,
    }
  }
}

impl NetworkConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Falls back to the built-in tables when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => {
        let mut config = Self::load_from_path(&p)?;
        config.source = Some(p);
        Ok(config)
      }
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Checks shared by file-loaded values and command line overrides.
  pub fn validate(&self) -> Result<()> {
    if self.proxy.version_tag.trim().is_empty() {
      return Err(eyre!("proxy.version_tag must not be empty"));
    }
    Ok(())
  }

  /// Database path, falling back to the per-user data directory.
  pub fn storage_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.storage.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swcache").join("cache.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_site_tables() {
    let config = Config::default();
    assert_eq!(config.proxy.version_tag, "portfolio-v2");
    assert_eq!(config.proxy.network_first.len(), 14);
    assert_eq!(config.proxy.cache_first.len(), 13);
    assert!(config.proxy.cache_first.iter().any(|u| u == "/index.html"));
    assert!(config.network.timeout().is_none());
  }

  #[test]
  fn test_parse_partial_yaml_keeps_defaults() {
    let yaml = r#"
proxy:
  version_tag: v3
  origin: "https://me.example/"
  network_first: ["/style.css"]
  cache_first: ["/index.html"]
network:
  timeout_secs: 5
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.proxy.version_tag, "v3");
    assert_eq!(config.proxy.origin.as_str(), "https://me.example/");
    assert_eq!(config.proxy.network_first, vec!["/style.css"]);
    assert_eq!(config.proxy.cache_first_hosts.len(), 2);
    assert_eq!(config.proxy.project_data_pattern, r"/projects/post\d+\.json$");
    assert_eq!(config.network.timeout(), Some(Duration::from_secs(5)));
  }

  #[test]
  fn test_empty_version_tag_rejected() {
    let yaml = "proxy:\n  version_tag: \"  \"\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_validate_after_override() {
    let mut config = Config::default();
    assert!(config.validate().is_ok());
    config.proxy.version_tag = String::new();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_load_records_source() {
    let dir = std::env::temp_dir().join(format!("swcache-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("swcache.yaml");
    std::fs::write(&path, "proxy:\n  version_tag: v9\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.proxy.version_tag, "v9");
    assert_eq!(config.source.as_deref(), Some(path.as_path()));
    assert!(Config::default().source.is_none());

    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn test_explicit_missing_path_errors() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_storage_path_override() {
    let config = Config {
      storage: StorageConfig {
        path: Some(PathBuf::from("/tmp/x.db")),
      },
      ..Config::default()
    };
    assert_eq!(config.storage_path().unwrap(), PathBuf::from("/tmp/x.db"));
  }
}
