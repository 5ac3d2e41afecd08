use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Sqlite { path: PathBuf },
    Memory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Sqlite {
            path: default_database_path_in(Path::new(".")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceptorConfig {
    #[serde(default = "default_database_name")]
    pub database: String,
    pub log_filter: Option<String>,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Default for ReceptorConfig {
    fn default() -> Self {
        Self {
            database: default_database_name(),
            log_filter: None,
            backend: BackendConfig::default(),
        }
    }
}

fn default_database_name() -> String {
    "main".to_string()
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("receptordb.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".receptordb").join("receptordb.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<ReceptorConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ReceptorConfig = toml::from_str(&contents)
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &ReceptorConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents).with_context(|| format!("failed to write config {}", path.display()))?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receptordb.toml");
        let config = ReceptorConfig {
            database: "shop".to_string(),
            backend: BackendConfig::Sqlite { path: dir.path().join("shop.db") },
            log_filter: Some("receptordb=debug".to_string()),
        };

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        assert_eq!(load_config(Some(&path)).unwrap(), Some(config));
        assert_eq!(load_config(Some(&dir.path().join("missing.toml"))).unwrap(), None);
    }

    #[test]
    fn test_invalid_config_names_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[backend]\nkind = \"cassandra\"\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ReceptorConfig = toml::from_str("[backend]\nkind = \"memory\"\n").unwrap();
        assert_eq!(config.database, "main");
        assert_eq!(config.backend, BackendConfig::Memory);
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn test_ensure_db_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = default_database_path_in(dir.path());
        ensure_db_dir(&db_path).unwrap();
        assert!(db_path.parent().unwrap().is_dir());
    }
}
