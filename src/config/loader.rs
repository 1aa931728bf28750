use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::{ServerConfig, VirtualHostConfig};

fn format_for(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Toml,
    }
}

/// Load configuration from a single file using the config crate.
/// Supports multiple formats: TOML, JSON, YAML.
pub fn load_config(config_path: &str) -> Result<ServerConfig> {
    let path = Path::new(config_path);

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format_for(path),
        ))
        .build()
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let server_config: ServerConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;

    Ok(server_config)
}

/// Load configuration from a directory: a `gatehouse.{toml,json,yaml}` main
/// file plus one `*_vhost.*` file per virtual host, appended in file-name
/// order so reloads see a deterministic host list.
pub fn load_config_dir(dir: &str) -> Result<ServerConfig> {
    let dir = Path::new(dir);
    let main_file = ["gatehouse.toml", "gatehouse.json", "gatehouse.yaml"]
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
        .ok_or_else(|| {
            eyre::eyre!(
                "no gatehouse.{{toml,json,yaml}} found in {}",
                dir.display()
            )
        })?;

    let mut server_config = load_config(
        main_file
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", main_file.display()))?,
    )?;

    let mut vhost_files: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.ends_with("_vhost"))
        })
        .collect();
    vhost_files.sort();

    for path in vhost_files {
        let settings = Config::builder()
            .add_source(File::new(
                path.to_str()
                    .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
                format_for(&path),
            ))
            .build()
            .with_context(|| format!("Failed to read vhost config {}", path.display()))?;
        let vhost: VirtualHostConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to deserialize vhost config {}", path.display()))?;
        server_config.virtual_hosts.push(vhost);
    }

    Ok(server_config)
}

/// Dispatch on the path: directories use the vhost-file convention,
/// everything else is a single config document.
pub fn load(config_path: &str) -> Result<ServerConfig> {
    if Path::new(config_path).is_dir() {
        load_config_dir(config_path)
    } else {
        load_config(config_path)
    }
}
