//! Init command implementation

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Write a default config and create the database under `base_dir`
pub async fn cmd_init(base_dir: Option<PathBuf>, config_path: &Path, force: bool) -> Result<Config> {
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.init_paths(base_dir);
    config.paths.config_file = config_path.to_path_buf();

    std::fs::create_dir_all(&config.paths.base_dir)?;
    config.save()?;

    let db = Database::connect(&config).await?;
    db.close().await;

    info!("Initialized pricewatch at {:?}", config.paths.base_dir);
    Ok(config)
}
