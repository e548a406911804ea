use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::{Result, WalletError};

pub const APP_QUALIFIER: &str = "io";
pub const APP_ORG: &str = "walletsync";
pub const APP_NAME: &str = "wallet";

pub const DATABASE_FILE: &str = "wallet.db";
pub const CONFIG_FILE: &str = "config.json";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("WALLET_DATA_DIR") {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| WalletError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILE)
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}
