use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read},
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};
use tracing::{error, info};

use crate::error::AppError;

pub const DEFAULT_SETTINGS_PATH: &str = "core/settings.json";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Settings {
    pub ipv4_addr: Ipv4Setting,
    pub port: U16Setting,
    pub api_root: StrSetting,
    pub repo_owner: StrSetting,
    pub repo_name: StrSetting,
    pub site_root: StrSetting,
    pub form_endpoint: StrSetting,
    pub audit_path: StrSetting,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StrSetting {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct U16Setting {
    pub name: String,
    pub value: u16,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Ipv4Setting {
    pub name: String,
    pub value: Ipv4Addr,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|error| load_error(path, error))?;
        let mut buffer = Vec::new();
        BufReader::new(file)
            .read_to_end(&mut buffer)
            .map_err(|error| load_error(path, error))?;
        let settings: Settings =
            serde_json::from_slice(&buffer).map_err(|error| load_error(path, error))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Writes the settings as pretty JSON, creating parent directories.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|error| AppError::Config(error.to_string()))?;
        info!("Exported settings to {}", path.display());
        Ok(())
    }

    pub fn new() -> Self {
        Settings {
            ipv4_addr: Ipv4Setting {
                name: "Ipv4 Address".to_string(),
                value: Ipv4Addr::new(127, 0, 0, 1),
            },
            port: U16Setting {
                name: "Port".to_string(),
                value: 4010,
            },
            api_root: StrSetting {
                name: "Hosting API root".to_string(),
                value: "https://api.github.com".to_string(),
            },
            repo_owner: StrSetting {
                name: "Repository owner".to_string(),
                value: "atelier".to_string(),
            },
            repo_name: StrSetting {
                name: "Repository name".to_string(),
                value: "atelier.github.io".to_string(),
            },
            site_root: StrSetting {
                name: "Site root (directory or URL)".to_string(),
                value: "site".to_string(),
            },
            form_endpoint: StrSetting {
                name: "Form endpoint".to_string(),
                value: "https://formspree.io/f/your-form-id".to_string(),
            },
            audit_path: StrSetting {
                name: "Form audit directory".to_string(),
                value: "audit".to_string(),
            },
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((self.ipv4_addr.value, self.port.value))
    }

    pub fn audit_dir(&self) -> PathBuf {
        PathBuf::from(&self.audit_path.value)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new()
    }
}

fn load_error(path: &Path, error: impl std::fmt::Display) -> AppError {
    error!("Settings load error ({}): {}", path.display(), error);
    AppError::Config(format!("{}: {}", path.display(), error))
}
