//! Carga y gestión de configuración de la aplicación (Georef + backend).

use std::env;
use anyhow::{anyhow, Result};

/// URL pública del servicio Georef de datos.gob.ar.
pub const DEFAULT_GEOREF_BASE_URL: &str = "https://apis.datos.gob.ar/georef/api";

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub georef_base_url: String,

    pub backend_url: String,
    pub backend_token: Option<String>,

    /// Límites de la galería de archivos.
    pub max_gallery_files: usize,
    pub max_file_size_bytes: u64,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let backend_url = env::var("BACKEND_URL")
            .map_err(|_| anyhow!("Falta BACKEND_URL en el entorno"))?;
        let backend_token = env::var("BACKEND_TOKEN").ok();

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());
        let georef_base_url = env::var("GEOREF_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GEOREF_BASE_URL.to_string());

        let max_gallery_files = env::var("MAX_GALLERY_FILES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let max_file_size_mb: u64 = env::var("MAX_FILE_SIZE_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            server_addr,
            georef_base_url,
            backend_url,
            backend_token,
            max_gallery_files,
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
        })
    }
}
