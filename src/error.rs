//! Taxonomía de errores del dominio (georreferenciación + backend).

use thiserror::Error;

/// Error principal de la aplicación.
///
/// Los rechazos de archivos (tamaño, duplicados) NO son errores: se
/// acumulan como contadores y se informan al usuario en una sola
/// notificación. Ver `gallery::AddOutcome`.
#[derive(Error, Debug)]
pub enum AppError {
    /// El servicio Georef no respondió o respondió con un estado de error.
    /// No hay reintento automático; el llamador conserva la lista anterior.
    #[error("Servicio de georreferenciación no disponible: {0}")]
    GeocodingUnavailable(String),

    /// Dirección parcial: si alguno de los campos obligatorios está
    /// presente, todos deben estarlo.
    #[error("Dirección incompleta: faltan {0}")]
    ValidationIncomplete(String),

    /// Falta el token de sesión para hablar con el backend.
    #[error("No autorizado")]
    Unauthorized,

    /// Respuesta de error del backend de geografía.
    #[error("Error del backend ({status}): {message}")]
    Backend { status: u16, message: String },
}

impl AppError {
    /// Código HTTP con el que se expone este error en la API.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::GeocodingUnavailable(_) => 502,
            AppError::ValidationIncomplete(_) => 422,
            AppError::Unauthorized => 401,
            AppError::Backend { status, .. } => *status,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
