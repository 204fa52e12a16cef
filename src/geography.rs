//! Cliente del backend de geografía (provincias y ciudades).
//!
//! Es el colaborador que persiste las ciudades: la API sólo reenvía con el
//! token de sesión en la cabecera `Authorization`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::models::{City, Province};

/// Payload del alta de ciudad, con los datos elegidos en la búsqueda de
/// localidades más el código postal cargado por el usuario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCity {
    pub province_id: String,
    pub id: String,
    pub name: String,
    pub cp: String,
    pub latitude: String,
    pub longitude: String,
}

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BackendClient {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: cfg.backend_url.trim_end_matches('/').to_string(),
            token: cfg.backend_token.clone(),
        }
    }

    fn bearer(&self) -> Result<String> {
        let token = self.token.as_ref().ok_or(AppError::Unauthorized)?;
        Ok(format!("Bearer {token}"))
    }

    /// Listado completo de provincias.
    pub async fn provinces(&self) -> Result<Vec<Province>> {
        let url = format!("{}/geography/provinces", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.bearer()?)
            .send()
            .await
            .map_err(transport_error)?;

        decode(response).await
    }

    /// Ciudades registradas de una provincia.
    pub async fn cities_by_province(&self, province_id: &str) -> Result<Vec<City>> {
        let url = format!("{}/geography/provinces/{province_id}/cities", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.bearer()?)
            .send()
            .await
            .map_err(transport_error)?;

        decode(response).await
    }

    /// Alta de una ciudad inexistente en el backend.
    pub async fn add_city(&self, city: &NewCity) -> Result<City> {
        let url = format!("{}/geography/cities", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer()?)
            .json(city)
            .send()
            .await
            .map_err(transport_error)?;

        decode(response).await
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    AppError::Backend {
        status: 500,
        message: format!("Error de conexión con el backend: {err}"),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("Error del servidor: {status}"));
        return Err(AppError::Backend {
            status: status.as_u16(),
            message,
        });
    }

    response.json().await.map_err(|err| AppError::Backend {
        status: 500,
        message: format!("Respuesta inválida del backend: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_token() -> AppConfig {
        AppConfig {
            server_addr: "127.0.0.1:0".into(),
            georef_base_url: "http://localhost".into(),
            backend_url: "http://localhost:8080/".into(),
            backend_token: None,
            max_gallery_files: 10,
            max_file_size_bytes: 5 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn sin_token_las_llamadas_fallan_como_no_autorizado() {
        let client = BackendClient::from_config(&config_without_token());

        let err = client.cities_by_province("06").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn la_url_base_se_normaliza_sin_barra_final() {
        let client = BackendClient::from_config(&config_without_token());
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn el_payload_de_alta_usa_camel_case() {
        let city = NewCity {
            province_id: "06".into(),
            id: "06441030".into(),
            name: "Lanús".into(),
            cp: "1824".into(),
            latitude: "-34.70".into(),
            longitude: "-58.39".into(),
        };

        let json = serde_json::to_value(&city).unwrap();
        assert!(json.get("provinceId").is_some());
        assert!(json.get("cp").is_some());
    }
}
