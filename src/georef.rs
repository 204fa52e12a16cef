//! Cliente del servicio Georef (apis.datos.gob.ar).
//!
//! API pública:
//!   - trait `GeorefApi` (para inyectar dobles en tests)
//!   - `HttpGeorefClient::new(base_url)`
//!
//! Los registros con coordenadas no numéricas se descartan uno a uno:
//! un dato malo no invalida la búsqueda completa.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::{AppError, Result};

/// Registro crudo de dirección devuelto por `/direcciones` (aplanado).
#[derive(Debug, Clone, PartialEq)]
pub struct DireccionGeoref {
    pub calle_nombre: String,
    pub altura_valor: String,
    pub nomenclatura: String,
    pub ubicacion_lat: f64,
    pub ubicacion_lon: f64,
}

/// Registro crudo de localidad devuelto por `/localidades` (aplanado).
#[derive(Debug, Clone, PartialEq)]
pub struct LocalidadGeoref {
    pub id: String,
    pub nombre: String,
    pub categoria: String,
    pub centroide_lat: f64,
    pub centroide_lon: f64,
    pub provincia_id: String,
}

/// Contrato del servicio de geocodificación.
#[async_trait]
pub trait GeorefApi: Send + Sync {
    /// Direcciones candidatas para `direccion` (calle + altura) dentro de
    /// una localidad de una provincia.
    async fn direcciones(
        &self,
        provincia: &str,
        localidad: &str,
        direccion: &str,
    ) -> Result<Vec<DireccionGeoref>>;

    /// Localidades por nombre dentro de una provincia.
    async fn localidades(&self, provincia: &str, nombre: &str) -> Result<Vec<LocalidadGeoref>>;
}

/// Cliente HTTP real sobre reqwest.
pub struct HttpGeorefClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGeorefClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::GeocodingUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::GeocodingUnavailable(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| AppError::GeocodingUnavailable(e.to_string()))
    }
}

#[async_trait]
impl GeorefApi for HttpGeorefClient {
    async fn direcciones(
        &self,
        provincia: &str,
        localidad: &str,
        direccion: &str,
    ) -> Result<Vec<DireccionGeoref>> {
        let body = self
            .get_json(
                "direcciones",
                &[
                    ("provincia", provincia),
                    ("localidad", localidad),
                    ("direccion", direccion),
                    ("campos", "estandar"),
                    ("aplanar", "true"),
                    ("max", "1000"),
                ],
            )
            .await?;

        Ok(parse_array(&body, "direcciones", parse_direccion))
    }

    async fn localidades(&self, provincia: &str, nombre: &str) -> Result<Vec<LocalidadGeoref>> {
        let body = self
            .get_json(
                "localidades",
                &[
                    ("provincia", provincia),
                    ("nombre", nombre),
                    ("campos", "completo"),
                    ("aplanar", "true"),
                    ("max", "1000"),
                ],
            )
            .await?;

        Ok(parse_array(&body, "localidades", parse_localidad))
    }
}

fn parse_array<T>(body: &Value, key: &str, parse: fn(&Value) -> Option<T>) -> Vec<T> {
    let Some(items) = body.get(key).and_then(Value::as_array) else {
        warn!("Respuesta de Georef sin el campo '{key}'");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let parsed = parse(item);
            if parsed.is_none() {
                warn!("Registro de Georef descartado por datos inválidos: {item}");
            }
            parsed
        })
        .collect()
}

/// Coordenada numérica o numérica-en-string; cualquier otra cosa es un
/// error de datos del registro.
fn coord(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value?.as_str().map(str::to_string)
}

/// La altura puede venir como número o como texto según el registro.
fn altura(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn parse_direccion(item: &Value) -> Option<DireccionGeoref> {
    Some(DireccionGeoref {
        calle_nombre: text(item.get("calle_nombre"))?,
        altura_valor: altura(item.get("altura_valor"))?,
        nomenclatura: text(item.get("nomenclatura"))?,
        ubicacion_lat: coord(item.get("ubicacion_lat"))?,
        ubicacion_lon: coord(item.get("ubicacion_lon"))?,
    })
}

fn parse_localidad(item: &Value) -> Option<LocalidadGeoref> {
    Some(LocalidadGeoref {
        id: text(item.get("id"))?,
        nombre: text(item.get("nombre"))?,
        categoria: text(item.get("categoria"))?,
        centroide_lat: coord(item.get("centroide_lat"))?,
        centroide_lon: coord(item.get("centroide_lon"))?,
        provincia_id: text(item.get("provincia_id"))?,
    })
}
