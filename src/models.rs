//! Modelos de dominio (geografía, candidatos de dirección y dirección confirmada).

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Provincia según el backend de geografía.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Province {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Zoom inicial sugerido para el mapa de la provincia.
    #[serde(default)]
    pub default_zoom: Option<u8>,
}

/// Ciudad/localidad según el backend de geografía.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "provinciaId")]
    pub province_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Un resultado de geocodificación. Efímero: se produce por consulta y
/// nunca se persiste; sólo la selección confirmada se copia al formulario.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GeocodedCandidate {
    pub street: String,
    pub number: String,
    pub nomenclatura: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl GeocodedCandidate {
    /// Clave de identidad derivada: nomenclatura + lat + lon concatenados.
    pub fn identity(&self) -> String {
        format!("{}{}{}", self.nomenclatura, self.latitude, self.longitude)
    }
}

/// Candidata a ciudad devuelta por la búsqueda de localidades de Georef,
/// ya resuelta la preferencia de categorías.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CityCandidate {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub province_id: String,
}

/// Subconjunto de campos de dirección que se almacena en un perfil o
/// propiedad. Los campos opcionales (depto, barrio) se cargan a mano.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedAddress {
    pub street: String,
    pub number: String,
    #[serde(default)]
    pub apartment: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    pub postal_code: String,
    pub nomenclatura: String,
    pub latitude: String,
    pub longitude: String,
    pub city_id: String,
    pub province_id: String,
}

impl ConfirmedAddress {
    /// Invariante de dirección parcial: si alguno de {calle, altura, código
    /// postal, ciudad, provincia} está presente, todos deben estarlo.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("calle", &self.street),
            ("altura", &self.number),
            ("código postal", &self.postal_code),
            ("ciudad", &self.city_id),
            ("provincia", &self.province_id),
        ];

        if fields.iter().all(|(_, v)| v.trim().is_empty()) {
            return Ok(());
        }

        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationIncomplete(missing.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_address() -> ConfirmedAddress {
        ConfirmedAddress {
            street: "Av. Libertador".into(),
            number: "1000".into(),
            postal_code: "1425".into(),
            nomenclatura: "AV. LIBERTADOR 1000, CABA".into(),
            latitude: "-34.58".into(),
            longitude: "-58.39".into(),
            city_id: "02".into(),
            province_id: "02".into(),
            ..Default::default()
        }
    }

    #[test]
    fn direccion_completa_es_valida() {
        assert!(full_address().validate().is_ok());
    }

    #[test]
    fn direccion_vacia_es_valida() {
        assert!(ConfirmedAddress::default().validate().is_ok());
    }

    #[test]
    fn direccion_parcial_se_rechaza_con_los_campos_faltantes() {
        let mut addr = full_address();
        addr.postal_code.clear();
        addr.city_id.clear();

        let err = addr.validate().unwrap_err();
        match err {
            AppError::ValidationIncomplete(missing) => {
                assert!(missing.contains("código postal"));
                assert!(missing.contains("ciudad"));
                assert!(!missing.contains("calle"));
            }
            other => panic!("error inesperado: {other}"),
        }
    }

    #[test]
    fn los_opcionales_no_afectan_la_validacion() {
        let mut addr = ConfirmedAddress::default();
        addr.apartment = Some("3B".into());
        addr.neighborhood = Some("Palermo".into());
        assert!(addr.validate().is_ok());
    }
}
