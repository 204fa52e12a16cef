//! Resolución de direcciones: de (provincia, ciudad, calle + altura) a un
//! único candidato geocodificado confirmado por el usuario.
//!
//! Dos políticas de desempate conviven a propósito:
//!   - direcciones: gana la primera vista dentro del umbral de cercanía;
//!   - localidades: dentro de un grupo homónimo se prefiere la primera
//!     cuya categoría no sea "Entidad".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::{AppError, Result};
use crate::form::{FieldValue, FormHandle};
use crate::georef::{GeorefApi, LocalidadGeoref};
use crate::models::{CityCandidate, ConfirmedAddress, GeocodedCandidate};

/// Umbral de cercanía entre coordenadas (~100 metros).
pub const COORD_EPSILON: f64 = 0.001;

const CATEGORIA_ENTIDAD: &str = "Entidad";
const CATEGORIA_COMPONENTE: &str = "Componente de localidad compuesta";

/// Resultado de una búsqueda, sellado con su generación para que el
/// llamador descarte respuestas de búsquedas ya superadas.
#[derive(Debug, Clone)]
pub struct CandidateSearch {
    pub generation: u64,
    pub candidates: Vec<GeocodedCandidate>,
}

pub struct AddressResolver {
    georef: Arc<dyn GeorefApi>,
    generation: AtomicU64,
}

impl AddressResolver {
    pub fn new(georef: Arc<dyn GeorefApi>) -> Self {
        Self {
            georef,
            generation: AtomicU64::new(0),
        }
    }

    /// Busca candidatos para `street_and_number` (calle y altura unidas por
    /// un espacio) dentro de la ciudad indicada. Una lista vacía es un
    /// estado terminal válido, no un error.
    pub async fn search_candidates(
        &self,
        province_id: &str,
        city_id: &str,
        street_and_number: &str,
    ) -> Result<CandidateSearch> {
        if province_id.trim().is_empty() || city_id.trim().is_empty() {
            return Err(AppError::ValidationIncomplete("provincia, ciudad".into()));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let raw = self
            .georef
            .direcciones(province_id, city_id, street_and_number)
            .await?;

        let candidates = dedup_candidates(raw);
        info!(
            "Búsqueda de direcciones '{street_and_number}': {} candidatos tras deduplicar",
            candidates.len()
        );

        Ok(CandidateSearch {
            generation,
            candidates,
        })
    }

    /// `true` si `generation` sigue correspondiendo a la última búsqueda
    /// lanzada; los resultados de generaciones anteriores se descartan.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Selección inicial sin intervención del usuario: con un único
    /// candidato se elige solo; con varios, se preselecciona el que
    /// coincida con una dirección ya confirmada en el formulario.
    pub fn select_initial<'a>(
        &self,
        candidates: &'a [GeocodedCandidate],
        form: &dyn FormHandle,
    ) -> Option<&'a GeocodedCandidate> {
        if candidates.len() == 1 {
            return candidates.first();
        }

        let existing_nomenclator = form.get_text("address.nomenclator");
        let existing_lat = form.get_text("address.latitude");
        let existing_lon = form.get_text("address.longitude");

        if existing_nomenclator.is_none() && (existing_lat.is_none() || existing_lon.is_none()) {
            return None;
        }

        candidates.iter().find(|candidate| {
            if let (Some(nom), Some(lat), Some(lon)) =
                (&existing_nomenclator, &existing_lat, &existing_lon)
            {
                if candidate.identity() == format!("{nom}{lat}{lon}") {
                    return true;
                }
            }

            if let (Some(lat), Some(lon)) = (&existing_lat, &existing_lon) {
                if let (Ok(lat), Ok(lon)) = (lat.parse::<f64>(), lon.parse::<f64>()) {
                    return (candidate.latitude - lat).abs() < COORD_EPSILON
                        && (candidate.longitude - lon).abs() < COORD_EPSILON;
                }
            }

            false
        })
    }

    /// Copia el candidato elegido a los campos `address.*` del formulario.
    /// El código postal y el departamento no se tocan: los carga el usuario
    /// por separado.
    pub fn confirm_selection(
        &self,
        form: &mut dyn FormHandle,
        candidate: &GeocodedCandidate,
    ) -> ConfirmedAddress {
        form.set(
            "address.latitude",
            FieldValue::Text(candidate.latitude.to_string()),
        );
        form.set(
            "address.longitude",
            FieldValue::Text(candidate.longitude.to_string()),
        );
        form.set(
            "address.nomenclator",
            FieldValue::Text(candidate.nomenclatura.clone()),
        );
        form.set("address.street", FieldValue::Text(candidate.street.clone()));
        form.set("address.number", FieldValue::Text(candidate.number.clone()));

        ConfirmedAddress {
            street: candidate.street.clone(),
            number: candidate.number.clone(),
            apartment: form.get_text("address.apartment"),
            neighborhood: form.get_text("address.neighborhood"),
            postal_code: form.get_text("address.postalCode").unwrap_or_default(),
            nomenclatura: candidate.nomenclatura.clone(),
            latitude: candidate.latitude.to_string(),
            longitude: candidate.longitude.to_string(),
            city_id: form.get_text("address.city.id").unwrap_or_default(),
            province_id: form
                .get_text("address.city.province.id")
                .unwrap_or_default(),
        }
    }

    /// Búsqueda de localidades para el alta de una ciudad nueva.
    pub async fn resolve_city(
        &self,
        province_id: &str,
        name_query: &str,
    ) -> Result<Vec<CityCandidate>> {
        if province_id.trim().is_empty() {
            return Err(AppError::ValidationIncomplete("provincia".into()));
        }

        let raw = self.georef.localidades(province_id, name_query).await?;
        Ok(resolve_city_candidates(raw))
    }
}

/// Deduplica resultados crudos de `/direcciones`: dos lugares son el mismo
/// si ambas coordenadas difieren en menos de [`COORD_EPSILON`]. Gana el
/// primero visto.
fn dedup_candidates(raw: Vec<crate::georef::DireccionGeoref>) -> Vec<GeocodedCandidate> {
    let mut filtered: Vec<GeocodedCandidate> = Vec::new();

    for current in raw {
        let is_duplicate = filtered.iter().any(|existing| {
            (existing.latitude - current.ubicacion_lat).abs() < COORD_EPSILON
                && (existing.longitude - current.ubicacion_lon).abs() < COORD_EPSILON
        });

        if !is_duplicate {
            filtered.push(GeocodedCandidate {
                street: current.calle_nombre,
                number: current.altura_valor,
                nomenclatura: current.nomenclatura,
                latitude: current.ubicacion_lat,
                longitude: current.ubicacion_lon,
            });
        }
    }

    filtered
}

/// Agrupa localidades homónimas y resuelve cada grupo con la preferencia
/// de categorías: la primera que no sea "Entidad", o la primera del grupo
/// si todas lo son. Las "Componente de localidad compuesta" se filtran
/// antes de agrupar.
fn resolve_city_candidates(raw: Vec<LocalidadGeoref>) -> Vec<CityCandidate> {
    let mut groups: Vec<(String, Vec<LocalidadGeoref>)> = Vec::new();

    for localidad in raw {
        if localidad.categoria == CATEGORIA_COMPONENTE {
            continue;
        }
        match groups.iter_mut().find(|(name, _)| *name == localidad.nombre) {
            Some((_, group)) => group.push(localidad),
            None => groups.push((localidad.nombre.clone(), vec![localidad])),
        }
    }

    groups
        .into_iter()
        .map(|(_, group)| {
            let chosen = if group.len() == 1 {
                &group[0]
            } else {
                group
                    .iter()
                    .find(|city| city.categoria != CATEGORIA_ENTIDAD)
                    .unwrap_or(&group[0])
            };

            CityCandidate {
                id: chosen.id.clone(),
                name: chosen.nombre.clone(),
                latitude: chosen.centroide_lat,
                longitude: chosen.centroide_lon,
                province_id: chosen.provincia_id.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::MemoryForm;
    use crate::georef::DireccionGeoref;
    use async_trait::async_trait;

    struct FakeGeoref {
        direcciones: Vec<DireccionGeoref>,
        localidades: Vec<LocalidadGeoref>,
        fail: bool,
    }

    impl FakeGeoref {
        fn with_direcciones(direcciones: Vec<DireccionGeoref>) -> Self {
            Self {
                direcciones,
                localidades: vec![],
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                direcciones: vec![],
                localidades: vec![],
                fail: true,
            }
        }
    }

    #[async_trait]
    impl GeorefApi for FakeGeoref {
        async fn direcciones(
            &self,
            _provincia: &str,
            _localidad: &str,
            _direccion: &str,
        ) -> crate::error::Result<Vec<DireccionGeoref>> {
            if self.fail {
                return Err(AppError::GeocodingUnavailable("sin conexión".into()));
            }
            Ok(self.direcciones.clone())
        }

        async fn localidades(
            &self,
            _provincia: &str,
            _nombre: &str,
        ) -> crate::error::Result<Vec<LocalidadGeoref>> {
            if self.fail {
                return Err(AppError::GeocodingUnavailable("sin conexión".into()));
            }
            Ok(self.localidades.clone())
        }
    }

    fn direccion(nombre: &str, altura: &str, lat: f64, lon: f64) -> DireccionGeoref {
        DireccionGeoref {
            calle_nombre: nombre.to_string(),
            altura_valor: altura.to_string(),
            nomenclatura: format!("{nombre} {altura}, CABA"),
            ubicacion_lat: lat,
            ubicacion_lon: lon,
        }
    }

    fn localidad(id: &str, nombre: &str, categoria: &str) -> LocalidadGeoref {
        LocalidadGeoref {
            id: id.to_string(),
            nombre: nombre.to_string(),
            categoria: categoria.to_string(),
            centroide_lat: -34.0,
            centroide_lon: -58.0,
            provincia_id: "06".to_string(),
        }
    }

    #[test]
    fn dos_resultados_cercanos_quedan_en_uno_y_gana_el_primero() {
        let candidates = dedup_candidates(vec![
            direccion("CALLAO", "1500", -34.6000, -58.3900),
            direccion("CALLAO", "1500", -34.6004, -58.3905),
            direccion("CALLAO", "1500", -34.6100, -58.3900),
        ]);

        assert_eq!(candidates.len(), 2);
        assert!((candidates[0].latitude + 34.6000).abs() < f64::EPSILON);
    }

    #[test]
    fn la_cercania_exige_ambos_ejes_dentro_del_umbral() {
        let candidates = dedup_candidates(vec![
            direccion("MITRE", "100", -34.600, -58.390),
            direccion("MITRE", "100", -34.6005, -58.395),
        ]);

        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn en_grupos_homonimos_se_prefiere_la_no_entidad() {
        let resolved = resolve_city_candidates(vec![
            localidad("1", "San Martín", "Entidad"),
            localidad("2", "San Martín", "Localidad simple"),
            localidad("3", "San Martín", "Localidad simple"),
        ]);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "2");
    }

    #[test]
    fn si_todas_son_entidad_gana_la_primera_del_grupo() {
        let resolved = resolve_city_candidates(vec![
            localidad("1", "Belén", "Entidad"),
            localidad("2", "Belén", "Entidad"),
        ]);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "1");
    }

    #[test]
    fn las_componentes_de_localidad_compuesta_se_filtran() {
        let resolved = resolve_city_candidates(vec![
            localidad("1", "Lanús", CATEGORIA_COMPONENTE),
            localidad("2", "Avellaneda", "Localidad simple"),
        ]);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "Avellaneda");
    }

    #[tokio::test]
    async fn un_unico_candidato_se_selecciona_automaticamente() {
        let georef = Arc::new(FakeGeoref::with_direcciones(vec![direccion(
            "Av. Libertador",
            "1000",
            -34.58,
            -58.39,
        )]));
        let resolver = AddressResolver::new(georef);
        let form = MemoryForm::new();

        let search = resolver
            .search_candidates("02", "02000010", "Av. Libertador 1000")
            .await
            .unwrap();
        let selected = resolver.select_initial(&search.candidates, &form);

        assert_eq!(selected.unwrap().street, "Av. Libertador");
    }

    #[tokio::test]
    async fn con_varios_candidatos_se_preselecciona_la_direccion_ya_confirmada() {
        let georef = Arc::new(FakeGeoref::with_direcciones(vec![
            direccion("RIVADAVIA", "500", -34.60, -58.37),
            direccion("RIVADAVIA", "500", -34.70, -58.50),
        ]));
        let resolver = AddressResolver::new(georef);
        let form = MemoryForm::new()
            .with_text("address.latitude", "-34.7002")
            .with_text("address.longitude", "-58.5003");

        let search = resolver
            .search_candidates("02", "02000010", "RIVADAVIA 500")
            .await
            .unwrap();
        let selected = resolver.select_initial(&search.candidates, &form).unwrap();

        assert!((selected.latitude + 34.70).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn sin_coincidencias_previas_no_hay_preseleccion() {
        let georef = Arc::new(FakeGeoref::with_direcciones(vec![
            direccion("RIVADAVIA", "500", -34.60, -58.37),
            direccion("RIVADAVIA", "500", -34.70, -58.50),
        ]));
        let resolver = AddressResolver::new(georef);
        let form = MemoryForm::new();

        let search = resolver
            .search_candidates("02", "02000010", "RIVADAVIA 500")
            .await
            .unwrap();
        assert!(resolver.select_initial(&search.candidates, &form).is_none());
    }

    #[tokio::test]
    async fn confirmar_escribe_la_direccion_sin_tocar_el_codigo_postal() {
        let resolver = AddressResolver::new(Arc::new(FakeGeoref::with_direcciones(vec![])));
        let mut form = MemoryForm::new()
            .with_text("address.postalCode", "1425")
            .with_text("address.city.id", "02000010")
            .with_text("address.city.province.id", "02");

        let candidate = GeocodedCandidate {
            street: "Av. Libertador".into(),
            number: "1000".into(),
            nomenclatura: "AV. LIBERTADOR 1000, CABA".into(),
            latitude: -34.58,
            longitude: -58.39,
        };

        let confirmed = resolver.confirm_selection(&mut form, &candidate);

        assert_eq!(form.get_text("address.street").as_deref(), Some("Av. Libertador"));
        assert_eq!(form.get_text("address.latitude").as_deref(), Some("-34.58"));
        assert_eq!(
            form.get_text("address.nomenclator").as_deref(),
            Some("AV. LIBERTADOR 1000, CABA")
        );
        assert_eq!(form.get_text("address.postalCode").as_deref(), Some("1425"));
        assert_eq!(confirmed.postal_code, "1425");
        assert_eq!(confirmed.city_id, "02000010");
        assert!(confirmed.validate().is_ok());
    }

    #[tokio::test]
    async fn una_nueva_busqueda_invalida_la_generacion_anterior() {
        let resolver = AddressResolver::new(Arc::new(FakeGeoref::with_direcciones(vec![])));

        let first = resolver
            .search_candidates("02", "02000010", "CALLAO 1500")
            .await
            .unwrap();
        assert!(resolver.is_current(first.generation));

        let second = resolver
            .search_candidates("02", "02000010", "CALLAO 1600")
            .await
            .unwrap();
        assert!(!resolver.is_current(first.generation));
        assert!(resolver.is_current(second.generation));
    }

    #[tokio::test]
    async fn sin_provincia_o_ciudad_no_se_consulta_al_servicio() {
        let resolver = AddressResolver::new(Arc::new(FakeGeoref::failing()));

        let err = resolver.search_candidates("", "02", "X 1").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationIncomplete(_)));
    }

    #[tokio::test]
    async fn la_caida_del_servicio_se_reporta_como_no_disponible() {
        let resolver = AddressResolver::new(Arc::new(FakeGeoref::failing()));

        let err = resolver
            .search_candidates("02", "02000010", "CALLAO 1500")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GeocodingUnavailable(_)));
    }
}
