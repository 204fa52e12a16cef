use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use base64::Engine;

use crate::{
    app_state::{AppState, GallerySession},
    error::AppError,
    form::{FieldValue, FormHandle, MediaEntry, MemoryForm},
    gallery::{self, GalleryState, RawFile},
    geography::NewCity,
    models::{CityCandidate, ConfirmedAddress, GeocodedCandidate},
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSearchPayload {
    province_id: String,
    city_id: String,
    street: String,
    number: String,
    /// Dirección ya confirmada en el formulario, si existe: habilita la
    /// preselección cuando hay varios candidatos.
    #[serde(default)]
    nomenclator: Option<String>,
    #[serde(default)]
    latitude: Option<String>,
    #[serde(default)]
    longitude: Option<String>,
}

#[derive(Serialize)]
pub struct AddressCandidateDto {
    id: String,
    name: String,
    street: String,
    number: String,
    nomenclatura: String,
    latitude: String,
    longitude: String,
}

impl From<&GeocodedCandidate> for AddressCandidateDto {
    fn from(candidate: &GeocodedCandidate) -> Self {
        Self {
            id: candidate.identity(),
            name: candidate.nomenclatura.clone(),
            street: candidate.street.clone(),
            number: candidate.number.clone(),
            nomenclatura: candidate.nomenclatura.clone(),
            latitude: candidate.latitude.to_string(),
            longitude: candidate.longitude.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSearchResponse {
    generation: u64,
    candidates: Vec<AddressCandidateDto>,
    selected_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmSelectionPayload {
    street: String,
    number: String,
    nomenclatura: String,
    latitude: f64,
    longitude: f64,
    /// Campos que ya estaban cargados en el formulario y que la
    /// confirmación no pisa.
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    apartment: Option<String>,
    #[serde(default)]
    neighborhood: Option<String>,
    #[serde(default)]
    city_id: Option<String>,
    #[serde(default)]
    province_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitySearchPayload {
    province_id: String,
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityCandidateDto {
    id: String,
    name: String,
    latitude: String,
    longitude: String,
    provincie_id: String,
}

impl From<CityCandidate> for CityCandidateDto {
    fn from(city: CityCandidate) -> Self {
        Self {
            id: city.id,
            name: city.name,
            latitude: city.latitude.to_string(),
            longitude: city.longitude.to_string(),
            provincie_id: city.province_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryLoadPayload {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    documents: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryFilesPayload {
    files: Vec<IncomingFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingFile {
    name: String,
    #[serde(default)]
    mime_type: String,
    content_base64: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItemDto {
    id: String,
    kind: &'static str,
    name: String,
    extension: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryViewResponse {
    images: Vec<GalleryItemDto>,
    documents: Vec<GalleryItemDto>,
    added: usize,
    duplicates: usize,
    rejected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/georef/direcciones", post(search_addresses_handler))
        .route(
            "/api/georef/direcciones/confirmar",
            post(confirm_selection_handler),
        )
        .route("/api/georef/localidades", post(search_cities_handler))
        .route("/api/direcciones/validar", post(validate_address_handler))
        .route("/api/geografia/provincias", get(provinces_handler))
        .route(
            "/api/geografia/provincias/:province_id/ciudades",
            get(cities_by_province_handler),
        )
        .route("/api/geografia/ciudades", post(add_city_handler))
        .route(
            "/api/galeria/:form_id",
            get(gallery_view_handler).post(gallery_load_handler),
        )
        .route("/api/galeria/:form_id/archivos", post(gallery_add_files_handler))
        .route(
            "/api/galeria/:form_id/archivos/:item_id",
            delete(gallery_remove_handler),
        )
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(err: AppError) -> ApiError {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.to_string() })))
}

// --- Handlers de direcciones y localidades ---

#[axum::debug_handler]
async fn search_addresses_handler(
    State(state): State<AppState>,
    Json(payload): Json<AddressSearchPayload>,
) -> Result<Json<AddressSearchResponse>, ApiError> {
    let street_and_number = format!("{} {}", payload.street, payload.number);

    let search = state
        .resolver
        .search_candidates(&payload.province_id, &payload.city_id, &street_and_number)
        .await
        .map_err(error_response)?;

    // El formulario propietario vive en el cliente; se reconstruye acá lo
    // mínimo para aplicar la regla de preselección.
    let mut form = MemoryForm::new();
    if let Some(nomenclator) = &payload.nomenclator {
        form.set("address.nomenclator", FieldValue::Text(nomenclator.clone()));
    }
    if let Some(latitude) = &payload.latitude {
        form.set("address.latitude", FieldValue::Text(latitude.clone()));
    }
    if let Some(longitude) = &payload.longitude {
        form.set("address.longitude", FieldValue::Text(longitude.clone()));
    }

    // Si mientras tanto se lanzó otra búsqueda, esta respuesta ya está
    // superada y no debe mostrarse.
    if !state.resolver.is_current(search.generation) {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "Búsqueda superada por otra más reciente." })),
        ));
    }

    let selected_id = state
        .resolver
        .select_initial(&search.candidates, &form)
        .map(GeocodedCandidate::identity);

    Ok(Json(AddressSearchResponse {
        generation: search.generation,
        candidates: search.candidates.iter().map(AddressCandidateDto::from).collect(),
        selected_id,
    }))
}

#[axum::debug_handler]
async fn search_cities_handler(
    State(state): State<AppState>,
    Json(payload): Json<CitySearchPayload>,
) -> Result<Json<Vec<CityCandidateDto>>, ApiError> {
    let cities = state
        .resolver
        .resolve_city(&payload.province_id, &payload.name)
        .await
        .map_err(error_response)?;

    Ok(Json(cities.into_iter().map(CityCandidateDto::from).collect()))
}

#[axum::debug_handler]
async fn confirm_selection_handler(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmSelectionPayload>,
) -> Result<Json<ConfirmedAddress>, ApiError> {
    let candidate = GeocodedCandidate {
        street: payload.street,
        number: payload.number,
        nomenclatura: payload.nomenclatura,
        latitude: payload.latitude,
        longitude: payload.longitude,
    };

    let mut form = MemoryForm::new();
    let preloaded = [
        ("address.postalCode", payload.postal_code),
        ("address.apartment", payload.apartment),
        ("address.neighborhood", payload.neighborhood),
        ("address.city.id", payload.city_id),
        ("address.city.province.id", payload.province_id),
    ];
    for (path, value) in preloaded {
        if let Some(value) = value {
            form.set(path, FieldValue::Text(value));
        }
    }

    let confirmed = state.resolver.confirm_selection(&mut form, &candidate);
    info!("Dirección confirmada: {}", confirmed.nomenclatura);
    Ok(Json(confirmed))
}

#[axum::debug_handler]
async fn validate_address_handler(
    Json(address): Json<ConfirmedAddress>,
) -> Result<Json<serde_json::Value>, ApiError> {
    address.validate().map_err(error_response)?;
    Ok(Json(json!({ "valido": true })))
}

// --- Handlers del backend de geografía ---

#[axum::debug_handler]
async fn provinces_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let provinces = state.backend.provinces().await.map_err(error_response)?;
    Ok(Json(provinces))
}

#[axum::debug_handler]
async fn cities_by_province_handler(
    State(state): State<AppState>,
    Path(province_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cities = state
        .backend
        .cities_by_province(&province_id)
        .await
        .map_err(error_response)?;
    Ok(Json(cities))
}

#[axum::debug_handler]
async fn add_city_handler(
    State(state): State<AppState>,
    Json(payload): Json<NewCity>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.backend.add_city(&payload).await.map_err(error_response)?;
    info!("Ciudad agregada: {} ({})", created.name, created.id);
    Ok((StatusCode::CREATED, Json(created)))
}

// --- Handlers de la galería ---

#[axum::debug_handler]
async fn gallery_load_handler(
    State(state): State<AppState>,
    Path(form_id): Path<String>,
    Json(payload): Json<GalleryLoadPayload>,
) -> Result<Json<GalleryViewResponse>, ApiError> {
    let mut form = MemoryForm::new();
    form.set(
        "images",
        FieldValue::Media(payload.images.into_iter().map(MediaEntry::Url).collect()),
    );
    form.set(
        "documents",
        FieldValue::Media(payload.documents.into_iter().map(MediaEntry::Url).collect()),
    );

    let gallery_state = GalleryState::from_form(&form);
    let mut session = GallerySession {
        form,
        state: gallery_state,
    };
    state.reconciler.sync(&session.state, &mut session.form);
    let view = gallery_view(&session.state, None);

    // Reemplazar una sesión existente suelta su estado anterior y con él
    // sus vistas previas.
    state.galleries.lock().await.insert(form_id, session);
    Ok(Json(view))
}

#[axum::debug_handler]
async fn gallery_view_handler(
    State(state): State<AppState>,
    Path(form_id): Path<String>,
) -> Result<Json<GalleryViewResponse>, ApiError> {
    let galleries = state.galleries.lock().await;
    let session = galleries.get(&form_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No hay galería para ese formulario."})),
        )
    })?;

    Ok(Json(gallery_view(&session.state, None)))
}

#[axum::debug_handler]
async fn gallery_add_files_handler(
    State(state): State<AppState>,
    Path(form_id): Path<String>,
    Json(payload): Json<GalleryFilesPayload>,
) -> Result<Json<GalleryViewResponse>, ApiError> {
    let mut incoming = Vec::with_capacity(payload.files.len());
    for file in payload.files {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&file.content_base64)
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("Contenido inválido para '{}'.", file.name)})),
                )
            })?;
        incoming.push(RawFile::new(&file.name, &file.mime_type, bytes));
    }

    let mut galleries = state.galleries.lock().await;
    let session = galleries
        .entry(form_id)
        .or_insert_with(|| GallerySession {
            form: MemoryForm::new(),
            state: GalleryState::default(),
        });

    let outcome = state.reconciler.add_files(incoming, &mut session.state).await;
    state.reconciler.sync(&session.state, &mut session.form);

    Ok(Json(gallery_view(&session.state, Some(outcome))))
}

#[axum::debug_handler]
async fn gallery_remove_handler(
    State(state): State<AppState>,
    Path((form_id, item_id)): Path<(String, String)>,
) -> Result<Json<GalleryViewResponse>, ApiError> {
    let mut galleries = state.galleries.lock().await;
    let session = galleries.get_mut(&form_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No hay galería para ese formulario."})),
        )
    })?;

    state.reconciler.remove_item(&item_id, &mut session.state);
    state.reconciler.sync(&session.state, &mut session.form);

    Ok(Json(gallery_view(&session.state, None)))
}

/// Lista unificada por categoría: URLs persistidas primero (con su id por
/// índice), archivos en preparación después.
fn gallery_view(
    state: &GalleryState,
    outcome: Option<gallery::AddOutcome>,
) -> GalleryViewResponse {
    let images = unified_items(
        &state.image_urls,
        "url-",
        "Imagen",
        state
            .staged
            .iter()
            .filter(|f| f.category == gallery::FileCategory::Image),
    );
    let documents = unified_items(
        &state.document_urls,
        "doc-url-",
        "Documento",
        state
            .staged
            .iter()
            .filter(|f| f.category == gallery::FileCategory::Document),
    );

    let (added, duplicates, rejected) = outcome
        .as_ref()
        .map(|o| (o.added, o.duplicates, o.rejected))
        .unwrap_or_default();
    let message = outcome
        .filter(|o| o.duplicates > 0 || o.rejected > 0)
        .map(|o| o.to_string());

    GalleryViewResponse {
        images,
        documents,
        added,
        duplicates,
        rejected,
        message,
    }
}

fn unified_items<'a>(
    urls: &[String],
    prefix: &str,
    label: &str,
    staged: impl Iterator<Item = &'a gallery::StagedFile>,
) -> Vec<GalleryItemDto> {
    urls.iter()
        .enumerate()
        .map(|(index, url)| GalleryItemDto {
            id: format!("{prefix}{index}"),
            kind: "url",
            name: format!("{label} {}", index + 1),
            extension: gallery::url_extension(url),
            size: 0,
            url: Some(url.clone()),
            preview_url: None,
        })
        .chain(staged.map(|file| GalleryItemDto {
            id: file.id.clone(),
            kind: "file",
            name: file.file.name.clone(),
            extension: file.extension.clone(),
            size: file.size,
            url: None,
            preview_url: Some(file.preview.url().to_string()),
        }))
        .collect()
}

// --- Handlers de estado y apagado ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let galleries = state.galleries.lock().await;
    Json(json!({
        "status": "ok",
        "galerias_abiertas": galleries.len(),
        "vistas_previas_activas": state.reconciler.previews().active(),
    }))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
