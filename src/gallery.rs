//! Galería de imágenes y documentos de una entidad.
//!
//! Mantiene por categoría una única colección lógica: la unión de las URLs
//! ya persistidas en el backend y los archivos locales todavía sin subir.
//! Evita duplicados por hash de contenido (SHA-256) o por (nombre, tamaño),
//! y sincroniza la lista ordenada (URLs primero, archivos después) con los
//! campos `images` / `documents` del formulario en cada mutación.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::form::{FieldValue, FormHandle, MediaEntry};

/// Archivo crudo recibido del límite de entrada (drag-drop o selector).
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(name: &str, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Clasificación de un archivo por su MIME.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Document,
}

/// Imagen si el MIME empieza con `image/`; documento en cualquier otro
/// caso. Sin MIME declarado se adivina por la extensión.
pub fn classify(file: &RawFile) -> FileCategory {
    let mime = if file.mime_type.is_empty() {
        mime_guess::from_path(&file.name)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_default()
    } else {
        file.mime_type.clone()
    };

    if mime.starts_with("image/") {
        FileCategory::Image
    } else {
        FileCategory::Document
    }
}

/// Extensión en minúsculas del nombre de archivo.
pub fn file_extension(name: &str) -> String {
    name.rsplit('.')
        .next()
        .filter(|ext| *ext != name)
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Extensión del archivo apuntado por una URL persistida.
pub fn url_extension(url: &str) -> String {
    let file_name = url.rsplit('/').next().unwrap_or("");
    file_extension(file_name)
}

/// Digest SHA-256 del contenido completo, en hexadecimal.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Identificador de archivo en preparación: marca de tiempo en base 36 más
/// un componente aleatorio. Único dentro de una sesión, no criptográfico.
pub fn generate_id() -> String {
    let timestamp = Utc::now().timestamp_millis().max(0) as u128;
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", to_base36(timestamp), &random[..9])
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------
// Vistas previas (equivalente a object-URLs del navegador)
// ---------------------------------------------------------------------

/// Registro de vistas previas activas. Cada archivo en preparación crea una
/// al entrar y la libera al salir, por cualquier camino.
#[derive(Clone, Default)]
pub struct PreviewRegistry {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, id: &str) -> PreviewHandle {
        let url = format!("preview://{id}");
        self.inner.lock().unwrap().insert(url.clone());
        PreviewHandle {
            url,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Cantidad de vistas previas sin liberar.
    pub fn active(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Referencia con dueño único a una vista previa; se libera en el `Drop`,
/// de modo que todo camino de salida (quitar, reemplazar, desmontar) la
/// devuelve al registro.
pub struct PreviewHandle {
    url: String,
    registry: Weak<Mutex<HashSet<String>>>,
}

impl PreviewHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().unwrap().remove(&self.url);
        }
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewHandle").field("url", &self.url).finish()
    }
}

// ---------------------------------------------------------------------
// Estado de la galería
// ---------------------------------------------------------------------

/// Archivo local en preparación. `hash: None` significa que el cálculo
/// falló; la detección de duplicados cae entonces a (nombre, tamaño).
#[derive(Debug)]
pub struct StagedFile {
    pub id: String,
    pub file: Arc<RawFile>,
    pub category: FileCategory,
    pub extension: String,
    pub size: u64,
    pub hash: Option<String>,
    pub preview: PreviewHandle,
}

/// Estado de la galería de un formulario: archivos en preparación más las
/// URLs persistidas por categoría. Cada instancia de formulario posee el
/// suyo; no se comparte entre llamadores.
#[derive(Debug, Default)]
pub struct GalleryState {
    pub staged: Vec<StagedFile>,
    pub image_urls: Vec<String>,
    pub document_urls: Vec<String>,
}

impl GalleryState {
    pub fn from_form(form: &dyn FormHandle) -> Self {
        Self {
            staged: Vec::new(),
            image_urls: form.get_urls("images"),
            document_urls: form.get_urls("documents"),
        }
    }
}

/// Resultado de una pasada de `add_files`, para una única notificación
/// agrupada al usuario.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

impl fmt::Display for AddOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} archivos agregados, {} duplicados omitidos, {} rechazados por tamaño o tipo.",
            self.added, self.duplicates, self.rejected
        )
    }
}

/// ¿`file` duplica algún archivo ya en preparación? Por hash cuando ambos
/// lo tienen, o por (nombre, tamaño). Las URLs persistidas nunca entran en
/// esta comparación.
pub fn is_duplicate(file: &RawFile, hash: Option<&str>, existing: &[StagedFile]) -> bool {
    existing.iter().any(|staged| {
        if let (Some(existing_hash), Some(candidate_hash)) = (&staged.hash, hash) {
            if existing_hash == candidate_hash {
                return true;
            }
        }
        staged.file.name == file.name && staged.size == file.size()
    })
}

pub struct GalleryReconciler {
    max_files: usize,
    max_size_bytes: u64,
    previews: PreviewRegistry,
}

impl GalleryReconciler {
    pub fn new(max_files: usize, max_size_bytes: u64) -> Self {
        Self {
            max_files,
            max_size_bytes,
            previews: PreviewRegistry::new(),
        }
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    /// Incorpora archivos nuevos al estado, en el orden de entrada:
    /// 1. los que exceden el tamaño máximo se rechazan en silencio;
    /// 2. los que no entran en los cupos libres se truncan desde la cola;
    /// 3. los duplicados se omiten y se cuentan para una sola notificación.
    ///
    /// Los hashes se calculan en paralelo pero el resultado conserva el
    /// orden de entrada (se reensambla por índice, no por finalización).
    pub async fn add_files(&self, incoming: Vec<RawFile>, state: &mut GalleryState) -> AddOutcome {
        let mut outcome = AddOutcome::default();

        let sized: Vec<Arc<RawFile>> = incoming
            .into_iter()
            .filter(|file| {
                let fits = file.size() <= self.max_size_bytes;
                if !fits {
                    outcome.rejected += 1;
                }
                fits
            })
            .map(Arc::new)
            .collect();

        let available = self.max_files.saturating_sub(state.staged.len());
        let to_add: Vec<Arc<RawFile>> = sized.into_iter().take(available).collect();
        if to_add.is_empty() {
            return outcome;
        }

        let hashes = hash_files(&to_add).await;

        let mut accepted: Vec<StagedFile> = Vec::new();
        for (file, hash) in to_add.into_iter().zip(hashes) {
            let dup_in_staged = is_duplicate(&file, hash.as_deref(), &state.staged);
            let dup_in_batch = is_duplicate(&file, hash.as_deref(), &accepted);
            if dup_in_staged || dup_in_batch {
                outcome.duplicates += 1;
                continue;
            }

            let id = generate_id();
            accepted.push(StagedFile {
                preview: self.previews.create(&id),
                category: classify(&file),
                extension: file_extension(&file.name),
                size: file.size(),
                hash,
                file,
                id,
            });
        }

        outcome.added = accepted.len();
        state.staged.extend(accepted);
        outcome
    }

    /// Quita un elemento por identificador. El prefijo distingue URLs
    /// persistidas (`url-<i>` imágenes, `doc-url-<i>` documentos) de los
    /// archivos en preparación (id opaco generado).
    pub fn remove_item(&self, id: &str, state: &mut GalleryState) {
        if let Some(index) = id.strip_prefix("doc-url-").and_then(|i| i.parse::<usize>().ok()) {
            if index < state.document_urls.len() {
                state.document_urls.remove(index);
            }
        } else if let Some(index) = id.strip_prefix("url-").and_then(|i| i.parse::<usize>().ok()) {
            if index < state.image_urls.len() {
                state.image_urls.remove(index);
            }
        } else {
            // Soltar el StagedFile libera su vista previa (Drop).
            state.staged.retain(|file| file.id != id);
        }
    }

    /// Escribe en el formulario la lista unificada de cada categoría:
    /// URLs persistidas primero, archivos en preparación después, sin
    /// entradas vacías ni de relleno. El orden importa: la eliminación de
    /// URLs es por índice sobre esta misma lista.
    pub fn sync(&self, state: &GalleryState, form: &mut dyn FormHandle) {
        form.set(
            "images",
            FieldValue::Media(unified(state, FileCategory::Image, &state.image_urls)),
        );
        form.set(
            "documents",
            FieldValue::Media(unified(state, FileCategory::Document, &state.document_urls)),
        );
    }
}

fn unified(state: &GalleryState, category: FileCategory, urls: &[String]) -> Vec<MediaEntry> {
    urls.iter()
        .map(|url| MediaEntry::Url(url.clone()))
        .chain(
            state
                .staged
                .iter()
                .filter(|file| file.category == category)
                .map(|file| MediaEntry::File(Arc::clone(&file.file))),
        )
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Hash de cada archivo en un hilo bloqueante; `join_all` reensambla los
/// resultados en el orden de entrada. Un fallo de cálculo deja el archivo
/// sin hash en lugar de descartarlo.
async fn hash_files(files: &[Arc<RawFile>]) -> Vec<Option<String>> {
    let tasks = files.iter().map(|file| {
        let file = Arc::clone(file);
        tokio::task::spawn_blocking(move || hash_bytes(&file.bytes))
    });

    join_all(tasks)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!("No se pudo calcular el hash de un archivo: {err}");
                None
            }
        })
        .collect()
}
