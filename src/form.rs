//! Contrato mínimo del formulario propietario.
//!
//! Los componentes de dirección y galería no conocen la librería de
//! formularios concreta: reciben un [`FormHandle`] (lectura/escritura por
//! ruta) inyectado explícitamente, lo que permite probarlos con un
//! [`MemoryForm`] en memoria.

use std::collections::HashMap;
use std::sync::Arc;

use crate::gallery::RawFile;

/// Valor de un campo del formulario.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Text(String),
    /// Lista ordenada de medios (campos `images` / `documents`).
    Media(Vec<MediaEntry>),
}

/// Elemento de un campo de medios: o bien una URL ya persistida en el
/// backend, o bien un archivo local todavía sin subir.
#[derive(Debug, Clone)]
pub enum MediaEntry {
    Url(String),
    File(Arc<RawFile>),
}

impl MediaEntry {
    /// Entradas nulas o de relleno que el `sync` descarta.
    pub fn is_empty(&self) -> bool {
        match self {
            MediaEntry::Url(url) => url.trim().is_empty(),
            MediaEntry::File(_) => false,
        }
    }
}

/// Lectura/escritura por ruta sobre el formulario propietario.
pub trait FormHandle {
    fn get(&self, path: &str) -> Option<&FieldValue>;
    fn set(&mut self, path: &str, value: FieldValue);

    /// Valor de texto del campo, si existe y no está vacío.
    fn get_text(&self, path: &str) -> Option<String> {
        match self.get(path) {
            Some(FieldValue::Text(text)) if !text.trim().is_empty() => Some(text.clone()),
            _ => None,
        }
    }

    /// Lista de medios del campo (vacía si el campo no existe).
    fn get_media(&self, path: &str) -> Vec<MediaEntry> {
        match self.get(path) {
            Some(FieldValue::Media(entries)) => entries.clone(),
            _ => Vec::new(),
        }
    }

    /// URLs ya persistidas del campo de medios, en su orden original.
    fn get_urls(&self, path: &str) -> Vec<String> {
        self.get_media(path)
            .into_iter()
            .filter_map(|entry| match entry {
                MediaEntry::Url(url) => Some(url),
                MediaEntry::File(_) => None,
            })
            .collect()
    }
}

/// Implementación en memoria de [`FormHandle`].
#[derive(Debug, Default)]
pub struct MemoryForm {
    values: HashMap<String, FieldValue>,
}

impl MemoryForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, path: &str, value: &str) -> Self {
        self.set(path, FieldValue::Text(value.to_string()));
        self
    }
}

impl FormHandle for MemoryForm {
    fn get(&self, path: &str) -> Option<&FieldValue> {
        self.values.get(path)
    }

    fn set(&mut self, path: &str, value: FieldValue) {
        self.values.insert(path.to_string(), value);
    }
}
