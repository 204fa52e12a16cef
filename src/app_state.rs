use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::{
    address::AddressResolver,
    config::AppConfig,
    form::MemoryForm,
    gallery::{GalleryReconciler, GalleryState},
    geography::BackendClient,
};

/// Galería de un formulario abierto: su estado y el formulario en memoria
/// con el que se sincroniza.
pub struct GallerySession {
    pub form: MemoryForm,
    pub state: GalleryState,
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub resolver: Arc<AddressResolver>,
    pub backend: Arc<BackendClient>,
    pub reconciler: Arc<GalleryReconciler>,
    // Mutex asíncrono: add_files calcula hashes con awaits de por medio.
    pub galleries: Arc<tokio::sync::Mutex<HashMap<String, GallerySession>>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
