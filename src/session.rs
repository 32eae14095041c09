//! Estado por sesión de navegador: motor cargado y última respuesta.
//!
//! El frontend genera un UUID, lo guarda en localStorage y lo envía en la
//! cabecera `x-session-id` con cada petición.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;
use uuid::Uuid;

use crate::engine::RagEngine;
use crate::error::AppError;
use crate::models::QueryResult;

pub const SESSION_HEADER: &str = "x-session-id";

/// Sesiones vivas como máximo; al superarlo se descarta la menos usada.
pub const MAX_SESSIONS: usize = 256;

#[derive(Default)]
pub struct Session {
    pub engine: Option<Arc<dyn RagEngine>>,
    pub last_answer: Option<QueryResult>,
}

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

struct Entry {
    handle: SessionHandle,
    last_seen: u64,
}

#[derive(Default)]
struct Sessions {
    entries: HashMap<Uuid, Entry>,
    clock: u64,
}

impl Sessions {
    fn touch(&mut self, id: Uuid) -> Option<SessionHandle> {
        self.clock += 1;
        let now = self.clock;
        self.entries.get_mut(&id).map(|entry| {
            entry.last_seen = now;
            entry.handle.clone()
        })
    }
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<Sessions>>,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Sessions::default())),
            capacity: capacity.max(1),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sesión ya existente; nunca crea una nueva.
    pub fn get(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions().touch(id)
    }

    pub fn get_or_create(&self, id: Uuid) -> SessionHandle {
        let mut sessions = self.sessions();
        if let Some(handle) = sessions.touch(id) {
            return handle;
        }

        if sessions.entries.len() >= self.capacity {
            let oldest = sessions
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                sessions.entries.remove(&oldest);
                debug!("Sesión {oldest} descartada por inactividad.");
            }
        }

        let handle = SessionHandle::default();
        let last_seen = sessions.clock;
        sessions.entries.insert(
            id,
            Entry {
                handle: handle.clone(),
                last_seen,
            },
        );
        handle
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions().entries.len()
    }

    /// Descarta el motor cargado de todas las sesiones. Las respuestas se conservan.
    pub async fn clear_engines(&self) {
        let handles: Vec<SessionHandle> = {
            let sessions = self.sessions();
            sessions.entries.values().map(|entry| entry.handle.clone()).collect()
        };
        for handle in handles {
            handle.lock().await.engine = None;
        }
    }
}

/// Identificador de sesión extraído de la cabecera `x-session-id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(SessionId)
            .ok_or(AppError::MissingSession)
    }
}
