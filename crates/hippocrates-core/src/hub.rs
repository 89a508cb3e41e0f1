//! Many concurrent consultations over one shared runtime.
//!
//! Turns of the same consultation are serialised by a per-consultation lock;
//! a global semaphore bounds how many turns run at once across all of them.

use std::collections::HashMap;
use std::sync::Arc;

use hippocrates_schema::TurnOutput;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use crate::consultation::{Consultation, ConsultationRuntime};
use crate::error::ConsultationError;

#[derive(Clone)]
pub struct ConsultationHub {
    runtime: Arc<ConsultationRuntime>,
    sessions: Arc<Mutex<HashMap<Uuid, Arc<Mutex<Consultation>>>>>,
    global_semaphore: Arc<Semaphore>,
}

impl ConsultationHub {
    pub fn new(runtime: Arc<ConsultationRuntime>, max_concurrent: usize) -> Self {
        Self {
            runtime,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            global_semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn start(&self) -> Uuid {
        let consultation = self.runtime.start();
        let id = consultation.id();
        self.sessions
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(consultation)));
        tracing::info!(consultation_id = %id, "consultation started");
        id
    }

    pub async fn handle_turn(&self, id: Uuid, text: &str) -> Result<TurnOutput, ConsultationError> {
        let session = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&id)
                .cloned()
                .ok_or_else(|| ConsultationError::NotFound(id.to_string()))?
        };

        let _permit = self
            .global_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConsultationError::Busy)?;
        let mut consultation = session.lock().await;
        consultation.handle_turn(text).await
    }

    /// Like `handle_turn`, but fails with `Busy` instead of waiting when the
    /// consultation is already processing a turn.
    pub async fn try_handle_turn(&self, id: Uuid, text: &str) -> Result<TurnOutput, ConsultationError> {
        let session = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&id)
                .cloned()
                .ok_or_else(|| ConsultationError::NotFound(id.to_string()))?
        };
        let mut consultation = session.try_lock().map_err(|_| ConsultationError::Busy)?;
        let _permit = self
            .global_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConsultationError::Busy)?;
        consultation.handle_turn(text).await
    }

    pub async fn end(&self, id: Uuid) -> bool {
        let removed = self.sessions.lock().await.remove(&id).is_some();
        if removed {
            tracing::info!(consultation_id = %id, "consultation ended");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn available_permits(&self) -> usize {
        self.global_semaphore.available_permits()
    }
}
