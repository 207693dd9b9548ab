//! External collaborator interfaces and in-process reference
//! implementations.
//!
//! `ProjectStore`, `InputFileReader`, and `Notifier` are the seams between
//! the core pipeline and the out-of-scope document store / file-upload
//! staging / notification transports. The in-memory implementations here
//! exist only for this crate's own tests and for callers who haven't
//! wired a real backend yet.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AuditError, Result};
use crate::types::{PipelineEvent, Project};

/// Checkpoint store for `Project` aggregates. The controller assumes
/// `save` is atomic and never issues concurrent saves for one project.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Project>;
    async fn save(&self, project: &Project) -> Result<()>;
}

/// Read access to uploaded input files. A `handle` is
/// whatever opaque string the real file-upload staging area hands back.
#[async_trait]
pub trait InputFileReader: Send + Sync {
    async fn read_to_string(&self, handle: &str) -> Result<String>;
}

/// Fire-and-forget progress/completion events toward the (out-of-scope)
/// notification transports.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, project_id: &str, event: PipelineEvent);
}

/// In-memory `ProjectStore`: hands each caller its own clone of the
/// current `Project` snapshot rather than a shared reference.
#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: Mutex<HashMap<String, Project>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, project: Project) {
        self.projects.lock().unwrap().insert(project.id.clone(), project);
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn load(&self, id: &str) -> Result<Project> {
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AuditError::stage("load", format!("no such project: {id}")))
    }

    async fn save(&self, project: &Project) -> Result<()> {
        self.projects.lock().unwrap().insert(project.id.clone(), project.clone());
        Ok(())
    }
}

/// Local-filesystem `InputFileReader`; treats `handle` as a path.
pub struct LocalFileReader;

#[async_trait]
impl InputFileReader for LocalFileReader {
    async fn read_to_string(&self, handle: &str) -> Result<String> {
        tokio::fs::read_to_string(handle)
            .await
            .map_err(|e| AuditError::InputFormat { source_name: handle.to_string(), reason: e.to_string() })
    }
}

/// No-op notifier, useful as a default when no transport is wired.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _project_id: &str, _event: PipelineEvent) {}
}

/// Collects events in memory, for assertions in tests.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(String, PipelineEvent)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, project_id: &str, event: PipelineEvent) {
        self.events.lock().unwrap().push((project_id.to_string(), event));
    }
}
