//! Template registry: reusable, versioned workflow blueprints.
//!
//! Templates live in memory and, when a directory is configured, in one
//! `<template-id>.json` file each. A version change never mutates a stored
//! template; it produces a copy under a new id.

use std::path::PathBuf;

use chrono::Utc;
use dashmap::DashMap;
use unitflow_types::workflow::{TaskBlueprint, TemplateBlueprint, TemplateUpdate, WorkflowTemplate};
use uuid::Uuid;

use super::definition::{EngineError, validate_blueprints, validate_name};
use crate::service::fs::FileSystem;

/// Outcome of `TemplateRegistry::update`.
#[derive(Debug, Clone)]
pub enum TemplateChange {
    /// Same id, mutated in place.
    Updated(WorkflowTemplate),
    /// A new template was created; the original is untouched.
    Versioned {
        original_id: Uuid,
        template: WorkflowTemplate,
    },
}

impl TemplateChange {
    pub fn template(&self) -> &WorkflowTemplate {
        match self {
            TemplateChange::Updated(template) => template,
            TemplateChange::Versioned { template, .. } => template,
        }
    }

    pub fn into_template(self) -> WorkflowTemplate {
        match self {
            TemplateChange::Updated(template) => template,
            TemplateChange::Versioned { template, .. } => template,
        }
    }
}

/// In-memory template store with optional one-file-per-template persistence.
pub struct TemplateRegistry<F> {
    templates: DashMap<Uuid, WorkflowTemplate>,
    fs: F,
    directory: Option<PathBuf>,
}

impl<F: FileSystem> TemplateRegistry<F> {
    pub fn new(fs: F, directory: Option<PathBuf>) -> Self {
        Self {
            templates: DashMap::new(),
            fs,
            directory,
        }
    }

    /// Load every `*.json` template in the configured directory.
    ///
    /// Creates the directory when missing. Unreadable or unparseable files are
    /// skipped with a warning. Returns the number of templates loaded.
    pub async fn load_from_disk(&self) -> usize {
        let Some(dir) = &self.directory else {
            return 0;
        };

        if !self.fs.exists(dir).await {
            if let Err(e) = self.fs.create_dir_all(dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to create template directory");
            }
            return 0;
        }

        let files = match self.fs.list_files(dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to list template directory");
                return 0;
            }
        };

        let mut loaded = 0;
        for path in files
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        {
            let content = match self.fs.read_file(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read template file");
                    continue;
                }
            };
            match serde_json::from_str::<WorkflowTemplate>(&content) {
                Ok(template) => {
                    self.templates.insert(template.id, template);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable template file");
                }
            }
        }

        tracing::info!(dir = %dir.display(), count = loaded, "loaded workflow templates");
        loaded
    }

    /// Store a new template. Task blueprints without an id get one.
    pub async fn create(&self, blueprint: TemplateBlueprint) -> Result<WorkflowTemplate, EngineError> {
        validate_name("template", &blueprint.name)?;
        let mut tasks = blueprint.tasks;
        assign_task_ids(&mut tasks);
        validate_blueprints(&tasks)?;

        let template = WorkflowTemplate {
            id: Uuid::now_v7(),
            name: blueprint.name,
            description: blueprint.description,
            version: blueprint.version,
            tasks,
            variables: blueprint.variables,
            author: blueprint.author,
            metadata: blueprint.metadata,
            created_at: Utc::now(),
            updated_at: None,
        };

        self.templates.insert(template.id, template.clone());
        self.save_to_disk(&template).await;
        tracing::info!(template_id = %template.id, name = %template.name, "created workflow template");
        Ok(template)
    }

    /// Apply `update` to template `id`.
    ///
    /// A `version` different from the stored one yields a new template under
    /// a fresh id; otherwise the stored template is changed in place.
    pub async fn update(&self, id: Uuid, update: TemplateUpdate) -> Result<TemplateChange, EngineError> {
        // The entry guard makes the in-place read-modify-write atomic per id.
        // It must be gone before the versioned insert and any await.
        let change = {
            let mut entry = self
                .templates
                .get_mut(&id)
                .ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))?;

            let mut changed = entry.value().clone();
            update.apply_to(&mut changed);
            validate_name("template", &changed.name)?;
            if update.tasks.is_some() {
                assign_task_ids(&mut changed.tasks);
                validate_blueprints(&changed.tasks)?;
            }

            let versioned = update
                .version
                .as_ref()
                .is_some_and(|v| *v != entry.version);
            if versioned {
                changed.id = Uuid::now_v7();
                changed.created_at = Utc::now();
                changed.updated_at = None;
                TemplateChange::Versioned {
                    original_id: id,
                    template: changed,
                }
            } else {
                changed.updated_at = Some(Utc::now());
                *entry = changed.clone();
                TemplateChange::Updated(changed)
            }
        };

        match &change {
            TemplateChange::Versioned { template, .. } => {
                self.templates.insert(template.id, template.clone());
                self.save_to_disk(template).await;
                tracing::info!(
                    original_template_id = %id,
                    template_id = %template.id,
                    version = %template.version,
                    "created new template version"
                );
            }
            TemplateChange::Updated(template) => {
                self.save_to_disk(template).await;
                tracing::info!(template_id = %id, "updated workflow template");
            }
        }
        Ok(change)
    }

    /// Remove a template from memory and from disk.
    pub async fn delete(&self, id: Uuid) -> Result<WorkflowTemplate, EngineError> {
        let (_, removed) = self
            .templates
            .remove(&id)
            .ok_or_else(|| EngineError::TemplateNotFound(id.to_string()))?;

        if let Some(path) = self.template_path(id) {
            if self.fs.exists(&path).await {
                if let Err(e) = self.fs.remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove template file");
                }
            }
        }
        tracing::info!(template_id = %id, "deleted workflow template");
        Ok(removed)
    }

    /// Look up by exact id first, then by name.
    ///
    /// When several templates share a name, the oldest one wins.
    pub fn get(&self, id_or_name: &str) -> Option<WorkflowTemplate> {
        if let Ok(id) = Uuid::parse_str(id_or_name) {
            if let Some(template) = self.get_by_id(id) {
                return Some(template);
            }
        }
        self.all().into_iter().find(|t| t.name == id_or_name)
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<WorkflowTemplate> {
        self.templates.get(&id).map(|t| t.value().clone())
    }

    /// All templates, oldest first.
    pub fn all(&self) -> Vec<WorkflowTemplate> {
        let mut templates: Vec<WorkflowTemplate> =
            self.templates.iter().map(|t| t.value().clone()).collect();
        templates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn template_path(&self, id: Uuid) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| dir.join(format!("{id}.json")))
    }

    /// Write a template file. Failures are logged; the in-memory copy stays.
    async fn save_to_disk(&self, template: &WorkflowTemplate) {
        let Some(path) = self.template_path(template.id) else {
            return;
        };
        let content = match serde_json::to_string_pretty(template) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(template_id = %template.id, error = %e, "failed to serialize template");
                return;
            }
        };
        if let Err(e) = self.fs.write_file(&path, &content).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to write template file");
        }
    }
}

/// Give every blueprint lacking an id a fresh one.
fn assign_task_ids(tasks: &mut [TaskBlueprint]) {
    for task in tasks.iter_mut().filter(|t| t.id.is_none()) {
        task.id = Some(Uuid::now_v7().to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use crate::service::fs::InMemoryFileSystem;
    use serde_json::{Map, json};

    fn blueprint(name: &str) -> TemplateBlueprint {
        TemplateBlueprint {
            name: name.to_string(),
            description: None,
            version: "1.0".to_string(),
            tasks: vec![
                TaskBlueprint::new("Fetch", "fetch").with_id("fetch"),
                TaskBlueprint::new("Report", "report").depends_on("fetch"),
            ],
            variables: Map::new(),
            author: None,
            metadata: Map::new(),
        }
    }

    fn registry(fs: InMemoryFileSystem) -> TemplateRegistry<InMemoryFileSystem> {
        TemplateRegistry::new(fs, Some(PathBuf::from("/templates")))
    }

    #[tokio::test]
    async fn test_create_assigns_missing_task_ids_and_persists() {
        let fs = InMemoryFileSystem::new();
        let reg = registry(fs.clone());
        let template = reg.create(blueprint("review")).await.unwrap();

        assert_eq!(template.tasks[0].id.as_deref(), Some("fetch"));
        assert!(template.tasks[1].id.is_some());
        let path = PathBuf::from(format!("/templates/{}.json", template.id));
        assert!(fs.exists(&path).await);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_graph() {
        let reg = registry(InMemoryFileSystem::new());
        let mut bp = blueprint("broken");
        bp.tasks.push(TaskBlueprint::new("Orphan", "noop").depends_on("ghost"));
        assert!(matches!(
            reg.create(bp).await.unwrap_err(),
            EngineError::Validation(_)
        ));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_update_with_new_version_clones() {
        let reg = registry(InMemoryFileSystem::new());
        let original = reg.create(blueprint("review")).await.unwrap();

        let change = reg
            .update(
                original.id,
                TemplateUpdate {
                    version: Some("2.0".to_string()),
                    ..TemplateUpdate::default()
                },
            )
            .await
            .unwrap();

        let TemplateChange::Versioned { original_id, template } = change else {
            panic!("expected a new version");
        };
        assert_eq!(original_id, original.id);
        assert_ne!(template.id, original.id);
        assert_eq!(template.version, "2.0");
        assert_eq!(reg.get_by_id(original.id).unwrap(), original);
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn test_update_same_version_mutates_in_place() {
        let reg = registry(InMemoryFileSystem::new());
        let original = reg.create(blueprint("review")).await.unwrap();

        let change = reg
            .update(
                original.id,
                TemplateUpdate {
                    description: Some("x".to_string()),
                    version: Some("1.0".to_string()),
                    ..TemplateUpdate::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(change, TemplateChange::Updated(_)));
        let stored = reg.get_by_id(original.id).unwrap();
        assert_eq!(stored.description.as_deref(), Some("x"));
        assert!(stored.updated_at.is_some());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_in_place_updates_keep_both_fields() {
        let reg = std::sync::Arc::new(registry(InMemoryFileSystem::new()));
        let id = reg.create(blueprint("review")).await.unwrap().id;

        for i in 0..20 {
            let describe = {
                let reg = std::sync::Arc::clone(&reg);
                tokio::spawn(async move {
                    let update = TemplateUpdate {
                        description: Some(format!("d{i}")),
                        ..TemplateUpdate::default()
                    };
                    reg.update(id, update).await.unwrap();
                })
            };
            let attribute = {
                let reg = std::sync::Arc::clone(&reg);
                tokio::spawn(async move {
                    let update = TemplateUpdate {
                        author: Some(format!("a{i}")),
                        ..TemplateUpdate::default()
                    };
                    reg.update(id, update).await.unwrap();
                })
            };
            describe.await.unwrap();
            attribute.await.unwrap();

            let stored = reg.get_by_id(id).unwrap();
            assert_eq!(stored.description, Some(format!("d{i}")));
            assert_eq!(stored.author, Some(format!("a{i}")));
        }
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_template() {
        let reg = registry(InMemoryFileSystem::new());
        let err = reg.update(Uuid::now_v7(), TemplateUpdate::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn test_get_by_id_then_name() {
        let reg = registry(InMemoryFileSystem::new());
        let first = reg.create(blueprint("review")).await.unwrap();
        let _second = reg.create(blueprint("review")).await.unwrap();

        assert_eq!(reg.get(&first.id.to_string()).unwrap().id, first.id);
        assert_eq!(reg.get("review").unwrap().id, first.id);
        assert!(reg.get("nope").is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let fs = InMemoryFileSystem::new();
        let reg = registry(fs.clone());
        let template = reg.create(blueprint("review")).await.unwrap();

        reg.delete(template.id).await.unwrap();
        assert!(reg.get_by_id(template.id).is_none());
        assert_eq!(fs.file_count(), 0);
        assert!(reg.delete(template.id).await.is_err());
    }

    #[tokio::test]
    async fn test_load_from_disk_skips_bad_files() {
        let fs = InMemoryFileSystem::new();
        let writer = registry(fs.clone());
        let template = writer.create(blueprint("review")).await.unwrap();
        fs.write_file(Path::new("/templates/garbage.json"), "{not json")
            .await
            .unwrap();
        fs.write_file(Path::new("/templates/notes.txt"), "ignored")
            .await
            .unwrap();

        let reader = registry(fs);
        assert_eq!(reader.load_from_disk().await, 1);
        assert_eq!(reader.get_by_id(template.id).unwrap().name, "review");
    }

    #[tokio::test]
    async fn test_load_from_missing_directory_creates_it() {
        let fs = InMemoryFileSystem::new();
        let reg = registry(fs.clone());
        assert_eq!(reg.load_from_disk().await, 0);
        assert!(fs.exists(Path::new("/templates")).await);
    }

    #[tokio::test]
    async fn test_no_directory_keeps_templates_in_memory() {
        let fs = InMemoryFileSystem::new();
        let reg = TemplateRegistry::new(fs.clone(), None);
        let mut bp = blueprint("review");
        bp.variables.insert("threshold".to_string(), json!(3));
        let template = reg.create(bp).await.unwrap();
        assert_eq!(template.variables.get("threshold"), Some(&json!(3)));
        assert_eq!(fs.file_count(), 0);
        assert_eq!(reg.load_from_disk().await, 0);
    }
}
