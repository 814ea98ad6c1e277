//! In-memory collaborators for local runs and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use appmgr_core::{
    ArtifactFile, BuildId, Collaborator, Error, NewResource, PipelineRef, RepositoryRef, Resource,
    ResourceId, ResourceStatus, Result, SecurityContext, StatusPatch, TemplateRef, UniqueKey,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use itertools::Itertools;
use tokio::sync::RwLock;
use tracing::debug;

use crate::collaborators::{
    BuildHandle, BuildState, CodeGenerator, CommitOutcome, IdentityProvider, PipelineInfo,
    PipelineRunner, RecordStore, ResourceFilter, SourceControl,
};

// ============================================================================
// Record store
// ============================================================================

#[derive(Default)]
struct StoreState {
    records: HashMap<ResourceId, Resource>,
    history: HashMap<ResourceId, Vec<ResourceStatus>>,
    failing_patches: HashSet<ResourceId>,
}

/// In-memory record store with revision-checked writes.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: RwLock<StoreState>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status a record has held, oldest first.
    pub async fn status_history(&self, id: ResourceId) -> Vec<ResourceStatus> {
        self.state
            .read()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every later patch of `id` fail with a remote error.
    pub async fn fail_patches_for(&self, id: ResourceId) {
        self.state.write().await.failing_patches.insert(id);
    }

    /// Move the last-update timestamp of `id` into the past.
    pub async fn backdate(&self, id: ResourceId, by: std::time::Duration) {
        let mut state = self.state.write().await;
        if let Some(record) = state.records.get_mut(&id) {
            let delta = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::zero());
            record.updated_at = record.updated_at - delta;
        }
    }

    /// Number of records of any status.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }
}

fn visible<'a>(ctx: &SecurityContext, record: Option<&'a Resource>) -> Option<&'a Resource> {
    record.filter(|r| ctx.can_see(r.tenant.as_ref()))
}

fn key_holder<'a>(records: &'a HashMap<ResourceId, Resource>, key: &UniqueKey) -> Option<&'a Resource> {
    records
        .values()
        .find(|r| r.status != ResourceStatus::Deleted && r.unique_key.as_ref() == Some(key))
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn register(&self, ctx: &SecurityContext, new: NewResource) -> Result<Resource> {
        if !ctx.can_see(new.tenant.as_ref()) {
            return Err(Error::invalid_input(format!(
                "principal '{}' cannot register records for another tenant",
                ctx.principal
            )));
        }

        let mut state = self.state.write().await;
        if let Some(key) = &new.unique_key {
            if let Some(existing) = key_holder(&state.records, key) {
                return Err(Error::duplicate(key.as_str(), existing.id));
            }
        }

        let record = Resource::from_new(ResourceId::new(), new, Utc::now());
        debug!(resource_id = %record.id, kind = %record.kind(), "Registered record");
        state.history.insert(record.id, vec![record.status]);
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, ctx: &SecurityContext, id: ResourceId) -> Result<Resource> {
        let state = self.state.read().await;
        visible(ctx, state.records.get(&id))
            .cloned()
            .ok_or(Error::NotFound { id })
    }

    async fn find_by_key(
        &self,
        ctx: &SecurityContext,
        key: &UniqueKey,
    ) -> Result<Option<Resource>> {
        let state = self.state.read().await;
        Ok(visible(ctx, key_holder(&state.records, key)).cloned())
    }

    async fn find(&self, ctx: &SecurityContext, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| ctx.can_see(r.tenant.as_ref()) && filter.matches(r))
            .sorted_by_key(|r| r.created_at)
            .cloned()
            .collect_vec())
    }

    async fn patch(
        &self,
        ctx: &SecurityContext,
        id: ResourceId,
        patch: &StatusPatch,
        expected_revision: Option<u64>,
    ) -> Result<Resource> {
        let mut state = self.state.write().await;
        if state.failing_patches.contains(&id) {
            return Err(Error::remote(
                Collaborator::RecordStore,
                "patch",
                "injected failure",
            ));
        }

        let record = state
            .records
            .get_mut(&id)
            .filter(|r| ctx.can_see(r.tenant.as_ref()))
            .ok_or(Error::NotFound { id })?;

        if let Some(expected) = expected_revision {
            if record.revision != expected {
                return Err(Error::RevisionConflict {
                    id,
                    expected,
                    actual: record.revision,
                });
            }
        }

        let before = record.status;
        let mut updated = record.clone();
        patch.apply(&mut updated)?;
        updated.revision = updated.revision.saturating_add(1);
        updated.updated_at = Utc::now();
        *record = updated.clone();

        if updated.status != before {
            state.history.entry(id).or_default().push(updated.status);
        }
        Ok(updated)
    }

    async fn delete(&self, ctx: &SecurityContext, id: ResourceId, purge: bool) -> Result<()> {
        let patch = StatusPatch::new().status(ResourceStatus::Deleted);
        self.patch(ctx, id, &patch, None).await?;
        debug!(resource_id = %id, purge, "Tombstoned record");
        Ok(())
    }
}

// ============================================================================
// Source control
// ============================================================================

type TagKey = (RepositoryRef, String);

#[derive(Default)]
struct RepositoryState {
    tags: HashMap<TagKey, BTreeMap<String, Vec<u8>>>,
    failing: HashSet<RepositoryRef>,
    commits: u64,
}

/// In-memory source control keeping one file tree per tag.
#[derive(Default)]
pub struct InMemorySourceControl {
    state: RwLock<RepositoryState>,
}

impl InMemorySourceControl {
    /// Create an empty source-control service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file at a tag, bypassing the commit path.
    pub async fn put_file(&self, repository: &RepositoryRef, tag: &str, file: ArtifactFile) {
        self.state
            .write()
            .await
            .tags
            .entry((repository.clone(), tag.to_string()))
            .or_default()
            .insert(file.filename, file.content);
    }

    /// Make every call against `repository` fail.
    pub async fn fail_repository(&self, repository: &RepositoryRef) {
        self.state.write().await.failing.insert(repository.clone());
    }

    /// File names present at a tag.
    pub async fn files_at(&self, repository: &RepositoryRef, tag: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .tags
            .get(&(repository.clone(), tag.to_string()))
            .map(|files| files.keys().cloned().collect_vec())
            .unwrap_or_default()
    }

    /// Whether a tag exists.
    pub async fn has_tag(&self, repository: &RepositoryRef, tag: &str) -> bool {
        self.state
            .read()
            .await
            .tags
            .contains_key(&(repository.clone(), tag.to_string()))
    }

    /// Number of commits made through the commit operations.
    pub async fn commit_count(&self) -> u64 {
        self.state.read().await.commits
    }

    async fn commit(
        &self,
        repository: &RepositoryRef,
        tag: &str,
        files: BTreeMap<String, Vec<u8>>,
        operation: &str,
    ) -> Result<CommitOutcome> {
        let mut state = self.state.write().await;
        if state.failing.contains(repository) {
            return Err(Error::remote(
                Collaborator::SourceControl,
                operation,
                format!("repository '{repository}' unavailable"),
            ));
        }

        let key = (repository.clone(), tag.to_string());
        let unchanged = state
            .tags
            .get(&key)
            .is_some_and(|existing| files.iter().all(|(name, data)| existing.get(name) == Some(data)));
        if unchanged {
            return Ok(CommitOutcome::NotModified);
        }

        state.tags.entry(key).or_default().extend(files);
        state.commits = state.commits.saturating_add(1);
        Ok(CommitOutcome::Committed {
            commit_id: format!("{:012x}", state.commits),
        })
    }
}

fn read_tree(root: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| Error::Io(e.to_string()))?
                    .to_string_lossy()
                    .replace('\\', "/");
                files.insert(relative, std::fs::read(&path)?);
            }
        }
    }
    Ok(files)
}

#[async_trait]
impl SourceControl for InMemorySourceControl {
    async fn commit_file_and_tag(
        &self,
        _ctx: &SecurityContext,
        repository: &RepositoryRef,
        _branch: &str,
        file: &Path,
        filename: &str,
        tag: &str,
    ) -> Result<CommitOutcome> {
        let content = tokio::fs::read(file).await?;
        let files = BTreeMap::from([(filename.to_string(), content)]);
        self.commit(repository, tag, files, "commit_file_and_tag")
            .await
    }

    async fn commit_archive_and_tag(
        &self,
        _ctx: &SecurityContext,
        repository: &RepositoryRef,
        _branch: &str,
        directory: &Path,
        tag: &str,
    ) -> Result<CommitOutcome> {
        let files = read_tree(directory)?;
        self.commit(repository, tag, files, "commit_archive_and_tag")
            .await
    }

    async fn get_file(
        &self,
        _ctx: &SecurityContext,
        repository: &RepositoryRef,
        tag: &str,
        filename: &str,
    ) -> Result<Option<ArtifactFile>> {
        let state = self.state.read().await;
        if state.failing.contains(repository) {
            return Err(Error::remote(
                Collaborator::SourceControl,
                "get_file",
                format!("repository '{repository}' unavailable"),
            ));
        }
        Ok(state
            .tags
            .get(&(repository.clone(), tag.to_string()))
            .and_then(|files| files.get(filename))
            .map(|content| ArtifactFile::new(filename, content.clone())))
    }

    async fn delete_tag(
        &self,
        _ctx: &SecurityContext,
        repository: &RepositoryRef,
        tag: &str,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .tags
            .remove(&(repository.clone(), tag.to_string()));
        Ok(())
    }
}

// ============================================================================
// Pipeline runner
// ============================================================================

/// How the scripted runner treats builds of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineScript {
    /// Finish with `outcome` after `polls` status reads.
    Finish { outcome: BuildState, polls: u32 },
    /// Refuse to schedule builds.
    Reject,
    /// Never leave the running state.
    Hang,
}

impl Default for PipelineScript {
    fn default() -> Self {
        Self::Finish {
            outcome: BuildState::Succeeded,
            polls: 1,
        }
    }
}

struct ScriptedBuild {
    script: PipelineScript,
    polls: u32,
}

#[derive(Default)]
struct RunnerState {
    pipelines: HashMap<PipelineRef, String>,
    scripts: HashMap<PipelineRef, PipelineScript>,
    builds: HashMap<BuildId, ScriptedBuild>,
    log: Vec<(PipelineRef, String)>,
}

/// Pipeline runner whose builds follow per-pipeline scripts.
#[derive(Default)]
pub struct ScriptedPipelineRunner {
    state: RwLock<RunnerState>,
    next_build: AtomicU64,
}

impl ScriptedPipelineRunner {
    /// Create a runner where every build succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a pipeline definition known to `get_by_id`.
    pub async fn register_pipeline(&self, pipeline: &PipelineRef, name: impl Into<String>) {
        self.state
            .write()
            .await
            .pipelines
            .insert(pipeline.clone(), name.into());
    }

    /// Script the builds of one pipeline.
    pub async fn script(&self, pipeline: &PipelineRef, script: PipelineScript) {
        self.state
            .write()
            .await
            .scripts
            .insert(pipeline.clone(), script);
    }

    /// Every scheduled build in scheduling order.
    pub async fn scheduled(&self) -> Vec<(PipelineRef, String)> {
        self.state.read().await.log.clone()
    }
}

#[async_trait]
impl PipelineRunner for ScriptedPipelineRunner {
    async fn build(
        &self,
        _ctx: &SecurityContext,
        pipeline: &PipelineRef,
        git_ref: &str,
        _args: &BTreeMap<String, String>,
    ) -> Result<BuildHandle> {
        let mut state = self.state.write().await;
        let script = state.scripts.get(pipeline).cloned().unwrap_or_default();
        if script == PipelineScript::Reject {
            return Err(Error::remote(
                Collaborator::Pipeline,
                "build",
                format!("pipeline '{pipeline}' rejected the build"),
            ));
        }

        let number = self.next_build.fetch_add(1, Ordering::SeqCst);
        let id = BuildId::new(format!("{pipeline}#{number}"));
        state.log.push((pipeline.clone(), git_ref.to_string()));
        state
            .builds
            .insert(id.clone(), ScriptedBuild { script, polls: 0 });
        Ok(BuildHandle {
            id,
            state: BuildState::Queued,
        })
    }

    async fn get_build(
        &self,
        _ctx: &SecurityContext,
        _pipeline: &PipelineRef,
        build: &BuildId,
    ) -> Result<BuildState> {
        let mut state = self.state.write().await;
        let scripted = state.builds.get_mut(build).ok_or_else(|| {
            Error::remote(
                Collaborator::Pipeline,
                "get_build",
                format!("unknown build '{build}'"),
            )
        })?;
        scripted.polls = scripted.polls.saturating_add(1);

        Ok(match &scripted.script {
            PipelineScript::Finish { outcome, polls } if scripted.polls >= *polls => *outcome,
            PipelineScript::Finish { .. } | PipelineScript::Hang => BuildState::Running,
            PipelineScript::Reject => BuildState::Error,
        })
    }

    async fn get_by_id(
        &self,
        _ctx: &SecurityContext,
        pipeline: &PipelineRef,
    ) -> Result<Option<PipelineInfo>> {
        Ok(self
            .state
            .read()
            .await
            .pipelines
            .get(pipeline)
            .map(|name| PipelineInfo {
                reference: pipeline.clone(),
                name: name.clone(),
            }))
    }
}

// ============================================================================
// Code generator
// ============================================================================

/// Code generator that writes the contract and a manifest per template.
#[derive(Default)]
pub struct TemplateCodeGenerator {
    failing: RwLock<HashSet<TemplateRef>>,
}

impl TemplateCodeGenerator {
    /// Create a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make generation with `template` fail.
    pub async fn fail_template(&self, template: &TemplateRef) {
        self.failing.write().await.insert(template.clone());
    }
}

#[async_trait]
impl CodeGenerator for TemplateCodeGenerator {
    async fn generate_from_template(
        &self,
        _ctx: &SecurityContext,
        template: &TemplateRef,
        contract: &ArtifactFile,
    ) -> Result<PathBuf> {
        if self.failing.read().await.contains(template) {
            return Err(Error::remote(
                Collaborator::CodeGenerator,
                "generate_from_template",
                format!("template '{template}' failed to render"),
            ));
        }

        let root = std::env::temp_dir().join(format!("appmgr-gen-{}", ulid::Ulid::new()));
        let sources = root.join("src");
        tokio::fs::create_dir_all(&sources).await?;
        tokio::fs::write(root.join("TEMPLATE"), template.as_str()).await?;
        tokio::fs::write(sources.join(&contract.filename), &contract.content).await?;
        Ok(root)
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Identity provider over a fixed set of tenant contexts.
pub struct StaticIdentityProvider {
    system: SecurityContext,
    tenants: Vec<SecurityContext>,
}

impl StaticIdentityProvider {
    /// Create a provider.
    pub const fn new(system: SecurityContext, tenants: Vec<SecurityContext>) -> Self {
        Self { system, tenants }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn system_context(&self) -> SecurityContext {
        self.system.clone()
    }

    async fn tenant_contexts(&self) -> Result<Vec<SecurityContext>> {
        Ok(self.tenants.clone())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use appmgr_core::{ComponentSpec, ResourceSpec, TenantId};

    fn component_spec() -> ResourceSpec {
        ResourceSpec::Component(ComponentSpec {
            name: "orders".into(),
            repository: RepositoryRef::new("orders-api"),
        })
    }

    #[tokio::test]
    async fn test_register_rejects_held_key() {
        let store = InMemoryRecordStore::new();
        let ctx = SecurityContext::system();
        let key = UniqueKey::artifact("com.acme", "orders");

        let first = store
            .register(
                &ctx,
                NewResource::pending(component_spec()).with_unique_key(key.clone()),
            )
            .await
            .unwrap();
        let second = store
            .register(
                &ctx,
                NewResource::pending(component_spec()).with_unique_key(key.clone()),
            )
            .await;
        assert!(matches!(second, Err(Error::DuplicateArtifact { existing, .. }) if existing == first.id));

        store.delete(&ctx, first.id, false).await.unwrap();
        let third = store
            .register(&ctx, NewResource::pending(component_spec()).with_unique_key(key))
            .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_patch_checks_revision() {
        let store = InMemoryRecordStore::new();
        let ctx = SecurityContext::system();
        let record = store
            .register(&ctx, NewResource::pending(component_spec()))
            .await
            .unwrap();

        let patch = StatusPatch::new().status(ResourceStatus::Ready);
        let updated = store
            .patch(&ctx, record.id, &patch, Some(record.revision))
            .await
            .unwrap();
        assert_eq!(updated.revision, record.revision + 1);

        let stale = store
            .patch(&ctx, record.id, &patch, Some(record.revision))
            .await;
        assert!(matches!(stale, Err(Error::RevisionConflict { .. })));
        assert_eq!(
            store.status_history(record.id).await,
            vec![ResourceStatus::Pending, ResourceStatus::Ready]
        );
    }

    #[tokio::test]
    async fn test_tenant_records_are_hidden_from_other_tenants() {
        let store = InMemoryRecordStore::new();
        let acme = SecurityContext::new("alice", Some(TenantId::new("acme")));
        let globex = SecurityContext::new("bob", Some(TenantId::new("globex")));
        let record = store
            .register(
                &acme,
                NewResource::pending(component_spec()).in_tenant(acme.tenant.clone()),
            )
            .await
            .unwrap();

        assert!(store.get(&acme, record.id).await.is_ok());
        assert!(matches!(
            store.get(&globex, record.id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_identical_commit_is_not_modified() {
        let scm = InMemorySourceControl::new();
        let ctx = SecurityContext::system();
        let repo = RepositoryRef::new("orders-api");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract");
        tokio::fs::write(&path, "openapi: 3.0.0").await.unwrap();

        let first = scm
            .commit_file_and_tag(&ctx, &repo, "master", &path, "swagger.yaml", "1.0.0")
            .await
            .unwrap();
        let second = scm
            .commit_file_and_tag(&ctx, &repo, "master", &path, "swagger.yaml", "1.0.0")
            .await
            .unwrap();

        assert!(first.commit_id().is_some());
        assert_eq!(second, CommitOutcome::NotModified);
        assert_eq!(scm.commit_count().await, 1);
    }

    #[tokio::test]
    async fn test_scripted_build_finishes_after_polls() {
        let runner = ScriptedPipelineRunner::new();
        let ctx = SecurityContext::system();
        let pipeline = PipelineRef::new("orders-java-model");
        runner
            .script(
                &pipeline,
                PipelineScript::Finish {
                    outcome: BuildState::Failed,
                    polls: 2,
                },
            )
            .await;

        let handle = runner
            .build(&ctx, &pipeline, "1.0.0", &BTreeMap::new())
            .await
            .unwrap();
        let first = runner.get_build(&ctx, &pipeline, &handle.id).await.unwrap();
        let second = runner.get_build(&ctx, &pipeline, &handle.id).await.unwrap();

        assert_eq!(first, BuildState::Running);
        assert_eq!(second, BuildState::Failed);
        assert_eq!(runner.scheduled().await.len(), 1);
    }

    #[tokio::test]
    async fn test_generator_writes_contract() {
        let generator = TemplateCodeGenerator::new();
        let contract = ArtifactFile::new("swagger.yaml", "openapi: 3.0.0");
        let dir = generator
            .generate_from_template(
                &SecurityContext::system(),
                &TemplateRef::new("java-model"),
                &contract,
            )
            .await
            .unwrap();

        let files = read_tree(&dir).unwrap();
        assert!(files.contains_key("src/swagger.yaml"));
        assert!(files.contains_key("TEMPLATE"));
        tokio::fs::remove_dir_all(dir).await.unwrap();
    }
}
