//! Shared fixtures for the workflow integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use appmgr_core::{
    ApiVersionSpec, ArtifactFile, ArtifactType, ComponentSpec, Error, Language,
    LibraryApiVersionSpec, LibrarySpec, NewResource, PipelineRef, RepositoryRef, Resource,
    ResourceId, ResourceSpec, ResourceStatus, Result, SecurityContext, StageStatus, StatusPatch,
    TemplateRef, META_ARTIFACT_NAME, META_GROUP_ID,
};
use appmgr_workflow::{
    ApiVersionRequest, Collaborators, InMemoryRecordStore, InMemorySourceControl, RecordStore,
    ScriptedPipelineRunner, TemplateCodeGenerator, WorkflowConfig, Workflows,
};

pub const CONTRACT: &str = "openapi: 3.0.0\ninfo:\n  title: orders\n  version: 1.0.0\npaths: {}\n";

/// Workflows over in-memory collaborators with short build timing.
pub struct Harness {
    pub store: Arc<InMemoryRecordStore>,
    pub scm: Arc<InMemorySourceControl>,
    pub runner: Arc<ScriptedPipelineRunner>,
    pub codegen: Arc<TemplateCodeGenerator>,
    pub workflows: Workflows,
    pub ctx: SecurityContext,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_config(
            WorkflowConfig::default()
                .build_timing(Duration::from_millis(5), Duration::from_millis(300)),
        )
    }

    pub fn with_config(config: WorkflowConfig) -> Result<Self> {
        let store = Arc::new(InMemoryRecordStore::new());
        let scm = Arc::new(InMemorySourceControl::new());
        let runner = Arc::new(ScriptedPipelineRunner::new());
        let codegen = Arc::new(TemplateCodeGenerator::new());
        let collaborators = Collaborators::new(
            store.clone(),
            scm.clone(),
            runner.clone(),
            codegen.clone(),
        );
        let workflows = Workflows::new(collaborators, config)?;
        Ok(Self {
            store,
            scm,
            runner,
            codegen,
            workflows,
            ctx: SecurityContext::system(),
        })
    }

    /// Register a READY shared component.
    pub async fn component(&self, name: &str) -> Result<Resource> {
        let spec = ResourceSpec::Component(ComponentSpec {
            name: name.to_string(),
            repository: RepositoryRef::new(format!("{name}-api")),
        });
        self.store
            .register(
                &self.ctx,
                NewResource::pending(spec).with_status(ResourceStatus::Ready),
            )
            .await
    }

    /// Register a READY library of `component`.
    pub async fn library(
        &self,
        component: &Resource,
        language: &str,
        artifact_type: ArtifactType,
    ) -> Result<Resource> {
        let name = &component.component()?.name;
        let slug = format!("{name}-{language}-{artifact_type}").to_lowercase();
        let spec = ResourceSpec::Library(LibrarySpec {
            component: component.id,
            language: Language::new(language),
            artifact_type,
            repository: RepositoryRef::new(slug.clone()),
            pipeline: PipelineRef::new(slug.clone()),
            template: TemplateRef::new(format!("{language}-{artifact_type}").to_lowercase()),
        });
        self.store
            .register(
                &self.ctx,
                NewResource::pending(spec).with_status(ResourceStatus::Ready),
            )
            .await
    }

    /// A component with all three artifact types for each language.
    pub async fn component_with_libraries(
        &self,
        name: &str,
        languages: &[&str],
    ) -> Result<(Resource, Vec<Resource>)> {
        let component = self.component(name).await?;
        let mut libraries = Vec::new();
        for language in languages {
            for artifact_type in ArtifactType::ALL {
                libraries.push(self.library(&component, language, artifact_type).await?);
            }
        }
        Ok((component, libraries))
    }

    /// Poll until `id` satisfies `done`, failing after five seconds.
    pub async fn wait_for<F>(&self, id: ResourceId, done: F) -> Result<Resource>
    where
        F: Fn(&Resource) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let resource = self.store.get(&self.ctx, id).await?;
            if done(&resource) {
                return Ok(resource);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::invalid_input(format!(
                    "timed out waiting for {id}, last status {}",
                    resource.status
                )));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_for_status(&self, id: ResourceId, status: ResourceStatus) -> Result<Resource> {
        self.wait_for(id, |r| r.status == status).await
    }

    pub async fn children(&self, parent: &Resource) -> Result<Vec<Resource>> {
        appmgr_workflow::load_children(self.store.as_ref(), &self.ctx, parent).await
    }

    /// Register a parent directly, bypassing the create workflow.
    pub async fn bare_parent(&self, component: &Resource, expected_children: usize) -> Result<Resource> {
        let spec = ResourceSpec::ApiVersion(ApiVersionSpec {
            component: component.id,
            version: "1.0.0".parse()?,
            group_id: "com.acme".into(),
            artifact_name: format!("bare-{}", ResourceId::new()),
            released: false,
            expected_children,
            libraries_api_versions: Vec::new(),
            commit_id: None,
        });
        self.store.register(&self.ctx, NewResource::pending(spec)).await
    }

    /// Register a child of `parent` in `status` and attach it.
    pub async fn bare_child(
        &self,
        parent: &Resource,
        library: &Resource,
        status: ResourceStatus,
    ) -> Result<Resource> {
        let library_spec = library.library()?;
        let spec = ResourceSpec::LibraryApiVersion(LibraryApiVersionSpec {
            library: library.id,
            api_version: parent.id,
            language: library_spec.language.clone(),
            artifact_type: library_spec.artifact_type,
            version: parent.api_version()?.version.clone(),
            build: None,
            commit_id: None,
        });
        let child = self
            .store
            .register(&self.ctx, NewResource::pending(spec).with_status(status))
            .await?;
        let axis = match status {
            ResourceStatus::Ready => StageStatus::Ready,
            ResourceStatus::Error => StageStatus::Error,
            _ => StageStatus::Running,
        };
        let child = self
            .store
            .patch(
                &self.ctx,
                child.id,
                &StatusPatch::new()
                    .repository(StageStatus::Ready)
                    .pipeline(axis),
                None,
            )
            .await?;
        self.store
            .patch(
                &self.ctx,
                parent.id,
                &StatusPatch::new().add_child(child.id),
                None,
            )
            .await?;
        Ok(child)
    }

    /// Set both axes of a record.
    pub async fn set_axes(
        &self,
        id: ResourceId,
        repository: StageStatus,
        pipeline: StageStatus,
    ) -> Result<Resource> {
        self.store
            .patch(
                &self.ctx,
                id,
                &StatusPatch::new().repository(repository).pipeline(pipeline),
                None,
            )
            .await
    }
}

pub fn metadata(group_id: &str, artifact_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (META_GROUP_ID.to_string(), group_id.to_string()),
        (META_ARTIFACT_NAME.to_string(), artifact_name.to_string()),
    ])
}

pub fn contract() -> ArtifactFile {
    ArtifactFile::new("swagger.yaml", CONTRACT)
}

pub fn request(component: &Resource, version: &str, artifact_name: &str) -> ApiVersionRequest {
    ApiVersionRequest {
        component: component.id,
        version: version.to_string(),
        metadata: metadata("com.acme", artifact_name),
        contract: Some(contract()),
    }
}
