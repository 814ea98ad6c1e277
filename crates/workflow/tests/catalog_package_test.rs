//! Catalog package publication.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod common;

use appmgr_core::{
    Error, PipelineRef, RepositoryRef, Resource, ResourceStatus, Result, SecurityContext,
    StageStatus, TenantId,
};
use appmgr_workflow::{CatalogPackageRequest, PipelineScript, RecordStore};
use common::Harness;
use tempfile::TempDir;

async fn archive() -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    tokio::fs::write(dir.path().join("package.json"), r#"{"name":"orders-ui"}"#).await?;
    Ok(dir)
}

fn package_request(component: &Resource, dir: &TempDir, version: &str) -> CatalogPackageRequest {
    CatalogPackageRequest {
        component: component.id,
        name: "orders-ui".into(),
        version: version.into(),
        pipeline: PipelineRef::new("catalog"),
        archive: dir.path().to_path_buf(),
    }
}

async fn harness() -> Result<(Harness, Resource)> {
    let h = Harness::new()?;
    h.runner
        .register_pipeline(&PipelineRef::new("catalog"), "Catalog publish")
        .await;
    let component = h.component("orders").await?;
    Ok((h, component))
}

#[tokio::test]
async fn test_package_is_published_and_built() -> Result<()> {
    let (h, component) = harness().await?;
    let dir = archive().await?;

    let package = h
        .workflows
        .catalog_packages()
        .create(&h.ctx, package_request(&component, &dir, "1.0.0"))
        .await?;
    assert_eq!(package.status, ResourceStatus::Pending);

    let package = h.wait_for_status(package.id, ResourceStatus::Ready).await?;
    assert_eq!(package.repository, StageStatus::Ready);
    assert_eq!(package.pipeline, StageStatus::Ready);
    let files = h
        .scm
        .files_at(&RepositoryRef::new("orders-api"), "orders-ui-1.0.0")
        .await;
    assert_eq!(files, vec!["package.json".to_string()]);
    assert_eq!(
        h.runner.scheduled().await,
        vec![(PipelineRef::new("catalog"), "orders-ui-1.0.0".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_pipeline_is_rejected() -> Result<()> {
    let (h, component) = harness().await?;
    let dir = archive().await?;
    let before = h.store.len().await;

    let mut request = package_request(&component, &dir, "1.0.0");
    request.pipeline = PipelineRef::new("missing");
    let result = h.workflows.catalog_packages().create(&h.ctx, request).await;

    assert!(result.as_ref().is_err_and(Error::is_validation));
    assert_eq!(h.store.len().await, before);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_package_version_is_rejected() -> Result<()> {
    let (h, component) = harness().await?;
    let dir = archive().await?;
    let packages = h.workflows.catalog_packages();

    packages
        .create(&h.ctx, package_request(&component, &dir, "1.0.0"))
        .await?;
    let second = packages
        .create(&h.ctx, package_request(&component, &dir, "1.0.0"))
        .await;
    let other_version = packages
        .create(&h.ctx, package_request(&component, &dir, "1.0.1"))
        .await;

    assert!(matches!(second, Err(Error::DuplicateArtifact { .. })));
    assert!(other_version.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_hanging_package_build_is_unstable() -> Result<()> {
    let (h, component) = harness().await?;
    h.runner
        .script(&PipelineRef::new("catalog"), PipelineScript::Hang)
        .await;
    let dir = archive().await?;

    let package = h
        .workflows
        .catalog_packages()
        .create(&h.ctx, package_request(&component, &dir, "1.0.0"))
        .await?;
    let package = h
        .wait_for_status(package.id, ResourceStatus::Unstable)
        .await?;

    assert_eq!(package.pipeline, StageStatus::Unstable);
    assert!(package.message.is_some());
    Ok(())
}

#[tokio::test]
async fn test_publish_failure_marks_error() -> Result<()> {
    let (h, component) = harness().await?;
    h.scm
        .fail_repository(&RepositoryRef::new("orders-api"))
        .await;
    let dir = archive().await?;

    let package = h
        .workflows
        .catalog_packages()
        .create(&h.ctx, package_request(&component, &dir, "1.0.0"))
        .await?;
    let package = h.wait_for_status(package.id, ResourceStatus::Error).await?;

    assert_eq!(package.repository, StageStatus::Error);
    assert!(h.runner.scheduled().await.is_empty());
    Ok(())
}

/// GIVEN a package created by one tenant
/// WHEN another tenant looks it up
/// THEN it is not visible
#[tokio::test]
async fn test_packages_are_tenant_scoped() -> Result<()> {
    let (h, component) = harness().await?;
    let dir = archive().await?;
    let acme = SecurityContext::new("alice", Some(TenantId::new("acme")));
    let globex = SecurityContext::new("bob", Some(TenantId::new("globex")));

    let package = h
        .workflows
        .catalog_packages()
        .create(&acme, package_request(&component, &dir, "1.0.0"))
        .await?;

    assert_eq!(package.tenant, Some(TenantId::new("acme")));
    assert!(h.store.get(&acme, package.id).await.is_ok());
    assert!(matches!(
        h.store.get(&globex, package.id).await,
        Err(Error::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_purge_removes_package_tag() -> Result<()> {
    let (h, component) = harness().await?;
    let dir = archive().await?;
    let packages = h.workflows.catalog_packages();
    let package = packages
        .create(&h.ctx, package_request(&component, &dir, "1.0.0"))
        .await?;
    h.wait_for_status(package.id, ResourceStatus::Ready).await?;

    packages.delete(&h.ctx, package.id, true, false).await?;

    let stored = h.store.get(&h.ctx, package.id).await?;
    assert_eq!(stored.status, ResourceStatus::Deleted);
    assert!(!h
        .scm
        .has_tag(&RepositoryRef::new("orders-api"), "orders-ui-1.0.0")
        .await);
    Ok(())
}
