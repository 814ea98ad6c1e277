//! Convergence detector behaviour under duplicate and concurrent calls.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod common;

use appmgr_core::{ArtifactType, ResourceStatus, Result, StageStatus, StatusPatch};
use appmgr_workflow::{Convergence, RecordStore, SourceConvergence};
use common::{request, Harness};
use futures::future::join_all;

/// GIVEN a parent already READY
/// WHEN the detector is invoked twice more
/// THEN neither call writes and the parent entered READY exactly once
#[tokio::test]
async fn test_repeated_calls_on_resolved_parent_are_noops() -> Result<()> {
    let h = Harness::new()?;
    let (component, _) = h.component_with_libraries("orders", &["java"]).await?;
    let parent = h
        .workflows
        .api_versions()
        .create(&h.ctx, request(&component, "1.0.0", "orders"))
        .await?;
    let parent = h.wait_for_status(parent.id, ResourceStatus::Ready).await?;

    let detector = h.workflows.detector();
    let first = detector.on_child_resolved(&h.ctx, parent.id).await?;
    let second = detector.on_child_resolved(&h.ctx, parent.id).await?;

    let expected = Convergence::Converged {
        status: ResourceStatus::Ready,
        transitioned: false,
    };
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    let after = h.store.get(&h.ctx, parent.id).await?;
    assert_eq!(after.revision, parent.revision);
    assert_eq!(
        h.store.status_history(parent.id).await,
        vec![ResourceStatus::Pending, ResourceStatus::Ready]
    );
    Ok(())
}

/// GIVEN three READY children and a parent whose build stage is running
/// WHEN many detector calls race
/// THEN exactly one of them transitions the parent
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_transition_once() -> Result<()> {
    let h = Harness::new()?;
    let (component, libraries) = h.component_with_libraries("orders", &["java"]).await?;
    let parent = h.bare_parent(&component, 3).await?;
    for library in &libraries {
        h.bare_child(&parent, library, ResourceStatus::Ready).await?;
    }
    h.set_axes(parent.id, StageStatus::Ready, StageStatus::Running)
        .await?;

    let detector = h.workflows.detector();
    let calls = (0..16).map(|_| detector.on_child_resolved(&h.ctx, parent.id));
    let results = join_all(calls).await;

    let mut transitions = 0;
    for result in results {
        let convergence = result?;
        assert_eq!(convergence.status(), Some(ResourceStatus::Ready));
        transitions += usize::from(convergence.transitioned());
    }
    assert_eq!(transitions, 1);
    assert_eq!(
        h.store.status_history(parent.id).await,
        vec![ResourceStatus::Pending, ResourceStatus::Ready]
    );
    Ok(())
}

/// GIVEN one failed child while a sibling is still building
/// WHEN the detector runs
/// THEN the parent stays pending until the sibling stops, then reads ERROR
#[tokio::test]
async fn test_error_waits_for_every_child() -> Result<()> {
    let h = Harness::new()?;
    let (component, libraries) = h.component_with_libraries("orders", &["java"]).await?;
    let parent = h.bare_parent(&component, 2).await?;
    let (Some(model), Some(interface)) = (libraries.first(), libraries.get(1)) else {
        return Err(appmgr_core::Error::invalid_input("missing libraries"));
    };
    h.bare_child(&parent, model, ResourceStatus::Error).await?;
    let building = h
        .bare_child(&parent, interface, ResourceStatus::Pending)
        .await?;
    h.set_axes(parent.id, StageStatus::Ready, StageStatus::Running)
        .await?;

    let detector = h.workflows.detector();
    assert_eq!(
        detector.on_child_resolved(&h.ctx, parent.id).await?,
        Convergence::StillPending
    );

    h.store
        .patch(
            &h.ctx,
            building.id,
            &StatusPatch::new()
                .status(ResourceStatus::Ready)
                .pipeline(StageStatus::Ready),
            None,
        )
        .await?;
    let converged = detector.on_child_resolved(&h.ctx, parent.id).await?;
    assert_eq!(
        converged,
        Convergence::Converged {
            status: ResourceStatus::Error,
            transitioned: true
        }
    );
    let stored = h.store.get(&h.ctx, parent.id).await?;
    assert_eq!(stored.pipeline, StageStatus::Error);
    Ok(())
}

#[tokio::test]
async fn test_missing_children_keep_parent_pending() -> Result<()> {
    let h = Harness::new()?;
    let (component, libraries) = h.component_with_libraries("orders", &["java"]).await?;
    let parent = h.bare_parent(&component, 3).await?;
    for library in libraries.iter().take(2) {
        h.bare_child(&parent, library, ResourceStatus::Ready).await?;
    }
    h.set_axes(parent.id, StageStatus::Ready, StageStatus::Running)
        .await?;

    let result = h
        .workflows
        .detector()
        .on_child_resolved(&h.ctx, parent.id)
        .await?;

    assert_eq!(result, Convergence::StillPending);
    Ok(())
}

/// GIVEN every child through its source stage
/// WHEN several children report at once
/// THEN exactly one caller is told to launch the build stage
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_build_stage_is_claimed_once() -> Result<()> {
    let h = Harness::new()?;
    let component = h.component("orders").await?;
    let mut libraries = Vec::new();
    for artifact_type in ArtifactType::ALL {
        libraries.push(h.library(&component, "go", artifact_type).await?);
    }
    let parent = h.bare_parent(&component, 3).await?;
    for library in &libraries {
        h.bare_child(&parent, library, ResourceStatus::Pending)
            .await?;
    }
    h.set_axes(parent.id, StageStatus::Ready, StageStatus::Pending)
        .await?;

    let detector = h.workflows.detector();
    let calls = (0..8).map(|_| detector.on_source_resolved(&h.ctx, parent.id));
    let results = join_all(calls).await;

    let mut launches = 0;
    for result in results {
        if result? == SourceConvergence::LaunchBuild {
            launches += 1;
        }
    }
    assert_eq!(launches, 1);
    let stored = h.store.get(&h.ctx, parent.id).await?;
    assert_eq!(stored.pipeline, StageStatus::Running);
    Ok(())
}

#[tokio::test]
async fn test_build_stage_waits_for_parent_source_axis() -> Result<()> {
    let h = Harness::new()?;
    let (component, libraries) = h.component_with_libraries("orders", &["java"]).await?;
    let parent = h.bare_parent(&component, 3).await?;
    for library in &libraries {
        h.bare_child(&parent, library, ResourceStatus::Pending)
            .await?;
    }

    let result = h
        .workflows
        .detector()
        .on_source_resolved(&h.ctx, parent.id)
        .await?;

    assert_eq!(result, SourceConvergence::StillPending);
    Ok(())
}
