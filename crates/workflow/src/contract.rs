//! Contract staging and lookup.

use std::io::Write;

use appmgr_core::{
    ArtifactFile, RepositoryRef, Result, SecurityContext, CONTRACT_FALLBACK_FILENAME,
    CONTRACT_FILENAME,
};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::collaborators::SourceControl;

/// Write a contract to a local temporary file for committing.
///
/// The file is removed when the returned handle is dropped or closed.
///
/// # Errors
///
/// Returns [`appmgr_core::Error::Io`] if the file cannot be written.
pub fn stage(contract: &ArtifactFile) -> Result<NamedTempFile> {
    let mut staged = tempfile::Builder::new()
        .prefix("appmgr-contract-")
        .suffix(".yaml")
        .tempfile()?;
    staged.write_all(&contract.content)?;
    staged.flush()?;
    Ok(staged)
}

/// Read the contract committed at `tag`, trying the fallback file name.
///
/// # Errors
///
/// Returns an error if the source-control lookup fails.
pub async fn fetch(
    source_control: &dyn SourceControl,
    ctx: &SecurityContext,
    repository: &RepositoryRef,
    tag: &str,
) -> Result<Option<ArtifactFile>> {
    if let Some(file) = source_control
        .get_file(ctx, repository, tag, CONTRACT_FILENAME)
        .await?
    {
        return Ok(Some(file));
    }
    debug!(repository = %repository, tag, "Contract not found, trying fallback name");
    source_control
        .get_file(ctx, repository, tag, CONTRACT_FALLBACK_FILENAME)
        .await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::memory::InMemorySourceControl;

    #[test]
    fn test_staged_file_holds_content() {
        let contract = ArtifactFile::new(CONTRACT_FILENAME, "openapi: 3.0.0\n");
        let staged = stage(&contract).unwrap();
        let content = std::fs::read(staged.path()).unwrap();
        assert_eq!(content, contract.content);

        let path = staged.path().to_path_buf();
        staged.close().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_yml() {
        let scm = InMemorySourceControl::new();
        let repo = RepositoryRef::new("orders-api");
        scm.put_file(
            &repo,
            "1.0.0",
            ArtifactFile::new(CONTRACT_FALLBACK_FILENAME, "swagger: '2.0'"),
        )
        .await;

        let ctx = SecurityContext::system();
        let found = fetch(&scm, &ctx, &repo, "1.0.0").await.unwrap();
        assert_eq!(
            found.map(|f| f.filename),
            Some(CONTRACT_FALLBACK_FILENAME.to_string())
        );
        assert!(fetch(&scm, &ctx, &repo, "2.0.0").await.unwrap().is_none());
    }
}
