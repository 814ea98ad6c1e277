//! Build plan for the children of one parent.
//!
//! Children of the same language build in artifact order (MODEL, then
//! INTERFACE, then CLIENT); distinct languages build concurrently.

use std::collections::BTreeMap;

use appmgr_core::{ArtifactType, Language, Resource, ResourceId, Result};
use itertools::Itertools;

/// One child in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub child: ResourceId,
    pub artifact_type: ArtifactType,
}

/// Ordered steps of one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildChain {
    pub language: Language,
    pub steps: Vec<BuildStep>,
}

/// Independent chains, one per language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    pub chains: Vec<BuildChain>,
}

impl BuildPlan {
    /// Group children by language and order each group by artifact type.
    ///
    /// # Errors
    ///
    /// Returns an error if a child is not a library API version.
    pub fn from_children(children: &[Resource]) -> Result<Self> {
        let mut by_language: BTreeMap<Language, Vec<BuildStep>> = BTreeMap::new();
        for child in children {
            let spec = child.library_api_version()?;
            by_language
                .entry(spec.language.clone())
                .or_default()
                .push(BuildStep {
                    child: child.id,
                    artifact_type: spec.artifact_type,
                });
        }

        let chains = by_language
            .into_iter()
            .map(|(language, steps)| BuildChain {
                language,
                steps: steps
                    .into_iter()
                    .sorted_by_key(|step| step.artifact_type)
                    .collect(),
            })
            .collect();
        Ok(Self { chains })
    }

    /// Number of steps across all chains.
    pub fn step_count(&self) -> usize {
        self.chains.iter().map(|chain| chain.steps.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
