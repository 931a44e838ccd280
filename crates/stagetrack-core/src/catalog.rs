//! # Stage Catalog
//!
//! The ordered, read-only definition of every stage in the delivery pipeline.
//!
//! ## Standard Pipeline
//!
//! | Id | Name | Prerequisites |
//! |----|------|---------------|
//! | 1 | Architecture Decomposition | - |
//! | 2 | Story Mapping | 1 |
//! | 3 | Prioritization | 2 |
//! | 4 | Enhanced Task Breakdown | 3 |
//! | 5 | Contract Definition | 4 |
//! | 6 | Parallel Execution | 5 |
//! | 7 | Integration & Validation | 6 |
//! | 8 | Release & Learning | 7 |
//!
//! The standard pipeline is a linear chain, but prerequisites are a set per
//! stage: any acyclic graph over earlier stages is accepted by
//! [`StageCatalog::new`].

use crate::primitives::MAX_CATALOG_STAGES;
use crate::{StageId, TrackError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// STAGE DEFINITION
// =============================================================================

/// Immutable definition of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Stages that must be completed before this one may begin.
    #[serde(default)]
    pub prerequisites: BTreeSet<StageId>,
    /// Opaque descriptors of what the stage is expected to produce.
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    /// Human-readable checklist for the stage.
    #[serde(default)]
    pub validation_criteria: Vec<String>,
}

impl StageDefinition {
    fn fixed(
        id: u32,
        name: &str,
        description: &str,
        prerequisites: &[u32],
        outputs: &[&str],
        criteria: &[&str],
    ) -> Self {
        Self {
            id: StageId(id),
            name: name.to_string(),
            description: description.to_string(),
            prerequisites: prerequisites.iter().copied().map(StageId).collect(),
            expected_outputs: outputs.iter().map(|s| (*s).to_string()).collect(),
            validation_criteria: criteria.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

// =============================================================================
// STAGE CATALOG
// =============================================================================

/// The validated, ordered list of stage definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCatalog {
    stages: Vec<StageDefinition>,
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl StageCatalog {
    /// Build a catalog from definitions, validating it first.
    ///
    /// Rejects empty catalogs, ids that are not exactly `1..=N` in order,
    /// unnamed stages, unknown or self prerequisites, prerequisite cycles and
    /// prerequisites on later stages.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, TrackError> {
        if stages.is_empty() {
            return Err(TrackError::InvalidCatalog(
                "catalog defines no stages".to_string(),
            ));
        }
        if stages.len() > MAX_CATALOG_STAGES {
            return Err(TrackError::InvalidCatalog(format!(
                "catalog defines {} stages (maximum {})",
                stages.len(),
                MAX_CATALOG_STAGES
            )));
        }

        for (index, stage) in stages.iter().enumerate() {
            let expected = StageId(index as u32 + 1);
            if stage.id != expected {
                return Err(TrackError::InvalidCatalog(format!(
                    "stage at position {} has id {} (ids must run 1..N in order)",
                    expected, stage.id
                )));
            }
            if stage.name.trim().is_empty() {
                return Err(TrackError::InvalidCatalog(format!(
                    "stage {} has an empty name",
                    stage.id
                )));
            }
        }

        let known: BTreeSet<StageId> = stages.iter().map(|s| s.id).collect();
        for stage in &stages {
            for prereq in &stage.prerequisites {
                if *prereq == stage.id {
                    return Err(TrackError::InvalidCatalog(format!(
                        "stage {} lists itself as a prerequisite",
                        stage.id
                    )));
                }
                if !known.contains(prereq) {
                    return Err(TrackError::InvalidCatalog(format!(
                        "stage {} depends on unknown stage {}",
                        stage.id, prereq
                    )));
                }
            }
        }

        if let Some(cycle) = find_cycle(&stages) {
            let path = cycle
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(TrackError::InvalidCatalog(format!(
                "prerequisite cycle: {}",
                path
            )));
        }

        // Stages run in id order, so a prerequisite on a later stage could
        // never be satisfied.
        for stage in &stages {
            if let Some(later) = stage.prerequisites.iter().find(|p| **p > stage.id) {
                return Err(TrackError::InvalidCatalog(format!(
                    "stage {} depends on later stage {}",
                    stage.id, later
                )));
            }
        }

        Ok(Self { stages })
    }

    /// The standard eight-stage delivery pipeline.
    #[must_use]
    pub fn standard() -> Self {
        let stages = vec![
            StageDefinition::fixed(
                1,
                "Architecture Decomposition",
                "Define system boundaries and components",
                &[],
                &["architecture.md", "components.json", "integration-points.md"],
                &[
                    "All major components identified",
                    "Component boundaries clearly defined",
                    "Integration points documented",
                    "Technical approach validated",
                ],
            ),
            StageDefinition::fixed(
                2,
                "Story Mapping",
                "Map user journeys and create stories",
                &[1],
                &[
                    "personas.json",
                    "journey-maps.md",
                    "stories.json",
                    "story-map.md",
                ],
                &[
                    "All user journeys documented",
                    "Stories written with acceptance criteria",
                    "Stories organized by priority",
                    "Dependencies identified",
                ],
            ),
            StageDefinition::fixed(
                3,
                "Prioritization",
                "Sequence work by value and dependencies",
                &[2],
                &[
                    "prioritized-backlog.json",
                    "risk-matrix.md",
                    "dependency-graph.md",
                    "execution-plan.md",
                ],
                &[
                    "All stories prioritized",
                    "Dependencies mapped",
                    "Execution phases defined",
                    "Critical path identified",
                ],
            ),
            StageDefinition::fixed(
                4,
                "Enhanced Task Breakdown",
                "Create atomic, executable tasks",
                &[3],
                &[
                    ".tmp/tasks/{feature}/task.json",
                    ".tmp/tasks/{feature}/subtask_*.json",
                ],
                &[
                    "All tasks defined with clear objectives",
                    "Dependencies mapped correctly",
                    "Parallel batches identified",
                    "Task JSON validated",
                ],
            ),
            StageDefinition::fixed(
                5,
                "Contract Definition",
                "Define interfaces before implementation",
                &[4],
                &["contracts/*.ts", "api-contracts.md", "data-schemas.ts"],
                &[
                    "All integration points have contracts",
                    "Contracts validated against architecture",
                    "Type definitions complete",
                    "Documentation written",
                ],
            ),
            StageDefinition::fixed(
                6,
                "Parallel Execution",
                "Execute independent work simultaneously",
                &[5],
                &[
                    "Implemented deliverables",
                    "Completed tasks",
                    "Self-review reports",
                ],
                &[
                    "All tasks completed successfully",
                    "Deliverables verified",
                    "Acceptance criteria met",
                    "No blocking failures",
                ],
            ),
            StageDefinition::fixed(
                7,
                "Integration & Validation",
                "Integrate and validate components",
                &[6],
                &[
                    "Integrated system",
                    "Integration test results",
                    "Validation report",
                ],
                &[
                    "All components integrated",
                    "Integration tests passing",
                    "Acceptance criteria met",
                    "System validated end-to-end",
                ],
            ),
            StageDefinition::fixed(
                8,
                "Release & Learning",
                "Deploy and capture insights",
                &[7],
                &[
                    "Deployed feature",
                    "Release notes",
                    "Lessons learned",
                    "Updated standards",
                ],
                &[
                    "Feature deployed successfully",
                    "Production validated",
                    "Insights documented",
                    "Team aligned on learnings",
                ],
            ),
        ];
        Self { stages }
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a validated catalog.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Look up a stage definition.
    #[must_use]
    pub fn get(&self, id: StageId) -> Option<&StageDefinition> {
        let index = (id.value() as usize).checked_sub(1)?;
        self.stages.get(index)
    }

    /// Look up a stage definition, failing with `UnknownStage`.
    pub fn require(&self, id: StageId) -> Result<&StageDefinition, TrackError> {
        self.get(id).ok_or(TrackError::UnknownStage {
            stage: id,
            max: self.last_id().value(),
        })
    }

    /// Name of a stage, or `"unknown"`.
    #[must_use]
    pub fn name_of(&self, id: StageId) -> &str {
        self.get(id).map(|s| s.name.as_str()).unwrap_or("unknown")
    }

    #[must_use]
    pub fn first_id(&self) -> StageId {
        StageId(1)
    }

    #[must_use]
    pub fn last_id(&self) -> StageId {
        StageId(self.stages.len() as u32)
    }

    /// Whether `id` is the terminal stage.
    #[must_use]
    pub fn is_last(&self, id: StageId) -> bool {
        id == self.last_id()
    }

    /// Iterate definitions in execution order.
    pub fn iter(&self) -> std::slice::Iter<'_, StageDefinition> {
        self.stages.iter()
    }

    /// All definitions in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }
}

impl<'a> IntoIterator for &'a StageCatalog {
    type Item = &'a StageDefinition;
    type IntoIter = std::slice::Iter<'a, StageDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// CYCLE DETECTION
// =============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search over prerequisite edges; returns the first cycle found.
fn find_cycle(stages: &[StageDefinition]) -> Option<Vec<StageId>> {
    let edges: BTreeMap<StageId, &BTreeSet<StageId>> =
        stages.iter().map(|s| (s.id, &s.prerequisites)).collect();
    let mut marks: BTreeMap<StageId, Mark> = BTreeMap::new();
    let mut path = Vec::new();

    for stage in stages {
        if !marks.contains_key(&stage.id) {
            if let Some(cycle) = visit(stage.id, &edges, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    node: StageId,
    edges: &BTreeMap<StageId, &BTreeSet<StageId>>,
    marks: &mut BTreeMap<StageId, Mark>,
    path: &mut Vec<StageId>,
) -> Option<Vec<StageId>> {
    marks.insert(node, Mark::Visiting);
    path.push(node);

    if let Some(prereqs) = edges.get(&node) {
        for prereq in prereqs.iter() {
            match marks.get(prereq) {
                None => {
                    if let Some(cycle) = visit(*prereq, edges, marks, path) {
                        return Some(cycle);
                    }
                }
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| n == prereq).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(*prereq);
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
            }
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
    None
}

// =============================================================================
// TESTS
// =============================================================================
