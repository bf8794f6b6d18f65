//! Typed relationships and the per-file relationship builders.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::nodes::{EntityKind, RowSkip, SkipReason};
use crate::source::{normalize_uri, ColumnContract, Row};
use crate::utils::text::non_empty;

/// Relationship type as stored in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    EssentialFor,
    OptionalFor,
    BroaderThan,
    PartOfGroup,
    Related,
    HasMember,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::EssentialFor => "ESSENTIAL_FOR",
            EdgeType::OptionalFor => "OPTIONAL_FOR",
            EdgeType::BroaderThan => "BROADER_THAN",
            EdgeType::PartOfGroup => "PART_OF_GROUP",
            EdgeType::Related => "RELATED",
            EdgeType::HasMember => "HAS_MEMBER",
        }
    }

    /// Whether an edge from a concept to itself is meaningful.
    pub fn allows_self_loop(&self) -> bool {
        !matches!(self, EdgeType::Related | EdgeType::BroaderThan)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two concepts, identified by URI and kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub source_uri: String,
    pub source_kind: EntityKind,
    pub target_uri: String,
    pub target_kind: EntityKind,
    pub edge_type: EdgeType,
    /// Discriminator carried onto the edge, e.g. `relationType` on `RELATED`.
    pub relation_type: Option<String>,
}

impl Relationship {
    /// Identity of the edge in the store; writes with the same key overwrite.
    pub fn key(&self) -> (EntityKind, &str, EdgeType, EntityKind, &str) {
        (
            self.source_kind,
            self.source_uri.as_str(),
            self.edge_type,
            self.target_kind,
            self.target_uri.as_str(),
        )
    }
}

/// One relationship file of the snapshot, ingested as one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationKind {
    OccupationSkill,
    SkillSkill,
    SkillHierarchy,
    OccupationHierarchy,
    OccupationIscoGroup,
    SkillCollectionMembership,
}

impl RelationKind {
    pub const ALL: [RelationKind; 6] = [
        RelationKind::OccupationSkill,
        RelationKind::SkillSkill,
        RelationKind::SkillHierarchy,
        RelationKind::OccupationHierarchy,
        RelationKind::OccupationIscoGroup,
        RelationKind::SkillCollectionMembership,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RelationKind::OccupationSkill => "OccupationSkill",
            RelationKind::SkillSkill => "SkillSkill",
            RelationKind::SkillHierarchy => "SkillHierarchy",
            RelationKind::OccupationHierarchy => "OccupationHierarchy",
            RelationKind::OccupationIscoGroup => "OccupationIscoGroup",
            RelationKind::SkillCollectionMembership => "SkillCollectionMembership",
        }
    }

    /// Checkpoint name, e.g. `relation:SkillSkill`.
    pub fn stage_name(&self) -> String {
        format!("relation:{}", self.name())
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            RelationKind::OccupationSkill => "occupationSkillRelations_en.csv",
            RelationKind::SkillSkill => "skillSkillRelations_en.csv",
            RelationKind::SkillHierarchy => "broaderRelationsSkillPillar_en.csv",
            RelationKind::OccupationHierarchy => "broaderRelationsOccPillar_en.csv",
            RelationKind::OccupationIscoGroup => "occupations_en.csv",
            RelationKind::SkillCollectionMembership => "skillCollectionRelations_en.csv",
        }
    }

    pub fn contract(&self) -> ColumnContract {
        match self {
            RelationKind::OccupationSkill => ColumnContract {
                required: &["occupationUri", "relationType", "skillUri"],
                identifiers: &["occupationUri", "skillUri"],
            },
            RelationKind::SkillSkill => ColumnContract {
                required: &["originalSkillUri", "relationType", "relatedSkillUri"],
                identifiers: &["originalSkillUri", "relatedSkillUri"],
            },
            RelationKind::SkillHierarchy | RelationKind::OccupationHierarchy => ColumnContract {
                required: &["conceptType", "conceptUri", "broaderType", "broaderUri"],
                identifiers: &["conceptUri", "broaderUri"],
            },
            RelationKind::OccupationIscoGroup => ColumnContract {
                required: &["conceptUri", "iscoGroup"],
                identifiers: &["conceptUri"],
            },
            RelationKind::SkillCollectionMembership => ColumnContract {
                required: &["collectionUri", "skillUri"],
                identifiers: &["collectionUri", "skillUri"],
            },
        }
    }

    /// Entity kinds that must be checkpointed before this stage may run.
    pub fn depends_on(&self) -> &'static [EntityKind] {
        match self {
            RelationKind::OccupationSkill => &[EntityKind::Occupation, EntityKind::Skill],
            RelationKind::SkillSkill => &[EntityKind::Skill],
            RelationKind::SkillHierarchy => &[EntityKind::Skill, EntityKind::SkillGroup],
            RelationKind::OccupationHierarchy => &[EntityKind::Occupation, EntityKind::IscoGroup],
            RelationKind::OccupationIscoGroup => &[EntityKind::Occupation, EntityKind::IscoGroup],
            RelationKind::SkillCollectionMembership => {
                &[EntityKind::SkillCollection, EntityKind::Skill]
            }
        }
    }

    /// Build a relationship from one row of this kind's file.
    ///
    /// Endpoint existence is not checked here; the store reports unmatched
    /// endpoints per batch.
    pub fn transform(&self, row: &Row) -> Result<Relationship, RowSkip> {
        let skip = |reason| RowSkip::new(row.line(), reason);
        let endpoint = |col: &str| {
            let value = row.get(col);
            if value.is_empty() {
                Err(skip(SkipReason::MissingEndpoint))
            } else {
                Ok(value.to_string())
            }
        };

        let rel = match self {
            RelationKind::OccupationSkill => {
                let occupation = endpoint("occupationUri")?;
                let skill = endpoint("skillUri")?;
                let edge_type = match row.get("relationType").to_ascii_lowercase().as_str() {
                    "essential" => EdgeType::EssentialFor,
                    "optional" => EdgeType::OptionalFor,
                    _ => return Err(skip(SkipReason::UnknownDiscriminator)),
                };
                Relationship {
                    source_uri: skill,
                    source_kind: EntityKind::Skill,
                    target_uri: occupation,
                    target_kind: EntityKind::Occupation,
                    edge_type,
                    relation_type: None,
                }
            }
            RelationKind::SkillSkill => Relationship {
                source_uri: endpoint("originalSkillUri")?,
                source_kind: EntityKind::Skill,
                target_uri: endpoint("relatedSkillUri")?,
                target_kind: EntityKind::Skill,
                edge_type: EdgeType::Related,
                relation_type: non_empty(row.get("relationType")),
            },
            RelationKind::SkillHierarchy | RelationKind::OccupationHierarchy => {
                let narrower = endpoint("conceptUri")?;
                let broader = endpoint("broaderUri")?;
                let narrower_kind = self
                    .endpoint_kind(row.get("conceptType"))
                    .ok_or_else(|| skip(SkipReason::UnknownEndpointType))?;
                let broader_kind = self
                    .endpoint_kind(row.get("broaderType"))
                    .ok_or_else(|| skip(SkipReason::UnknownEndpointType))?;
                Relationship {
                    source_uri: broader,
                    source_kind: broader_kind,
                    target_uri: narrower,
                    target_kind: narrower_kind,
                    edge_type: EdgeType::BroaderThan,
                    relation_type: None,
                }
            }
            RelationKind::OccupationIscoGroup => Relationship {
                source_uri: endpoint("conceptUri")?,
                source_kind: EntityKind::Occupation,
                target_uri: isco_group_uri(&endpoint("iscoGroup")?),
                target_kind: EntityKind::IscoGroup,
                edge_type: EdgeType::PartOfGroup,
                relation_type: None,
            },
            RelationKind::SkillCollectionMembership => Relationship {
                source_uri: endpoint("collectionUri")?,
                source_kind: EntityKind::SkillCollection,
                target_uri: endpoint("skillUri")?,
                target_kind: EntityKind::Skill,
                edge_type: EdgeType::HasMember,
                relation_type: None,
            },
        };

        if !rel.edge_type.allows_self_loop()
            && rel.source_kind == rel.target_kind
            && rel.source_uri == rel.target_uri
        {
            return Err(skip(SkipReason::SelfLoop));
        }
        Ok(rel)
    }

    /// Map a hierarchy file's `*Type` column to the kind it names.
    fn endpoint_kind(&self, raw: &str) -> Option<EntityKind> {
        match (self, raw) {
            (RelationKind::SkillHierarchy, "SkillGroup") => Some(EntityKind::SkillGroup),
            (RelationKind::SkillHierarchy, "KnowledgeSkillCompetence" | "Skill") => {
                Some(EntityKind::Skill)
            }
            (RelationKind::OccupationHierarchy, "ISCOGroup") => Some(EntityKind::IscoGroup),
            (RelationKind::OccupationHierarchy, "Occupation") => Some(EntityKind::Occupation),
            _ => None,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of the ISCO group an occupation's `iscoGroup` cell points at.
///
/// The cell holds either the bare ISCO code (`2511`), which maps to the
/// group concept `C2511`, or a full concept URI.
pub fn isco_group_uri(cell: &str) -> String {
    if cell.contains('/') {
        return normalize_uri(cell);
    }
    if cell.starts_with('C') {
        cell.to_string()
    } else {
        format!("C{cell}")
    }
}
