//! Taxonomy concepts and the per-kind row builders.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::skip::{RowSkip, SkipReason};
use crate::source::{ColumnContract, Row};
use crate::utils::text::{non_empty, normalize_whitespace, split_alt_labels};

/// The five ESCO concept kinds, each stored under its own label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Occupation,
    Skill,
    SkillGroup,
    #[serde(rename = "ISCOGroup")]
    IscoGroup,
    SkillCollection,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Occupation,
        EntityKind::Skill,
        EntityKind::SkillGroup,
        EntityKind::IscoGroup,
        EntityKind::SkillCollection,
    ];

    /// Graph label for this kind.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Occupation => "Occupation",
            EntityKind::Skill => "Skill",
            EntityKind::SkillGroup => "SkillGroup",
            EntityKind::IscoGroup => "ISCOGroup",
            EntityKind::SkillCollection => "SkillCollection",
        }
    }

    /// Checkpoint name, e.g. `entity:Skill`.
    pub fn stage_name(&self) -> String {
        format!("entity:{}", self.label())
    }

    /// Snapshot file holding this kind.
    pub fn file_name(&self) -> &'static str {
        match self {
            EntityKind::Occupation => "occupations_en.csv",
            EntityKind::Skill => "skills_en.csv",
            EntityKind::SkillGroup => "skillGroups_en.csv",
            EntityKind::IscoGroup => "ISCOGroups_en.csv",
            EntityKind::SkillCollection => "skillCollections_en.csv",
        }
    }

    pub fn contract(&self) -> ColumnContract {
        const IDS: &[&str] = &["conceptUri"];
        match self {
            EntityKind::IscoGroup => ColumnContract {
                required: &["conceptUri", "preferredLabel", "code"],
                identifiers: IDS,
            },
            _ => ColumnContract {
                required: &["conceptUri", "preferredLabel"],
                identifiers: IDS,
            },
        }
    }

    /// Build an entity from one row of this kind's file.
    ///
    /// Pure: the caller counts the returned skips.
    pub fn transform(&self, row: &Row) -> Result<Entity, RowSkip> {
        let skip = |reason| RowSkip::new(row.line(), reason);

        let uri = row.get("conceptUri");
        if uri.is_empty() {
            return Err(skip(SkipReason::MissingIdentifier));
        }
        let preferred_label = normalize_whitespace(row.get("preferredLabel"));
        if preferred_label.is_empty() {
            return Err(skip(SkipReason::MissingLabel));
        }

        let attributes = match self {
            EntityKind::Occupation => EntityAttributes::Occupation {
                isco_code: non_empty(row.get("iscoGroup")),
                code: non_empty(row.get("code")),
            },
            EntityKind::Skill => EntityAttributes::Skill {
                skill_type: non_empty(row.get("skillType")),
                reuse_level: non_empty(row.get("reuseLevel")),
            },
            EntityKind::SkillGroup => EntityAttributes::SkillGroup {
                code: non_empty(row.get("code")),
            },
            EntityKind::IscoGroup => EntityAttributes::IscoGroup {
                code: non_empty(row.get("code"))
                    .ok_or_else(|| skip(SkipReason::MissingField("code")))?,
            },
            EntityKind::SkillCollection => EntityAttributes::SkillCollection {
                collection_type: non_empty(row.get("collectionType")),
            },
        };

        Ok(Entity {
            uri: uri.to_string(),
            kind: *self,
            preferred_label,
            description: non_empty(row.get("description")),
            alt_labels: split_alt_labels(row.get("altLabels")),
            attributes,
        })
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind-specific scalar properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntityAttributes {
    Occupation {
        isco_code: Option<String>,
        code: Option<String>,
    },
    Skill {
        skill_type: Option<String>,
        reuse_level: Option<String>,
    },
    SkillGroup {
        code: Option<String>,
    },
    IscoGroup {
        code: String,
    },
    SkillCollection {
        collection_type: Option<String>,
    },
}

impl EntityAttributes {
    /// Property name/value pairs as stored on the node.
    pub fn scalars(&self) -> Vec<(&'static str, Option<&str>)> {
        match self {
            EntityAttributes::Occupation { isco_code, code } => {
                vec![("iscoCode", isco_code.as_deref()), ("code", code.as_deref())]
            }
            EntityAttributes::Skill {
                skill_type,
                reuse_level,
            } => vec![
                ("skillType", skill_type.as_deref()),
                ("reuseLevel", reuse_level.as_deref()),
            ],
            EntityAttributes::SkillGroup { code } => vec![("code", code.as_deref())],
            EntityAttributes::IscoGroup { code } => vec![("code", Some(code.as_str()))],
            EntityAttributes::SkillCollection { collection_type } => {
                vec![("collectionType", collection_type.as_deref())]
            }
        }
    }
}

/// A taxonomy concept ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Trailing segment of the concept URI; unique within the kind.
    pub uri: String,
    pub kind: EntityKind,
    pub preferred_label: String,
    pub description: Option<String>,
    pub alt_labels: Vec<String>,
    pub attributes: EntityAttributes,
}

impl Entity {
    /// Text sent to the embedding backend.
    ///
    /// Non-empty parts of `[label, altLabels joined by "; ", description]`
    /// joined by `". "`. Changing this invalidates every cached and stored
    /// vector.
    pub fn embedding_text(&self) -> String {
        let alt = self.alt_labels.join("; ");
        [
            self.preferred_label.as_str(),
            alt.as_str(),
            self.description.as_deref().unwrap_or(""),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(". ")
    }
}
