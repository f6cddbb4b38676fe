use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{EntityId, Family, Member, Reference, Sex};
use crate::error::PedigreeError;

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilySubmission {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "diseases")]
    pub disease_registry: Vec<String>,
    #[serde(default)]
    pub members: Vec<MemberEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEntry {
    pub name: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub father: Option<ReferenceEntry>,
    #[serde(default)]
    pub mother: Option<ReferenceEntry>,
    #[serde(default, alias = "siblings")]
    pub sibling_names: Vec<String>,
    #[serde(default)]
    pub disease_ids: Vec<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// Parent references accept a bare number, a string, or `{ "id" | "name" }`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ReferenceEntry {
    Id(u64),
    Shorthand(String),
    Detailed(ReferenceEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReferenceEntryObject {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

pub struct SubmissionLoader;

impl SubmissionLoader {
    pub fn load(path: &Path, offset: u64) -> Result<Family, PedigreeError> {
        let content = fs::read_to_string(path)
            .map_err(|_| PedigreeError::SubmissionRead(path.to_path_buf()))?;
        Self::parse(&content, offset)
    }

    pub fn parse(content: &str, offset: u64) -> Result<Family, PedigreeError> {
        let submission: FamilySubmission = serde_json::from_str(content)
            .map_err(|err| PedigreeError::SubmissionParse(err.to_string()))?;
        Self::resolve_submission(submission, offset)
    }

    pub fn resolve_submission(
        submission: FamilySubmission,
        offset: u64,
    ) -> Result<Family, PedigreeError> {
        let members = submission
            .members
            .into_iter()
            .map(|entry| resolve_member(entry, offset))
            .collect::<Result<Vec<_>, PedigreeError>>()?;

        Ok(Family {
            name: submission.name.trim().to_string(),
            description: submission.description,
            disease_registry: submission.disease_registry.into_iter().collect(),
            members,
        })
    }
}

fn resolve_member(entry: MemberEntry, offset: u64) -> Result<Member, PedigreeError> {
    let father = entry
        .father
        .map(|reference| resolve_reference(reference, offset))
        .transpose()?
        .flatten();
    let mother = entry
        .mother
        .map(|reference| resolve_reference(reference, offset))
        .transpose()?
        .flatten();

    Ok(Member {
        name: entry.name.trim().to_string(),
        // ids at or below the offset are placeholders, not catalog ids
        id: entry.id.filter(|id| *id > offset).map(EntityId::new),
        sex: entry.sex.unwrap_or_default(),
        father,
        mother,
        sibling_names: entry
            .sibling_names
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect(),
        disease_ids: entry.disease_ids,
        date_of_birth: entry.date_of_birth.filter(|value| !value.trim().is_empty()),
        attributes: entry.attributes,
    })
}

fn resolve_reference(
    entry: ReferenceEntry,
    offset: u64,
) -> Result<Option<Reference>, PedigreeError> {
    match entry {
        ReferenceEntry::Id(id) => Ok(Some(Reference::parse(&id.to_string(), offset))),
        ReferenceEntry::Shorthand(value) if value.trim().is_empty() => Ok(None),
        ReferenceEntry::Shorthand(value) => Ok(Some(Reference::parse(&value, offset))),
        ReferenceEntry::Detailed(obj) => match (obj.id, obj.name) {
            (Some(id), _) if id > offset => Ok(Some(Reference::ById(EntityId::new(id)))),
            (_, Some(name)) if !name.trim().is_empty() => {
                Ok(Some(Reference::ByName(name.trim().to_string())))
            }
            (Some(id), _) => Err(PedigreeError::InvalidReference(format!(
                "{id} is neither a durable id nor accompanied by a name"
            ))),
            (None, _) => Ok(None),
        },
    }
}
