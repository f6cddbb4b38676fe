use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PedigreeError, Violation};

static ALIAS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.+\-]+$").expect("alias pattern compiles"));

/// Catalog-assigned identifier of a persisted individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyId(String);

impl StudyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StudyId {
    type Err = PedigreeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | ':' | '@'));
        if !is_valid {
            return Err(PedigreeError::InvalidStudy(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[default]
    #[serde(alias = "UNKNOWN")]
    Unknown,
    #[serde(alias = "MALE")]
    Male,
    #[serde(alias = "FEMALE")]
    Female,
    #[serde(alias = "UNDETERMINED")]
    Undetermined,
}

impl Sex {
    /// Sex implied by being named as a parent in the given role.
    pub fn for_role(role: ParentRole) -> Self {
        match role {
            ParentRole::Father => Sex::Male,
            ParentRole::Mother => Sex::Female,
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Unknown => write!(f, "unknown"),
            Sex::Male => write!(f, "male"),
            Sex::Female => write!(f, "female"),
            Sex::Undetermined => write!(f, "undetermined"),
        }
    }
}

impl FromStr for Sex {
    type Err = PedigreeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Sex::Unknown),
            "male" => Ok(Sex::Male),
            "female" => Ok(Sex::Female),
            "undetermined" => Ok(Sex::Undetermined),
            _ => Err(PedigreeError::InvalidSex(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentRole {
    Father,
    Mother,
}

impl fmt::Display for ParentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRole::Father => write!(f, "father"),
            ParentRole::Mother => write!(f, "mother"),
        }
    }
}

/// A pointer to an individual, decided once when the submission is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Reference {
    ById(EntityId),
    ByName(String),
}

impl Reference {
    /// Numbers strictly above `offset` are durable ids; everything else is a name.
    pub fn parse(value: &str, offset: u64) -> Self {
        let trimmed = value.trim();
        match trimmed.parse::<u64>() {
            Ok(number) if number > offset => Reference::ById(EntityId(number)),
            _ => Reference::ByName(trimmed.to_string()),
        }
    }

    pub fn from_id(value: u64, offset: u64) -> Result<Self, PedigreeError> {
        if value <= offset {
            return Err(PedigreeError::InvalidReference(format!(
                "{value} is not a durable id (ids start above {offset})"
            )));
        }
        Ok(Reference::ById(EntityId(value)))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::ById(id) => write!(f, "{id}"),
            Reference::ByName(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub name: String,
    pub id: Option<EntityId>,
    pub sex: Sex,
    pub father: Option<Reference>,
    pub mother: Option<Reference>,
    pub sibling_names: Vec<String>,
    pub disease_ids: Vec<String>,
    pub date_of_birth: Option<String>,
    pub attributes: BTreeMap<String, Value>,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            sex: Sex::Unknown,
            father: None,
            mother: None,
            sibling_names: Vec::new(),
            disease_ids: Vec::new(),
            date_of_birth: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_sex(mut self, sex: Sex) -> Self {
        self.sex = sex;
        self
    }

    pub fn with_father(mut self, father: Reference) -> Self {
        self.father = Some(father);
        self
    }

    pub fn with_mother(mut self, mother: Reference) -> Self {
        self.mother = Some(mother);
        self
    }

    pub fn with_siblings<I, S>(mut self, siblings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sibling_names = siblings.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_diseases<I, S>(mut self, diseases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disease_ids = diseases.into_iter().map(Into::into).collect();
        self
    }

    pub fn parent(&self, role: ParentRole) -> Option<&Reference> {
        match role {
            ParentRole::Father => self.father.as_ref(),
            ParentRole::Mother => self.mother.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub name: String,
    pub description: Option<String>,
    pub disease_registry: BTreeSet<String>,
    pub members: Vec<Member>,
}

impl Family {
    pub fn new(name: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            name: name.into(),
            description: None,
            disease_registry: BTreeSet::new(),
            members,
        }
    }

    pub fn with_diseases<I, S>(mut self, diseases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disease_registry = diseases.into_iter().map(Into::into).collect();
        self
    }
}

/// An individual as persisted by the entity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualRecord {
    pub id: EntityId,
    pub study: StudyId,
    pub name: String,
    pub sex: Sex,
    #[serde(default)]
    pub father: Option<EntityId>,
    #[serde(default)]
    pub mother: Option<EntityId>,
    #[serde(default)]
    pub disease_ids: Vec<String>,
    #[serde(default)]
    pub siblings: Vec<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub created_at: String,
}

/// Alias rules shared by family and member names.
pub fn check_alias(field: &str, value: &str, offset: u64, max_len: usize) -> Result<(), Violation> {
    let violation = |reason: String| Violation::Format {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    };
    if value.is_empty() {
        return Err(violation("must not be empty".to_string()));
    }
    if value.chars().count() > max_len {
        return Err(violation(format!("longer than {max_len} characters")));
    }
    if !ALIAS_PATTERN.is_match(value) {
        return Err(violation(
            "only letters, digits and _ . + - are allowed".to_string(),
        ));
    }
    if let Ok(number) = value.parse::<u64>() {
        if number > offset {
            return Err(violation(format!(
                "numeric names above {offset} are reserved for ids"
            )));
        }
    }
    Ok(())
}

/// Dates of birth use the compact `yyyyMMdd` form.
pub fn check_date_of_birth(member: &str, value: &str) -> Result<(), Violation> {
    chrono::NaiveDate::parse_from_str(value, "%Y%m%d")
        .map(|_| ())
        .map_err(|_| Violation::Format {
            field: format!("date of birth of {member}"),
            value: value.to_string(),
            reason: "expected yyyyMMdd".to_string(),
        })
}
