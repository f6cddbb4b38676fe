use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::{EntityId, IndividualRecord, Sex, StudyId};
use crate::error::PedigreeError;

/// Everything needed to persist one individual.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIndividual {
    pub name: String,
    pub sex: Sex,
    pub father: Option<EntityId>,
    pub mother: Option<EntityId>,
    pub disease_ids: Vec<String>,
    pub siblings: Vec<String>,
    pub date_of_birth: Option<String>,
    pub attributes: BTreeMap<String, Value>,
}

/// Durable home of individual records. Each call is atomic on its own; nothing
/// spans several records.
pub trait EntityStore {
    /// Returns the record whichever study owns it, so callers can check scoping.
    fn lookup_individual_by_id(
        &self,
        study: &StudyId,
        id: EntityId,
    ) -> Result<Option<IndividualRecord>, PedigreeError>;

    fn lookup_individual_by_name(
        &self,
        study: &StudyId,
        name: &str,
    ) -> Result<Option<IndividualRecord>, PedigreeError>;

    fn create_individual(
        &self,
        study: &StudyId,
        individual: NewIndividual,
    ) -> Result<EntityId, PedigreeError>;

    fn list_individuals(&self, study: &StudyId) -> Result<Vec<IndividualRecord>, PedigreeError>;
}
