use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{EntityId, IndividualRecord, Member, ParentRole, Sex, StudyId};
use crate::error::{PartialProvisioningOutcome, PedigreeError};
use crate::gateway::{EntityStore, NewIndividual};
use crate::pedigree::graph::{ParentLink, PedigreeNode};
use crate::pedigree::validate::ValidatedPedigree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberAction {
    Created,
    Reused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberOutcome {
    pub name: String,
    pub id: EntityId,
    pub generation: usize,
    pub action: MemberAction,
}

/// Member name to durable id, for every provisioned member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProvisionedIds(BTreeMap<String, EntityId>);

impl ProvisionedIds {
    pub fn get(&self, name: &str) -> Option<EntityId> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntityId)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, EntityId)> for ProvisionedIds {
    fn from_iter<T: IntoIterator<Item = (String, EntityId)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
pub struct Provisioned {
    pub ids: ProvisionedIds,
    pub outcomes: Vec<MemberOutcome>,
    pub warnings: Vec<String>,
}

pub struct Provisioner<'a, S: EntityStore> {
    store: &'a S,
    study: &'a StudyId,
}

impl<'a, S: EntityStore> Provisioner<'a, S> {
    pub fn new(store: &'a S, study: &'a StudyId) -> Self {
        Self { store, study }
    }

    /// Walks the generations in order, reusing or creating one individual per
    /// member. Parents always get their ids before any of their children is
    /// written. Stops at the first failing write; earlier writes stay.
    pub fn provision(
        &self,
        pedigree: &ValidatedPedigree,
    ) -> Result<Provisioned, PartialProvisioningOutcome> {
        let graph = pedigree.graph();
        let mut ids = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(pedigree.generations().member_count());
        let mut warnings = Vec::new();

        for (generation, level) in pedigree.generations().levels().iter().enumerate() {
            debug!(generation, members = level.len(), "provisioning generation");
            for name in level {
                let step = graph
                    .node(name)
                    .ok_or_else(|| PedigreeError::MissingMember(name.clone()))
                    .and_then(|node| {
                        self.check_and_create(name, node, pedigree, &ids, &mut warnings)
                    });

                match step {
                    Ok((id, action)) => {
                        ids.insert(name.clone(), id);
                        outcomes.push(MemberOutcome {
                            name: name.clone(),
                            id,
                            generation,
                            action,
                        });
                    }
                    Err(err) => {
                        warn!(member = %name, error = %err, "provisioning stopped");
                        return Err(PartialProvisioningOutcome {
                            completed: outcomes,
                            failed_member: name.clone(),
                            cause: err.to_string(),
                        });
                    }
                }
            }
        }

        let created = outcomes
            .iter()
            .filter(|outcome| outcome.action == MemberAction::Created)
            .count();
        info!(
            family = %graph.family_name,
            created,
            reused = outcomes.len() - created,
            "family provisioned"
        );

        Ok(Provisioned {
            ids: ProvisionedIds(ids),
            outcomes,
            warnings,
        })
    }

    fn check_and_create(
        &self,
        name: &str,
        node: &PedigreeNode,
        pedigree: &ValidatedPedigree,
        ids: &BTreeMap<String, EntityId>,
        warnings: &mut Vec<String>,
    ) -> Result<(EntityId, MemberAction), PedigreeError> {
        let member = node
            .member
            .as_ref()
            .ok_or_else(|| PedigreeError::MissingMember(name.to_string()))?;
        let father = resolve_parent(node, ParentRole::Father, ids)?;
        let mother = resolve_parent(node, ParentRole::Mother, ids)?;

        if let Some(id) = node.resolved_id {
            let record = self
                .store
                .lookup_individual_by_id(self.study, id)?
                .ok_or_else(|| PedigreeError::IndividualNotFound(id.to_string()))?;
            self.verify_reuse(name, node, &record)?;
            compare_stored(member, &record, father, mother, warnings);
            debug!(member = %name, %id, "reusing stored individual");
            return Ok((id, MemberAction::Reused));
        }

        if let Some(record) = self.store.lookup_individual_by_name(self.study, name)? {
            self.verify_reuse(name, node, &record)?;
            if !pedigree.stored().contains_key(name) {
                warnings.push(format!(
                    "{name} appeared in the store after validation and was reused as {}",
                    record.id
                ));
            }
            compare_stored(member, &record, father, mother, warnings);
            return Ok((record.id, MemberAction::Reused));
        }

        let sex = match member.sex {
            Sex::Unknown => node.inferred_sex.unwrap_or(Sex::Unknown),
            declared => declared,
        };
        let id = self.store.create_individual(
            self.study,
            NewIndividual {
                name: name.to_string(),
                sex,
                father,
                mother,
                disease_ids: member.disease_ids.clone(),
                siblings: member.sibling_names.clone(),
                date_of_birth: member.date_of_birth.clone(),
                attributes: member.attributes.clone(),
            },
        )?;
        debug!(member = %name, %id, %sex, "created individual");
        Ok((id, MemberAction::Created))
    }

    /// The store may have changed since validation; a record is only reused
    /// while it still belongs to the study and fits the member's parental role.
    fn verify_reuse(
        &self,
        name: &str,
        node: &PedigreeNode,
        record: &IndividualRecord,
    ) -> Result<(), PedigreeError> {
        if &record.study != self.study {
            return Err(PedigreeError::StoredConflict(format!(
                "{name} resolved to individual {} of study {}",
                record.id, record.study
            )));
        }
        match node.inferred_sex {
            Some(expected) if record.sex != expected => {
                Err(PedigreeError::StoredConflict(format!(
                    "{name} is stored as {} ({}), expected {expected}",
                    record.id, record.sex
                )))
            }
            _ => Ok(()),
        }
    }
}

fn resolve_parent(
    node: &PedigreeNode,
    role: ParentRole,
    ids: &BTreeMap<String, EntityId>,
) -> Result<Option<EntityId>, PedigreeError> {
    match node.parent(role) {
        None => Ok(None),
        Some(ParentLink::Stored(id)) => Ok(Some(*id)),
        Some(ParentLink::Member(parent)) => ids.get(parent).copied().map(Some).ok_or_else(|| {
            PedigreeError::UnresolvedReference(format!("{role} {parent} has no id yet"))
        }),
    }
}

/// Stored records are never rewritten; differences are only reported.
fn compare_stored(
    member: &Member,
    record: &IndividualRecord,
    father: Option<EntityId>,
    mother: Option<EntityId>,
    warnings: &mut Vec<String>,
) {
    if !member.sibling_names.is_empty() {
        let submitted: BTreeSet<&String> = member.sibling_names.iter().collect();
        let stored: BTreeSet<&String> = record.siblings.iter().collect();
        if submitted != stored {
            warnings.push(format!(
                "siblings submitted for {} differ from stored individual {}; stored siblings kept",
                member.name, record.id
            ));
        }
    }
    for (role, submitted, stored) in [
        (ParentRole::Father, father, record.father),
        (ParentRole::Mother, mother, record.mother),
    ] {
        if submitted.is_some() && submitted != stored {
            warnings.push(format!(
                "{role} submitted for {} differs from stored individual {}; stored link kept",
                member.name, record.id
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::{Family, Reference};
    use crate::pedigree::graph::PedigreeGraph;
    use crate::pedigree::validate::{ValidationRules, validate};

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<IndividualRecord>>,
        fail_on: Option<String>,
    }

    impl EntityStore for MemoryStore {
        fn lookup_individual_by_id(
            &self,
            _study: &StudyId,
            id: EntityId,
        ) -> Result<Option<IndividualRecord>, PedigreeError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|record| record.id == id)
                .cloned())
        }

        fn lookup_individual_by_name(
            &self,
            study: &StudyId,
            name: &str,
        ) -> Result<Option<IndividualRecord>, PedigreeError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|record| &record.study == study && record.name == name)
                .cloned())
        }

        fn create_individual(
            &self,
            study: &StudyId,
            individual: NewIndividual,
        ) -> Result<EntityId, PedigreeError> {
            if self.fail_on.as_deref() == Some(individual.name.as_str()) {
                return Err(PedigreeError::Store("disk full".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            let id = EntityId::new(1001 + records.len() as u64);
            records.push(IndividualRecord {
                id,
                study: study.clone(),
                name: individual.name,
                sex: individual.sex,
                father: individual.father,
                mother: individual.mother,
                disease_ids: individual.disease_ids,
                siblings: individual.siblings,
                date_of_birth: individual.date_of_birth,
                attributes: individual.attributes,
                created_at: "2024-01-01T00:00:00Z".to_string(),
            });
            Ok(id)
        }

        fn list_individuals(
            &self,
            _study: &StudyId,
        ) -> Result<Vec<IndividualRecord>, PedigreeError> {
            Ok(self.records.lock().unwrap().clone())
        }
    }

    fn study() -> StudyId {
        "s1".parse().unwrap()
    }

    fn trio() -> Family {
        Family::new(
            "trio",
            vec![
                Member::new("Carol")
                    .with_father(Reference::ByName("Alice".to_string()))
                    .with_mother(Reference::ByName("Bob".to_string())),
                Member::new("Alice"),
                Member::new("Bob"),
            ],
        )
    }

    fn validated(family: &Family, store: &MemoryStore) -> ValidatedPedigree {
        let graph = PedigreeGraph::build(family).unwrap();
        let rules = ValidationRules {
            offset: 1000,
            alias_max_length: 100,
        };
        validate(graph, store, &study(), rules).unwrap()
    }

    #[test]
    fn parents_created_before_children() {
        let store = MemoryStore::default();
        let study = study();
        let pedigree = validated(&trio(), &store);
        let provisioned = Provisioner::new(&store, &study).provision(&pedigree).unwrap();

        assert_eq!(provisioned.ids.len(), 3);
        let records = store.records.lock().unwrap();
        assert_eq!(records[2].name, "Carol");
        assert_eq!(records[2].father, provisioned.ids.get("Alice"));
        assert_eq!(records[2].mother, provisioned.ids.get("Bob"));
        assert_eq!(records[0].sex, Sex::Male);
        assert_eq!(records[1].sex, Sex::Female);
    }

    #[test]
    fn second_run_reuses_everything() {
        let store = MemoryStore::default();
        let study = study();
        let pedigree = validated(&trio(), &store);
        let first = Provisioner::new(&store, &study).provision(&pedigree).unwrap();

        let pedigree = validated(&trio(), &store);
        let second = Provisioner::new(&store, &study).provision(&pedigree).unwrap();
        assert_eq!(first.ids, second.ids);
        assert!(
            second
                .outcomes
                .iter()
                .all(|outcome| outcome.action == MemberAction::Reused)
        );
        assert_eq!(store.records.lock().unwrap().len(), 3);
    }

    #[test]
    fn failure_reports_completed_members() {
        let store = MemoryStore {
            fail_on: Some("Carol".to_string()),
            ..MemoryStore::default()
        };
        let study = study();
        let pedigree = validated(&trio(), &store);
        let outcome = Provisioner::new(&store, &study)
            .provision(&pedigree)
            .unwrap_err();

        assert_eq!(outcome.failed_member, "Carol");
        assert_eq!(outcome.completed.len(), 2);
        assert_matches!(
            outcome.completed.as_slice(),
            [MemberOutcome { generation: 0, action: MemberAction::Created, .. }, ..]
        );
        assert!(outcome.cause.contains("disk full"));
    }

    #[test]
    fn differing_siblings_only_warn() {
        let store = MemoryStore::default();
        let study = study();
        let family = Family::new(
            "f",
            vec![
                Member::new("A").with_siblings(["B"]),
                Member::new("B").with_siblings(["A"]),
            ],
        );
        let pedigree = validated(&family, &store);
        Provisioner::new(&store, &study).provision(&pedigree).unwrap();

        let family = Family::new(
            "f",
            vec![
                Member::new("A").with_siblings(["C"]),
                Member::new("C").with_siblings(["A"]),
            ],
        );
        let pedigree = validated(&family, &store);
        let provisioned = Provisioner::new(&store, &study).provision(&pedigree).unwrap();
        assert_eq!(provisioned.warnings.len(), 1);
        let stored = store.records.lock().unwrap();
        assert_eq!(stored[0].siblings, vec!["B".to_string()]);
    }

    fn founder(name: &str, sex: Sex) -> NewIndividual {
        NewIndividual {
            name: name.to_string(),
            sex,
            father: None,
            mother: None,
            disease_ids: Vec::new(),
            siblings: Vec::new(),
            date_of_birth: None,
            attributes: BTreeMap::new(),
        }
    }

    fn father_and_child() -> Family {
        Family::new(
            "f",
            vec![
                Member::new("Alice"),
                Member::new("Carol").with_father(Reference::ByName("Alice".to_string())),
            ],
        )
    }

    #[test]
    fn wrong_sex_record_created_after_validation() {
        let store = MemoryStore::default();
        let study = study();
        let pedigree = validated(&father_and_child(), &store);
        store
            .create_individual(&study, founder("Alice", Sex::Female))
            .unwrap();

        let outcome = Provisioner::new(&store, &study)
            .provision(&pedigree)
            .unwrap_err();
        assert_eq!(outcome.failed_member, "Alice");
        assert!(outcome.completed.is_empty());
        assert!(outcome.cause.contains("expected male"));
        assert_eq!(store.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn stored_sex_changed_after_validation() {
        let store = MemoryStore::default();
        let study = study();
        store
            .create_individual(&study, founder("Alice", Sex::Male))
            .unwrap();
        let pedigree = validated(&father_and_child(), &store);
        store.records.lock().unwrap()[0].sex = Sex::Undetermined;

        let outcome = Provisioner::new(&store, &study)
            .provision(&pedigree)
            .unwrap_err();
        assert_eq!(outcome.failed_member, "Alice");
        assert!(outcome.cause.contains("expected male"));
    }

    #[test]
    fn repeated_sibling_names_match_stored() {
        let store = MemoryStore::default();
        let study = study();
        let family = Family::new(
            "f",
            vec![
                Member::new("A").with_siblings(["B"]),
                Member::new("B").with_siblings(["A"]),
            ],
        );
        let pedigree = validated(&family, &store);
        Provisioner::new(&store, &study).provision(&pedigree).unwrap();

        let family = Family::new(
            "f",
            vec![
                Member::new("A").with_siblings(["B", "B"]),
                Member::new("B").with_siblings(["A"]),
            ],
        );
        let pedigree = validated(&family, &store);
        let provisioned = Provisioner::new(&store, &study).provision(&pedigree).unwrap();
        assert!(provisioned.warnings.is_empty());
    }
}
