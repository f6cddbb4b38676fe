use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::domain::{
    EntityId, IndividualRecord, ParentRole, Sex, StudyId, check_alias, check_date_of_birth,
};
use crate::error::{PedigreeError, ValidationFailure, Violation};
use crate::gateway::EntityStore;
use crate::pedigree::graph::{ParentLink, PedigreeGraph};
use crate::pedigree::levels::Generations;

#[derive(Debug, Clone, Copy)]
pub struct ValidationRules {
    pub offset: u64,
    pub alias_max_length: usize,
}

impl From<&CatalogConfig> for ValidationRules {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            offset: config.offset,
            alias_max_length: config.alias_max_length,
        }
    }
}

/// A graph that passed every check. Read-only from here on.
#[derive(Debug, Clone)]
pub struct ValidatedPedigree {
    graph: PedigreeGraph,
    generations: Generations,
    stored: BTreeMap<String, IndividualRecord>,
    warnings: Vec<String>,
}

impl ValidatedPedigree {
    pub fn graph(&self) -> &PedigreeGraph {
        &self.graph
    }

    pub fn generations(&self) -> &Generations {
        &self.generations
    }

    /// Members that already exist in the store, matched by id or by name.
    pub fn stored(&self) -> &BTreeMap<String, IndividualRecord> {
        &self.stored
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Runs the check categories in order. Violations inside a category are all
/// collected; the first category that reports anything ends the run. Only
/// reads go to the store.
pub fn validate<S: EntityStore>(
    mut graph: PedigreeGraph,
    store: &S,
    study: &StudyId,
    rules: ValidationRules,
) -> Result<ValidatedPedigree, PedigreeError> {
    abort_on(check_formats(&graph, rules))?;

    let matched = match_by_name(&graph, store, study)?;
    let matched_ids: BTreeMap<EntityId, String> = matched
        .iter()
        .map(|(name, record)| (record.id, name.clone()))
        .collect();
    graph.link_stored_members(&matched_ids);

    let StoredCheck {
        violations,
        stored,
        warnings,
    } = check_stored(&graph, store, study, matched)?;
    abort_on(violations)?;

    abort_on(check_structure(&graph, &stored))?;
    abort_on(check_diseases(&graph))?;
    abort_on(check_siblings(&graph))?;

    let generations = Generations::compute(&graph).map_err(|violation| ValidationFailure {
        violations: vec![violation],
    })?;

    for (name, record) in &stored {
        if let Some(node) = graph.nodes.get_mut(name) {
            node.resolved_id = Some(record.id);
        }
    }
    debug!(
        family = %graph.family_name,
        generations = generations.len(),
        existing = stored.len(),
        "family validated"
    );

    Ok(ValidatedPedigree {
        graph,
        generations,
        stored,
        warnings,
    })
}

fn abort_on(violations: Vec<Violation>) -> Result<(), ValidationFailure> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure { violations })
    }
}

fn check_formats(graph: &PedigreeGraph, rules: ValidationRules) -> Vec<Violation> {
    let mut violations = Vec::new();
    if let Err(violation) = check_alias(
        "family name",
        &graph.family_name,
        rules.offset,
        rules.alias_max_length,
    ) {
        violations.push(violation);
    }

    let names: BTreeSet<&String> = graph.declared.iter().collect();
    for name in names {
        if let Err(violation) = check_alias("member name", name, rules.offset, rules.alias_max_length)
        {
            violations.push(violation);
        }
    }

    for (name, _, member) in graph.members() {
        if let Some(date) = &member.date_of_birth {
            if let Err(violation) = check_date_of_birth(name, date) {
                violations.push(violation);
            }
        }
    }
    violations
}

/// Stored records of members submitted without an id, found by name.
fn match_by_name<S: EntityStore>(
    graph: &PedigreeGraph,
    store: &S,
    study: &StudyId,
) -> Result<BTreeMap<String, IndividualRecord>, PedigreeError> {
    let mut matched = BTreeMap::new();
    for (name, _, member) in graph.members() {
        if member.id.is_some() {
            continue;
        }
        if let Some(record) = store.lookup_individual_by_name(study, name)? {
            matched.insert(name.clone(), record);
        }
    }
    Ok(matched)
}

struct StoredCheck {
    violations: Vec<Violation>,
    stored: BTreeMap<String, IndividualRecord>,
    warnings: Vec<String>,
}

fn check_stored<S: EntityStore>(
    graph: &PedigreeGraph,
    store: &S,
    study: &StudyId,
    mut matched: BTreeMap<String, IndividualRecord>,
) -> Result<StoredCheck, PedigreeError> {
    let mut violations = Vec::new();
    let mut stored = BTreeMap::new();
    let mut warnings = Vec::new();

    for name in &graph.role_conflicts {
        violations.push(Violation::ParentRoleConflict {
            individual: name.clone(),
        });
    }

    for (name, node, member) in graph.members() {
        let expected = node.inferred_sex;
        let existing = match member.id {
            Some(id) => match store.lookup_individual_by_id(study, id)? {
                Some(record) => Some(record),
                None => {
                    violations.push(Violation::UnknownIndividual { id });
                    continue;
                }
            },
            None => matched.remove(name),
        };

        match existing {
            Some(record) => {
                if &record.study != study {
                    violations.push(Violation::StudyScope {
                        id: record.id,
                        expected: study.clone(),
                        actual: record.study.clone(),
                    });
                    continue;
                }
                if let Some(expected) = expected {
                    if record.sex != expected {
                        violations.push(Violation::SexConsistency {
                            individual: name.clone(),
                            expected,
                            actual: record.sex,
                        });
                        continue;
                    }
                }
                if record.name != *name {
                    warnings.push(format!(
                        "member {name} refers to stored individual {} named {}",
                        record.id, record.name
                    ));
                }
                stored.insert(name.clone(), record);
            }
            None => {
                let declared_conflicts = expected
                    .filter(|expected| member.sex != Sex::Unknown && member.sex != *expected);
                if let Some(expected) = declared_conflicts {
                    violations.push(Violation::SexConsistency {
                        individual: name.clone(),
                        expected,
                        actual: member.sex,
                    });
                }
            }
        }
    }

    let mut seen: BTreeSet<(EntityId, ParentRole)> = BTreeSet::new();
    for external in &graph.external_parents {
        if !seen.insert((external.id, external.role)) {
            continue;
        }
        let expected = Sex::for_role(external.role);
        match store.lookup_individual_by_id(study, external.id)? {
            None => violations.push(Violation::UnknownIndividual { id: external.id }),
            Some(record) if &record.study != study => violations.push(Violation::StudyScope {
                id: record.id,
                expected: study.clone(),
                actual: record.study,
            }),
            Some(record) if record.sex != expected => violations.push(Violation::SexConsistency {
                individual: format!("{} ({})", record.name, record.id),
                expected,
                actual: record.sex,
            }),
            Some(record) => {
                warn!(child = %external.child, parent = %record.id, "parent outside submission");
                warnings.push(format!(
                    "{} of {} is stored individual {} ({}) outside the submission",
                    external.role, external.child, record.name, record.id
                ));
            }
        }
    }

    Ok(StoredCheck {
        violations,
        stored,
        warnings,
    })
}

fn check_structure(
    graph: &PedigreeGraph,
    stored: &BTreeMap<String, IndividualRecord>,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in &graph.declared {
        *counts.entry(name.as_str()).or_default() += 1;
    }
    for (name, count) in counts {
        if count > 1 {
            violations.push(Violation::DuplicateMember {
                name: name.to_string(),
            });
        }
    }

    let mut by_id: BTreeMap<EntityId, Vec<String>> = BTreeMap::new();
    for (name, record) in stored {
        by_id.entry(record.id).or_default().push(name.clone());
    }
    for (id, members) in by_id {
        if members.len() > 1 {
            violations.push(Violation::DuplicateIndividual { id, members });
        }
    }

    for (name, node, _) in graph.members() {
        for role in [ParentRole::Father, ParentRole::Mother] {
            let Some(ParentLink::Member(parent)) = node.parent(role) else {
                continue;
            };
            let declared = graph
                .node(parent)
                .is_some_and(|parent_node| parent_node.member.is_some());
            if !declared {
                violations.push(Violation::DanglingNameReference {
                    member: name.clone(),
                    role,
                    parent: parent.clone(),
                });
            }
        }
    }
    violations
}

fn check_diseases(graph: &PedigreeGraph) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (name, _, member) in graph.members() {
        for disease in &member.disease_ids {
            if !graph.disease_registry.contains(disease) {
                violations.push(Violation::DiseaseCrossReference {
                    member: name.clone(),
                    disease: disease.clone(),
                });
            }
        }
    }
    violations
}

/// Every sibling B named by A must declare exactly A's group, with A in place
/// of B.
fn check_siblings(graph: &PedigreeGraph) -> Vec<Violation> {
    let declared: BTreeMap<&str, &BTreeSet<String>> = graph
        .members()
        .filter(|(_, node, _)| !node.siblings.is_empty())
        .map(|(name, node, _)| (name.as_str(), &node.siblings))
        .collect();

    let mut violations: Vec<Violation> = Vec::new();
    for (member, siblings) in &declared {
        for sibling in siblings.iter() {
            let mut expected: BTreeSet<&str> = siblings.iter().map(String::as_str).collect();
            expected.insert(*member);
            expected.remove(sibling.as_str());

            let detail = match declared.get(sibling.as_str()) {
                None => Some(format!("missing sibling {sibling} information")),
                Some(theirs) if theirs.len() != expected.len() => Some(format!(
                    "the number of siblings declared by {sibling} does not match the ones declared by {member}"
                )),
                Some(theirs) if !expected.iter().all(|name| theirs.contains(*name)) => {
                    Some(format!(
                        "some of the siblings declared by {sibling} do not match the ones declared by {member}"
                    ))
                }
                Some(_) => None,
            };

            if let Some(detail) = detail {
                let violation = Violation::SiblingMismatch {
                    member: member.to_string(),
                    sibling: sibling.clone(),
                    detail,
                };
                if !violations.contains(&violation) {
                    violations.push(violation);
                }
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::{Family, Member, Reference};
    use crate::gateway::NewIndividual;

    #[derive(Default)]
    struct MockStore {
        records: Vec<IndividualRecord>,
        creates: Mutex<usize>,
    }

    impl MockStore {
        fn with(records: Vec<IndividualRecord>) -> Self {
            Self {
                records,
                creates: Mutex::new(0),
            }
        }
    }

    impl EntityStore for MockStore {
        fn lookup_individual_by_id(
            &self,
            _study: &StudyId,
            id: EntityId,
        ) -> Result<Option<IndividualRecord>, PedigreeError> {
            Ok(self.records.iter().find(|record| record.id == id).cloned())
        }

        fn lookup_individual_by_name(
            &self,
            study: &StudyId,
            name: &str,
        ) -> Result<Option<IndividualRecord>, PedigreeError> {
            Ok(self
                .records
                .iter()
                .find(|record| &record.study == study && record.name == name)
                .cloned())
        }

        fn create_individual(
            &self,
            _study: &StudyId,
            _individual: NewIndividual,
        ) -> Result<EntityId, PedigreeError> {
            *self.creates.lock().unwrap() += 1;
            Err(PedigreeError::Store("validation must not write".to_string()))
        }

        fn list_individuals(
            &self,
            _study: &StudyId,
        ) -> Result<Vec<IndividualRecord>, PedigreeError> {
            Ok(self.records.clone())
        }
    }

    fn record(id: u64, study: &str, name: &str, sex: Sex) -> IndividualRecord {
        IndividualRecord {
            id: EntityId::new(id),
            study: study.parse().unwrap(),
            name: name.to_string(),
            sex,
            father: None,
            mother: None,
            disease_ids: Vec::new(),
            siblings: Vec::new(),
            date_of_birth: None,
            attributes: BTreeMap::new(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn rules() -> ValidationRules {
        ValidationRules {
            offset: 1000,
            alias_max_length: 100,
        }
    }

    fn study() -> StudyId {
        "s1".parse().unwrap()
    }

    fn by_name(name: &str) -> Reference {
        Reference::ByName(name.to_string())
    }

    fn run(family: &Family, store: &MockStore) -> Result<ValidatedPedigree, PedigreeError> {
        let graph = PedigreeGraph::build(family).unwrap();
        validate(graph, store, &study(), rules())
    }

    fn violations(result: Result<ValidatedPedigree, PedigreeError>) -> Vec<Violation> {
        match result {
            Err(PedigreeError::Validation(failure)) => failure.violations,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn valid_trio_passes() {
        let family = Family::new(
            "trio",
            vec![
                Member::new("Alice"),
                Member::new("Bob"),
                Member::new("Carol")
                    .with_father(by_name("Alice"))
                    .with_mother(by_name("Bob")),
            ],
        );
        let store = MockStore::default();
        let validated = run(&family, &store).unwrap();
        assert_eq!(validated.generations().len(), 2);
        assert!(validated.stored().is_empty());
        assert_eq!(*store.creates.lock().unwrap(), 0);
    }

    #[test]
    fn dangling_parent_name() {
        let family = Family::new("f", vec![Member::new("Dave").with_father(by_name("Eve"))]);
        let found = violations(run(&family, &MockStore::default()));
        assert_matches!(
            found.as_slice(),
            [Violation::DanglingNameReference { member, role: ParentRole::Father, parent }]
                if member == "Dave" && parent == "Eve"
        );
    }

    #[test]
    fn missing_sibling_information() {
        let family = Family::new("f", vec![Member::new("Frank").with_siblings(["Gina"])]);
        let found = violations(run(&family, &MockStore::default()));
        assert_matches!(
            found.as_slice(),
            [Violation::SiblingMismatch { member, sibling, .. }] if member == "Frank" && sibling == "Gina"
        );
    }

    #[test]
    fn symmetric_triplets_pass() {
        let family = Family::new(
            "f",
            vec![
                Member::new("A").with_siblings(["B", "C"]),
                Member::new("B").with_siblings(["A", "C"]),
                Member::new("C").with_siblings(["A", "B"]),
            ],
        );
        assert!(run(&family, &MockStore::default()).is_ok());
    }

    #[test]
    fn sibling_cardinality_mismatch() {
        let family = Family::new(
            "f",
            vec![
                Member::new("A").with_siblings(["B", "C"]),
                Member::new("B").with_siblings(["A"]),
                Member::new("C").with_siblings(["A", "B"]),
            ],
        );
        let found = violations(run(&family, &MockStore::default()));
        assert!(
            found
                .iter()
                .all(|violation| matches!(violation, Violation::SiblingMismatch { .. }))
        );
        assert!(!found.is_empty());
    }

    #[test]
    fn disease_outside_registry() {
        let family = Family::new(
            "f",
            vec![Member::new("A").with_diseases(["OMIM:1", "OMIM:2"])],
        )
        .with_diseases(["OMIM:1"]);
        let found = violations(run(&family, &MockStore::default()));
        assert_eq!(
            found,
            vec![Violation::DiseaseCrossReference {
                member: "A".to_string(),
                disease: "OMIM:2".to_string(),
            }]
        );
    }

    #[test]
    fn duplicate_names() {
        let family = Family::new("f", vec![Member::new("A"), Member::new("A")]);
        let found = violations(run(&family, &MockStore::default()));
        assert_eq!(
            found,
            vec![Violation::DuplicateMember {
                name: "A".to_string()
            }]
        );
    }

    #[test]
    fn unknown_member_id() {
        let family = Family::new("f", vec![Member::new("A").with_id(EntityId::new(4242))]);
        let found = violations(run(&family, &MockStore::default()));
        assert_eq!(
            found,
            vec![Violation::UnknownIndividual {
                id: EntityId::new(4242)
            }]
        );
    }

    #[test]
    fn stored_father_must_be_male() {
        let store = MockStore::with(vec![record(2001, "s1", "Alice", Sex::Female)]);
        let family = Family::new(
            "f",
            vec![
                Member::new("Alice").with_id(EntityId::new(2001)),
                Member::new("Carol").with_father(by_name("Alice")),
            ],
        );
        let found = violations(run(&family, &store));
        assert_matches!(
            found.as_slice(),
            [Violation::SexConsistency { expected: Sex::Male, actual: Sex::Female, .. }]
        );
    }

    #[test]
    fn stored_member_from_other_study() {
        let store = MockStore::with(vec![record(2001, "other", "Alice", Sex::Female)]);
        let family = Family::new("f", vec![Member::new("Alice").with_id(EntityId::new(2001))]);
        let found = violations(run(&family, &store));
        assert_matches!(found.as_slice(), [Violation::StudyScope { .. }]);
    }

    #[test]
    fn external_parent_checked_against_store() {
        let store = MockStore::with(vec![record(3001, "s1", "Zed", Sex::Male)]);
        let family = Family::new(
            "f",
            vec![Member::new("Kid").with_mother(Reference::ById(EntityId::new(3001)))],
        );
        let found = violations(run(&family, &store));
        assert_matches!(
            found.as_slice(),
            [Violation::SexConsistency { expected: Sex::Female, .. }]
        );

        let family = Family::new(
            "f",
            vec![Member::new("Kid").with_father(Reference::ById(EntityId::new(3001)))],
        );
        let validated = run(&family, &store).unwrap();
        assert_eq!(validated.warnings().len(), 1);
    }

    #[test]
    fn existing_member_by_name_is_resolved() {
        let store = MockStore::with(vec![record(2002, "s1", "Bob", Sex::Female)]);
        let family = Family::new(
            "f",
            vec![
                Member::new("Bob"),
                Member::new("Kid").with_mother(by_name("Bob")),
            ],
        );
        let validated = run(&family, &store).unwrap();
        assert_eq!(
            validated.graph().node("Bob").unwrap().resolved_id,
            Some(EntityId::new(2002))
        );
    }

    #[test]
    fn declared_sex_contradicts_role() {
        let family = Family::new(
            "f",
            vec![
                Member::new("Mo").with_sex(Sex::Male),
                Member::new("Kid").with_mother(by_name("Mo")),
            ],
        );
        let found = violations(run(&family, &MockStore::default()));
        assert_matches!(found.as_slice(), [Violation::SexConsistency { .. }]);
    }

    #[test]
    fn format_category_aborts_before_structure() {
        let family = Family::new(
            "bad family",
            vec![Member::new("ok").with_father(by_name("ghost"))],
        );
        let found = violations(run(&family, &MockStore::default()));
        assert_matches!(found.as_slice(), [Violation::Format { .. }]);
    }

    #[test]
    fn orphan_child_is_unrelated() {
        let family = Family::new(
            "f",
            vec![
                Member::new("Root"),
                Member::new("A").with_father(by_name("B")),
                Member::new("B").with_father(by_name("A")).with_sex(Sex::Male),
            ],
        );
        let found = violations(run(&family, &MockStore::default()));
        assert_matches!(found.as_slice(), [Violation::UnrelatedMember { names }] if names.len() == 2);
    }

    #[test]
    fn stored_member_matched_by_name_links_id_parent() {
        let store = MockStore::with(vec![record(100_001, "s1", "Alice", Sex::Male)]);
        let family = Family::new(
            "f",
            vec![
                Member::new("Alice"),
                Member::new("Carol").with_father(Reference::ById(EntityId::new(100_001))),
            ],
        );
        let validated = run(&family, &store).unwrap();
        assert_eq!(validated.generations().generation_of("Alice"), Some(0));
        assert_eq!(validated.generations().generation_of("Carol"), Some(1));
        assert_eq!(
            validated.graph().node("Carol").unwrap().father,
            Some(ParentLink::Member("Alice".to_string()))
        );
        assert!(validated.warnings().is_empty());
    }

    #[test]
    fn id_parent_matched_by_name_checks_role_sex() {
        let store = MockStore::with(vec![record(100_001, "s1", "Alice", Sex::Female)]);
        let family = Family::new(
            "f",
            vec![
                Member::new("Alice"),
                Member::new("Carol").with_father(Reference::ById(EntityId::new(100_001))),
            ],
        );
        let found = violations(run(&family, &store));
        assert_matches!(
            found.as_slice(),
            [Violation::SexConsistency { individual, expected: Sex::Male, .. }] if individual == "Alice"
        );
    }

    #[test]
    fn two_members_same_stored_individual() {
        let store = MockStore::with(vec![record(100_001, "s1", "Alice", Sex::Female)]);
        let family = Family::new(
            "f",
            vec![
                Member::new("Alice").with_id(EntityId::new(100_001)),
                Member::new("Alicia").with_id(EntityId::new(100_001)),
            ],
        );
        let found = violations(run(&family, &store));
        assert_eq!(
            found,
            vec![Violation::DuplicateIndividual {
                id: EntityId::new(100_001),
                members: vec!["Alice".to_string(), "Alicia".to_string()],
            }]
        );
    }

    #[test]
    fn parent_named_in_both_roles() {
        let family = Family::new(
            "f",
            vec![
                Member::new("Pat"),
                Member::new("Kim").with_father(by_name("Pat")),
                Member::new("Lee").with_mother(by_name("Pat")),
            ],
        );
        let found = violations(run(&family, &MockStore::default()));
        assert_matches!(
            found.as_slice(),
            [Violation::ParentRoleConflict { individual }] if individual == "Pat"
        );
        assert_eq!(
            found[0].to_string(),
            "Pat is named both as a father and as a mother"
        );
    }
}
