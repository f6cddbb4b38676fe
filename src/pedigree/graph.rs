use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{EntityId, Family, Member, ParentRole, Reference, Sex};
use crate::error::PedigreeError;

/// Where a member's parent lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentLink {
    /// Another member of the same submission, by name.
    Member(String),
    /// A stored individual that is not part of the submission.
    Stored(EntityId),
}

#[derive(Debug, Clone, Default)]
pub struct PedigreeNode {
    /// `None` when the node only exists because someone named it as a parent.
    pub member: Option<Member>,
    pub inferred_sex: Option<Sex>,
    pub has_parents: bool,
    pub children: Vec<String>,
    pub siblings: BTreeSet<String>,
    pub father: Option<ParentLink>,
    pub mother: Option<ParentLink>,
    pub resolved_id: Option<EntityId>,
}

impl PedigreeNode {
    pub fn parent(&self, role: ParentRole) -> Option<&ParentLink> {
        match role {
            ParentRole::Father => self.father.as_ref(),
            ParentRole::Mother => self.mother.as_ref(),
        }
    }

    pub fn is_founder(&self) -> bool {
        !self.has_parents
    }
}

/// A parent referenced by a durable id that matches no member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalParent {
    pub child: String,
    pub role: ParentRole,
    pub id: EntityId,
}

#[derive(Debug, Clone)]
pub struct PedigreeGraph {
    pub family_name: String,
    pub nodes: BTreeMap<String, PedigreeNode>,
    pub disease_registry: BTreeSet<String>,
    /// Member names in submission order, duplicates included.
    pub declared: Vec<String>,
    pub external_parents: Vec<ExternalParent>,
    /// Nodes named both as a father and as a mother.
    pub role_conflicts: BTreeSet<String>,
}

impl PedigreeGraph {
    pub fn build(family: &Family) -> Result<Self, PedigreeError> {
        if family.members.is_empty() {
            return Err(PedigreeError::MissingMember(format!(
                "family {} declares no members",
                family.name
            )));
        }

        let mut id_names = BTreeMap::new();
        for member in &family.members {
            if member.name.is_empty() {
                return Err(PedigreeError::MissingMember(
                    "a member has an empty name".to_string(),
                ));
            }
            if let Some(id) = member.id {
                id_names.entry(id).or_insert_with(|| member.name.clone());
            }
        }

        let mut graph = Self {
            family_name: family.name.clone(),
            nodes: BTreeMap::new(),
            disease_registry: family.disease_registry.clone(),
            declared: Vec::with_capacity(family.members.len()),
            external_parents: Vec::new(),
            role_conflicts: BTreeSet::new(),
        };

        for member in &family.members {
            graph.declared.push(member.name.clone());
            let node = graph.nodes.entry(member.name.clone()).or_default();
            if node.member.is_some() {
                // first declaration wins; the validator reports the duplicate
                continue;
            }
            node.member = Some(member.clone());
            node.siblings = member
                .sibling_names
                .iter()
                .filter(|name| !name.is_empty())
                .cloned()
                .collect();

            for role in [ParentRole::Father, ParentRole::Mother] {
                let Some(reference) = member.parent(role) else {
                    continue;
                };
                let link = match reference {
                    Reference::ByName(name) => ParentLink::Member(name.clone()),
                    Reference::ById(id) => match id_names.get(id) {
                        Some(name) => ParentLink::Member(name.clone()),
                        None => ParentLink::Stored(*id),
                    },
                };
                graph.link_parent(&member.name, role, link);
            }
        }

        Ok(graph)
    }

    fn link_parent(&mut self, child: &str, role: ParentRole, link: ParentLink) {
        if let ParentLink::Member(parent) = &link {
            let parent_node = self.nodes.entry(parent.clone()).or_default();
            parent_node.children.push(child.to_string());
            let implied = Sex::for_role(role);
            match parent_node.inferred_sex {
                Some(existing) if existing != implied => {
                    self.role_conflicts.insert(parent.clone());
                }
                _ => parent_node.inferred_sex = Some(implied),
            }
        }

        if let ParentLink::Stored(id) = &link {
            self.external_parents.push(ExternalParent {
                child: child.to_string(),
                role,
                id: *id,
            });
        }

        if let Some(child_node) = self.nodes.get_mut(child) {
            if matches!(link, ParentLink::Member(_)) {
                child_node.has_parents = true;
            }
            match role {
                ParentRole::Father => child_node.father = Some(link),
                ParentRole::Mother => child_node.mother = Some(link),
            }
        }
    }

    /// Re-links parents referenced by id to the members that turned out to be
    /// those stored individuals (matched by name, without a submitted id).
    pub fn link_stored_members(&mut self, matched: &BTreeMap<EntityId, String>) {
        let externals = std::mem::take(&mut self.external_parents);
        for external in externals {
            match matched.get(&external.id) {
                Some(name) => self.link_parent(
                    &external.child,
                    external.role,
                    ParentLink::Member(name.clone()),
                ),
                None => self.external_parents.push(external),
            }
        }
    }

    pub fn node(&self, name: &str) -> Option<&PedigreeNode> {
        self.nodes.get(name)
    }

    /// Nodes backed by a declared member, in name order.
    pub fn members(&self) -> impl Iterator<Item = (&String, &PedigreeNode, &Member)> {
        self.nodes
            .iter()
            .filter_map(|(name, node)| node.member.as_ref().map(|member| (name, node, member)))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn trio() -> Family {
        Family::new(
            "trio",
            vec![
                Member::new("Alice"),
                Member::new("Bob"),
                Member::new("Carol")
                    .with_father(Reference::ByName("Alice".to_string()))
                    .with_mother(Reference::ByName("Bob".to_string())),
            ],
        )
    }

    #[test]
    fn builds_parent_child_edges() {
        let graph = PedigreeGraph::build(&trio()).unwrap();
        let alice = graph.node("Alice").unwrap();
        assert_eq!(alice.children, vec!["Carol".to_string()]);
        assert_eq!(alice.inferred_sex, Some(Sex::Male));
        assert_eq!(graph.node("Bob").unwrap().inferred_sex, Some(Sex::Female));

        let carol = graph.node("Carol").unwrap();
        assert!(carol.has_parents);
        assert_eq!(carol.father, Some(ParentLink::Member("Alice".to_string())));
        assert!(graph.node("Alice").unwrap().is_founder());
    }

    #[test]
    fn parent_only_reference_creates_empty_node() {
        let family = Family::new(
            "f",
            vec![Member::new("Dave").with_father(Reference::ByName("Eve".to_string()))],
        );
        let graph = PedigreeGraph::build(&family).unwrap();
        let eve = graph.node("Eve").unwrap();
        assert!(eve.member.is_none());
        assert_eq!(eve.children, vec!["Dave".to_string()]);
    }

    #[test]
    fn id_reference_to_member_maps_to_name() {
        let family = Family::new(
            "f",
            vec![
                Member::new("Alice").with_id(EntityId::new(5001)),
                Member::new("Carol").with_mother(Reference::ById(EntityId::new(5001))),
                Member::new("Dan").with_father(Reference::ById(EntityId::new(9000))),
            ],
        );
        let graph = PedigreeGraph::build(&family).unwrap();
        assert_eq!(
            graph.node("Carol").unwrap().mother,
            Some(ParentLink::Member("Alice".to_string()))
        );
        let dan = graph.node("Dan").unwrap();
        assert!(!dan.has_parents);
        assert_eq!(dan.father, Some(ParentLink::Stored(EntityId::new(9000))));
        assert_eq!(graph.external_parents.len(), 1);
    }

    #[test]
    fn duplicates_are_recorded_not_merged() {
        let family = Family::new("f", vec![Member::new("Alice"), Member::new("Alice")]);
        let graph = PedigreeGraph::build(&family).unwrap();
        assert_eq!(graph.declared.len(), 2);
        assert_eq!(graph.nodes.len(), 1);
    }

    #[test]
    fn conflicting_roles_recorded() {
        let family = Family::new(
            "f",
            vec![
                Member::new("Pat"),
                Member::new("Kim").with_father(Reference::ByName("Pat".to_string())),
                Member::new("Lee").with_mother(Reference::ByName("Pat".to_string())),
            ],
        );
        let graph = PedigreeGraph::build(&family).unwrap();
        assert!(graph.role_conflicts.contains("Pat"));
    }

    #[test]
    fn stored_parent_relinked_to_member() {
        let family = Family::new(
            "f",
            vec![
                Member::new("Alice"),
                Member::new("Carol").with_father(Reference::ById(EntityId::new(5001))),
            ],
        );
        let mut graph = PedigreeGraph::build(&family).unwrap();
        assert!(!graph.node("Carol").unwrap().has_parents);

        let matched = BTreeMap::from([(EntityId::new(5001), "Alice".to_string())]);
        graph.link_stored_members(&matched);

        let carol = graph.node("Carol").unwrap();
        assert!(carol.has_parents);
        assert_eq!(carol.father, Some(ParentLink::Member("Alice".to_string())));
        assert_eq!(graph.node("Alice").unwrap().inferred_sex, Some(Sex::Male));
        assert!(graph.external_parents.is_empty());
    }

    #[test]
    fn empty_family_rejected() {
        let family = Family::new("f", Vec::new());
        assert_matches!(
            PedigreeGraph::build(&family),
            Err(PedigreeError::MissingMember(_))
        );
        let family = Family::new("f", vec![Member::new("")]);
        assert_matches!(
            PedigreeGraph::build(&family),
            Err(PedigreeError::MissingMember(_))
        );
    }
}
