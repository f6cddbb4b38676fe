use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{EntityId, ParentRole, Sex, StudyId};
use crate::pedigree::provision::MemberOutcome;

/// A single problem found while validating a family submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error, Diagnostic)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("invalid {field} '{value}': {reason}")]
    #[diagnostic(code(kira_pedigree::format))]
    Format {
        field: String,
        value: String,
        reason: String,
    },

    #[error("individual id {id} does not exist")]
    #[diagnostic(code(kira_pedigree::unknown_individual))]
    UnknownIndividual { id: EntityId },

    #[error("individual {id} belongs to study {actual}, not to {expected}")]
    #[diagnostic(code(kira_pedigree::study_scope))]
    StudyScope {
        id: EntityId,
        expected: StudyId,
        actual: StudyId,
    },

    #[error("member {member} names {parent} as {role}, but {parent} is not a family member")]
    #[diagnostic(
        code(kira_pedigree::dangling_reference),
        help("add the parent to the member list or reference the stored individual by id")
    )]
    DanglingNameReference {
        member: String,
        role: ParentRole,
        parent: String,
    },

    #[error("multiple members with the same name {name}")]
    #[diagnostic(code(kira_pedigree::duplicate_member))]
    DuplicateMember { name: String },

    #[error("members {} all refer to individual {id}", .members.join(", "))]
    #[diagnostic(
        code(kira_pedigree::duplicate_individual),
        help("each stored individual can appear only once in a family")
    )]
    DuplicateIndividual { id: EntityId, members: Vec<String> },

    #[error("{individual} is named both as a father and as a mother")]
    #[diagnostic(code(kira_pedigree::parent_role_conflict))]
    ParentRoleConflict { individual: String },

    #[error("sex of {individual} is {actual}, expected {expected}")]
    #[diagnostic(code(kira_pedigree::sex_consistency))]
    SexConsistency {
        individual: String,
        expected: Sex,
        actual: Sex,
    },

    #[error("{detail}")]
    #[diagnostic(code(kira_pedigree::sibling_mismatch))]
    SiblingMismatch {
        member: String,
        sibling: String,
        detail: String,
    },

    #[error("member {member} has disease {disease} which is missing from the family disease list")]
    #[diagnostic(code(kira_pedigree::disease_cross_reference))]
    DiseaseCrossReference { member: String, disease: String },

    #[error("unrelated members found: {}", .names.join(", "))]
    #[diagnostic(
        code(kira_pedigree::unrelated_member),
        help("every member must descend from a founder through father/mother links")
    )]
    UnrelatedMember { names: Vec<String> },
}

/// Every violation collected before the run was aborted. Nothing was written.
#[derive(Debug, Clone, Serialize, Error, Diagnostic)]
#[error("family validation failed with {} violation(s)", .violations.len())]
pub struct ValidationFailure {
    #[related]
    pub violations: Vec<Violation>,
}

/// Provisioning stopped partway. Individuals listed in `completed` are
/// durable and were not rolled back.
#[derive(Debug, Clone, Serialize, Error, Diagnostic)]
#[error(
    "provisioning stopped at member {failed_member}: {cause}; some individuals may already have been created"
)]
#[diagnostic(
    code(kira_pedigree::partial_provisioning),
    help("inspect the completed members before resubmitting; they will be reused by name")
)]
pub struct PartialProvisioningOutcome {
    pub completed: Vec<MemberOutcome>,
    pub failed_member: String,
    pub cause: String,
}

#[derive(Debug, Error, Diagnostic)]
pub enum PedigreeError {
    #[error("missing members in family: {0}")]
    MissingMember(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Provisioning(#[from] PartialProvisioningOutcome),

    #[error("unresolved reference while rewriting family: {0}")]
    UnresolvedReference(String),

    #[error("invalid study id: {0}")]
    InvalidStudy(String),

    #[error("invalid sex: {0}")]
    InvalidSex(String),

    #[error("invalid individual reference: {0}")]
    InvalidReference(String),

    #[error("individual not found: {0}")]
    IndividualNotFound(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read family submission at {0}")]
    SubmissionRead(PathBuf),

    #[error("failed to parse family submission: {0}")]
    SubmissionParse(String),

    #[error("stored individual conflicts with the submission: {0}")]
    StoredConflict(String),

    #[error("entity store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
