//! Pedigree validation and ordered provisioning.
//!
//! A submission moves through the stages by value:
//! [`PedigreeGraph::build`] → [`validate`] → [`Generations`] (computed during
//! validation) → [`Provisioner`] → [`reconcile`]. No stage mutates a structure
//! it has already handed to the next one.

pub mod graph;
pub mod levels;
pub mod provision;
pub mod reconcile;
pub mod validate;

pub use graph::{ExternalParent, ParentLink, PedigreeGraph, PedigreeNode};
pub use levels::Generations;
pub use provision::{MemberAction, MemberOutcome, Provisioned, ProvisionedIds, Provisioner};
pub use reconcile::reconcile;
pub use validate::{ValidatedPedigree, ValidationRules, validate};
