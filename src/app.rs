use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CatalogConfig;
use crate::domain::{EntityId, Family, IndividualRecord, Reference, StudyId};
use crate::error::PedigreeError;
use crate::gateway::EntityStore;
use crate::pedigree::{
    Generations, MemberOutcome, PedigreeGraph, Provisioner, ValidatedPedigree, ValidationRules,
    reconcile, validate,
};

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub family: String,
    pub members: usize,
    pub generations: Generations,
    pub founders: Vec<String>,
    /// Members that already exist in the store and would be reused.
    pub existing: Vec<ExistingMember>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExistingMember {
    pub name: String,
    pub id: EntityId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionResult {
    pub family: Family,
    pub generations: Generations,
    pub members: Vec<MemberOutcome>,
    /// Stored records fetched back after provisioning.
    pub records: Vec<IndividualRecord>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub individual: IndividualRecord,
    pub children: Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub study: StudyId,
    pub individuals: Vec<IndividualRecord>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<S: EntityStore> {
    store: S,
    config: CatalogConfig,
}

impl<S: EntityStore> App<S> {
    pub fn new(store: S, config: CatalogConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Dry run: every check `provision_family` performs, without any write.
    pub fn validate_family(
        &self,
        study: &StudyId,
        family: &Family,
        sink: &dyn ProgressSink,
    ) -> Result<ValidationReport, PedigreeError> {
        let validated = self.check(study, family, sink)?;
        let generations = validated.generations().clone();
        let existing = validated
            .stored()
            .iter()
            .map(|(name, record)| ExistingMember {
                name: name.clone(),
                id: record.id,
            })
            .collect();

        Ok(ValidationReport {
            family: family.name.clone(),
            members: generations.member_count(),
            founders: generations.founders().cloned().collect(),
            generations,
            existing,
            warnings: validated.warnings().to_vec(),
        })
    }

    pub fn provision_family(
        &self,
        study: &StudyId,
        family: Family,
        sink: &dyn ProgressSink,
    ) -> Result<ProvisionResult, PedigreeError> {
        let validated = self.check(study, &family, sink)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Provision; {} member(s) in {} generation(s)",
                validated.generations().member_count(),
                validated.generations().len()
            ),
            elapsed: None,
        });
        let started = Instant::now();
        let provisioned = Provisioner::new(&self.store, study).provision(&validated)?;
        sink.event(ProgressEvent {
            message: "phase=Provision; done".to_string(),
            elapsed: Some(started.elapsed()),
        });

        sink.event(ProgressEvent {
            message: "phase=Reconcile; rewriting references to ids".to_string(),
            elapsed: None,
        });
        let family = reconcile(family, &provisioned.ids)?;

        let mut warnings = validated.warnings().to_vec();
        warnings.extend(provisioned.warnings);
        let records = self.backfill(study, &provisioned.outcomes, &mut warnings, sink);

        Ok(ProvisionResult {
            family,
            generations: validated.generations().clone(),
            members: provisioned.outcomes,
            records,
            warnings,
        })
    }

    pub fn individual_info(
        &self,
        study: &StudyId,
        reference: &Reference,
        sink: &dyn ProgressSink,
    ) -> Result<InfoResult, PedigreeError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up {reference}"),
            elapsed: None,
        });

        let found = match reference {
            Reference::ById(id) => self
                .store
                .lookup_individual_by_id(study, *id)?
                .filter(|record| &record.study == study),
            Reference::ByName(name) => self.store.lookup_individual_by_name(study, name)?,
        };
        let individual = found
            .ok_or_else(|| PedigreeError::IndividualNotFound(format!("{study}:{reference}")))?;

        let children = self
            .store
            .list_individuals(study)?
            .into_iter()
            .filter(|record| {
                record.father == Some(individual.id) || record.mother == Some(individual.id)
            })
            .map(|record| record.id)
            .collect();

        Ok(InfoResult {
            individual,
            children,
        })
    }

    pub fn list_individuals(
        &self,
        study: &StudyId,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, PedigreeError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; scanning study {study}"),
            elapsed: None,
        });
        Ok(ListResult {
            study: study.clone(),
            individuals: self.store.list_individuals(study)?,
        })
    }

    fn check(
        &self,
        study: &StudyId,
        family: &Family,
        sink: &dyn ProgressSink,
    ) -> Result<ValidatedPedigree, PedigreeError> {
        sink.event(ProgressEvent {
            message: format!(
                "phase=Validate; family {} with {} member(s)",
                family.name,
                family.members.len()
            ),
            elapsed: None,
        });
        let started = Instant::now();
        let graph = PedigreeGraph::build(family)?;
        let validated = validate(graph, &self.store, study, ValidationRules::from(&self.config))?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Validate; {} generation(s), {} founder(s)",
                validated.generations().len(),
                validated.generations().founders().count()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(validated)
    }

    /// Failures here only produce warnings; the individuals are already durable.
    fn backfill(
        &self,
        study: &StudyId,
        outcomes: &[MemberOutcome],
        warnings: &mut Vec<String>,
        sink: &dyn ProgressSink,
    ) -> Vec<IndividualRecord> {
        sink.event(ProgressEvent {
            message: "phase=Backfill; fetching stored members".to_string(),
            elapsed: None,
        });
        let mut records = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match self.store.lookup_individual_by_id(study, outcome.id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    warn!(member = %outcome.name, id = %outcome.id, "member missing on back-fill");
                    warnings.push(format!(
                        "could not fetch {} ({}) after provisioning",
                        outcome.name, outcome.id
                    ));
                }
                Err(err) => {
                    warn!(member = %outcome.name, error = %err, "member back-fill failed");
                    warnings.push(format!("could not fetch {}: {err}", outcome.name));
                }
            }
        }
        info!(fetched = records.len(), "member back-fill complete");
        records
    }
}
