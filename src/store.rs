use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::domain::{EntityId, IndividualRecord, StudyId};
use crate::error::PedigreeError;
use crate::gateway::{EntityStore, NewIndividual};

/// Entity store keeping one JSON document per individual under
/// `<root>/individuals/<id>.json`. Ids are allocated above the configured
/// offset so they never collide with numeric names.
#[derive(Debug, Clone)]
pub struct FsEntityStore {
    root: Utf8PathBuf,
    offset: u64,
}

impl FsEntityStore {
    pub fn new(config: &CatalogConfig) -> Self {
        Self::new_with_paths(config.store_root.clone(), config.offset)
    }

    pub fn new_with_paths(root: Utf8PathBuf, offset: u64) -> Self {
        Self { root, offset }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn individuals_dir(&self) -> Utf8PathBuf {
        self.root.join("individuals")
    }

    pub fn record_path(&self, id: EntityId) -> Utf8PathBuf {
        self.individuals_dir().join(format!("{id}.json"))
    }

    pub fn ensure_root(&self) -> Result<(), PedigreeError> {
        fs::create_dir_all(self.individuals_dir().as_std_path())
            .map_err(|err| PedigreeError::Filesystem(err.to_string()))
    }

    fn read_record(path: &Utf8Path) -> Result<IndividualRecord, PedigreeError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| PedigreeError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| PedigreeError::Store(format!("corrupt record {path}: {err}")))
    }

    fn all_records(&self) -> Result<Vec<IndividualRecord>, PedigreeError> {
        let dir = self.individuals_dir();
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| PedigreeError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| PedigreeError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|_| PedigreeError::Filesystem("non-utf8 path in store".to_string()))?;
            if path.is_file() && path.extension() == Some("json") {
                records.push(Self::read_record(&path)?);
            }
        }
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    fn next_id(&self) -> Result<EntityId, PedigreeError> {
        let highest = self
            .all_records()?
            .iter()
            .map(|record| record.id.get())
            .max()
            .unwrap_or(self.offset)
            .max(self.offset);
        Ok(EntityId::new(highest + 1))
    }

    fn require_parent(&self, study: &StudyId, parent: Option<EntityId>) -> Result<(), PedigreeError> {
        let Some(id) = parent else {
            return Ok(());
        };
        match self.lookup_individual_by_id(study, id)? {
            Some(record) if &record.study == study => Ok(()),
            Some(record) => Err(PedigreeError::Store(format!(
                "parent {id} belongs to study {}",
                record.study
            ))),
            None => Err(PedigreeError::Store(format!("parent {id} does not exist"))),
        }
    }

    pub fn write_record_atomic(&self, record: &IndividualRecord) -> Result<(), PedigreeError> {
        self.ensure_root()?;
        let path = self.record_path(record.id);
        let content = serde_json::to_vec_pretty(record)
            .map_err(|err| PedigreeError::Store(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("kira-ped-record")
            .tempfile_in(self.individuals_dir().as_std_path())
            .map_err(|err| PedigreeError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| PedigreeError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| PedigreeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl EntityStore for FsEntityStore {
    fn lookup_individual_by_id(
        &self,
        _study: &StudyId,
        id: EntityId,
    ) -> Result<Option<IndividualRecord>, PedigreeError> {
        let path = self.record_path(id);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    fn lookup_individual_by_name(
        &self,
        study: &StudyId,
        name: &str,
    ) -> Result<Option<IndividualRecord>, PedigreeError> {
        Ok(self
            .all_records()?
            .into_iter()
            .find(|record| &record.study == study && record.name == name))
    }

    fn create_individual(
        &self,
        study: &StudyId,
        individual: NewIndividual,
    ) -> Result<EntityId, PedigreeError> {
        if self
            .lookup_individual_by_name(study, &individual.name)?
            .is_some()
        {
            return Err(PedigreeError::Store(format!(
                "individual {} already exists in study {study}",
                individual.name
            )));
        }
        self.require_parent(study, individual.father)?;
        self.require_parent(study, individual.mother)?;

        let id = self.next_id()?;
        let record = IndividualRecord {
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
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.write_record_atomic(&record)?;
        debug!(id = %id, name = %record.name, "individual written");
        Ok(id)
    }

    fn list_individuals(&self, study: &StudyId) -> Result<Vec<IndividualRecord>, PedigreeError> {
        Ok(self
            .all_records()?
            .into_iter()
            .filter(|record| &record.study == study)
            .collect())
    }
}
