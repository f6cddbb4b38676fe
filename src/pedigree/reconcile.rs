use crate::domain::{Family, Reference};
use crate::error::PedigreeError;
use crate::pedigree::provision::ProvisionedIds;

/// Returns the family with every member id filled in and every by-name parent
/// rewritten to the parent's durable id.
pub fn reconcile(mut family: Family, ids: &ProvisionedIds) -> Result<Family, PedigreeError> {
    for member in &mut family.members {
        let id = ids
            .get(&member.name)
            .ok_or_else(|| PedigreeError::UnresolvedReference(member.name.clone()))?;
        member.id = Some(id);

        for parent in [&mut member.father, &mut member.mother] {
            if let Some(Reference::ByName(name)) = parent {
                let id = ids.get(name.as_str()).ok_or_else(|| {
                    PedigreeError::UnresolvedReference(format!(
                        "parent {name} of {}",
                        member.name
                    ))
                })?;
                *parent = Some(Reference::ById(id));
            }
        }
    }
    Ok(family)
}
