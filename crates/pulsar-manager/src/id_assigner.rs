use crate::error::Result;
use pulsar_core::config::IdAssignerKind;
use pulsar_core::model::JobId;

/// Maps the id a client proposes at setup time onto the id the job
/// directory is created under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAssigner {
    kind: IdAssignerKind,
}

impl IdAssigner {
    pub fn new(kind: IdAssignerKind) -> Self {
        Self { kind }
    }

    pub fn assign(&self, input_job_id: &str) -> Result<JobId> {
        match self.kind {
            IdAssignerKind::Galaxy => Ok(JobId::validated(input_job_id)?),
            IdAssignerKind::Uuid => Ok(JobId(uuid::Uuid::new_v4().simple().to_string())),
        }
    }
}
