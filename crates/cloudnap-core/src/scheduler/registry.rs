//! Bulk registration of schedule actions

use tracing::info;

use super::engine::{JobDefinition, JobScheduler};
use super::triggers::FiringRule;
use crate::error::Result;
use crate::executor::Executor;
use crate::schedule::{validate_schedules, ScheduleSpec};

/// Translate every enabled action of `specs` into a managed job definition
///
/// The whole set is validated first; nothing is returned for a set with
/// any invalid spec or duplicate name.
pub fn job_definitions(executor: &Executor, specs: &[ScheduleSpec]) -> Result<Vec<JobDefinition>> {
    validate_schedules(specs)?;

    let mut definitions = Vec::new();
    for spec in specs {
        for (action, trigger) in spec.actions() {
            let rule = FiringRule::from_trigger(trigger)?;
            definitions.push(JobDefinition::new(
                spec.job_name(action),
                rule,
                executor.make(spec, action.as_str()),
            ));
        }
    }
    Ok(definitions)
}

impl JobScheduler {
    /// Register a job for every enabled action of `specs`
    pub async fn register_schedules(&self, executor: &Executor, specs: &[ScheduleSpec]) -> Result<()> {
        let definitions = job_definitions(executor, specs)?;
        let jobs = definitions.len();
        self.add_managed(definitions).await?;

        info!(schedules = specs.len(), jobs, "Schedules registered");
        Ok(())
    }

    /// Swap the managed job set for one built from `specs`
    ///
    /// A set that fails validation or registration leaves the running
    /// jobs untouched.
    pub async fn replace_schedules(&self, executor: &Executor, specs: &[ScheduleSpec]) -> Result<()> {
        let definitions = job_definitions(executor, specs)?;
        self.replace_managed(definitions).await?;

        info!(schedules = specs.len(), "Schedules replaced");
        Ok(())
    }
}
