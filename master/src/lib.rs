pub mod config;
pub mod endpoint;
pub mod failover;
pub mod handlers;
pub mod monitor;
pub mod orchestrator;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod testing;

use common::{JobSpec, Result};
use tracing::error;

pub use config::{EndpointConfig, RunConfig};
pub use endpoint::ResultEndpoint;
pub use orchestrator::{Orchestrator, RunOutcome, RunState};
pub use scheduler::{Scheduler, TorqueScheduler};
pub use state::ResultStore;

/// Punto de entrada completo: submit, espera y cierre contra Torque.
///
/// Con `dry_run` sólo imprime el script. Si el job falla y no se pidió
/// `continue_on_error`, termina el proceso con estado 1.
pub async fn submit(job: JobSpec) -> Result<bool> {
    submit_with(job, TorqueScheduler::from_env(), RunConfig::from_env()).await
}

pub async fn submit_with<S: Scheduler>(job: JobSpec, scheduler: S, config: RunConfig) -> Result<bool> {
    let dry_run = job.dry_run;
    let continue_on_error = job.continue_on_error;
    let mut orch = Orchestrator::new(job, scheduler, config)?;

    if dry_run {
        print!("{}", orch.dry_run());
        return Ok(true);
    }

    let outcome = orch.run().await?;
    if outcome.success {
        return Ok(true);
    }
    if continue_on_error {
        return Ok(false);
    }
    error!("job fallido: {}", outcome.batch_ids.join(","));
    std::process::exit(1);
}
