use common::{
    BatchId, CompletionRecord, Error, JobSpec, RecordTemplate, Result, TaskResults, TaskSet,
    PRESUMED_DEAD_EXIT_CODE,
};
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::endpoint::ResultEndpoint;
use crate::failover::resubmit_failed;
use crate::monitor::DeadTaskDetector;
use crate::scheduler::Scheduler;
use crate::state::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Built,
    Submitted,
    Polling,
    Finalized { success: bool },
}

/// Resultado final de una corrida.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    /// `(índice, exit code)` en orden de índice.
    pub results: TaskResults,
    /// Todos los batches enviados, el original primero.
    pub batch_ids: Vec<BatchId>,
}

/// Maneja un job array completo: submit, polling de resultados, detección
/// de tareas muertas, reenvíos y cierre.
pub struct Orchestrator<S: Scheduler> {
    job: JobSpec,
    scheduler: S,
    config: RunConfig,
    /// Identidad de esta corrida, viaja en cada resultado.
    submitter: String,
    tasks: TaskSet,
    state: RunState,
    batch_ids: Vec<BatchId>,
}

impl<S: Scheduler> Orchestrator<S> {
    /// Valida el job antes de cualquier efecto.
    pub fn new(job: JobSpec, scheduler: S, config: RunConfig) -> Result<Self> {
        job.validate()?;
        Ok(Self {
            job,
            scheduler,
            config,
            submitter: uuid::Uuid::new_v4().to_string(),
            tasks: TaskSet::new(),
            state: RunState::Built,
            batch_ids: Vec::new(),
        })
    }

    pub fn submitter_id(&self) -> &str {
        &self.submitter
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn tasks(&self) -> &TaskSet {
        &self.tasks
    }

    /// Script tal como se enviaría, sin endpoint ni submit.
    pub fn dry_run(&self) -> String {
        self.job.to_dry_run_unit().render()
    }

    pub async fn run(&mut self) -> Result<RunOutcome> {
        self.ensure_fresh()?;
        let endpoint = ResultEndpoint::bind(&self.config.endpoint).await?;
        self.run_with_endpoint(endpoint).await
    }

    /// Igual que `run` pero con un endpoint ya levantado.
    pub async fn run_with_endpoint(&mut self, endpoint: ResultEndpoint) -> Result<RunOutcome> {
        let result = match self.ensure_fresh() {
            Ok(()) => self.drive(&endpoint).await,
            Err(e) => Err(e),
        };
        endpoint.shutdown().await;
        result
    }

    async fn drive(&mut self, endpoint: &ResultEndpoint) -> Result<RunOutcome> {
        let script = self.submit(endpoint.address()).await?;
        self.poll(&endpoint.store(), &script).await?;
        Ok(self.finalize())
    }

    /// Sólo se puede correr desde `Built`; un submit fallido deja el estado ahí.
    fn ensure_fresh(&self) -> Result<()> {
        if self.state != RunState::Built {
            return Err(Error::AlreadyStarted);
        }
        Ok(())
    }

    fn transition(&mut self, next: RunState) {
        debug!("estado de la corrida: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Arma el script con la dirección del endpoint, lo envía e inicializa las tareas.
    async fn submit(&mut self, callback: &str) -> Result<String> {
        if let Some(dir) = self.job.log_path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let unit = self
            .job
            .to_unit(Some(callback.to_string()), &self.submitter, &self.config.reporter);
        let script = unit.render();

        let batch_id = self.scheduler.submit(&script, None).await?;
        info!("job enviado: {}[{}]", batch_id, unit.array_expression());

        self.tasks
            .init(&batch_id, unit.array.indices(), self.job.max_retry)?;
        self.batch_ids.push(batch_id);
        self.transition(RunState::Submitted);
        Ok(script)
    }

    async fn poll(&mut self, store: &ResultStore, script: &str) -> Result<()> {
        self.transition(RunState::Polling);
        let detector = DeadTaskDetector::new(self.config.dead_debounce);
        let template = RecordTemplate::for_submitter(self.submitter.clone());

        while !self.tasks.all_finished() {
            self.collect_results(store, &template).await?;
            detector.collect(&self.scheduler, &mut self.tasks).await;
            if let Some(id) = resubmit_failed(&self.scheduler, script, &mut self.tasks).await? {
                self.batch_ids.push(id);
            }
        }
        Ok(())
    }

    /// Toma resultados hasta que se vence la espera o terminan todas las tareas.
    async fn collect_results(&mut self, store: &ResultStore, template: &RecordTemplate) -> Result<()> {
        while !self.tasks.all_finished() {
            match store.take(template, self.config.collect_timeout).await {
                Ok(record) => self.apply(&record),
                Err(Error::CollectionTimeout(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn apply(&mut self, record: &CompletionRecord) {
        match self.tasks.set_exit_code(record.index, record.exit_code) {
            Ok(true) => warn!("reporte duplicado de {}({})", record.batch_id, record.hostname),
            Ok(false) => {}
            Err(e) => {
                warn!("resultado ignorado de {}({}): {}", record.batch_id, record.hostname, e);
                return;
            }
        }
        info!(
            "{}({}) => {}\t[{}]\t({}/{})",
            record.batch_id,
            record.hostname,
            record.exit_code,
            record.duration_label(),
            self.tasks.succeeded_count(),
            self.tasks.len()
        );
    }

    fn finalize(&mut self) -> RunOutcome {
        let results: TaskResults = self
            .tasks
            .results()
            .into_iter()
            .map(|(i, code)| (i, code.unwrap_or(PRESUMED_DEAD_EXIT_CODE)))
            .collect();
        let success = results.iter().all(|(_, code)| *code == 0);

        if success {
            match self.job.on_done.take() {
                Some(done) => done(),
                None => info!("job exitoso"),
            }
        } else {
            match self.job.on_fail.take() {
                Some(fail) => fail(&results),
                None => {
                    for (index, code) in results.iter().filter(|(_, c)| *c != 0) {
                        warn!("tarea del array falló: [{}] => {}", index, code);
                    }
                }
            }
        }

        self.transition(RunState::Finalized { success });
        RunOutcome {
            success,
            results,
            batch_ids: self.batch_ids.clone(),
        }
    }
}
