use std::time::{Duration, Instant};

use common::{Task, TaskSet};
use tracing::{debug, warn};

use crate::scheduler::Scheduler;

/// Detecta tareas que salieron de la cola sin entregar resultado.
///
/// Una sola ausencia no alcanza: la cola y el callback del worker compiten,
/// y una tarea recién terminada puede faltar en `qstat` antes de que llegue
/// su reporte. Sólo una ausencia sostenida más de `debounce` cuenta.
pub struct DeadTaskDetector {
    debounce: Duration,
}

impl DeadTaskDetector {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }

    /// Devuelve los índices confirmados como muertos en esta pasada.
    pub async fn collect<S: Scheduler + ?Sized>(&self, scheduler: &S, tasks: &mut TaskSet) -> Vec<u32> {
        let active = match scheduler.list_active().await {
            Ok(ids) => ids,
            Err(e) => {
                // sin información no se marca nada
                warn!("no se pudo consultar la cola, se omite la detección: {}", e);
                return Vec::new();
            }
        };

        let (present, missing): (Vec<&Task>, Vec<&Task>) = tasks
            .pending()
            .partition(|t| active.contains(&t.job_id()));
        let present: Vec<u32> = present.into_iter().map(|t| t.index).collect();
        let missing: Vec<u32> = missing.into_iter().map(|t| t.index).collect();

        tasks.clear_missing(&present);

        if missing.is_empty() {
            return Vec::new();
        }
        debug!("tareas sin reporte fuera de la cola: {:?}", missing);

        tasks.mark_dead_or_confirm(&missing, Instant::now(), self.debounce)
    }
}
