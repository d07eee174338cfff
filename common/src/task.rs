use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{Error, Result};

pub type BatchId = String;

/// Código de salida asignado a una tarea que desapareció de la cola sin reportar.
pub const PRESUMED_DEAD_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

/// Una posición del job array.
///
/// `index` es la identidad; `batch_id` cambia en cada reenvío.
#[derive(Debug, Clone)]
pub struct Task {
    pub batch_id: BatchId,
    pub index: u32,
    pub exit_code: Option<i32>,
    pub retry_count: u32,
    pub max_retry: u32,
    pub dead_since: Option<Instant>,
}

impl Task {
    pub fn new(batch_id: BatchId, index: u32, max_retry: u32) -> Self {
        Self {
            batch_id,
            index,
            exit_code: None,
            retry_count: 0,
            max_retry,
            dead_since: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self.exit_code {
            None => TaskStatus::Pending,
            Some(0) => TaskStatus::Succeeded,
            Some(_) if self.retry_count < self.max_retry => TaskStatus::FailedRetryable,
            Some(_) => TaskStatus::FailedTerminal,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status(),
            TaskStatus::Succeeded | TaskStatus::FailedTerminal
        )
    }

    pub fn needs_retry(&self) -> bool {
        self.status() == TaskStatus::FailedRetryable
    }

    /// Id de la sub-tarea tal como la lista `qstat -t`: `batch[index]`.
    pub fn job_id(&self) -> String {
        format!("{}[{}]", self.batch_id, self.index)
    }

    /// Devuelve true si pisó un exit code distinto.
    fn set_exit_code(&mut self, code: i32) -> bool {
        let conflict = matches!(self.exit_code, Some(prev) if prev != code);
        if conflict {
            warn!(
                "exit code ya asignado para {}: {:?} -> {}",
                self.job_id(),
                self.exit_code,
                code
            );
        }
        self.exit_code = Some(code);
        self.dead_since = None;
        conflict
    }

    /// Devuelve true si la tarea quedó confirmada como muerta.
    fn mark_missing(&mut self, now: Instant, debounce: Duration) -> bool {
        match self.dead_since {
            Some(since) if now.saturating_duration_since(since) > debounce => {
                self.exit_code = Some(PRESUMED_DEAD_EXIT_CODE);
                self.dead_since = None;
                true
            }
            Some(_) => false,
            None => {
                self.dead_since = Some(now);
                false
            }
        }
    }

    fn resubmit(&mut self, new_batch_id: BatchId) {
        self.batch_id = new_batch_id;
        self.exit_code = None;
        self.dead_since = None;
        self.retry_count += 1;
    }
}

/// Todas las tareas de una invocación lógica, indexadas por posición del array.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Option<BTreeMap<u32, Task>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crea una tarea por índice. Sólo se puede llamar una vez.
    pub fn init<I>(&mut self, batch_id: &str, indices: I, max_retry: i32) -> Result<()>
    where
        I: IntoIterator<Item = u32>,
    {
        if self.tasks.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        if max_retry < 0 {
            return Err(Error::Config(format!("max_retry negativo: {max_retry}")));
        }
        let tasks = indices
            .into_iter()
            .map(|i| (i, Task::new(batch_id.to_string(), i, max_retry as u32)))
            .collect();
        self.tasks = Some(tasks);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.tasks.is_some()
    }

    fn map(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().flat_map(|m| m.values())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.map()
    }

    pub fn get(&self, index: u32) -> Option<&Task> {
        self.tasks.as_ref().and_then(|m| m.get(&index))
    }

    fn get_mut(&mut self, index: u32) -> Result<&mut Task> {
        self.tasks
            .as_mut()
            .and_then(|m| m.get_mut(&index))
            .ok_or(Error::UnknownIndex(index))
    }

    pub fn len(&self) -> usize {
        self.tasks.as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Un reporte duplicado con otro código sólo genera un warning y gana
    /// el último valor. Devuelve true en ese caso.
    pub fn set_exit_code(&mut self, index: u32, code: i32) -> Result<bool> {
        Ok(self.get_mut(index)?.set_exit_code(code))
    }

    pub fn all_finished(&self) -> bool {
        self.map().all(Task::is_finished)
    }

    /// Tareas que todavía no reportaron exit code.
    pub fn pending(&self) -> impl Iterator<Item = &Task> {
        self.map().filter(|t| t.exit_code.is_none())
    }

    pub fn select_retryable(&self) -> Vec<u32> {
        self.map().filter(|t| t.needs_retry()).map(|t| t.index).collect()
    }

    /// Tareas pendientes que volvieron a aparecer en la cola: la ausencia
    /// tiene que ser continua para contar.
    pub fn clear_missing<'a, I>(&mut self, present: I)
    where
        I: IntoIterator<Item = &'a u32>,
    {
        if let Some(tasks) = self.tasks.as_mut() {
            for index in present {
                if let Some(t) = tasks.get_mut(index) {
                    if t.exit_code.is_none() {
                        t.dead_since = None;
                    }
                }
            }
        }
    }

    /// Primera ausencia: marca `dead_since`. Ausencia persistente por más de
    /// `debounce`: fuerza exit code -1. Devuelve los índices confirmados.
    /// Las tareas que ya reportaron no se tocan.
    pub fn mark_dead_or_confirm(
        &mut self,
        indices: &[u32],
        now: Instant,
        debounce: Duration,
    ) -> Vec<u32> {
        let mut confirmed = Vec::new();
        for &index in indices {
            let Ok(task) = self.get_mut(index) else {
                continue;
            };
            if task.exit_code.is_some() {
                continue;
            }
            if task.mark_missing(now, debounce) {
                warn!(
                    "{} sin respuesta {:?} después de salir de la cola, se asume muerta",
                    task.job_id(),
                    debounce
                );
                confirmed.push(index);
            }
        }
        confirmed
    }

    pub fn resubmit(&mut self, index: u32, new_batch_id: &str) -> Result<()> {
        let task = self.get_mut(index)?;
        let old = task.job_id();
        task.resubmit(new_batch_id.to_string());
        info!(
            "reenviando {} como {} (intento {}/{})",
            old,
            task.job_id(),
            task.retry_count,
            task.max_retry
        );
        Ok(())
    }

    /// `(índice, exit code)` en orden de índice.
    pub fn results(&self) -> Vec<(u32, Option<i32>)> {
        self.map().map(|t| (t.index, t.exit_code)).collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.map()
            .filter(|t| t.status() == TaskStatus::Succeeded)
            .count()
    }
}
