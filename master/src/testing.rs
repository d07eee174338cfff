//! Scheduler falso para tests: simula qsub/qstat y, si tiene un store
//! conectado, hace de worker escribiendo los resultados planificados.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{ArraySpec, BatchId, CompletionRecord, Error, Result};

use crate::scheduler::Scheduler;
use crate::state::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Exit(i32),
    /// El worker muere sin reportar y desaparece de la cola.
    Vanish,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub batch_id: BatchId,
    pub script: String,
    pub restriction: Option<String>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    submissions: Vec<Submission>,
    active: HashSet<String>,
    fail_submit: bool,
    fail_list: bool,
    worker: Option<(ResultStore, String)>,
    plan: HashMap<(u32, u32), Outcome>,
    attempts: HashMap<u32, u32>,
}

#[derive(Clone, Default)]
pub struct FakeScheduler {
    inner: Arc<Mutex<Inner>>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        let s = Self::default();
        s.inner.lock().unwrap().next_id = 100;
        s
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn set_active<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.lock().unwrap().active = ids.into_iter().map(Into::into).collect();
    }

    pub fn fail_submit(&self, fail: bool) {
        self.inner.lock().unwrap().fail_submit = fail;
    }

    pub fn fail_list_active(&self, fail: bool) {
        self.inner.lock().unwrap().fail_list = fail;
    }

    /// Conecta el store del endpoint: desde ahora cada submit "ejecuta" las tareas.
    pub fn attach(&self, store: ResultStore, submitter: &str) {
        self.inner.lock().unwrap().worker = Some((store, submitter.to_string()));
    }

    /// Resultado del intento `attempt` (0 = primer submit) del índice dado.
    /// Sin plan, la tarea termina con 0.
    pub fn plan(&self, index: u32, attempt: u32, outcome: Outcome) {
        self.inner.lock().unwrap().plan.insert((index, attempt), outcome);
    }
}

/// Índices que cubre un submit: la restricción o el `#PBS -t` del script.
fn submitted_indices(script: &str, restriction: Option<&str>) -> Vec<u32> {
    let expr = restriction.map(str::to_string).or_else(|| {
        script
            .lines()
            .find_map(|l| l.strip_prefix("#PBS -t "))
            .map(str::to_string)
    });
    expr.and_then(|e| e.parse::<ArraySpec>().ok())
        .map(|a| a.indices())
        .unwrap_or_default()
}

#[async_trait]
impl Scheduler for FakeScheduler {
    async fn submit(&self, script: &str, restriction: Option<&str>) -> Result<BatchId> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_submit {
            return Err(Error::Submission("qsub error: cola cerrada".into()));
        }
        let batch_id = inner.next_id.to_string();
        inner.next_id += 1;
        inner.submissions.push(Submission {
            batch_id: batch_id.clone(),
            script: script.to_string(),
            restriction: restriction.map(str::to_string),
        });

        for index in submitted_indices(script, restriction) {
            let attempt = {
                let a = inner.attempts.entry(index).or_insert(0);
                let current = *a;
                *a += 1;
                current
            };
            let outcome = inner
                .plan
                .get(&(index, attempt))
                .copied()
                .unwrap_or(Outcome::Exit(0));
            if let (Outcome::Exit(code), Some((store, submitter))) = (outcome, &inner.worker) {
                store.write(CompletionRecord {
                    submitter: submitter.clone(),
                    batch_id: format!("{batch_id}[{index}].fake"),
                    index,
                    hostname: format!("node{index:02}"),
                    exit_code: code,
                    start_time: 1_000,
                    end_time: 1_065,
                });
            }
        }
        Ok(batch_id)
    }

    async fn list_active(&self) -> Result<HashSet<String>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_list {
            return Err(Error::Scheduler("qstat: timeout".into()));
        }
        Ok(inner.active.clone())
    }
}
