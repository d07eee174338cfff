use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::array::ArraySpec;
use crate::error::{Error, Result};
use crate::results::TaskResults;
use crate::script::{SubmissionUnit, DEFAULT_REPORTER};

pub type DoneCallback = Box<dyn FnOnce() + Send>;
pub type FailCallback = Box<dyn FnOnce(&TaskResults) + Send>;

/// Definición de un job array antes del submit.
///
/// Ejemplo:
/// ```
/// use common::JobSpec;
///
/// let job = JobSpec::new("WithOptions")
///     .resource("nodes", "1:ppn=4")
///     .max_retry(2)
///     .execute_with([1, 2, 3], |n| Some(format!("echo {n} | bc")));
/// assert_eq!(job.command_for(2), Some("echo 2 | bc"));
/// ```
pub struct JobSpec {
    pub name: String,
    pub shell: String,
    pub log_path: PathBuf,
    pub resources: BTreeMap<String, String>,
    /// `None` = `1..=commands.len()`.
    pub array_request: Option<ArraySpec>,
    pub slot_limit: Option<u32>,
    pub inherit_environment: bool,
    pub queue: Option<String>,
    pub commands: Vec<String>,
    pub max_retry: i32,
    pub continue_on_error: bool,
    pub dry_run: bool,
    pub on_done: Option<DoneCallback>,
    pub on_fail: Option<FailCallback>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let log_path = default_log_path(&cwd, &name);
        Self {
            name,
            shell: "/bin/bash".to_string(),
            log_path,
            resources: BTreeMap::new(),
            array_request: None,
            slot_limit: None,
            inherit_environment: false,
            queue: None,
            commands: Vec::new(),
            max_retry: 0,
            continue_on_error: false,
            dry_run: false,
            on_done: None,
            on_fail: None,
        }
    }

    /// Genera un comando por elemento; `None` lo omite.
    pub fn execute_with<I, F>(mut self, inputs: I, mut f: F) -> Self
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Option<String>,
    {
        self.commands = inputs.into_iter().filter_map(|i| f(i)).collect();
        self
    }

    pub fn commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn resource(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resources.insert(key.into(), value.into());
        self
    }

    pub fn array_request(mut self, spec: ArraySpec) -> Self {
        self.array_request = Some(spec);
        self
    }

    // El límite de slots no lo respeta Torque en todas las versiones.
    pub fn slot_limit(mut self, limit: u32) -> Self {
        self.slot_limit = Some(limit);
        self
    }

    pub fn inherit_environment(mut self) -> Self {
        self.inherit_environment = true;
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retry(mut self, count: i32) -> Self {
        self.max_retry = count;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn on_done<F: FnOnce() + Send + 'static>(mut self, f: F) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    pub fn on_fail<F: FnOnce(&TaskResults) + Send + 'static>(mut self, f: F) -> Self {
        self.on_fail = Some(Box::new(f));
        self
    }

    /// Comando que ejecutó el índice (1-based) del array.
    pub fn command_for(&self, index: u32) -> Option<&str> {
        let pos = (index as usize).checked_sub(1)?;
        self.commands.get(pos).map(String::as_str)
    }

    /// Array efectivo: el pedido explícitamente o `1..=n`.
    pub fn array(&self) -> ArraySpec {
        let base = self
            .array_request
            .clone()
            .unwrap_or_else(|| ArraySpec::for_commands(self.commands.len() as u32));
        match self.slot_limit {
            Some(l) => base.with_slot_limit(Some(l)),
            None => base,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("nombre de job vacío".into()));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "el nombre de job no puede tener espacios: {:?}",
                self.name
            )));
        }
        if self.commands.is_empty() {
            return Err(Error::Config("el job no tiene comandos".into()));
        }
        if self.max_retry < 0 {
            return Err(Error::Config(format!(
                "max_retry negativo: {}",
                self.max_retry
            )));
        }
        self.array().validate(self.commands.len())
    }

    /// Arma la unidad de submit con la dirección del endpoint ya conocida.
    pub fn to_unit(&self, callback: Option<String>, submitter: &str, reporter: &str) -> SubmissionUnit {
        SubmissionUnit {
            shell: self.shell.clone(),
            name: self.name.clone(),
            log_path: self.log_path.clone(),
            resources: self.resources.clone(),
            array: self.array(),
            inherit_environment: self.inherit_environment,
            queue: self.queue.clone(),
            commands: self.commands.clone(),
            callback,
            submitter: submitter.to_string(),
            reporter: reporter.to_string(),
        }
    }

    pub fn to_dry_run_unit(&self) -> SubmissionUnit {
        self.to_unit(None, "", DEFAULT_REPORTER)
    }
}

/// `<base>/log_<ymd_hms>/<name>.log`
pub fn default_log_path(base: &Path, name: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    base.join(format!("log_{stamp}")).join(format!("{name}.log"))
}
