use std::collections::HashSet;
use std::env;
use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use common::{BatchId, Error, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

/// Adaptador al gestor de colas externo.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Envía el script; `restriction` limita los índices del array (`-t`).
    async fn submit(&self, script: &str, restriction: Option<&str>) -> Result<BatchId>;

    /// Ids activos: `batch` o `batch[index]` para sub-tareas de un array.
    async fn list_active(&self) -> Result<HashSet<String>>;
}

/// PBS/Torque vía `qsub` y `qstat -t`.
#[derive(Debug, Clone)]
pub struct TorqueScheduler {
    qsub: String,
    qstat: String,
}

impl Default for TorqueScheduler {
    fn default() -> Self {
        Self {
            qsub: "qsub".to_string(),
            qstat: "qstat".to_string(),
        }
    }
}

impl TorqueScheduler {
    pub fn new(qsub: impl Into<String>, qstat: impl Into<String>) -> Self {
        Self {
            qsub: qsub.into(),
            qstat: qstat.into(),
        }
    }

    /// Comandos sobreescribibles con ARRAYRUN_QSUB / ARRAYRUN_QSTAT.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            qsub: env::var("ARRAYRUN_QSUB").unwrap_or(d.qsub),
            qstat: env::var("ARRAYRUN_QSTAT").unwrap_or(d.qstat),
        }
    }
}

#[async_trait]
impl Scheduler for TorqueScheduler {
    async fn submit(&self, script: &str, restriction: Option<&str>) -> Result<BatchId> {
        let mut cmd = Command::new(&self.qsub);
        if let Some(r) = restriction {
            cmd.arg("-t").arg(r);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Submission(format!("no se pudo ejecutar {}: {e}", self.qsub)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // si qsub termina antes de leer todo, el resultado lo decide su salida
            if let Err(e) = stdin.write_all(script.as_bytes()).await {
                if e.kind() != ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let out = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        let stderr = String::from_utf8_lossy(&out.stderr);
        let id = parse_batch_id(&stdout).ok_or_else(|| {
            Error::Submission(format!("{} error: {}", self.qsub, stderr.trim()))
        })?;

        info!(
            "qsub aceptó el batch {} ({})",
            id,
            stdout.trim()
        );
        Ok(id)
    }

    async fn list_active(&self) -> Result<HashSet<String>> {
        let out = Command::new(&self.qstat)
            .arg("-t")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Scheduler(format!("no se pudo ejecutar {}: {e}", self.qstat)))?;
        // una salida vacía con error no significa cola vacía
        if !out.status.success() {
            return Err(Error::Scheduler(format!(
                "{} terminó con {}: {}",
                self.qstat,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(parse_qstat(&String::from_utf8_lossy(&out.stdout)))
    }
}

/// Dígitos iniciales de la salida de qsub (`123[].server` -> `123`).
/// Un id en cero o ausente no es válido.
pub fn parse_batch_id(stdout: &str) -> Option<BatchId> {
    let s = stdout.trim_start();
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let digits = &s[..end];
    match digits.parse::<u64>() {
        Ok(n) if n > 0 => Some(digits.to_string()),
        _ => None,
    }
}

/// Líneas de `qstat -t` que empiezan con `\d+` o `\d+[\d+]`.
pub fn parse_qstat(output: &str) -> HashSet<String> {
    output.lines().filter_map(leading_job_id).collect()
}

fn leading_job_id(line: &str) -> Option<String> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    if let Some(inner) = rest.strip_prefix('[') {
        let idx = inner.bytes().take_while(u8::is_ascii_digit).count();
        if idx > 0 && inner[idx..].starts_with(']') {
            return Some(line[..digits + idx + 2].to_string());
        }
    }
    Some(line[..digits].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_batch_id_toma_digitos_iniciales() {
        assert_eq!(parse_batch_id("1234[].torque01\n"), Some("1234".into()));
        assert_eq!(parse_batch_id("77.server"), Some("77".into()));
        assert_eq!(parse_batch_id(""), None);
        assert_eq!(parse_batch_id("qsub: error"), None);
        assert_eq!(parse_batch_id("0.server"), None);
    }

    #[test]
    fn parse_qstat_reconoce_jobs_y_subtareas() {
        let out = "\
Job ID                    Name             User            Time Use S Queue
------------------------- ---------------- --------------- -------- - -----
1234[1].torque01           Demo-1           alice           00:00:01 R batch
1234[2].torque01           Demo-2           alice                  0 Q batch
999.torque01               other            bob             00:10:00 R long
";
        let ids = parse_qstat(out);
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("1234[1]"));
        assert!(ids.contains("1234[2]"));
        assert!(ids.contains("999"));
    }

    #[test]
    fn corchete_incompleto_queda_como_job_simple() {
        assert_eq!(leading_job_id("55[ab].srv"), Some("55".into()));
        assert_eq!(leading_job_id("55[].srv"), Some("55".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn submit_falla_si_la_salida_no_trae_id() {
        // `false` no imprime nada
        let s = TorqueScheduler::new("false", "true");
        let err = s.submit("#PBS -N x\n", None).await.unwrap_err();
        assert!(matches!(err, Error::Submission(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn list_active_con_qstat_vacio() {
        let s = TorqueScheduler::new("true", "true");
        assert!(s.list_active().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn list_active_falla_si_qstat_sale_con_error() {
        let s = TorqueScheduler::new("true", "false");
        let err = s.list_active().await.unwrap_err();
        assert!(matches!(err, Error::Scheduler(_)));
        assert!(!err.is_fatal());
    }
}
