use anyhow::{bail, Context, Result};
use clap::Parser;
use common::{CompletionRecord, ResultAck};
use reqwest::Client;
use std::time::Duration;
use tracing::info;

const REPORT_TIMEOUT_SECS: u64 = 10;

/// Entrega el resultado de una tarea del array al endpoint del submitter.
///
/// Un solo intento: los reintentos los hace el script del job.
#[derive(Parser, Debug)]
#[command(name = "arrayrun-report")]
#[command(about = "Reporta el exit code de una tarea del array al submitter")]
pub struct ReportArgs {
    /// URL base del endpoint, ej: http://login01:40123
    #[arg(long)]
    pub endpoint: String,

    /// Identidad de la corrida que hizo el submit
    #[arg(long)]
    pub submitter: String,

    /// $PBS_JOBID
    #[arg(long = "batch-id")]
    pub batch_id: String,

    /// $PBS_ARRAYID
    #[arg(long)]
    pub index: u32,

    /// Si viene vacío se usa el hostname local
    #[arg(long, default_value = "")]
    pub host: String,

    #[arg(long = "exit-code", allow_hyphen_values = true)]
    pub exit_code: i32,

    /// Segundos desde epoch
    #[arg(long)]
    pub start: i64,

    #[arg(long)]
    pub end: i64,
}

impl ReportArgs {
    pub fn into_record(self) -> CompletionRecord {
        let hostname = if self.host.is_empty() {
            local_hostname()
        } else {
            self.host
        };
        CompletionRecord {
            submitter: self.submitter,
            batch_id: self.batch_id,
            index: self.index,
            hostname,
            exit_code: self.exit_code,
            start_time: self.start,
            end_time: self.end,
        }
    }
}

pub fn local_hostname() -> String {
    hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REPORT_TIMEOUT_SECS))
        .build()
        .context("no se pudo crear el cliente HTTP")
}

/// POST del registro; sólo un `{ok: true}` cuenta como entregado.
pub async fn report(client: &Client, endpoint: &str, record: &CompletionRecord) -> Result<()> {
    if endpoint.is_empty() {
        bail!("endpoint vacío (¿script generado en dry run?)");
    }
    let url = format!("{}/api/v1/results", endpoint.trim_end_matches('/'));
    let resp = client
        .post(&url)
        .json(record)
        .send()
        .await
        .with_context(|| format!("no se pudo contactar {url}"))?;

    if !resp.status().is_success() {
        bail!("el endpoint respondió {}", resp.status());
    }
    let ack: ResultAck = resp.json().await.context("respuesta inválida del endpoint")?;
    if !ack.ok {
        bail!("el endpoint rechazó el resultado");
    }

    info!(
        "resultado entregado: {}[{}] => {} a {}",
        record.batch_id, record.index, record.exit_code, endpoint
    );
    Ok(())
}
