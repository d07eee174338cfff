mod worker;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::worker::{build_client, report, ReportArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout es el log del job en PBS; los mensajes van a stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arrayrun_report=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = ReportArgs::parse();
    let endpoint = args.endpoint.clone();
    let record = args.into_record();

    let client = build_client()?;
    report(&client, &endpoint, &record).await
}
