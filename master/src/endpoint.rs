use std::net::SocketAddr;

use common::{Error, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EndpointConfig;
use crate::handlers::build_router;
use crate::state::ResultStore;

/// Servidor HTTP donde los workers depositan sus resultados.
///
/// Vive lo que dura una corrida del orquestador.
pub struct ResultEndpoint {
    address: String,
    local_addr: SocketAddr,
    store: ResultStore,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl ResultEndpoint {
    pub async fn bind(cfg: &EndpointConfig) -> Result<Self> {
        let listener = TcpListener::bind(cfg.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let host = match &cfg.advertise_host {
            Some(h) => h.clone(),
            None => advertise_host_for(local_addr)?,
        };
        let address = format!("http://{}:{}", host, local_addr.port());

        let store = ResultStore::new();
        let app = build_router(store.clone());
        let (tx, rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!("el endpoint de resultados terminó con error: {:?}", e);
            }
        });

        info!("endpoint de resultados escuchando en {} ({})", address, local_addr);

        Ok(Self {
            address,
            local_addr,
            store,
            shutdown: Some(tx),
            server: Some(server),
        })
    }

    /// Dirección que se embebe en el script.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> ResultStore {
        self.store.clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
        info!("endpoint de resultados detenido");
    }
}

impl Drop for ResultEndpoint {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Con bind a una IP concreta se anuncia esa IP; con 0.0.0.0 se usa el
/// hostname, que es lo que los nodos pueden resolver.
fn advertise_host_for(addr: SocketAddr) -> Result<String> {
    if !addr.ip().is_unspecified() {
        return Ok(addr.ip().to_string());
    }
    let name = hostname::get()
        .map_err(|e| Error::Endpoint(format!("no se pudo obtener el hostname: {e}")))?
        .to_string_lossy()
        .to_string();
    if name.is_empty() {
        return Err(Error::Endpoint("hostname vacío".into()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CompletionRecord, RecordTemplate, ResultAck};
    use std::time::Duration;

    fn local_cfg() -> EndpointConfig {
        EndpointConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            advertise_host: None,
        }
    }

    #[tokio::test]
    async fn anuncia_ip_concreta_o_host_configurado() {
        let ep = ResultEndpoint::bind(&local_cfg()).await.unwrap();
        assert_eq!(
            ep.address(),
            format!("http://127.0.0.1:{}", ep.local_addr().port())
        );
        ep.shutdown().await;

        let cfg = EndpointConfig {
            advertise_host: Some("login01.cluster".into()),
            ..local_cfg()
        };
        let ep = ResultEndpoint::bind(&cfg).await.unwrap();
        assert!(ep.address().starts_with("http://login01.cluster:"));
        ep.shutdown().await;
    }

    #[tokio::test]
    async fn post_de_resultado_llega_al_store() {
        let ep = ResultEndpoint::bind(&local_cfg()).await.unwrap();
        let record = CompletionRecord {
            submitter: "run-x".into(),
            batch_id: "41[2].srv".into(),
            index: 2,
            hostname: "node07".into(),
            exit_code: 3,
            start_time: 10,
            end_time: 20,
        };

        let client = reqwest::Client::new();
        let health = client
            .get(format!("{}/health", ep.address()))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(health, "ok");

        let ack: ResultAck = client
            .post(format!("{}/api/v1/results", ep.address()))
            .json(&record)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(ack.ok);

        let got = ep
            .store()
            .take(&RecordTemplate::for_submitter("run-x"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(got, record);
        ep.shutdown().await;
    }
}
