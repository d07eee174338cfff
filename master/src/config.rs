use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use common::script::DEFAULT_REPORTER;

pub const DEFAULT_COLLECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DEAD_DEBOUNCE_SECS: u64 = 60;
pub const DEFAULT_BIND: &str = "0.0.0.0:0";

/// Dónde escucha el endpoint de resultados y qué dirección se anuncia a los workers.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub bind_addr: SocketAddr,
    /// Host que se escribe en el script. `None` = hostname de esta máquina.
    pub advertise_host: Option<String>,
}

/// Parámetros de una corrida del orquestador.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Espera máxima de cada `take` antes de pasar a revisar la cola.
    pub collect_timeout: Duration,
    /// Tiempo que una tarea debe faltar de la cola para darla por muerta.
    pub dead_debounce: Duration,
    pub endpoint: EndpointConfig,
    /// Comando del nodo que entrega el resultado.
    pub reporter: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            collect_timeout: Duration::from_secs(DEFAULT_COLLECT_TIMEOUT_SECS),
            dead_debounce: Duration::from_secs(DEFAULT_DEAD_DEBOUNCE_SECS),
            endpoint: EndpointConfig {
                bind_addr: default_bind(),
                advertise_host: None,
            },
            reporter: DEFAULT_REPORTER.to_string(),
        }
    }
}

impl RunConfig {
    /// Defaults sobreescribibles con variables de entorno:
    /// - ARRAYRUN_COLLECT_TIMEOUT_SECS
    /// - ARRAYRUN_DEAD_DEBOUNCE_SECS
    /// - ARRAYRUN_BIND (ej: 0.0.0.0:40000)
    /// - ARRAYRUN_ADVERTISE_HOST
    /// - ARRAYRUN_REPORTER
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            collect_timeout: env_secs("ARRAYRUN_COLLECT_TIMEOUT_SECS").unwrap_or(d.collect_timeout),
            dead_debounce: env_secs("ARRAYRUN_DEAD_DEBOUNCE_SECS").unwrap_or(d.dead_debounce),
            endpoint: EndpointConfig {
                bind_addr: env::var("ARRAYRUN_BIND")
                    .ok()
                    .and_then(|s| s.parse::<SocketAddr>().ok())
                    .unwrap_or(d.endpoint.bind_addr),
                advertise_host: env::var("ARRAYRUN_ADVERTISE_HOST")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            reporter: env::var("ARRAYRUN_REPORTER")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(d.reporter),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

fn env_secs(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_razonables() {
        let c = RunConfig::default();
        assert_eq!(c.collect_timeout, Duration::from_secs(30));
        assert_eq!(c.dead_debounce, Duration::from_secs(60));
        assert_eq!(c.endpoint.bind_addr.to_string(), DEFAULT_BIND);
        assert_eq!(c.reporter, "arrayrun-report");
    }
}
