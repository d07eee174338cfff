use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errores del orquestador de jobs array.
///
/// Sólo `Config` y `Submission` abortan una corrida; el resto se
/// recupera dentro del loop de polling.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuración inválida (nombre vacío, retry negativo, índices fuera de rango...).
    #[error("configuración inválida: {0}")]
    Config(String),

    #[error("el conjunto de tareas ya fue inicializado")]
    AlreadyInitialized,

    /// Un orquestador maneja una sola corrida.
    #[error("la corrida ya fue iniciada")]
    AlreadyStarted,

    #[error("índice de array desconocido: {0}")]
    UnknownIndex(u32),

    /// El scheduler no devolvió un id de batch parseable.
    #[error("error de submit: {0}")]
    Submission(String),

    /// Ningún resultado llegó dentro de la ventana de espera. No es fatal.
    #[error("sin resultados tras {0:?}")]
    CollectionTimeout(Duration),

    #[error("error consultando el scheduler: {0}")]
    Scheduler(String),

    #[error("error en el endpoint de resultados: {0}")]
    Endpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errores que terminan la corrida completa.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Submission(_))
    }
}
