use serde::{Deserialize, Serialize};

/// Registro que un worker envía al terminar su comando.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Identidad de la corrida que hizo el submit.
    pub submitter: String,
    /// `$PBS_JOBID` tal como lo ve el worker, ej: `123[4].server`.
    pub batch_id: String,
    pub index: u32,
    pub hostname: String,
    pub exit_code: i32,
    /// Segundos desde epoch.
    pub start_time: i64,
    pub end_time: i64,
}

impl CompletionRecord {
    /// Duración como `XmYs`.
    pub fn duration_label(&self) -> String {
        let secs = (self.end_time - self.start_time).max(0);
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

/// Plantilla para `take`: el submitter es fijo, el resto es comodín.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTemplate {
    pub submitter: String,
}

impl RecordTemplate {
    pub fn for_submitter(submitter: impl Into<String>) -> Self {
        Self {
            submitter: submitter.into(),
        }
    }

    pub fn matches(&self, record: &CompletionRecord) -> bool {
        record.submitter == self.submitter
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultAck {
    pub ok: bool,
}

/// Código de salida final por índice, lo que reciben los callbacks.
pub type TaskResults = Vec<(u32, i32)>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(submitter: &str, start: i64, end: i64) -> CompletionRecord {
        CompletionRecord {
            submitter: submitter.to_string(),
            batch_id: "12[1].srv".to_string(),
            index: 1,
            hostname: "node01".to_string(),
            exit_code: 0,
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn duracion_en_minutos_y_segundos() {
        assert_eq!(record("a", 100, 225).duration_label(), "2m5s");
        assert_eq!(record("a", 100, 100).duration_label(), "0m0s");
        // reloj desfasado entre nodos
        assert_eq!(record("a", 100, 90).duration_label(), "0m0s");
    }

    #[test]
    fn template_solo_compara_submitter() {
        let t = RecordTemplate::for_submitter("abc");
        assert!(t.matches(&record("abc", 0, 1)));
        assert!(!t.matches(&record("xyz", 0, 1)));
    }

    #[test]
    fn formato_json_del_registro() {
        let json = serde_json::to_value(record("abc", 1, 2)).unwrap();
        assert_eq!(json["submitter"], "abc");
        assert_eq!(json["batch_id"], "12[1].srv");
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["end_time"], 2);
    }
}
