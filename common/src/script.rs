use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::array::{join_indices, ArraySpec};

/// Binario que el script invoca en el nodo para entregar el resultado.
pub const DEFAULT_REPORTER: &str = "arrayrun-report";

/// Reintentos de entrega adicionales al primer intento.
pub const REPORT_RETRIES: u32 = 10;
pub const REPORT_RETRY_PAUSE_SECS: u32 = 5;

/// Descripción inmutable de un submit: todo lo necesario para generar el
/// script PBS que corre cada worker.
#[derive(Debug, Clone)]
pub struct SubmissionUnit {
    pub shell: String,
    pub name: String,
    pub log_path: PathBuf,
    pub resources: BTreeMap<String, String>,
    pub array: ArraySpec,
    pub inherit_environment: bool,
    pub queue: Option<String>,
    pub commands: Vec<String>,
    /// Dirección del endpoint de resultados. `None` en dry run.
    pub callback: Option<String>,
    pub submitter: String,
    pub reporter: String,
}

impl SubmissionUnit {
    pub fn array_expression(&self) -> String {
        self.array.expression()
    }

    /// Restricción `-t` para reenviar sólo algunos índices.
    pub fn restriction_for(indices: &[u32]) -> String {
        join_indices(indices.iter().copied())
    }

    /// `key=value[,key=value]`, en orden de clave.
    pub fn resources_string(&self) -> String {
        self.resources
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Texto exacto del script. Determinístico: el mismo texto se reenvía en
    /// cada retry, sólo cambia el `-t` que se pasa a `qsub`.
    pub fn render(&self) -> String {
        let mut s = String::new();

        // ---- directivas ----
        line(&mut s, format!("#PBS -S {}", self.shell));
        line(&mut s, format!("#PBS -N {}", self.name));
        s.push_str("#PBS -j oe\n");
        line(&mut s, format!("#PBS -o {}", self.log_path.display()));
        line(&mut s, format!("#PBS -t {}", self.array_expression()));
        if !self.resources.is_empty() {
            line(&mut s, format!("#PBS -l {}", self.resources_string()));
        }
        if self.inherit_environment {
            s.push_str("#PBS -V\n");
        }
        if let Some(q) = &self.queue {
            line(&mut s, format!("#PBS -q {q}"));
        }
        s.push('\n');

        // ---- lista de comandos, indexada por $PBS_ARRAYID - 1 ----
        s.push_str("CMD=(\n");
        for cmd in &self.commands {
            line(&mut s, format!("\"{}\"", cmd.replace('"', "\\\"")));
        }
        s.push_str(")\n");
        s.push_str("ID=$(($PBS_ARRAYID - 1))\n");
        s.push_str("cd $PBS_O_WORKDIR\n");
        s.push_str("echo \"job start: $(date -Iminute)\"\n");
        s.push_str("echo \"$PBS_O_HOST -> $(hostname): $PBS_JOBNAME $PBS_JOBID (cwd: $PWD)\"\n");
        s.push_str("echo \"execute: ${CMD[$ID]}\"\n");
        s.push_str("START_TIME=$(date +%s)\n");
        s.push_str("bash -c \"set -e; set -o pipefail; ${CMD[$ID]}\"\n");
        s.push_str("RET=$?\n");
        s.push_str("echo \"job exit: $RET at: $(date -Iminute)\"\n");
        s.push_str("EXIT_TIME=$(date +%s)\n");

        // ---- entrega del resultado ----
        line(&mut s, format!("for i in {{0..{REPORT_RETRIES}}}; do"));
        line(
            &mut s,
            format!(
                "  {} --endpoint {} --submitter {} --batch-id \"$PBS_JOBID\" --index $PBS_ARRAYID --host \"$HOSTNAME\" --exit-code $RET --start $START_TIME --end $EXIT_TIME",
                self.reporter,
                shell_quote(self.callback.as_deref().unwrap_or("")),
                shell_quote(&self.submitter),
            ),
        );
        s.push_str("  if [ $? -eq 0 ]; then\n");
        s.push_str("    exit $RET\n");
        s.push_str("  fi\n");
        line(&mut s, format!("  sleep {REPORT_RETRY_PAUSE_SECS}"));
        s.push_str("done\n");
        s.push_str("echo GIVEUP\n");
        s.push_str("exit $RET\n");

        s
    }
}

fn line(s: &mut String, text: String) {
    s.push_str(&text);
    s.push('\n');
}

/// Comillas simples para bash: abc'd -> 'abc'"'"'d'
fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> SubmissionUnit {
        SubmissionUnit {
            shell: "/bin/bash".to_string(),
            name: "Demo".to_string(),
            log_path: PathBuf::from("/tmp/log/Demo.log"),
            resources: BTreeMap::new(),
            array: ArraySpec::for_commands(2),
            inherit_environment: false,
            queue: None,
            commands: vec!["wc -l /etc/hosts".to_string(), "echo \"hola\" | bc".to_string()],
            callback: Some("http://submit-host:40123".to_string()),
            submitter: "run-1".to_string(),
            reporter: DEFAULT_REPORTER.to_string(),
        }
    }

    #[test]
    fn render_cabecera_minima() {
        let text = unit().render();
        assert!(text.starts_with(
            "#PBS -S /bin/bash\n#PBS -N Demo\n#PBS -j oe\n#PBS -o /tmp/log/Demo.log\n#PBS -t 1-2\n\nCMD=(\n"
        ));
        assert!(!text.contains("#PBS -l"));
        assert!(!text.contains("#PBS -V"));
        assert!(!text.contains("#PBS -q"));
    }

    #[test]
    fn render_opciones_opcionales() {
        let mut u = unit();
        u.resources.insert("nodes".into(), "1:ppn=4".into());
        u.resources.insert("mem".into(), "15mb".into());
        u.inherit_environment = true;
        u.queue = Some("batch".into());
        u.array = ArraySpec::set([2, 1]).with_slot_limit(Some(1));

        let text = u.render();
        assert!(text.contains("#PBS -t 1,2%1\n#PBS -l mem=15mb,nodes=1:ppn=4\n#PBS -V\n#PBS -q batch\n\n"));
    }

    #[test]
    fn render_escapa_comillas_de_comandos() {
        let text = unit().render();
        assert!(text.contains("CMD=(\n\"wc -l /etc/hosts\"\n\"echo \\\"hola\\\" | bc\"\n)\n"));
    }

    #[test]
    fn render_contrato_del_worker() {
        let text = unit().render();
        assert!(text.contains("ID=$(($PBS_ARRAYID - 1))\ncd $PBS_O_WORKDIR\n"));
        assert!(text.contains("bash -c \"set -e; set -o pipefail; ${CMD[$ID]}\"\nRET=$?\n"));
        assert!(text.contains("for i in {0..10}; do\n"));
        assert!(text.contains(
            "  arrayrun-report --endpoint 'http://submit-host:40123' --submitter 'run-1' --batch-id \"$PBS_JOBID\" --index $PBS_ARRAYID"
        ));
        assert!(text.contains("  sleep 5\ndone\necho GIVEUP\nexit $RET\n"));
    }

    #[test]
    fn render_es_deterministico() {
        let mut u = unit();
        u.resources.insert("walltime".into(), "01:00:00".into());
        u.resources.insert("mem".into(), "1gb".into());
        assert_eq!(u.render(), u.clone().render());
    }

    #[test]
    fn dry_run_sin_callback() {
        let mut u = unit();
        u.callback = None;
        assert!(u.render().contains("--endpoint ''"));
    }

    #[test]
    fn restriccion_de_reenvio() {
        assert_eq!(SubmissionUnit::restriction_for(&[3, 1]), "1,3");
    }

    #[test]
    fn shell_quote_escapa_comilla_simple() {
        assert_eq!(shell_quote("abc'd"), "'abc'\"'\"'d'");
    }
}
