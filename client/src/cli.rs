use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use common::{ArraySpec, JobSpec, TaskResults};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "arrayrun")]
#[command(about = "Ejecuta N comandos como job array en PBS/Torque y espera los resultados")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Envía el job y espera a que terminen todas las tareas
    Run(JobArgs),
    /// Sólo imprime el script que se enviaría (dry run)
    Render(JobArgs),
}

#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Nombre del job (#PBS -N)
    #[arg(long)]
    pub name: String,

    /// Comando a ejecutar; se puede repetir
    #[arg(long = "command", value_name = "CMD")]
    pub commands: Vec<String>,

    /// Archivo con un comando por línea (líneas vacías y `#` se ignoran)
    #[arg(long)]
    pub commands_file: Option<PathBuf>,

    /// Plantilla con `{}`, se expande una vez por cada --input
    #[arg(long, requires = "inputs")]
    pub template: Option<String>,

    #[arg(long = "input", value_name = "VALOR")]
    pub inputs: Vec<String>,

    /// Log combinado stdout/stderr (#PBS -o)
    #[arg(long)]
    pub log: Option<PathBuf>,

    #[arg(long)]
    pub shell: Option<String>,

    /// Recurso `clave=valor` (#PBS -l); se puede repetir
    #[arg(long = "resource", value_name = "K=V", value_parser = parse_resource)]
    pub resources: Vec<(String, String)>,

    /// Índices del array: `2-4` o `1,3`
    #[arg(long)]
    pub array: Option<ArraySpec>,

    #[arg(long)]
    pub slot_limit: Option<u32>,

    /// Hereda el entorno del submitter (#PBS -V)
    #[arg(short = 'V', long)]
    pub inherit_environment: bool,

    #[arg(long)]
    pub queue: Option<String>,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub max_retry: i32,

    /// No terminar el proceso con error si alguna tarea falla
    #[arg(long)]
    pub continue_on_error: bool,

    /// Sólo imprime el script, igual que `render`
    #[arg(long)]
    pub dry_run: bool,

    /// Reporte de fallas en JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_resource(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() && !v.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("se esperaba clave=valor, llegó {s:?}")),
    }
}

/// Comandos de todas las fuentes, en orden: --command, --commands-file, --template.
pub fn collect_commands(args: &JobArgs) -> Result<Vec<String>> {
    let mut commands = args.commands.clone();

    if let Some(path) = &args.commands_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("no se pudo leer {}", path.display()))?;
        commands.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }

    if let Some(template) = &args.template {
        if !template.contains("{}") {
            bail!("la plantilla no tiene `{{}}`: {template}");
        }
        commands.extend(args.inputs.iter().map(|i| template.replace("{}", i)));
    }

    Ok(commands)
}

pub fn build_job(args: &JobArgs, dry_run: bool) -> Result<JobSpec> {
    let commands = collect_commands(args)?;

    let mut job = JobSpec::new(args.name.clone())
        .commands(commands.clone())
        .max_retry(args.max_retry);

    if let Some(log) = &args.log {
        job = job.log(log.clone());
    }
    if let Some(shell) = &args.shell {
        job = job.shell(shell.clone());
    }
    for (k, v) in &args.resources {
        job = job.resource(k.clone(), v.clone());
    }
    if let Some(array) = &args.array {
        job = job.array_request(array.clone());
    }
    if let Some(limit) = args.slot_limit {
        job = job.slot_limit(limit);
    }
    if args.inherit_environment {
        job = job.inherit_environment();
    }
    if let Some(q) = &args.queue {
        job = job.queue(q.clone());
    }
    if args.continue_on_error {
        job = job.continue_on_error();
    }
    if dry_run || args.dry_run {
        job = job.dry_run();
    }

    let as_json = args.json;
    job = job.on_fail(move |results| report_failures(&commands, results, as_json));

    Ok(job)
}

/// Muestra qué comando falló en cada índice.
fn report_failures(commands: &[String], results: &TaskResults, as_json: bool) {
    let failed = results.iter().filter(|(_, code)| *code != 0);
    let command_for = |index: u32| {
        (index as usize)
            .checked_sub(1)
            .and_then(|pos| commands.get(pos))
            .map(String::as_str)
            .unwrap_or("?")
    };

    if as_json {
        let items: Vec<_> = failed
            .map(|(index, code)| json!({"index": index, "exit_code": code, "command": command_for(*index)}))
            .collect();
        println!("{}", serde_json::Value::Array(items));
        return;
    }

    for (index, code) in failed {
        eprintln!("[{}] => {}  {}", index, code, command_for(*index));
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let (args, dry_run) = match &cli.command {
        Commands::Run(args) => (args, false),
        Commands::Render(args) => (args, true),
    };

    let job = build_job(args, dry_run)?;
    debug!("{} comandos, array {}", job.commands.len(), job.array().expression());
    master::submit(job).await?;
    Ok(())
}
