use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use vigil::{initialize, RiskBandPlanner, RootError, RootResult, VigilConfig};
use vigil_audit::AuditError;
use vigil_core::{
    Event, EvidenceSource, PartitionKey, SourceScore, SubjectId, Timestamp, VigilResult,
};

/// Vigil: governed decision orchestration for fraud/trust signals.
///
/// Aggregates independent risk signals, gates autonomous authority behind
/// a confidence check, enforces safety policy, and commits every decision
/// to a tamper-evident audit trail.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate one event (JSON file) through the full pipeline
    Evaluate {
        /// Path to the event JSON document
        event: PathBuf,

        /// Evidence source scores as name=value pairs, e.g. detection=0.92.
        /// Stands in for live scoring endpoints.
        #[arg(long = "score", value_name = "NAME=VALUE")]
        scores: Vec<String>,
    },

    /// Show recent audit entries for a subject
    Audit {
        /// Subject id to look up
        subject: String,

        /// Maximum number of entries to display
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Verify the hash chain of one audit partition
    Verify {
        /// Partition date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
    },

    /// Rebuild missing fast-index rows from the immutable log
    Reconcile {
        /// Partition date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("vigil=debug,vigil_signal=debug,vigil_policy=debug,vigil_audit=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> RootResult<VigilConfig> {
    match path {
        Some(p) => VigilConfig::load(p),
        None => VigilConfig::load(&VigilConfig::default_config_path()),
    }
}

/// Command-line stand-in for one scoring collaborator: always reports the
/// score given on the command line.
struct StaticSource {
    name: String,
    score: f64,
}

impl EvidenceSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, _event: &Event) -> VigilResult<SourceScore> {
        let mut evidence = BTreeMap::new();
        evidence.insert("provided_by".to_string(), "cli".to_string());
        Ok(SourceScore {
            score: self.score,
            evidence,
        })
    }
}

fn parse_sources(flags: &[String]) -> RootResult<Vec<Arc<dyn EvidenceSource>>> {
    flags
        .iter()
        .map(|flag| {
            let (name, value) = flag.split_once('=').ok_or_else(|| {
                RootError::Config(format!("--score '{}' is not of the form name=value", flag))
            })?;
            let score: f64 = value.parse().map_err(|_| {
                RootError::Config(format!("--score '{}' has a non-numeric value", flag))
            })?;
            Ok(Arc::new(StaticSource {
                name: name.to_string(),
                score,
            }) as Arc<dyn EvidenceSource>)
        })
        .collect()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> RootResult<()> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Evaluate { event, scores } => cmd_evaluate(config, &event, &scores).await,
        Commands::Audit { subject, limit } => cmd_audit(config, &subject, limit),
        Commands::Verify { date } => cmd_verify(config, date),
        Commands::Reconcile { date } => cmd_reconcile(config, date),
    }
}

async fn cmd_evaluate(config: VigilConfig, event_path: &PathBuf, scores: &[String]) -> RootResult<()> {
    let sources = parse_sources(scores)?;
    let runtime = initialize(config, sources, Arc::new(RiskBandPlanner::default()))?;

    let event_json = std::fs::read_to_string(event_path).map_err(RootError::Io)?;
    let event: Event = serde_json::from_str(&event_json)?;

    let outcome = runtime.pipeline.evaluate(&event).await?;

    println!("Decision for event {}:", event.event_id);
    println!("  Action:      {}", outcome.decision.action);
    println!("  Decided by:  {}", outcome.decision.decided_by);
    println!("  Authority:   {}", outcome.verdict.authority);
    println!(
        "  Confidence:  {:.2} ({})",
        outcome.verdict.confidence, outcome.verdict.reason
    );
    println!("  Policy:      {}", outcome.decision.policy_version);
    println!("  Audit entry: {}", outcome.entry.entry_id);
    if let Some(rationale) = &outcome.rationale {
        println!("  Rationale:   {}", rationale);
    }
    if let Some(escalation_id) = &outcome.escalation_id {
        println!("  Escalation:  {}", escalation_id);
    }
    if !outcome.enforcement.violations.is_empty() {
        println!("  Policy violations:");
        for violation in &outcome.enforcement.violations {
            println!("    - [{}] {}", violation.kind, violation.message);
        }
    }

    Ok(())
}

fn cmd_audit(config: VigilConfig, subject: &str, limit: usize) -> RootResult<()> {
    let runtime = initialize(config, Vec::new(), Arc::new(RiskBandPlanner::default()))?;

    let entries = runtime
        .trail
        .entries_for_subject(&SubjectId::new(subject), limit)?;

    println!("Audit entries for subject {} ({}):", subject, entries.len());
    if entries.is_empty() {
        println!("  (no entries)");
    }
    for entry in entries {
        let line = entry.to_jsonl()?;
        println!("  {}", line);
    }

    Ok(())
}

fn cmd_verify(config: VigilConfig, date: Option<String>) -> RootResult<()> {
    let environment = config.environment.clone();
    let runtime = initialize(config, Vec::new(), Arc::new(RiskBandPlanner::default()))?;
    let date = date.unwrap_or_else(|| Timestamp::now().utc_date());
    let partition = PartitionKey::new(environment, date);

    let report = runtime.trail.verify_chain(&partition)?;
    if report.is_intact() {
        println!(
            "Partition {} intact: {} entries verified.",
            partition, report.entries
        );
        return Ok(());
    }

    println!(
        "Partition {} FAILED verification ({} findings):",
        partition,
        report.findings.len()
    );
    for finding in &report.findings {
        println!("  line {}: {}", finding.line, finding.detail);
    }
    println!("Partition is quarantined; appends are rejected until cleared.");

    Err(RootError::Audit(AuditError::ChainIntegrity {
        partition: partition.to_string(),
        detail: format!("{} tamper findings", report.findings.len()),
    }))
}

fn cmd_reconcile(config: VigilConfig, date: Option<String>) -> RootResult<()> {
    let environment = config.environment.clone();
    let runtime = initialize(config, Vec::new(), Arc::new(RiskBandPlanner::default()))?;
    let date = date.unwrap_or_else(|| Timestamp::now().utc_date());
    let partition = PartitionKey::new(environment, date);

    let rebuilt = runtime.trail.reconcile(&partition)?;
    println!(
        "Partition {}: {} index rows rebuilt from the log.",
        partition, rebuilt
    );
    Ok(())
}
