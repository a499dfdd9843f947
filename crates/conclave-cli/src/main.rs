use conclave_agent::{CredentialsConfig, Provider, ProviderInvoker, TableCapabilityResolver};
use conclave_orchestrator::{
    synthesizer_profile, AgentDirectory, AgentProfile, FileContextBuilder, InMemoryAgentDirectory,
    JobManager, JobRequest, OrchestratorConfig, ParticipantState,
};
use conclave_store::{FileJobStore, Job, Subject};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "conclave", about = "Conclave: multi-agent debate analysis")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conclave.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a debate job and wait for its report
    Run {
        /// Subject id; pass several to choose between candidates
        #[arg(short, long = "subject", required = true)]
        subjects: Vec<String>,
        /// Participant agent ids, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        agents: Vec<String>,
        #[arg(long, default_value_t = 2)]
        analysis_rounds: u32,
        #[arg(long, default_value_t = 1)]
        debate_rounds: u32,
        /// Display name of the subject
        #[arg(long)]
        name: Option<String>,
        /// Directory with `<subject>.md` context files (overrides config)
        #[arg(long)]
        context_dir: Option<PathBuf>,
    },
    /// List jobs, most recently updated first
    List {
        /// `active` or a status name
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one job
    Show {
        job_id: Uuid,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask a job to stop at its next round boundary
    Cancel {
        job_id: Uuid,
        /// Mark the job canceled now; for jobs whose `run` process has exited
        #[arg(long)]
        force: bool,
    },
    /// Delete a finished job
    Delete { job_id: Uuid },
    /// List configured agents
    Agents,
}

#[derive(Deserialize)]
struct ConclaveConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default = "default_context_dir")]
    context_dir: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default)]
    orchestrator: OrchestratorConfig,
    #[serde(default)]
    credentials: CredentialsConfig,
    /// Extra agents, or overrides of built-in ones by id.
    #[serde(default)]
    agents: Vec<AgentProfile>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_context_dir() -> PathBuf {
    PathBuf::from("./context")
}
fn default_request_timeout_secs() -> u64 {
    120
}

/// Fill missing provider keys from `<PROVIDER>_API_KEY` variables.
fn apply_env_keys(credentials: &mut CredentialsConfig, lookup: impl Fn(&str) -> Option<String>) {
    for provider in Provider::ALL {
        let var = format!("{}_API_KEY", provider.as_str().to_uppercase());
        let Some(key) = lookup(&var).filter(|k| !k.trim().is_empty()) else {
            continue;
        };
        let entry = credentials
            .providers
            .entry(provider.as_str().to_string())
            .or_default();
        if entry.api_key.is_empty() {
            entry.api_key = key;
        }
    }
}

fn build_directory(extra: &[AgentProfile]) -> InMemoryAgentDirectory {
    let directory = InMemoryAgentDirectory::with_defaults();
    for profile in extra {
        directory.upsert(profile.clone());
    }
    directory
}

async fn build_manager(config: &ConclaveConfig, context_dir: PathBuf) -> anyhow::Result<JobManager> {
    let store = Arc::new(FileJobStore::new(config.data_dir.join("jobs")).await?);
    let resolver = Arc::new(TableCapabilityResolver::new(config.credentials.clone()));
    let invoker = Arc::new(ProviderInvoker::new(
        resolver,
        Duration::from_secs(config.request_timeout_secs),
    )?);
    Ok(JobManager::new(
        store,
        Arc::new(build_directory(&config.agents)),
        Arc::new(FileContextBuilder::new(context_dir)),
        invoker,
        synthesizer_profile(),
        config.orchestrator.clone(),
    ))
}

fn print_summary(job: &Job) {
    println!(
        "{}  {:<9} {:>3}%  {}  steps={}  updated={}",
        job.job_id,
        job.status.as_str(),
        job.progress,
        job.subject.name,
        job.steps.len(),
        job.updated_at.to_rfc3339()
    );
}

fn print_stats(states: &[ParticipantState]) {
    println!("\n=== invocations ===");
    for state in states {
        let avg_ms = state
            .metrics
            .duration_ms
            .checked_div(state.metrics.invocations)
            .unwrap_or(0);
        println!(
            "{:<14} calls={:<3} errors={:<3} avg_ms={}",
            state.agent_id, state.metrics.invocations, state.metrics.errors, avg_ms
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config_str = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config file '{}': {}",
            cli.config.display(),
            e
        )
    })?;
    let mut config: ConclaveConfig = toml::from_str(&config_str)?;
    apply_env_keys(&mut config.credentials, |var| std::env::var(var).ok());

    match cli.command {
        Commands::Run {
            subjects,
            agents,
            analysis_rounds,
            debate_rounds,
            name,
            context_dir,
        } => {
            let context_dir = context_dir.unwrap_or_else(|| config.context_dir.clone());
            let manager = build_manager(&config, context_dir).await?;
            let mut subject = match subjects.as_slice() {
                [only] => Subject::single(only.clone()),
                _ => Subject::candidates(subjects.iter().cloned()),
            };
            if let Some(name) = name {
                subject = subject.with_name(name);
            }

            let job_id = manager
                .create_job(JobRequest::new(subject, agents, analysis_rounds, debate_rounds))
                .await?;
            info!(job_id = %job_id, "Waiting for job");
            let job = manager.wait(job_id).await?;
            let stats = manager.monitor().to_json().await;
            info!(job_id = %job_id, stats = %stats, "Invocation stats");
            print_summary(&job);
            if let Some(error) = &job.error {
                println!("\nerror: {error}");
            }
            print_stats(&manager.monitor().snapshot().await);
            if !job.report.is_empty() {
                println!("\n{}", job.report);
            }
        }
        Commands::List { status, limit } => {
            let manager = build_manager(&config, config.context_dir.clone()).await?;
            for job in manager.list_jobs(status.as_deref(), limit).await? {
                print_summary(&job);
            }
        }
        Commands::Show { job_id, json } => {
            let manager = build_manager(&config, config.context_dir.clone()).await?;
            let job = manager.get_job_status(job_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_summary(&job);
                for step in &job.steps {
                    println!(
                        "\n[{} round {}] {}\n{}",
                        step.phase, step.round, step.agent_name, step.content
                    );
                }
                if !job.report.is_empty() {
                    println!("\n=== report ===\n{}", job.report);
                }
            }
        }
        Commands::Cancel { job_id, force } => {
            let manager = build_manager(&config, config.context_dir.clone()).await?;
            let job = if force {
                manager.force_cancel(job_id).await?
            } else {
                manager.request_cancel(job_id).await?
            };
            print_summary(&job);
        }
        Commands::Delete { job_id } => {
            let manager = build_manager(&config, config.context_dir.clone()).await?;
            manager.delete_job(job_id).await?;
            println!("deleted {job_id}");
        }
        Commands::Agents => {
            let directory = build_directory(&config.agents);
            for agent in directory.list() {
                println!(
                    "{:<14} {:<22} kind={:<12} enabled={}",
                    agent.id, agent.name, agent.kind, agent.enabled
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conclave_agent::ProviderCredential;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ConclaveConfig = toml::from_str("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.request_timeout_secs, 120);
        assert_eq!(config.orchestrator.max_workers, 4);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let config: ConclaveConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/conclave"

            [orchestrator]
            max_workers = 8
            transcript_max_chars = 20000

            [credentials]
            default_provider = "deepseek"

            [credentials.providers.deepseek]
            api_key = "ds-key"

            [credentials.roles.synthesizer]
            provider = "openai"
            model = "gpt-4o"

            [[agents]]
            id = "scalper"
            name = "Scalper"
            prompt = "You trade intraday price-volume patterns."
            sort_order = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.max_workers, 8);
        assert_eq!(config.orchestrator.transcript_max_chars, 20_000);
        assert_eq!(config.orchestrator.memory_depth, 2);
        assert_eq!(config.credentials.default_provider, Some(Provider::DeepSeek));
        assert_eq!(config.agents[0].kind, "default");
        assert!(config.agents[0].enabled);
    }

    #[test]
    fn test_env_keys_fill_only_missing() {
        let mut credentials = CredentialsConfig::default();
        credentials.providers.insert(
            "openai".into(),
            ProviderCredential {
                api_key: "from-file".into(),
                base_url: None,
            },
        );
        apply_env_keys(&mut credentials, |var| match var {
            "OPENAI_API_KEY" => Some("from-env".into()),
            "QWEN_API_KEY" => Some("qwen-env".into()),
            "GEMINI_API_KEY" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(credentials.providers["openai"].api_key, "from-file");
        assert_eq!(credentials.providers["qwen"].api_key, "qwen-env");
        assert!(!credentials.providers.contains_key("gemini"));
    }

    #[test]
    fn test_cancel_force_flag_parses() {
        let id = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["conclave", "cancel", &id, "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Cancel { force: true, .. }));
        let cli = Cli::try_parse_from(["conclave", "cancel", &id]).unwrap();
        assert!(matches!(cli.command, Commands::Cancel { force: false, .. }));
    }

    #[test]
    fn test_config_agents_override_defaults() {
        let custom = AgentProfile::new("technical", "Chartist", "Read the chart.");
        let directory = build_directory(&[custom, AgentProfile::new("scalper", "Scalper", "p")]);
        assert_eq!(directory.get("technical").unwrap().name, "Chartist");
        assert!(directory.get("scalper").is_some());
        assert_eq!(directory.list().len(), 8);
    }
}
