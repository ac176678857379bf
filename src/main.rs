use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use relay_config::{ChainDef, ClientConfig};
use relay_request::{ApiRequest, CallsFactory, ExecutionQueue, Operation, TracingObserver};
use relay_transport::{HttpMethod, HttpTransport, Transport};

/// Relay - run chained HTTP requests where later calls use earlier responses
#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Execute a chain against an API
  Run {
    /// Path to the chain definition (JSON)
    chain_file: PathBuf,

    /// Path to the client configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL, overriding the one in --config
    #[arg(long)]
    base_url: Option<String>,
  },

  /// Check a chain definition without running it
  Validate {
    /// Path to the chain definition (JSON)
    chain_file: PathBuf,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  match cli.command {
    Some(Commands::Run {
      chain_file,
      config,
      base_url,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run_chain(chain_file, config, base_url).await })?;
    }
    Some(Commands::Validate { chain_file }) => {
      let rt = tokio::runtime::Runtime::new()?;
      let chain = rt.block_on(async { load_chain(&chain_file).await })?;
      eprintln!(
        "Chain '{}' is valid ({} steps)",
        chain.name,
        chain.steps.len()
      );
    }
    None => {
      println!("relay - use --help to see available commands");
    }
  }

  Ok(())
}

async fn load_chain(chain_file: &Path) -> Result<ChainDef> {
  let content = tokio::fs::read_to_string(chain_file)
    .await
    .with_context(|| format!("failed to read chain file: {}", chain_file.display()))?;

  let chain = ChainDef::from_json(&content)
    .with_context(|| format!("failed to parse chain file: {}", chain_file.display()))?;
  chain
    .validate()
    .with_context(|| format!("invalid chain: {}", chain.name))?;

  Ok(chain)
}

async fn load_config(config_file: Option<PathBuf>, base_url: Option<String>) -> Result<ClientConfig> {
  let mut config = match config_file {
    Some(path) => {
      let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
      ClientConfig::from_json(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?
    }
    None => match &base_url {
      Some(url) => ClientConfig::new(url.clone()),
      None => bail!("either --config or --base-url is required"),
    },
  };

  if let Some(url) = base_url {
    config.base_url = url;
  }
  Ok(config)
}

async fn run_chain(
  chain_file: PathBuf,
  config_file: Option<PathBuf>,
  base_url: Option<String>,
) -> Result<()> {
  let def = load_chain(&chain_file).await?;
  let config = load_config(config_file, base_url).await?;

  eprintln!("Loaded chain: {} ({} steps)", def.name, def.steps.len());

  let transport: Arc<dyn Transport> =
    Arc::new(HttpTransport::from_config(&config).context("failed to create HTTP transport")?);
  let factory = CallsFactory::from_config(transport, &config);

  let steps = build_steps(&def, &factory)?;
  let mut chain = ApiRequest::from_iter(steps.iter().map(|(_, op)| op.clone()));
  if let Some(kind) = &def.kind {
    chain = chain.with_kind(kind.clone());
  }
  let chain = chain.with_activity_observer(Arc::new(TracingObserver::new(&def.name)));

  let queue = ExecutionQueue::from_client_config(&config);
  chain
    .add_to_execution_queue(&queue, true)
    .context("failed to submit chain")?;

  tokio::select! {
    _ = chain.wait() => {}
    _ = tokio::signal::ctrl_c() => {
      warn!(chain = %def.name, "interrupted, cancelling chain");
      chain.cancel();
      chain.wait().await;
    }
  }

  // Print each step's decoded result as JSON
  let output: serde_json::Map<String, Value> = steps
    .iter()
    .map(|(step_id, op)| {
      let value = op.result::<Value>().map(|v| (*v).clone()).unwrap_or(Value::Null);
      (step_id.clone(), value)
    })
    .collect();
  println!("{}", serde_json::to_string_pretty(&output)?);

  let errors = chain.errors();
  if !errors.is_empty() {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    bail!(
      "chain '{}' finished with {} error(s): {}",
      def.name,
      errors.len(),
      messages.join("; ")
    );
  }

  Ok(())
}

/// Turn step definitions into operations, wiring result references into
/// deferred inputs.
fn build_steps(def: &ChainDef, factory: &CallsFactory) -> Result<Vec<(String, Operation)>> {
  let mut steps: Vec<(String, Operation)> = Vec::with_capacity(def.steps.len());

  for step in &def.steps {
    let method: HttpMethod = step
      .method
      .parse()
      .with_context(|| format!("step '{}'", step.step_id))?;

    let mut builder = factory
      .operation(method, step.path.clone())
      .encoding(step.encoding.into())
      .parameters(step.parameters.clone())
      .headers(step.headers.clone())
      .label(step.step_id.clone());

    for (key, reference) in &step.deferred_parameters {
      let source = find_step(&steps, &reference.step)?;
      let pointer = reference.pointer.clone();
      builder = builder.deferred_parameter(
        key.clone(),
        source.deferred(move |v: &Value| v.pointer(&pointer).cloned()),
      );
    }

    for (key, reference) in &step.deferred_headers {
      let source = find_step(&steps, &reference.step)?;
      let pointer = reference.pointer.clone();
      builder = builder.deferred_header(
        key.clone(),
        source.deferred(move |v: &Value| v.pointer(&pointer).map(header_value)),
      );
    }

    let operation = builder
      .build()
      .with_context(|| format!("failed to build step '{}'", step.step_id))?;
    steps.push((step.step_id.clone(), operation));
  }

  Ok(steps)
}

fn find_step<'a>(steps: &'a [(String, Operation)], step_id: &str) -> Result<&'a Operation> {
  steps
    .iter()
    .find(|(id, _)| id == step_id)
    .map(|(_, op)| op)
    .with_context(|| format!("unknown step reference: {step_id}"))
}

fn header_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
