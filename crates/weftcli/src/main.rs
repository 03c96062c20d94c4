mod echo;

use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use weftcore::{
    ConditionCase, ExecutionEvent, GraphDefinition, IggyEventSink, IggySinkConfig, ImportedWorkflow,
    LlmConfig, Value, VariableBinding, VertexSpec, VertexStatus, WorkflowDocument,
};
use weftruntime::{ExecuteOptions, ExecutionResult, RuntimeConfig, ToolRegistry, WeftRuntime};

use echo::EchoModel;

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Weft graph engine CLI", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to a workflow document or graph definition (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Environment variable, repeatable (KEY=VALUE)
        #[arg(short, long = "env")]
        env: Vec<String>,

        /// Stream model output as it is produced
        #[arg(short, long)]
        stream: bool,

        /// Forward execution events to an Iggy server
        #[arg(long, value_name = "CONNECTION_STRING")]
        iggy: Option<String>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to a workflow document or graph definition
        file: PathBuf,
    },

    /// List available tools
    Tools,

    /// Create a new example workflow
    Init {
        /// Output file path (.json or .yaml)
        #[arg(short, long, default_value = "workflow.yaml")]
        output: PathBuf,
    },
}

/// A loaded workflow and the variable scopes it ships with
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            env,
            stream,
            iggy,
        } => run_workflow(&file, input, env, stream, iggy).await,
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Tools => {
            list_tools();
            Ok(())
        }
        Commands::Init { output } => create_example_workflow(&output),
    }
}

fn tool_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    wefttools::register_all(&mut registry);
    Arc::new(registry)
}

fn create_runtime() -> WeftRuntime {
    WeftRuntime::with_registry(Arc::new(EchoModel), tool_registry(), RuntimeConfig::default())
}

/// Native graph definitions carry `vertices`; anything else is read as a
/// workflow document.
fn load_workflow(file: &Path) -> Result<ImportedWorkflow> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let raw: serde_json::Value = if text.trim_start().starts_with('{') {
        serde_json::from_str(&text)?
    } else {
        serde_yaml::from_str(&text)?
    };

    if raw.get("vertices").is_some() {
        return Ok(ImportedWorkflow {
            definition: serde_json::from_value(raw)?,
            environment: HashMap::new(),
            conversation: HashMap::new(),
        });
    }
    Ok(WorkflowDocument::from_value(raw)?.into_definition()?)
}

fn parse_inputs(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input)? {
        serde_json::Value::Object(obj) => Ok(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        _ => Err(anyhow!("Input must be a JSON object")),
    }
}

fn parse_env(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow!("Environment variable '{}' must look like KEY=VALUE", pair))
        })
        .collect()
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    env: Vec<String>,
    stream: bool,
    iggy: Option<String>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let loaded = load_workflow(file)?;

    println!("📋 Workflow: {}", loaded.definition.name);
    println!("   Vertices: {}", loaded.definition.vertices.len());
    println!("   Edges: {}", loaded.definition.edges.len());
    println!();

    let inputs = parse_inputs(input)?;
    let mut options = ExecuteOptions::from(&loaded).streaming(stream);
    for (key, value) in parse_env(&env)? {
        options = options.with_env(key, value);
    }

    let runtime = create_runtime();

    let forwarder = match iggy {
        Some(connection_string) => {
            let sink = IggyEventSink::connect(IggySinkConfig {
                connection_string,
                ..Default::default()
            })
            .await?;
            let events = runtime.subscribe_events();
            Some(tokio::spawn(async move { sink.forward(events).await }))
        }
        None => None,
    };

    let result = if stream {
        let mut execution = runtime.execute_stream(&loaded.definition, inputs, options)?;
        while let Some(event) = execution.next().await {
            print_event(&event);
        }
        execution.result().await?
    } else {
        // Subscribe to events for real-time output
        let mut events = runtime.subscribe_events();
        let event_task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                print_event(&event);
            }
        });

        let result = runtime.execute(&loaded.definition, inputs, options).await;

        // Wait for events to finish printing
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        event_task.abort();
        result?
    };

    if let Some(forwarder) = forwarder {
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
        forwarder.abort();
    }

    print_summary(&result);
    match result.outcome {
        weftcore::ExecutionOutcome::Completed => Ok(()),
        weftcore::ExecutionOutcome::Cancelled => Err(anyhow!("workflow was cancelled")),
        weftcore::ExecutionOutcome::Failed { reason } => Err(anyhow!("workflow failed: {}", reason)),
    }
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStarted { graph_id, .. } => {
            println!("▶️  Workflow {} started", graph_id);
        }
        ExecutionEvent::StatusChange { vertex_id, status, .. } => match status {
            VertexStatus::Running => println!("  ⚡ {} running", vertex_id),
            VertexStatus::Completed => println!("  ✅ {} completed", vertex_id),
            VertexStatus::Skipped => println!("  ⏭️  {} skipped", vertex_id),
            VertexStatus::Failed { reason } => println!("  ❌ {} failed: {}", vertex_id, reason),
            VertexStatus::Cancelled => println!("  🛑 {} cancelled", vertex_id),
            VertexStatus::Pending => {}
        },
        ExecutionEvent::ContentChunk { text, .. } => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        ExecutionEvent::ToolCall {
            vertex_id,
            name,
            is_error,
            ..
        } => {
            let mark = if *is_error { "⚠️ " } else { "🔧" };
            println!("\n     {} [{}] {}", mark, vertex_id, name);
        }
        ExecutionEvent::Error { vertex_id, message, .. } => {
            println!("     ⚠️  [{}] {}", vertex_id, message);
        }
        ExecutionEvent::WorkflowFinished { outcome, duration_ms, .. } => {
            if outcome.is_success() {
                println!("\n✨ Workflow completed successfully in {}ms", duration_ms);
            } else {
                println!("\n💥 Workflow ended after {}ms: {:?}", duration_ms, outcome);
            }
        }
    }
}

fn print_summary(result: &ExecutionResult) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    let completed = result
        .vertices
        .values()
        .filter(|r| r.status == VertexStatus::Completed)
        .count();
    println!("   Completed: {}/{} vertices", completed, result.vertices.len());

    if !result.outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (key, value) in &result.outputs {
            println!("   {}: {}", key, value.to_json());
        }
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let loaded = load_workflow(file)?;
    let graph = create_runtime().build(&loaded.definition)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", loaded.definition.name);
    println!("   Vertices: {}", loaded.definition.vertices.len());
    println!("   Edges: {}", loaded.definition.edges.len());
    println!("   Order: {}", graph.topological_order().join(" → "));

    Ok(())
}

fn list_tools() {
    println!("📦 Available Tools:");
    println!();

    let registry = tool_registry();
    for name in registry.list_tools() {
        if let Some(tool) = registry.get(&name) {
            println!("  • {}", name);
            println!("    {}", tool.description());
        }
    }
}

fn example_workflow() -> GraphDefinition {
    let mut def = GraphDefinition::new("Example Q&A Workflow");
    def.description = Some("Answers Rust questions with a model, everything else with a canned reply".to_string());

    def.add_vertex(VertexSpec::source("start", &["question"]).with_position(0.0, 100.0));
    def.add_vertex(
        VertexSpec::condition(
            "route",
            vec![ConditionCase::expression("rust", "{{#start.question#}} contains 'rust'")],
        )
        .with_position(200.0, 100.0),
    );
    def.add_vertex(
        VertexSpec::llm(
            "assistant",
            LlmConfig::new("echo", "echo-1")
                .system("You answer questions about {{#env.topic#}}.")
                .user("{{#start.question#}}")
                .with_tools(&["json.parse", "debug.echo"])
                .max_rounds(4),
        )
        .with_position(400.0, 0.0),
    );
    def.add_vertex(
        VertexSpec::sink(
            "answer",
            vec![VariableBinding::selector("answer", &["assistant", "text"])],
        )
        .with_position(600.0, 0.0),
    );
    def.add_vertex(VertexSpec::answer("fallback", "I only know about Rust.").with_position(400.0, 200.0));

    def.connect("start", "route");
    def.connect_branch("route", "rust", "assistant");
    def.connect_branch("route", weftcore::ELSE_BRANCH, "fallback");
    def.connect("assistant", "answer");
    def
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let definition = example_workflow();
    let environment = HashMap::from([("topic".to_string(), Value::from("Rust"))]);
    let document = WorkflowDocument::from_definition(&definition, &environment, &HashMap::new())?;

    let text = match output.extension().and_then(|e| e.to_str()) {
        Some("json") => document.to_json()?,
        _ => document.to_yaml()?,
    };
    std::fs::write(output, text)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  weft run --file {} --input '{{\"question\": \"what is rust ownership?\"}}'",
        output.display()
    );

    Ok(())
}
