use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use smithers::cli::{Args, Commands, ConfigDiscovery, RunConfig};
use smithers::engine::{execute_plan, EngineError, ExecuteOptions, HumanPromptFn};
use smithers::env;
use smithers::loader::{LoaderError, LoaderRegistry};
use smithers::render::{render, RenderScope, StateHandle};
use smithers::tree::{serialize, NodeId, NodeKind, Tree};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_LOADER_FAILURE: i32 = 2;
const EXIT_USER_ABORT: i32 = 130;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smithers=info")),
        )
        .with_ansi(!env::no_color())
        .init();

    let args = Args::parse();
    let code = match args.command {
        Commands::Run {
            file,
            yes,
            dry_run,
            verbose,
            tui,
            mock,
            max_frames,
            timeout,
            model,
            max_tokens,
            json,
            config,
        } => {
            if dry_run {
                run_plan(&file, json).await
            } else {
                run_workflow(RunParams {
                    file,
                    yes,
                    verbose,
                    tui,
                    mock,
                    max_frames,
                    timeout,
                    model,
                    max_tokens,
                    json,
                    config,
                })
                .await
            }
        }
        Commands::Plan { file, json, .. } => run_plan(&file, json).await,
        Commands::Init { template, output } => run_init(&template, output),
    };
    std::process::exit(code);
}

struct RunParams {
    file: PathBuf,
    yes: bool,
    verbose: bool,
    tui: bool,
    mock: bool,
    max_frames: Option<u32>,
    timeout: Option<u64>,
    model: Option<String>,
    max_tokens: Option<u64>,
    json: bool,
    config: Option<PathBuf>,
}

async fn run_workflow(params: RunParams) -> i32 {
    let config = match load_config(params.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            error!("{message}");
            return EXIT_RUNTIME_FAILURE;
        }
    };

    let registry = LoaderRegistry::new();
    let element = match registry.load_agent_file(&params.file) {
        Ok(element) => element,
        Err(err) => {
            error!("failed to load {}: {err}", params.file.display());
            return EXIT_LOADER_FAILURE;
        }
    };

    if params.tui {
        warn!("no TUI front-end is attached to this build; running headless");
    }

    let mut options = ExecuteOptions {
        max_frames: params.max_frames.unwrap_or(config.max_frames),
        timeout: params
            .timeout
            .or(config.timeout_ms)
            .map(Duration::from_millis),
        verbose: params.verbose || config.verbose,
        mock_mode: (params.mock || config.mock).then_some(true),
        default_model: params.model.or(config.model),
        default_max_tokens: params.max_tokens.or(config.max_tokens),
        ..Default::default()
    };
    if !params.yes {
        let prompt: HumanPromptFn = Arc::new(|message, body| {
            Box::pin(async move {
                tokio::task::spawn_blocking(move || prompt_on_stdin(&message, &body))
                    .await
                    .unwrap_or(false)
            })
        });
        options.on_human_prompt = Some(prompt);
    }

    info!("executing {}", params.file.display());
    match execute_plan(element, options).await {
        Ok(result) => {
            if params.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(err) => {
                        error!("failed to encode result: {err}");
                        return EXIT_RUNTIME_FAILURE;
                    }
                }
            } else {
                println!(
                    "completed in {} frame(s) over {:.2}s",
                    result.frames,
                    result.total_duration.as_secs_f64()
                );
                if let Some(output) = &result.output {
                    match output.as_str() {
                        Some(text) => println!("{text}"),
                        None => println!("{output}"),
                    }
                }
            }
            EXIT_SUCCESS
        }
        Err(EngineError::Aborted(reason)) => {
            error!("aborted: {reason}");
            EXIT_USER_ABORT
        }
        Err(err) => {
            error!("run failed: {err}");
            EXIT_RUNTIME_FAILURE
        }
    }
}

async fn run_plan(file: &Path, as_json: bool) -> i32 {
    let registry = LoaderRegistry::new();
    let element = match registry.load_agent_file(file) {
        Ok(element) => element,
        Err(err) => {
            report_loader_error(file, &err);
            return EXIT_LOADER_FAILURE;
        }
    };

    let mut tree = Tree::new();
    let scope = RenderScope {
        frame: 0,
        state: StateHandle::new().snapshot(),
    };
    render(&mut tree, &element, &scope);

    if as_json {
        let projected = plan_json(&tree, tree.root());
        match serde_json::to_string_pretty(&projected) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => {
                error!("failed to encode plan: {err}");
                return EXIT_RUNTIME_FAILURE;
            }
        }
    } else {
        println!("{}", serialize(&tree, tree.root()));
    }
    EXIT_SUCCESS
}

fn run_init(template: &str, output: Option<PathBuf>) -> i32 {
    let content = match template {
        "hello" => HELLO_TEMPLATE,
        "review" => REVIEW_TEMPLATE,
        other => {
            error!("unknown template '{other}'; available: hello, review");
            return EXIT_RUNTIME_FAILURE;
        }
    };
    let target = output.unwrap_or_else(|| PathBuf::from(format!("{template}.json")));
    if target.exists() {
        error!("{} already exists, refusing to overwrite", target.display());
        return EXIT_RUNTIME_FAILURE;
    }
    if let Err(err) = std::fs::write(&target, content) {
        error!("failed to write {}: {err}", target.display());
        return EXIT_RUNTIME_FAILURE;
    }
    println!("wrote {}", target.display());
    println!("run it with: smithers run {} --mock", target.display());
    EXIT_SUCCESS
}

fn load_config(path_override: Option<&Path>) -> Result<RunConfig, String> {
    match path_override {
        Some(path) => RunConfig::from_toml_file(path)
            .map_err(|err| format!("failed to load config {}: {err}", path.display())),
        None => {
            ConfigDiscovery::discover_config().map_err(|err| format!("config discovery failed: {err}"))
        }
    }
}

fn report_loader_error(file: &Path, err: &LoaderError) {
    error!("failed to load {}: {err}", file.display());
    if let LoaderError::Syntax {
        frame: Some(frame), ..
    } = err
    {
        eprintln!("{frame}");
    }
}

fn prompt_on_stdin(message: &str, body: &str) -> bool {
    if !body.trim().is_empty() {
        eprintln!("{body}");
    }
    eprint!("{message} [y/N] ");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// JSON projection of the rendered node graph for `plan --json`.
fn plan_json(tree: &Tree, node: NodeId) -> serde_json::Value {
    let record = tree.get(node);
    if record.kind == NodeKind::Text {
        return serde_json::json!(record.text_value().unwrap_or_default());
    }
    let mut props = serde_json::Map::new();
    for (key, value) in record.props.public_iter() {
        props.insert(key.to_string(), value.to_json());
    }
    let children: Vec<serde_json::Value> = record
        .children
        .iter()
        .map(|&child| plan_json(tree, child))
        .collect();
    serde_json::json!({
        "type": record.kind.tag(),
        "props": props,
        "children": children,
    })
}

const HELLO_TEMPLATE: &str = r#"{
  "type": "claude",
  "props": { "model": "claude-sonnet-4-5-20250929" },
  "children": ["Say hello and introduce yourself in one sentence."]
}
"#;

const REVIEW_TEMPLATE: &str = r#"[
  {
    "type": "human",
    "props": { "message": "Start the review?" },
    "children": ["A reviewer agent will read the working tree."]
  },
  {
    "type": "claude",
    "props": {
      "model": "claude-sonnet-4-5-20250929",
      "allowedTools": "Read,Glob,Grep"
    },
    "children": [
      {
        "type": "persona",
        "props": { "role": "senior-engineer" },
        "children": ["Expert reviewer. Terse, specific findings only."]
      },
      "Review the code in the current directory and list the three most important issues."
    ]
  }
]
"#;
