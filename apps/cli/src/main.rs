use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use modelbench_memo::TestMemoCache;
use modelbench_project::{
    ensure_model_extension, normalize_collection_name, CollectionStore, CollectionTree,
    ImportReport, SharedStore, StoreEvent, StoreOptions, WellFormedXml,
};
use modelbench_runexec::{BatchExecutor, BatchHost, BatchSummary, ProcessRunner, RunSpec, TestRecord};
use modelbench_settings::{Settings, SettingsStore};
use parking_lot::Mutex;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "modelbench",
    about = "Manage collections of XML test models and run them in batches",
    author,
    version
)]
struct Cli {
    /// 指定工作區根目錄；預設為目前目錄。 / Workspace root (defaults to current directory).
    #[arg(long, global = true, value_name = "PATH")]
    workspace: Option<PathBuf>,
    /// 顯示除錯紀錄。 / Log debug output to stderr (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 建立工作區與預設收藏。 / Create the workspace and its default collection.
    Init,
    /// 管理收藏。 / Manage collections.
    #[command(subcommand)]
    Collection(CollectionCommand),
    /// 管理測試模型。 / Manage test models.
    #[command(subcommand)]
    Model(ModelCommand),
    /// 從資料夾匯入模型。 / Import the models of a folder as a collection.
    Import(ImportArgs),
    /// 以樹狀顯示工作區。 / Print the workspace tree.
    Tree,
    /// 依序執行測試。 / Run tests in order through the configured interpreter.
    Run(RunArgs),
    /// 檢視或修改設定。 / Show or change settings.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum CollectionCommand {
    /// 新增收藏。 / Add a collection.
    Add { name: String },
    /// 以自動編號新增收藏。 / Add a collection, numbering the name until it is unique.
    Generate { base: String },
    /// 移除收藏與其模型。 / Remove a collection and its models.
    Remove { name: String },
    /// 重新命名收藏。 / Rename a collection.
    Rename { old: String, new: String },
    /// 列出收藏。 / List collections.
    List,
}

#[derive(Subcommand)]
enum ModelCommand {
    /// 新增模型。 / Add a model.
    Add(ModelAddArgs),
    /// 重新命名模型。 / Rename a model.
    Rename { old: String, new: String },
    /// 將模型移至其他收藏。 / Move a model to another collection.
    Move { name: String, collection: String },
    /// 移除模型。 / Remove a model.
    Remove { name: String },
    /// 列出模型。 / List models.
    List {
        /// 僅列出指定收藏。 / Only list this collection.
        #[arg(long)]
        collection: Option<String>,
    },
    /// 顯示模型內容。 / Print a model's XML.
    Show { name: String },
}

#[derive(Args)]
struct ModelAddArgs {
    name: String,
    /// 目標收藏；預設為預設收藏。 / Target collection (defaults to the default collection).
    #[arg(long)]
    collection: Option<String>,
    /// 模型內容來源檔。 / File providing the model XML.
    #[arg(long, value_name = "FILE")]
    from: Option<PathBuf>,
}

#[derive(Args)]
struct ImportArgs {
    #[arg(value_name = "DIR")]
    dir: PathBuf,
    /// 一併匯入子資料夾，每個資料夾成為一個收藏。 / Also import sub-folders, one collection each.
    #[arg(long)]
    recursive: bool,
}

#[derive(Args)]
struct RunArgs {
    /// 要執行的測試；省略時執行全部模型。 / Tests to run; every model when omitted.
    #[arg(value_name = "TEST")]
    tests: Vec<String>,
    /// 執行指定收藏中的所有模型。 / Run every model of this collection.
    #[arg(long, conflicts_with = "tests")]
    collection: Option<String>,
    /// 每個測試後詢問是否繼續。 / Ask before continuing after each test.
    #[arg(long)]
    confirm: bool,
    /// 將摘要另存至檔案。 / Also write the summary to this file.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
    /// 覆寫設定中的直譯器程式。 / Interpreter program overriding the settings.
    #[arg(long, value_name = "PROG")]
    runner: Option<String>,
    /// 直譯器參數（置於 `--` 之後）。 / Interpreter arguments (after `--`).
    #[arg(last = true, value_name = "ARGS")]
    runner_args: Vec<String>,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// 顯示目前設定。 / Print the effective settings as JSON.
    Show,
    /// 設定直譯器指令。 / Configure the interpreter command.
    SetRunner(SetRunnerArgs),
}

#[derive(Args)]
struct SetRunnerArgs {
    program: String,
    #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
    args: Vec<String>,
    /// 單一測試的逾時（毫秒）。 / Per-test timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let Cli {
        workspace,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);
    let workspace_root = resolve_workspace(workspace)?;

    match command {
        Commands::Init => execute_init(&workspace_root),
        Commands::Collection(subcommand) => {
            execute_collection_command(subcommand, &workspace_root)
        }
        Commands::Model(subcommand) => execute_model_command(subcommand, &workspace_root),
        Commands::Import(args) => execute_import(args, &workspace_root),
        Commands::Tree => execute_tree(&workspace_root),
        Commands::Run(args) => execute_run(args, &workspace_root),
        Commands::Config(subcommand) => execute_config_command(subcommand, &workspace_root),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// An opened workspace plus the event feed used to surface swallowed I/O.
struct Workspace {
    store: CollectionStore,
    events: Receiver<StoreEvent>,
    settings: Settings,
}

impl Workspace {
    fn open(root: &Path) -> Result<Self> {
        let settings = SettingsStore::load_for(root)
            .context("load workspace settings")?
            .settings()
            .clone();
        let options = StoreOptions {
            default_collection: settings.workspace.default_collection.clone(),
            marker_file: settings.workspace.marker_file.clone(),
        };
        let mut store = CollectionStore::open(root, options, Arc::new(TestMemoCache::new()))
            .with_context(|| format!("open workspace {}", root.display()))?;
        if !store.is_locked() {
            eprintln!("warning: workspace is not locked; another process may be using it");
        }
        let events = store.subscribe();
        Ok(Self {
            store,
            events,
            settings,
        })
    }

    fn report_persist_failures(&self) {
        report_persist_failures(&self.events);
    }
}

/// Prints every disk mutation that failed since the last call.
fn report_persist_failures(events: &Receiver<StoreEvent>) {
    for event in events.try_iter() {
        if let StoreEvent::PersistFailed { path, message } = event {
            eprintln!("warning: {}: {message}", path.display());
        }
    }
}

fn execute_init(workspace_root: &Path) -> Result<ExitCode> {
    let workspace = Workspace::open(workspace_root)?;
    let settings_path = SettingsStore::path_for(workspace_root);
    if !settings_path.exists() {
        SettingsStore::new(settings_path, workspace.settings.clone())
            .save()
            .context("write default settings")?;
    }
    workspace.report_persist_failures();
    println!(
        "Initialized workspace at {} (default collection '{}')",
        workspace_root.display(),
        workspace.store.options().default_collection
    );
    Ok(ExitCode::SUCCESS)
}

fn execute_collection_command(
    command: CollectionCommand,
    workspace_root: &Path,
) -> Result<ExitCode> {
    let mut workspace = Workspace::open(workspace_root)?;
    let store = &mut workspace.store;
    match command {
        CollectionCommand::Add { name } => {
            store.add_collection(&name, true)?;
            println!("Added collection '{}'", normalize_collection_name(&name));
        }
        CollectionCommand::Generate { base } => {
            let name = store.generate_collection(&base)?;
            println!("Added collection '{name}'");
        }
        CollectionCommand::Remove { name } => {
            store.remove_collection(&name)?;
            println!("Removed collection '{name}'");
        }
        CollectionCommand::Rename { old, new } => {
            store.rename_collection(&old, &new)?;
            println!("Renamed collection '{old}' to '{new}'");
        }
        CollectionCommand::List => {
            for name in store.collections() {
                let count = store.models_in(name)?.len();
                println!("{name} ({count} model{})", if count == 1 { "" } else { "s" });
            }
        }
    }
    workspace.report_persist_failures();
    Ok(ExitCode::SUCCESS)
}

fn execute_model_command(command: ModelCommand, workspace_root: &Path) -> Result<ExitCode> {
    let mut workspace = Workspace::open(workspace_root)?;
    let store = &mut workspace.store;
    match command {
        ModelCommand::Add(args) => {
            let xml = match &args.from {
                Some(path) => fs::read_to_string(path)
                    .with_context(|| format!("read model {}", path.display()))?,
                None => String::new(),
            };
            let collection = args
                .collection
                .unwrap_or_else(|| store.options().default_collection.clone());
            let name = store.put_model_in_collection(&args.name, &xml, &collection)?;
            println!("Added model '{name}' to '{collection}'");
        }
        ModelCommand::Rename { old, new } => {
            let old = ensure_model_extension(&old);
            let name = store.rename_model(&old, &new)?;
            println!("Renamed model '{old}' to '{name}'");
        }
        ModelCommand::Move { name, collection } => {
            let name = ensure_model_extension(&name);
            store.move_model(&name, &collection)?;
            println!("Moved model '{name}' to '{collection}'");
        }
        ModelCommand::Remove { name } => {
            let name = ensure_model_extension(&name);
            store.remove_model(&name)?;
            println!("Removed model '{name}'");
        }
        ModelCommand::List { collection } => {
            let models = match &collection {
                Some(collection) => store.models_in(collection)?,
                None => store.models().collect(),
            };
            for model in models {
                println!("{}/{}", model.collection(), model.name());
            }
        }
        ModelCommand::Show { name } => {
            let name = ensure_model_extension(&name);
            let model = store
                .model(&name)
                .ok_or_else(|| anyhow!("model {name} not found"))?;
            print!("{}", model.content());
            io::stdout().flush().context("flush stdout")?;
        }
    }
    workspace.report_persist_failures();
    Ok(ExitCode::SUCCESS)
}

fn execute_import(args: ImportArgs, workspace_root: &Path) -> Result<ExitCode> {
    let source = resolve_input_path(&args.dir)?;
    if !source.is_dir() {
        bail!("{} is not a directory", source.display());
    }
    let mut workspace = Workspace::open(workspace_root)?;

    let dirs = if args.recursive {
        collect_model_dirs(&source, workspace_root)
    } else {
        vec![source]
    };
    for dir in dirs {
        let report = workspace
            .store
            .import_folder(&dir, &WellFormedXml)
            .with_context(|| format!("import {}", dir.display()))?;
        print_import_report(&report);
    }
    workspace.report_persist_failures();
    Ok(ExitCode::SUCCESS)
}

/// Directories under `source` (itself included) that hold at least one model.
/// The workspace itself is never walked.
fn collect_model_dirs(source: &Path, workspace_root: &Path) -> Vec<PathBuf> {
    WalkDir::new(source)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.path() != workspace_root)
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                eprintln!("warning: {err}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| {
            fs::read_dir(entry.path())
                .map(|mut children| {
                    children.any(|child| {
                        child.is_ok_and(|child| {
                            child.file_name().to_string_lossy().ends_with(".xml")
                        })
                    })
                })
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn print_import_report(report: &ImportReport) {
    println!(
        "Imported {} model(s) into '{}'",
        report.imported.len(),
        report.collection
    );
    for path in &report.rejected {
        println!("  rejected {}", path.display());
    }
}

fn execute_tree(workspace_root: &Path) -> Result<ExitCode> {
    let workspace = Workspace::open(workspace_root)?;
    print!("{}", CollectionTree::from_store(&workspace.store).render());
    Ok(ExitCode::SUCCESS)
}

/// Console side of a batch run.
struct ConsoleHost {
    summary: Mutex<Option<String>>,
}

impl BatchHost for ConsoleHost {
    fn confirm_continue(&self, completed: &TestRecord, remaining: usize) -> bool {
        print!(
            "{} finished; continue with {remaining} remaining test(s)? [y/N] ",
            completed.name
        );
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
            Err(_) => false,
        }
    }

    fn test_finished(&self, record: &TestRecord) {
        let verdict = if record.passed { "PASS" } else { "FAIL" };
        println!("{verdict} {}", record.name);
        if !record.passed && !record.report.trim().is_empty() {
            for line in record.report.lines() {
                println!("    {line}");
            }
        }
    }

    fn report(&self, summary: &BatchSummary) {
        *self.summary.lock() = Some(summary.to_string());
    }

    fn multiple_executions(&self) {
        eprintln!("warning: a test run is already in progress");
    }
}

fn execute_run(args: RunArgs, workspace_root: &Path) -> Result<ExitCode> {
    let workspace = Workspace::open(workspace_root)?;
    let runner = build_runner(&workspace.settings, &args, workspace_root)?;

    let tests: Vec<String> = if let Some(collection) = &args.collection {
        workspace
            .store
            .models_in(collection)?
            .into_iter()
            .map(|model| model.name().to_string())
            .collect()
    } else if args.tests.is_empty() {
        workspace
            .store
            .models()
            .map(|model| model.name().to_string())
            .collect()
    } else {
        args.tests
            .iter()
            .map(|test| ensure_model_extension(test))
            .collect()
    };
    if tests.is_empty() {
        bail!("no tests to run");
    }
    info!(tests = tests.len(), program = %runner.spec().program, "starting test run");

    let Workspace {
        store,
        events,
        settings,
    } = workspace;
    let store: SharedStore = Arc::new(Mutex::new(store));
    let host = Arc::new(ConsoleHost {
        summary: Mutex::new(None),
    });
    let executor = BatchExecutor::new(Arc::clone(&store), Arc::new(runner), host.clone());
    let confirm = args.confirm || settings.batch.confirm_each_step;
    let summary = executor.start(tests, confirm)?.join();

    let text = host
        .summary
        .lock()
        .take()
        .unwrap_or_else(|| summary.to_string());
    println!();
    print!("{text}");
    if let Some(path) = &args.report {
        let path = resolve_input_path(path)?;
        fs::write(&path, &text).with_context(|| format!("write report {}", path.display()))?;
        debug!(path = %path.display(), "summary written");
    }
    report_persist_failures(&events);

    Ok(if summary.failures() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn build_runner(
    settings: &Settings,
    args: &RunArgs,
    workspace_root: &Path,
) -> Result<ProcessRunner> {
    let runner = &settings.runner;
    let (program, program_args) = match &args.runner {
        Some(program) => (program.clone(), args.runner_args.clone()),
        None => {
            let program = runner.program.clone().ok_or_else(|| {
                anyhow!(
                    "no interpreter configured; pass --runner or use `modelbench config set-runner`"
                )
            })?;
            let mut program_args = runner.args.clone();
            program_args.extend(args.runner_args.iter().cloned());
            (program, program_args)
        }
    };

    let mut spec = RunSpec::new(program)
        .with_args(program_args)
        .with_working_dir(workspace_root);
    if let Some(timeout) = runner.timeout_ms {
        spec = spec.with_timeout(Duration::from_millis(timeout));
    }
    Ok(ProcessRunner::new(spec)
        .with_poll_interval(Duration::from_millis(runner.poll_interval_ms)))
}

fn execute_config_command(command: ConfigCommand, workspace_root: &Path) -> Result<ExitCode> {
    let mut store = SettingsStore::load_for(workspace_root).context("load workspace settings")?;
    match command {
        ConfigCommand::Show => {
            let payload = serde_json::to_string_pretty(store.settings())
                .context("serialize settings")?;
            println!("{payload}");
        }
        ConfigCommand::SetRunner(args) => {
            store
                .update(|settings| {
                    settings.runner.program = Some(args.program.clone());
                    settings.runner.args = args.args.clone();
                    settings.runner.timeout_ms = args.timeout_ms;
                })
                .context("save settings")?;
            println!("Interpreter set to '{}'", args.program);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn resolve_workspace(workspace: Option<PathBuf>) -> Result<PathBuf> {
    match workspace {
        Some(path) => resolve_input_path(&path),
        None => std::env::current_dir().context("determine current directory"),
    }
}

fn resolve_input_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}
