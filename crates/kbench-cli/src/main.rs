//! kbench - evaluation harness for machine-generated GPU kernels
//!
//! ## Commands
//!
//! - `check`: evaluate one candidate, time both baselines, print speedups
//! - `batch`: evaluate a directory of candidates through the process pool
//! - `extract`: print the code block from a model response

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::io::BufReader;
use tracing::{info, warn, Level};

use kbench_core::protocol::{serve, DEVICE_ENV};
use kbench_core::toolchain::script::parser::Program;
use kbench_core::toolchain::script::{compile_source, ScriptUnit};
use kbench_core::{
    parse_arch_list, render_summary, run_and_check, serve_eval_request, CommandToolchainConfig,
    DeviceId, EvaluationResult, HarnessConfig, OptimizeMode, ProcessPool, ToolchainConfig,
    METRICS,
};
use kbench_source::{
    dataset_root, extract_code_blocks, extract_first_code, extract_last_code, read_source,
    ProblemSource, DATASET_ENV,
};

#[derive(Parser)]
#[command(name = "kbench")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate generated GPU kernels against reference programs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one candidate and report speedup over both baselines
    Check {
        #[command(flatten)]
        reference: ReferenceArgs,

        /// Candidate kernel source
        #[arg(long)]
        kernel: PathBuf,

        #[command(flatten)]
        eval: EvalArgs,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate every candidate in a directory, one worker process each
    Batch {
        /// Reference program source
        #[arg(long = "ref")]
        reference: PathBuf,

        /// Directory of candidate sources
        #[arg(long)]
        kernels: PathBuf,

        /// Concurrent worker processes
        #[arg(long, default_value = "1")]
        workers: usize,

        #[command(flatten)]
        eval: EvalArgs,

        /// Print one JSON object per result
        #[arg(long)]
        json: bool,
    },

    /// Print the code block found in a model response
    Extract {
        /// File holding the response text
        response: PathBuf,

        /// Language tags stripped from block headers
        #[arg(long = "lang", default_value = "kbs")]
        languages: Vec<String>,

        /// Take the last block instead of the first
        #[arg(long, conflicts_with = "all")]
        last: bool,

        /// Join every block
        #[arg(long)]
        all: bool,
    },

    /// Evaluate one request read from stdin; writes the result to stdout
    #[command(hide = true)]
    EvalWorker,

    /// Serve a compiled script program over the module protocol
    #[command(hide = true)]
    ModuleWorker {
        /// Compiled program (JSON)
        program: PathBuf,
    },

    /// Compile a script source into a program file
    #[command(hide = true)]
    CompileScript {
        src: PathBuf,
        out: PathBuf,

        /// Optimization mode (default, max-autotune, reduce-overhead)
        #[arg(long)]
        optimize: Option<String>,
    },
}

#[derive(Args)]
struct ReferenceArgs {
    /// Reference program source
    #[arg(long = "ref", conflicts_with_all = ["level", "problem_id"], required_unless_present_all = ["level", "problem_id"])]
    reference: Option<PathBuf>,

    /// Dataset level
    #[arg(long, requires = "problem_id")]
    level: Option<u32>,

    /// Dataset problem id (1-based)
    #[arg(long, requires = "level")]
    problem_id: Option<u32>,

    /// Dataset root
    #[arg(long, env = DATASET_ENV)]
    dataset: Option<PathBuf>,
}

impl ReferenceArgs {
    fn source(&self) -> Result<ProblemSource> {
        match (&self.reference, self.level, self.problem_id) {
            (Some(path), _, _) => Ok(ProblemSource::Local { path: path.clone() }),
            (None, Some(level), Some(problem_id)) => Ok(ProblemSource::Dataset {
                root: self.dataset.clone().unwrap_or_else(dataset_root),
                level,
                problem_id,
            }),
            _ => bail!("either --ref or both --level and --problem-id are required"),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ToolchainKind {
    Script,
    Command,
}

/// Flags shared by `check` and `batch`. Unset flags keep the config value.
#[derive(Args)]
struct EvalArgs {
    /// JSON harness config; flags override its values
    #[arg(long, env = "KBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Correctness trials [default: 5]
    #[arg(long)]
    num_correct_trials: Option<u32>,

    /// Timed performance trials [default: 100]
    #[arg(long)]
    num_perf_trials: Option<u32>,

    /// Trials per reference baseline [default: num-perf-trials]
    #[arg(long)]
    baseline_trials: Option<u32>,

    /// Per-evaluation timeout in seconds [default: 300]
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip the performance pass
    #[arg(long)]
    no_perf: bool,

    /// Build cache root [default: build/kbench]
    #[arg(long, env = "KBENCH_BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Rebuild even when a cached artifact exists
    #[arg(long)]
    clear_cache: bool,

    /// Build into a throwaway directory
    #[arg(long)]
    no_cache: bool,

    /// Target architectures, comma separated (e.g. Ada,Hopper)
    #[arg(long)]
    gpu_arch: Option<String>,

    /// Execution device (cpu, cuda:N)
    #[arg(long, env = "KBENCH_DEVICE")]
    device: Option<DeviceId>,

    #[arg(long, value_enum)]
    toolchain: Option<ToolchainKind>,

    /// Compile command template for the command toolchain
    #[arg(long)]
    compiler: Option<String>,

    /// Worker launch template for the command toolchain
    #[arg(long)]
    launch: Option<String>,

    /// JSON command-toolchain config
    #[arg(long, conflicts_with = "compiler")]
    toolchain_config: Option<PathBuf>,
}

fn split_template(template: &str) -> Vec<String> {
    template.split_whitespace().map(str::to_string).collect()
}

impl EvalArgs {
    fn harness_config(&self, verbose: bool) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => HarnessConfig::default(),
        };

        if let Some(n) = self.num_correct_trials {
            config.num_correct_trials = n;
        }
        if let Some(n) = self.num_perf_trials {
            config.num_perf_trials = n;
        }
        if self.baseline_trials.is_some() {
            config.baseline_trials = self.baseline_trials;
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = secs;
        }
        if let Some(dir) = &self.build_dir {
            config.build_root = dir.clone();
        }
        if let Some(archs) = &self.gpu_arch {
            config.gpu_arch = parse_arch_list(archs)?;
        }
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        config.measure_performance &= !self.no_perf;
        config.use_cache &= !self.no_cache;
        config.clear_cache |= self.clear_cache;
        config.verbose |= verbose;

        match self.toolchain {
            Some(ToolchainKind::Script) => config.toolchain = ToolchainConfig::Script,
            Some(ToolchainKind::Command) => {
                config.toolchain = ToolchainConfig::Command(self.command_toolchain()?)
            }
            None if self.compiler.is_some() || self.toolchain_config.is_some() => {
                config.toolchain = ToolchainConfig::Command(self.command_toolchain()?)
            }
            None => {}
        }
        Ok(config)
    }

    fn command_toolchain(&self) -> Result<CommandToolchainConfig> {
        let mut toolchain = match (&self.toolchain_config, &self.compiler) {
            (Some(path), _) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str::<CommandToolchainConfig>(&text)
                    .with_context(|| format!("invalid toolchain config {}", path.display()))?
            }
            (None, Some(compiler)) => CommandToolchainConfig::new(split_template(compiler)),
            (None, None) => bail!("the command toolchain needs --compiler or --toolchain-config"),
        };
        if toolchain.compile.is_empty() {
            bail!("compile command is empty");
        }
        if let Some(launch) = &self.launch {
            toolchain.launch = split_template(launch);
        }
        Ok(toolchain)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Workers keep stderr quiet; their parent does the reporting.
    let level = match (&cli.command, cli.verbose) {
        (_, true) => Level::DEBUG,
        (Commands::EvalWorker | Commands::ModuleWorker { .. } | Commands::CompileScript { .. }, _) => {
            Level::WARN
        }
        _ => Level::INFO,
    };
    kbench_core::init_tracing(cli.log_json, level);

    match cli.command {
        Commands::Check {
            reference,
            kernel,
            eval,
            json,
        } => cmd_check(&reference, &kernel, &eval, cli.verbose, json).await,
        Commands::Batch {
            reference,
            kernels,
            workers,
            eval,
            json,
        } => cmd_batch(&reference, &kernels, workers, &eval, cli.verbose, json).await,
        Commands::Extract {
            response,
            languages,
            last,
            all,
        } => cmd_extract(&response, &languages, last, all),
        Commands::EvalWorker => cmd_eval_worker().await,
        Commands::ModuleWorker { program } => cmd_module_worker(&program).await,
        Commands::CompileScript { src, out, optimize } => {
            cmd_compile_script(&src, &out, optimize.as_deref())
        }
    }
}

async fn cmd_check(
    reference: &ReferenceArgs,
    kernel: &Path,
    eval: &EvalArgs,
    verbose: bool,
    json: bool,
) -> Result<()> {
    let config = eval.harness_config(verbose)?;
    let problem = reference.source()?.fetch()?;
    let candidate = read_source(kernel)?;
    info!(
        problem = %problem.name,
        kernel = %kernel.display(),
        device = %config.device,
        "checking kernel"
    );

    let report = run_and_check(config.request(problem.source, candidate), config.baseline_trials()).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_summary(&report));
    }
    METRICS.flush();
    Ok(())
}

/// One line of `batch --json` output.
#[derive(Serialize)]
struct BatchLine<'a> {
    index: usize,
    kernel: &'a Path,
    result: &'a EvaluationResult,
}

fn candidate_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn cmd_batch(
    reference: &Path,
    kernels: &Path,
    workers: usize,
    eval: &EvalArgs,
    verbose: bool,
    json: bool,
) -> Result<()> {
    let mut config = eval.harness_config(verbose)?;
    config.max_workers = workers.max(1);
    let reference_source = read_source(reference)?;

    let files = candidate_files(kernels)?;
    if files.is_empty() {
        warn!(dir = %kernels.display(), "no candidate files found");
        return Ok(());
    }
    let mut requests = Vec::with_capacity(files.len());
    for file in &files {
        requests.push(config.request(reference_source.clone(), read_source(file)?));
    }

    let exe = std::env::current_exe().context("cannot locate the kbench executable")?;
    let pool = ProcessPool::new(exe).with_max_workers(config.max_workers);
    let results = pool.run(requests).await;

    let mut correct = 0usize;
    for finished in &results {
        let kernel = files
            .get(finished.index)
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("?"));
        if finished.result.correctness {
            correct += 1;
        }
        if json {
            let line = BatchLine {
                index: finished.index,
                kernel,
                result: &finished.result,
            };
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!("[{}] {}: {}", finished.index, kernel.display(), finished.result);
        }
    }
    if !json {
        println!("[Batch] {correct} / {} correct", results.len());
    }
    METRICS.flush();
    Ok(())
}

fn cmd_extract(response: &Path, languages: &[String], last: bool, all: bool) -> Result<()> {
    let text = read_source(response)?;
    let langs: Vec<&str> = languages.iter().map(String::as_str).collect();
    let code = if all {
        Some(extract_code_blocks(&text, &langs)).filter(|code| !code.is_empty())
    } else if last {
        extract_last_code(&text, &langs)
    } else {
        extract_first_code(&text, &langs)
    };
    match code {
        Some(code) => {
            println!("{code}");
            Ok(())
        }
        None => bail!("no code block found in {}", response.display()),
    }
}

async fn cmd_eval_worker() -> Result<()> {
    let result = serve_eval_request(tokio::io::stdin(), tokio::io::stdout()).await?;
    info!(compiled = result.compiled, correctness = result.correctness, "eval worker done");
    Ok(())
}

async fn cmd_module_worker(program: &Path) -> Result<()> {
    let text = std::fs::read_to_string(program)
        .with_context(|| format!("failed to read program {}", program.display()))?;
    let program: Program = serde_json::from_str(&text).context("invalid program file")?;
    let unit = ScriptUnit::from_program(program);
    let device = match std::env::var(DEVICE_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => DeviceId::cpu(),
    };
    serve(&unit, &device, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    Ok(())
}

fn cmd_compile_script(src: &Path, out: &Path, optimize: Option<&str>) -> Result<()> {
    let source = read_source(src)?;
    let program = compile_source(&source, optimize.map(OptimizeMode::parse_lenient))
        .map_err(|e| anyhow::anyhow!("{}: {e}", src.display()))?;
    std::fs::write(out, serde_json::to_vec(&program)?)
        .with_context(|| format!("failed to write {}", out.display()))?;
    Ok(())
}
