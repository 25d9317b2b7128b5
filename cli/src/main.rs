use std::{
    collections::BTreeSet,
    ffi::OsString,
    io::{self, Read as _, Write as _},
    path::PathBuf,
    sync::Arc,
};

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use miette::{Context as _, IntoDiagnostic as _, Result};
use pydex_evaluator::{
    CommandEvaluator, Evaluate, NixEvaluator, NixEvaluatorOptions, associate,
};
use pydex_index::{
    FailurePolicy, Indexer, Progress, ResolveOptions,
    backend::{Backend as _, NixBackend},
};
use pydex_locator::{DEFAULT_INDEX_URL, Locator};
use pydex_metadata::{ArtifactRef, PackageRecord};
use serde_json::Value;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};
use url::Url;

#[derive(Parser)]
#[command(name = "pydex")]
#[command(version)]
#[command(about = "Build a pinned dependency index for Python packages")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv, -vvvv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Locate source artifacts for requirements.
    Query(QueryArgs),
    /// Evaluate located artifacts into package records.
    Eval(EvalArgs),
    /// Resolve the dependency closure of the given packages.
    Build(BuildArgs),
    /// Render package records as a Nix expression.
    Expr(ExprArgs),
}

#[derive(Args)]
struct IndexArgs {
    /// Package index to query.
    #[arg(
        short = 'i',
        long = "index-url",
        env = "PYDEX_INDEX_URL",
        default_value = DEFAULT_INDEX_URL
    )]
    index_url: Url,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EvaluatorKind {
    Nix,
    Command,
}

#[derive(Args)]
struct EvaluatorArgs {
    /// How artifacts are evaluated.
    #[arg(long = "evaluator", value_enum, default_value_t = EvaluatorKind::Nix)]
    evaluator: EvaluatorKind,

    /// Program to run (`nix` by default for the nix evaluator; required for `command`).
    #[arg(long = "evaluator-program", value_name = "PROGRAM")]
    program: Option<PathBuf>,

    /// Extra argument for a `command` evaluator (repeatable).
    #[arg(long = "evaluator-arg", value_name = "ARG", allow_hyphen_values = true)]
    program_args: Vec<OsString>,

    /// Expression built by the nix evaluator.
    #[arg(long = "nix-expr", default_value = "<pypi/setup.nix>")]
    nix_expr: String,

    /// Directory exposed to the expression as `<pypi>`.
    #[arg(long = "nix-path", value_name = "DIR")]
    nix_path: Option<PathBuf>,

    /// Where nix build output links are written.
    #[arg(long = "out-dir", value_name = "DIR", default_value = "build")]
    out_dir: PathBuf,
}

#[derive(Args)]
struct QueryArgs {
    #[command(flatten)]
    index: IndexArgs,

    /// Requirements to locate; `-` reads a JSON list from stdin.
    #[arg(value_name = "REQUIREMENT", required = true)]
    packages: Vec<String>,
}

#[derive(Args)]
struct EvalArgs {
    #[command(flatten)]
    evaluator: EvaluatorArgs,

    /// Files holding located artifacts; `-` reads an artifact or a list from stdin.
    #[arg(value_name = "FILE", required = true)]
    files: Vec<String>,
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    index: IndexArgs,

    #[command(flatten)]
    evaluator: EvaluatorArgs,

    /// Only resolve the packages and their direct requirements.
    #[arg(long = "no-recurse")]
    no_recurse: bool,

    /// Leave out test requirements.
    #[arg(long = "no-tests")]
    no_tests: bool,

    /// Requirement strings that are never resolved (repeatable).
    #[arg(long = "blacklist", value_name = "REQUIREMENT")]
    blacklist: Vec<String>,

    /// Follow this extra for every package (repeatable).
    #[arg(long = "extra", value_name = "EXTRA")]
    extras: Vec<String>,

    /// Skip requirements that cannot be located instead of failing.
    #[arg(long = "lenient")]
    lenient: bool,

    /// Print `name==version` lines instead of records.
    #[arg(long = "print-requirements")]
    print_requirements: bool,

    /// Maximum concurrent index lookups.
    #[arg(short = 'j', long = "jobs", default_value_t = 16)]
    jobs: usize,

    /// Packages to resolve; `-` reads a JSON list from stdin.
    #[arg(value_name = "REQUIREMENT", required = true)]
    packages: Vec<String>,
}

#[derive(Args)]
struct ExprArgs {
    /// Added to every package's build inputs (repeatable).
    #[arg(long = "add-build-input", value_name = "INPUT")]
    build_inputs: Vec<String>,

    /// Added to every package's propagated build inputs (repeatable).
    #[arg(long = "add-propagated-build-input", value_name = "INPUT")]
    propagated_build_inputs: Vec<String>,

    /// Files holding package records; `-` reads a record or a list from stdin.
    #[arg(value_name = "FILE", required = true)]
    files: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Command::Query(args) => query(args).await,
        Command::Eval(args) => eval(args).await,
        Command::Build(args) => build(args).await,
        Command::Expr(args) => expr(args),
    }
}

fn init_tracing(verbose: u8) -> Result<()> {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().into_diagnostic()?
    } else {
        let pydex_level = match verbose {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!("error,pydex={pydex_level},pydex_={pydex_level}"))
    };

    // stdout carries results only.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_writer(io::stderr))
        .with(ErrorLayer::default())
        .init();

    Ok(())
}

async fn query(args: QueryArgs) -> Result<()> {
    let packages = expand_stdin_requirements(args.packages)?;
    let locator = Locator::new(args.index.index_url);

    let mut lines = Vec::with_capacity(packages.len());
    for requirement in &packages {
        let artifact = locator
            .locate(requirement)
            .await
            .wrap_err_with(|| format!("failed to locate `{requirement}`"))?;
        lines.push(serde_json::to_string(&artifact).into_diagnostic()?);
    }
    print_lines(lines)
}

async fn eval(args: EvalArgs) -> Result<()> {
    let mut batch = Vec::new();
    for value in read_json_inputs(&args.files)? {
        let artifact: ArtifactRef = serde_json::from_value(value)
            .into_diagnostic()
            .wrap_err("invalid artifact")?;
        batch.push(artifact);
    }

    let evaluator = build_evaluator(args.evaluator)?;
    let records = evaluator.evaluate(&batch).await?;
    let records = associate(&batch, records)?;

    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .into_diagnostic()?;
    print_lines(lines)
}

async fn build(args: BuildArgs) -> Result<()> {
    let packages = expand_stdin_requirements(args.packages)?;
    let locator = Arc::new(Locator::new(args.index.index_url));
    let evaluator = build_evaluator(args.evaluator)?;
    let indexer = Indexer::new(locator, evaluator);

    let opts = ResolveOptions {
        recurse: !args.no_recurse,
        include_test_requirements: !args.no_tests,
        skip: args.blacklist.into_iter().collect(),
        extras: args.extras.into_iter().collect::<BTreeSet<_>>(),
        max_concurrency: args.jobs,
        failure_policy: if args.lenient {
            FailurePolicy::Lenient
        } else {
            FailurePolicy::Strict
        },
        progress: Some(Arc::new(|progress: Progress| eprintln!("{progress}"))),
    };
    let resolution = indexer.resolve(packages, opts).await?;

    for skipped in &resolution.skipped {
        eprintln!(
            "warning: skipped `{}`: {}",
            skipped.requirement, skipped.reason
        );
    }

    let lines = if args.print_requirements {
        resolution.index.frozen()
    } else {
        resolution
            .index
            .records()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .into_diagnostic()?
    };
    print_lines(lines)
}

fn expr(args: ExprArgs) -> Result<()> {
    let mut records = Vec::new();
    for value in read_json_inputs(&args.files)? {
        records.push(PackageRecord::from_value(value).wrap_err("invalid package record")?);
    }

    let backend = NixBackend {
        build_inputs: args.build_inputs,
        propagated_build_inputs: args.propagated_build_inputs,
    };
    let text = backend.emit(&records)?;
    io::stdout().write_all(text.as_bytes()).into_diagnostic()
}

fn build_evaluator(args: EvaluatorArgs) -> Result<Arc<dyn Evaluate>> {
    match args.evaluator {
        EvaluatorKind::Nix => {
            let defaults = NixEvaluatorOptions::default();
            Ok(Arc::new(NixEvaluator::new(NixEvaluatorOptions {
                program: args.program.unwrap_or(defaults.program),
                expr: args.nix_expr,
                nix_path: args.nix_path,
                out_dir: args.out_dir,
                keep_going: defaults.keep_going,
            })))
        }
        EvaluatorKind::Command => {
            let program = args.program.ok_or_else(|| {
                miette::miette!("`--evaluator command` needs `--evaluator-program`")
            })?;
            let evaluator = args
                .program_args
                .into_iter()
                .fold(CommandEvaluator::new(program), CommandEvaluator::arg);
            Ok(Arc::new(evaluator))
        }
    }
}

/// Replace a `-` argument with the JSON list of requirements read from stdin.
fn expand_stdin_requirements(mut packages: Vec<String>) -> Result<Vec<String>> {
    if let Some(pos) = packages.iter().position(|p| p == "-") {
        packages.remove(pos);
        let extra: Vec<String> = serde_json::from_str(&read_stdin()?)
            .into_diagnostic()
            .wrap_err("stdin must hold a JSON list of requirement strings")?;
        packages.extend(extra);
    }
    Ok(packages)
}

/// Load JSON values from files; `-` contributes one value or a list from stdin.
fn read_json_inputs(files: &[String]) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    if files.iter().any(|f| f == "-") {
        match serde_json::from_str(&read_stdin()?).into_diagnostic()? {
            Value::Array(items) => values.extend(items),
            value => values.push(value),
        }
    }
    for path in files.iter().filter(|f| *f != "-") {
        let text = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read `{path}`"))?;
        let value = serde_json::from_str(&text)
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid JSON in `{path}`"))?;
        values.push(value);
    }
    Ok(values)
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .into_diagnostic()
        .wrap_err("failed to read stdin")?;
    Ok(text)
}

/// Write results only once everything succeeded.
fn print_lines(lines: Vec<String>) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for line in lines {
        writeln!(stdout, "{line}").into_diagnostic()?;
    }
    stdout.flush().into_diagnostic()
}
