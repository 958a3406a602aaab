use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

mod logging;

use novel_shelf::classifier::{Classifier, Decision, KeywordClassifier};
use novel_shelf::config::{Config, LOGS_DIR};
use novel_shelf::orchestrator::{Orchestrator, WorkflowStatus};
use novel_shelf::progress::ProgressSink;
use novel_shelf::report::{BatchDetails, BatchReport, ClassificationDetails, EncodingDetails};
use novel_shelf::scanner::format_size;
use novel_shelf::workflows::{
    ClassificationParams, EncodingFixParams, FixMode, Workflow, WorkflowContext, WorkflowId,
};
use novel_shelf_core::sample_file;

const TICK_MS: u64 = 80;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(":: {spinner} ━{bar:30}━ {pos:>3}% {msg}")
        .expect("static progress template")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .progress_chars("━━░")
}

#[derive(Parser)]
#[command(name = "novel-shelf")]
#[command(version)]
#[command(about = "Repair text encodings and sort novels into genre folders")]
struct Cli {
    #[arg(short, long, global = true, env = "NOVEL_SHELF_LIBRARY", help = "Library root [default: current dir]")]
    library: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Config file [default: <library>/config/novel-shelf.yaml]")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "More log output (-v, -vv)")]
    verbose: u8,
    #[arg(short, long, global = true, help = "Hide the progress bar")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find files that are not in the target encoding
    Scan {
        #[arg(short, long, help = "Directory to scan [default: pending folder]")]
        dir: Option<PathBuf>,
        #[arg(short, long, help = "Top-level only, skip subdirectories")]
        flat: bool,
    },
    /// Convert problem files to the target encoding
    Fix {
        #[arg(long, help = "Repair the files listed by the last scan instead of rescanning")]
        from_manifest: bool,
        #[arg(short, long, help = "Directory to scan [default: pending folder]")]
        dir: Option<PathBuf>,
        #[arg(short, long, help = "Top-level only, skip subdirectories")]
        flat: bool,
        #[arg(long, help = "Do not keep copies of the original files")]
        no_backup: bool,
        #[arg(long, help = "Where to keep the original files")]
        backup_dir: Option<PathBuf>,
    },
    /// Score pending novels and move them into genre folders
    Classify {
        #[arg(short = 'n', long, help = "Classify at most this many files (0 for no cap)")]
        max_files: Option<usize>,
        #[arg(long, help = "Seed for fragment sampling")]
        seed: Option<u64>,
    },
    /// Show the keyword scores for one file without moving it
    Score {
        #[arg(help = "File to score")]
        file: PathBuf,
        #[arg(long, help = "Seed for fragment sampling")]
        seed: Option<u64>,
    },
    /// List the available workflows
    Workflows,
    /// Write the default configuration and create the library folders
    InitConfig {
        #[arg(long, help = "Overwrite an existing config file")]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(help = "Shell to generate for (bash, zsh, fish, powershell)")]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = cli.library.clone().unwrap_or_else(|| PathBuf::from("."));
    let logs = root.join(LOGS_DIR);
    let _guard = logging::init(root.is_dir().then_some(logs.as_path()), cli.verbose);

    match cli.command {
        Commands::Scan { ref dir, flat } => {
            let params = EncodingFixParams {
                mode: FixMode::Scan,
                scan_dir: dir.clone(),
                recursive: !flat,
                ..Default::default()
            };
            cmd_run(&cli, Workflow::EncodingFix(params))
        }
        Commands::Fix {
            from_manifest,
            ref dir,
            flat,
            no_backup,
            ref backup_dir,
        } => {
            let params = EncodingFixParams {
                mode: if from_manifest { FixMode::FromManifest } else { FixMode::ScanAndFix },
                scan_dir: dir.clone(),
                recursive: !flat,
                create_backup: no_backup.then_some(false),
                backup_dir: backup_dir.clone(),
            };
            cmd_run(&cli, Workflow::EncodingFix(params))
        }
        Commands::Classify { max_files, seed } => {
            cmd_run(&cli, Workflow::AutoClassification(ClassificationParams { max_files, seed }))
        }
        Commands::Score { ref file, seed } => cmd_score(&cli, file, seed),
        Commands::Workflows => cmd_workflows(&cli),
        Commands::InitConfig { force } => cmd_init_config(&root, cli.config.as_deref(), force),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "novel-shelf", &mut io::stdout());
            Ok(())
        }
    }
}

/// Resolve the configuration: an explicit `--config`, else the library's default file, else defaults.
///
/// An explicit `--library` always wins over the file's `library_path`.
fn load_config(cli: &Cli) -> Result<Config> {
    let root = cli.library.clone().unwrap_or_else(|| PathBuf::from("."));
    let path = cli.config.clone().unwrap_or_else(|| Config::default_path(&root));

    let mut config = if path.exists() {
        Config::load(&path).with_context(|| format!("loading {}", path.display()))?
    } else if cli.config.is_some() {
        bail!("config file not found: {}", path.display());
    } else {
        Config::new(&root)
    };
    if cli.library.is_some() || cli.config.is_none() {
        config.library_path = root;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Drives a progress bar from worker events.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(quiet: bool) -> Self {
        let bar = if quiet { ProgressBar::hidden() } else { ProgressBar::new(100) };
        bar.set_style(bar_style());
        bar.enable_steady_tick(Duration::from_millis(TICK_MS));
        Self { bar }
    }
}

impl ProgressSink for CliProgress {
    fn on_progress(&self, _id: WorkflowId, percent: f32, message: &str) {
        self.bar.set_position(percent.round() as u64);
        self.bar.set_message(message.to_string());
    }

    fn on_finished(&self, id: WorkflowId, status: WorkflowStatus, _report: Option<&BatchReport>) {
        self.bar.finish_and_clear();
        if status == WorkflowStatus::Completed {
            eprintln!("\x1b[32m✓\x1b[0m {} {}", id.name(), status);
        }
    }
}

fn cmd_run(cli: &Cli, workflow: Workflow) -> Result<()> {
    let config = load_config(cli)?;
    let sink = Arc::new(CliProgress::new(cli.quiet));
    let orchestrator = Orchestrator::with_sink(WorkflowContext::new(config), sink);

    let report = orchestrator.execute(workflow)?;
    print_report(&report);

    if report.cancelled {
        bail!("workflow was cancelled");
    }
    if !report.success {
        bail!("{}", report.message);
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!("{}\n", report.message);
    for (key, value) in &report.stats {
        println!("  {key:<22} {value}");
    }

    match &report.details {
        BatchDetails::Encoding(details) => print_encoding(details),
        BatchDetails::Classification(details) => print_classification(details),
        BatchDetails::None => {}
    }

    if !report.errors.is_empty() {
        println!("\nErrors:");
        for error in &report.errors {
            println!("  [!] {error}");
        }
    }
}

fn print_encoding(details: &EncodingDetails) {
    if let Some(scan) = &details.scan {
        if !scan.problem_files.is_empty() {
            println!("\nProblem files:");
        }
        for file in &scan.problem_files {
            println!(
                "  {:>10}  {:<10} {:>4.2}  {}  {}{}",
                format_size(file.size),
                file.detected_encoding.as_deref().unwrap_or("?"),
                file.confidence,
                file.name,
                file.problem_type,
                if file.can_fix { "" } else { " (not fixable)" },
            );
        }
        if let Some(path) = &scan.manifest_file {
            println!("\nManifest: {}", path.display());
        }
    }

    if let Some(fix) = &details.fix {
        for file in &fix.fixed_files {
            println!("  [+] {} ({})", file.path.display(), file.strategy);
        }
        for file in &fix.skipped_files {
            println!("  [-] {}: {}", file.path.display(), file.reason);
        }
        if let Some(v) = &fix.verification {
            println!(
                "\nVerified {} files: {} clean, {} still problematic",
                v.total_files, v.fixed_files, v.still_problematic
            );
        }
        if let Some(dir) = &fix.backup_dir {
            println!("Backups: {}", dir.display());
        }
    }
}

fn print_classification(details: &ClassificationDetails) {
    if !details.processing_log.is_empty() {
        println!();
    }
    for entry in &details.processing_log {
        match (&entry.category, &entry.error) {
            (_, Some(error)) => println!("  [!] {}: {}", entry.filename, error),
            (Some(category), None) => {
                println!("  [+] {} -> {} ({})", entry.filename, category, entry.info.as_deref().unwrap_or(""))
            }
            (None, None) => println!(
                "  [?] {} -> review ({})",
                entry.filename,
                entry.info.as_deref().unwrap_or("")
            ),
        }
    }
    if let Some(path) = &details.report_file {
        println!("\nReport: {}", path.display());
    }
}

fn cmd_score(cli: &Cli, file: &Path, seed: Option<u64>) -> Result<()> {
    let config = load_config(cli)?;
    let ctx = WorkflowContext::new(config);
    let classifier = KeywordClassifier::new(&ctx.config.classification);

    let record = ctx.config.encoding.policy()?.inspect(file, ctx.detector.as_ref());
    if record.has_problem {
        eprintln!("note: {} ({}); scores use a lossy reading", record.problem_type, record.name);
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let sample = sample_file(file, &ctx.config.sampling.spec(), &mut rng)
        .with_context(|| format!("reading {}", file.display()))?;
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let classification = classifier.classify(&stem, &sample);

    println!("File: {}", file.display());
    for score in &classification.scores {
        println!("  {:<16} {:>5}", score.category, score.score);
    }
    match &classification.decision {
        Decision::Classified { category, score } => println!("Decision: {category} (score {score})"),
        Decision::NeedsReview(reason) => println!("Decision: needs review ({reason})"),
    }
    Ok(())
}

fn cmd_workflows(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let orchestrator = Orchestrator::new(WorkflowContext::new(config));

    for info in orchestrator.available_workflows() {
        println!(
            "  {:<20} {:<10} {}{}",
            info.id,
            info.status,
            info.description,
            if info.can_execute { "" } else { " (library missing)" }
        );
    }
    Ok(())
}

fn cmd_init_config(root: &Path, explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Config::default_path(root));
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config = Config::new(root);
    for dir in [config.pending_dir(), config.review_dir(), config.logs_dir()] {
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    for id in config.classification.categories.ids() {
        std::fs::create_dir_all(config.category_dir(id))?;
    }
    config.save(&path)?;

    println!("Wrote {}", path.display());
    println!("Library folders created under {}", root.display());
    Ok(())
}
