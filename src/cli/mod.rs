use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

use crate::actions::ActionExecutor;
use crate::config::EffectiveConfig;
use crate::core::Action;
use crate::policy::{PolicyEvaluator, PolicyRule, Predicate, RuleEffect};
use crate::providers::aws::{AwsCli, AwsExecutor};
use crate::providers::docker::{DockerCli, ImageExecutor, ImageSource};
use crate::providers::kubernetes::{KubectlCli, PodExecutor, PodSource};
use crate::runner::RunOptions;
use crate::source::ResourceSource;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "opsweep",
    version,
    about = "Scans cloud and cluster resources for lifecycle waste, with dry-run by default"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,
    /// Classify only; never run actions (this is the default).
    #[arg(long, global = true)]
    pub dry_run: bool,
    /// Actually run actions for ACT-classified resources.
    #[arg(long, global = true)]
    pub apply: bool,
    /// Skip the interactive confirmation before --apply.
    #[arg(long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan EBS volumes for unattached disks.
    Volumes(VolumesArgs),
    /// Scan Elastic IPs for unassociated addresses.
    Addresses(AddressesArgs),
    /// Scan pods for failed or crash-looping workloads.
    Pods(PodsArgs),
    /// Scan local container images for dangling and stale layers.
    Images(ImagesArgs),
    /// Show the effective rule set for a scan.
    Policy(PolicyArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
}

#[derive(Debug, Args)]
pub struct VolumesArgs {
    #[arg(long)]
    pub region: Option<String>,
    /// Age threshold in days for acting on unattached volumes.
    #[arg(long)]
    pub days: Option<u64>,
}

#[derive(Debug, Args)]
pub struct AddressesArgs {
    #[arg(long)]
    pub region: Option<String>,
}

#[derive(Debug, Args)]
pub struct PodsArgs {
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,
    /// Label selector passed through to the cluster listing.
    #[arg(long, short = 'l')]
    pub selector: Option<String>,
    /// Restart count at which a pod is flagged.
    #[arg(long, default_value_t = 5)]
    pub restarts: i64,
}

#[derive(Debug, Args)]
pub struct ImagesArgs {
    /// Age threshold in days for acting on stale images.
    #[arg(long)]
    pub days: Option<u64>,
    /// Only target dangling (untagged) images.
    #[arg(long)]
    pub dangling: bool,
    /// Glob pattern for image references to protect (repeatable).
    #[arg(long = "keep-tag")]
    pub keep_tags: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PolicyArgs {
    #[arg(long, value_enum)]
    pub tool: Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Tool {
    Volumes,
    Addresses,
    Pods,
    Images,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

static CANCEL: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signal: libc::c_int) {
    CANCEL.store(true, Ordering::SeqCst);
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = effective_home_dir()?;

    let env_config_path = std::env::var_os("OPSWEEP_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    if cli.apply && cli.dry_run {
        return Err(crate::exit::invalid_args(
            "`--apply` cannot be combined with `--dry-run`",
        ));
    }
    let dry_run = !cli.apply;
    let timeout = Duration::from_secs(cli.timeout);

    match &cli.command {
        Commands::Volumes(args) => {
            let region = args.region.clone().or_else(|| cfg.aws.region.clone());
            let days = args.days.unwrap_or(cfg.scan.default_days);
            let aws = AwsCli::new(region, timeout);
            let mut source = crate::providers::aws::VolumeSource::new(aws.clone());
            let executor = AwsExecutor::new(aws);
            let rules = effective_rules(&cfg, volume_rules(days));
            scan(&cli, &ui_cfg, &cfg, dry_run, &mut source, &executor, rules, true)?;
        }
        Commands::Addresses(args) => {
            let region = args.region.clone().or_else(|| cfg.aws.region.clone());
            let aws = AwsCli::new(region, timeout);
            let mut source = crate::providers::aws::AddressSource::new(aws.clone());
            let executor = AwsExecutor::new(aws);
            let rules = effective_rules(&cfg, address_rules());
            scan(&cli, &ui_cfg, &cfg, dry_run, &mut source, &executor, rules, true)?;
        }
        Commands::Pods(args) => {
            if args.restarts < 1 {
                return Err(crate::exit::invalid_args(
                    "pods: `--restarts` must be at least 1",
                ));
            }
            let namespace = args
                .namespace
                .clone()
                .or_else(|| cfg.kubernetes.namespace.clone());
            let kubectl = KubectlCli::new(namespace, timeout);
            let mut source = PodSource::new(kubectl.clone(), args.selector.clone());
            let executor = PodExecutor::new(kubectl);
            let rules = effective_rules(&cfg, pod_rules(args.restarts));
            scan(&cli, &ui_cfg, &cfg, dry_run, &mut source, &executor, rules, false)?;
        }
        Commands::Images(args) => {
            let days = args.days.unwrap_or(cfg.scan.default_days);
            let keep_tags = if args.keep_tags.is_empty() {
                cfg.images.keep_tags.clone()
            } else {
                args.keep_tags.clone()
            };
            let docker = DockerCli::new(timeout);
            let mut source = ImageSource::new(docker.clone());
            let executor = ImageExecutor::new(docker);
            let rules = effective_rules(&cfg, image_rules(days, &keep_tags, args.dangling));
            scan(&cli, &ui_cfg, &cfg, dry_run, &mut source, &executor, rules, false)?;
        }
        Commands::Policy(args) => {
            let rules = effective_rules(
                &cfg,
                match args.tool {
                    Tool::Volumes => volume_rules(cfg.scan.default_days),
                    Tool::Addresses => address_rules(),
                    Tool::Pods => pod_rules(5),
                    Tool::Images => image_rules(cfg.scan.default_days, &cfg.images.keep_tags, false),
                },
            );
            // Validate before printing so a broken config rule set is caught
            // here too, not only at scan time.
            let evaluator =
                PolicyEvaluator::new(rules).map_err(|err| crate::exit::invalid_args_err(err.into()))?;
            print_rules(evaluator.rules(), cli.json)?;
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `opsweep config --show`");
            }
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "opsweep", &mut out);
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn scan(
    cli: &Cli,
    ui_cfg: &UiConfig,
    cfg: &EffectiveConfig,
    dry_run: bool,
    source: &mut dyn ResourceSource,
    executor: &dyn ActionExecutor,
    rules: Vec<PolicyRule>,
    aws_costs: bool,
) -> Result<()> {
    let policy =
        PolicyEvaluator::new(rules).map_err(|err| crate::exit::invalid_args_err(err.into()))?;

    if !dry_run && !cli.yes {
        if !(ui_cfg.stdin_is_tty && ui_cfg.stdout_is_tty) {
            return Err(crate::exit::invalid_args(
                "--apply without --yes needs a TTY (stdin + stdout)",
            ));
        }
        if !confirm_exact(
            "This pass will modify live resources. Type 'apply' to continue: ",
            "apply",
        )? {
            if !ui_cfg.quiet {
                eprintln!("cancelled.");
            }
            return Ok(());
        }
    }

    if !dry_run {
        // In-flight actions finish; only unstarted work is dropped.
        unsafe {
            libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        }
    }

    let opts = RunOptions {
        dry_run,
        action: Action::Delete,
        concurrency: cfg.scan.concurrency,
        cancel: &CANCEL,
        show_progress: ui_cfg.stderr_is_tty && !cli.quiet && !cli.json,
    };
    let now = time::OffsetDateTime::now_utc();
    let mut report = crate::runner::run(source, &policy, executor, &opts)
        .map_err(|err| crate::exit::source_unavailable_err(err.into()))?;

    if aws_costs {
        if let Some(note) = crate::providers::aws::monthly_savings_note(&report.records) {
            report.summary.notes.push(note);
        }
    }

    if cli.json {
        write_json(&report)?;
    } else {
        crate::ui::print_report(&report, ui_cfg, now);
    }
    Ok(())
}

/// Config-file rules, when present, replace the built-in defaults wholesale.
fn effective_rules(cfg: &EffectiveConfig, defaults: Vec<PolicyRule>) -> Vec<PolicyRule> {
    cfg.rules.clone().unwrap_or(defaults)
}

fn keep_rule() -> PolicyRule {
    PolicyRule::new(
        "keep-tagged",
        Predicate::TagEquals {
            key: "opsweep/keep".to_string(),
            value: "true".to_string(),
        },
        RuleEffect::Keep,
        "tagged opsweep/keep=true",
    )
}

fn volume_rules(days: u64) -> Vec<PolicyRule> {
    vec![
        keep_rule(),
        PolicyRule::new(
            "stale-unattached",
            Predicate::AllOf {
                all: vec![
                    Predicate::StatusIs {
                        status: crate::core::ResourceStatus::Stopped,
                    },
                    Predicate::AgeOverDays { days },
                ],
            },
            RuleEffect::Act,
            format!("unattached for more than {days} days"),
        ),
        PolicyRule::new(
            "unattached",
            Predicate::StatusIs {
                status: crate::core::ResourceStatus::Stopped,
            },
            RuleEffect::Flag,
            "unattached",
        ),
    ]
}

fn address_rules() -> Vec<PolicyRule> {
    vec![
        keep_rule(),
        PolicyRule::new(
            "unassociated",
            Predicate::StatusIs {
                status: crate::core::ResourceStatus::Stopped,
            },
            RuleEffect::Act,
            "not associated with any instance",
        ),
    ]
}

fn pod_rules(restarts: i64) -> Vec<PolicyRule> {
    vec![
        keep_rule(),
        PolicyRule::new(
            "failed",
            Predicate::StatusIs {
                status: crate::core::ResourceStatus::Failed,
            },
            RuleEffect::Act,
            "pod phase is Failed",
        ),
        PolicyRule::new(
            "restart-storm",
            Predicate::TagAtLeast {
                key: crate::providers::kubernetes::RESTARTS_TAG.to_string(),
                min: restarts,
            },
            RuleEffect::Flag,
            format!("restarted at least {restarts} times"),
        ),
        PolicyRule::new(
            "stuck-waiting",
            Predicate::TagMatches {
                key: crate::providers::kubernetes::WAITING_REASON_TAG.to_string(),
                pattern: "*".to_string(),
            },
            RuleEffect::Flag,
            "container stuck in a waiting state",
        ),
    ]
}

fn image_rules(days: u64, keep_tags: &[String], dangling_only: bool) -> Vec<PolicyRule> {
    let mut rules = vec![keep_rule()];
    if !keep_tags.is_empty() {
        rules.push(PolicyRule::new(
            "protected-reference",
            Predicate::AnyOf {
                any: keep_tags
                    .iter()
                    .map(|pattern| Predicate::TagMatches {
                        key: crate::providers::docker::REFERENCE_TAG.to_string(),
                        pattern: pattern.clone(),
                    })
                    .collect(),
            },
            RuleEffect::Keep,
            "protected image reference",
        ));
    }
    rules.push(PolicyRule::new(
        "dangling",
        Predicate::TagEquals {
            key: crate::providers::docker::DANGLING_TAG.to_string(),
            value: "true".to_string(),
        },
        RuleEffect::Act,
        "dangling image",
    ));
    if !dangling_only {
        rules.push(PolicyRule::new(
            "stale",
            Predicate::AgeOverDays { days },
            RuleEffect::Act,
            format!("built more than {days} days ago"),
        ));
    }
    rules
}

fn print_rules(rules: &[PolicyRule], json: bool) -> Result<()> {
    #[derive(serde::Serialize)]
    struct RulesDoc<'a> {
        rules: &'a [PolicyRule],
    }
    let doc = RulesDoc { rules };
    if json {
        write_json(&doc)
    } else {
        println!("{}", toml::to_string_pretty(&doc)?);
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn effective_home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| crate::exit::invalid_args("HOME is not set"))
}

fn confirm_exact(prompt: &str, expected: &str) -> Result<bool> {
    use std::io::{BufRead, Write};

    let mut stderr = std::io::stderr().lock();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = std::io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(false);
    }
    Ok(input.trim() == expected)
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}
