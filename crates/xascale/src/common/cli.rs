use std::path::PathBuf;

use clap::Parser;

use xacore::config::CliFlags;

use crate::output::outputs::Outputs;

#[derive(clap::ValueEnum, Clone)]
pub enum ColorPolicy {
    /// Use colors if the stdout is detected to be a terminal.
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Sets console color policy
    #[arg(
        long,
        default_value_t = ColorPolicy::Auto,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub colors: ColorPolicy,

    /// Sets output formatting
    #[arg(
        long,
        env = "XA_OUTPUT_MODE",
        default_value_t = Outputs::CLI,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub output_mode: Outputs,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "XA_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

/// Selection of workloads and execution parameters of a run.
///
/// Numeric values are passed to the configuration resolver as text, so that
/// invalid values are reported the same way as invalid values in configuration files.
#[derive(Parser)]
pub struct RunOpts {
    /// Run every registered workload
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Workload(s) to run. Takes precedence over `--all`
    #[arg(short = 'w', long = "workload", value_delimiter(','))]
    pub workloads: Vec<String>,

    /// Workload(s) excluded from the run. Exclusions always win
    #[arg(short = 'e', long, value_delimiter(','))]
    pub exclude: Vec<String>,

    /// Configuration file(s) (TOML or JSON).
    /// The first file is the base layer, every following file overrides it
    #[arg(short = 'c', long = "config", env = "XA_CONFIG", value_delimiter(','))]
    pub configs: Vec<PathBuf>,

    /// Topology description (TOML or JSON).
    /// The local node is used when no topology is given
    #[arg(long, env = "XA_TOPOLOGY")]
    pub topology: Option<PathBuf>,

    /// Catalog file(s) with command-backed workloads
    #[arg(long, env = "XA_CATALOG", value_delimiter(','))]
    pub catalog: Vec<PathBuf>,

    /// Minimum duration of each workload instance in seconds
    #[arg(short = 'd', long)]
    pub duration: Option<String>,

    /// Timeout of each workload instance in seconds
    #[arg(short = 't', long)]
    pub timeout: Option<String>,

    /// Deadline of the whole run in seconds
    #[arg(long)]
    pub run_timeout: Option<String>,

    /// Seed of the dispatch order
    #[arg(short = 'S', long)]
    pub seed: Option<String>,

    /// Maximum number of instances executed at the same time (or `unbounded`)
    #[arg(long)]
    pub concurrency: Option<String>,

    /// Number of instances of every selected workload
    #[arg(long)]
    pub repeat: Option<String>,

    /// Time given to a cancelled workload to stop, in seconds
    #[arg(long, env = "XA_GRACE_PERIOD")]
    pub grace_period: Option<String>,

    /// Pause between two iterations of an instance, in seconds
    #[arg(long, env = "XA_DELAY")]
    pub delay: Option<String>,

    /// Maximum number of iterations of a single instance
    #[arg(long, env = "XA_MAX_ITERATIONS")]
    pub max_iterations: Option<String>,

    /// How members of a sharing group share resources (`packed` or `round-robin`)
    #[arg(long, env = "XA_SHARING_POLICY")]
    pub sharing_policy: Option<String>,

    /// Fail the run instead of skipping instances that cannot get resources
    #[arg(long)]
    pub strict: bool,

    /// Run members of sharing groups concurrently
    #[arg(long)]
    pub maximize: bool,

    /// Restrict the run to the given node(s)
    #[arg(long, value_delimiter(','))]
    pub nodes: Vec<String>,

    /// Only resolve and validate the configuration, do not execute anything
    #[arg(long)]
    pub check: bool,

    /// Compute the allocation plan and print it without executing anything.
    /// When a file is given, the plan is also written into it as JSON
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub plan: Option<Option<PathBuf>>,

    /// Print the registered workloads and exit
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Write the run report as JSON into the given file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl RunOpts {
    pub fn cli_flags(&self) -> CliFlags {
        CliFlags {
            workloads: self.workloads.clone(),
            all: self.all,
            exclude: self.exclude.clone(),
            duration: self.duration.clone(),
            timeout: self.timeout.clone(),
            run_timeout: self.run_timeout.clone(),
            seed: self.seed.clone(),
            concurrency: self.concurrency.clone(),
            repeat: self.repeat.clone(),
            grace_period: self.grace_period.clone(),
            delay: self.delay.clone(),
            max_iterations: self.max_iterations.clone(),
            sharing_policy: self.sharing_policy.clone(),
            strict: self.strict,
            maximize: self.maximize,
            nodes: self.nodes.clone(),
            check: self.check,
        }
    }
}

// Root CLI options
#[derive(Parser)]
#[command(
    name = "xa",
    author,
    about,
    version(crate::XA_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(flatten)]
    pub run: RunOpts,
}
