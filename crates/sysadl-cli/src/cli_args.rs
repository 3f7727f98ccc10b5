use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sysadl")]
#[command(about = "SysADL scenario and scene runner")]
pub(crate) struct Cli {
    /// Log filter for stderr, overriding RUST_LOG.
    #[arg(long = "log-level", global = true)]
    pub(crate) log_level: Option<String>,
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Scenario(ScenarioArgs),
    Scene(SceneArgs),
    Deps(DepsArgs),
    List(ListArgs),
}

#[derive(Debug, Args)]
pub(crate) struct ScenarioArgs {
    #[arg(long = "bundle")]
    pub(crate) bundle: String,
    #[arg(long = "name")]
    pub(crate) name: String,
    /// `name=value`; the value is read as JSON, falling back to a string.
    #[arg(long = "var")]
    pub(crate) vars: Vec<String>,
    #[arg(long = "timeout")]
    pub(crate) timeout: Option<u64>,
    #[arg(long = "show-log")]
    pub(crate) show_log: bool,
}

#[derive(Debug, Args)]
pub(crate) struct SceneArgs {
    #[arg(long = "bundle")]
    pub(crate) bundle: String,
    #[arg(long = "name")]
    pub(crate) name: String,
    #[arg(long = "param")]
    pub(crate) params: Vec<String>,
    #[arg(long = "show-log")]
    pub(crate) show_log: bool,
}

#[derive(Debug, Args)]
pub(crate) struct DepsArgs {
    #[arg(long = "expr")]
    pub(crate) expr: String,
}

#[derive(Debug, Args)]
pub(crate) struct ListArgs {
    #[arg(long = "bundle")]
    pub(crate) bundle: String,
}
