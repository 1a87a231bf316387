use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::identity::OAuthProvider;
use crate::preferences::{TaskFilter, TaskSort, Theme};
use crate::task::{Importance, WorkflowColumn};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "momentum",
    version,
    about = "Momentum: task board with hosted and offline storage",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    /// Config file to read instead of ~/.momentumrc.
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List tasks using the saved filter and sort.
    List {
        #[arg(long, value_parser = parse_with::<TaskFilter>)]
        filter: Option<TaskFilter>,
        #[arg(long, value_parser = parse_with::<TaskSort>)]
        sort: Option<TaskSort>,
    },
    /// Show tasks grouped by workflow column.
    Board,
    Add {
        title: String,
        #[arg(short = 'd', long = "description", default_value = "")]
        description: String,
        #[arg(long, value_parser = parse_with::<Importance>, default_value = "medium")]
        importance: Importance,
        #[arg(long, value_parser = parse_with::<WorkflowColumn>, default_value = "todo")]
        column: WorkflowColumn,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_with::<Importance>)]
        importance: Option<Importance>,
        #[arg(long, value_parser = parse_with::<WorkflowColumn>)]
        column: Option<WorkflowColumn>,
    },
    /// Flip completion of a task.
    Toggle { id: i64 },
    Move {
        id: i64,
        #[arg(value_parser = parse_with::<WorkflowColumn>)]
        column: WorkflowColumn,
    },
    Importance {
        id: i64,
        #[arg(value_parser = parse_with::<Importance>)]
        level: Importance,
    },
    Delete { id: i64 },
    Whoami {
        #[arg(long)]
        refresh: bool,
    },
    Login { email: String, password: String },
    Signup { email: String, password: String },
    /// Print the sign-in URL for a third-party provider.
    Oauth {
        #[arg(value_parser = parse_with::<OAuthProvider>)]
        provider: OAuthProvider,
    },
    Logout,
    /// Switch this device to offline mode.
    Offline {
        #[arg(long, default_value = "Offline User")]
        name: String,
        #[arg(long, default_value = "offline@momentum.local")]
        email: String,
    },
    Prefs {
        #[command(subcommand)]
        action: Option<PrefsAction>,
    },
    Stats,
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PrefsAction {
    Show,
    Filter {
        #[arg(value_parser = parse_with::<TaskFilter>)]
        value: TaskFilter,
    },
    Sort {
        #[arg(value_parser = parse_with::<TaskSort>)]
        value: TaskSort,
    },
    Theme {
        #[arg(value_parser = parse_with::<Theme>)]
        value: Theme,
    },
    Reset,
}

fn parse_with<T>(s: &str) -> Result<T, String>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    s.parse::<T>().map_err(|err| err.to_string())
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
