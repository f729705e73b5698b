use std::ffi::OsString;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::tree::{NodeId, TaskIndex, TaskTree};

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

impl FromStr for KeyVal {
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
    name = "arbor",
    version,
    about = "Arbor: a personal task tree",
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
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "arborrc")]
    pub arborrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the task tree, optionally narrowed by a search
    List {
        #[arg(short, long)]
        search: Option<String>,
        /// Include subtrees that are entirely completed
        #[arg(short, long)]
        all: bool,
    },
    /// Add a task at the top level or under --parent
    Add {
        title: String,
        #[arg(short, long)]
        parent: Option<TaskPath>,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Change fields of an existing task
    Edit {
        path: TaskPath,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: FieldArgs,
        #[arg(long, conflicts_with = "due")]
        clear_due: bool,
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
    },
    /// Mark a task and all of its sub-tasks completed
    Done { path: TaskPath },
    /// Mark a single task not completed
    Undone { path: TaskPath },
    /// Delete a task and its sub-tasks
    Remove { path: TaskPath },
    /// Show every field of one task
    Show {
        path: TaskPath,
        #[arg(long)]
        json: bool,
    },
    /// List categories in use
    Categories,
    /// List tags in use
    Tags,
    /// Print the stored JSON document
    Export,
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FieldArgs {
    #[arg(short, long)]
    pub description: Option<String>,
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
    #[arg(short, long)]
    pub category: Option<String>,
    #[arg(short = 't', long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,
}

/// Dotted, 1-based row path: `2.1` is the first child of the second
/// top-level task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPath(Vec<usize>);

impl TaskPath {
    /// Path of a live node, or `None` for a stale handle.
    pub fn of(tree: &TaskTree, id: NodeId) -> Option<Self> {
        if !tree.contains(id) {
            return None;
        }
        let mut rows = vec![tree.row(id)];
        let mut cursor = tree.parent_of(id);
        while let Some(parent) = cursor {
            rows.push(tree.row(parent));
            cursor = tree.parent_of(parent);
        }
        rows.reverse();
        Some(Self(rows))
    }

    pub fn resolve(&self, tree: &TaskTree) -> Option<TaskIndex> {
        self.0
            .iter()
            .try_fold(None, |parent, row| tree.index(*row, parent).map(Some))
            .flatten()
    }
}

impl FromStr for TaskPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rows = s
            .trim()
            .split('.')
            .map(|part| match part.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n - 1),
                _ => Err(anyhow!("invalid task path {s:?}: expected e.g. 2 or 2.1")),
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self(rows))
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .0
            .iter()
            .map(|row| (row + 1).to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&text)
    }
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
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.KEY=VALUE` / `rc.KEY:VALUE` overrides out of the
/// argument list before clap sees it.
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
                debug!(key = %k, value = %v, "captured positional rc override");
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

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn task_paths_parse_and_print() {
        let path: TaskPath = "2.1".parse().expect("path");
        assert_eq!(path, TaskPath(vec![1, 0]));
        assert_eq!(path.to_string(), "2.1");
        assert!("0".parse::<TaskPath>().is_err());
        assert!("1..2".parse::<TaskPath>().is_err());
        assert!("x".parse::<TaskPath>().is_err());
    }

    #[test]
    fn task_paths_resolve_against_tree() {
        let mut tree = TaskTree::new();
        tree.add_task("A", None).expect("a");
        let b = tree.add_task("B", None).expect("b");
        let b1 = tree.add_task("B1", Some(b)).expect("b1");

        let path: TaskPath = "2.1".parse().expect("path");
        assert_eq!(path.resolve(&tree), Some(b1));
        assert_eq!(TaskPath::of(&tree, b1.id()), Some(path));
        assert_eq!("2.2".parse::<TaskPath>().expect("path").resolve(&tree), None);
        assert_eq!("3".parse::<TaskPath>().expect("path").resolve(&tree), None);
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&os(&["arbor", "rc.color=off", "list", "rc.data.file:x.json"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["arbor", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.data.file".to_string(), "x.json".to_string())
            ]
        );
    }

    #[test]
    fn parses_subcommands() {
        let cli = GlobalCli::try_parse_from(os(&[
            "arbor", "-v", "add", "Buy milk", "--parent", "1", "--tag", "shop", "-t", "dairy",
        ]))
        .expect("parse");
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Some(Command::Add {
                title,
                parent,
                fields,
            }) => {
                assert_eq!(title, "Buy milk");
                assert_eq!(parent, Some(TaskPath(vec![0])));
                assert_eq!(fields.tags, vec!["shop", "dairy"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let bare = GlobalCli::try_parse_from(os(&["arbor"])).expect("parse");
        assert!(bare.command.is_none());
    }
}
