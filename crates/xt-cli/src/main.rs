//! xt CLI: find instances by tag and drive ssh command flows on them.
//!
//! All flow logic lives in `xt-core`; this binary adds argument parsing,
//! terminal prompts and styled output.

mod commands;
mod ui;

use clap::{Parser, Subcommand};

/// xt: discover instances by tag and run remote command flows
#[derive(Parser)]
#[command(name = "xt", version, about = "Discover instances by tag and run remote command flows")]
pub struct Cli {
    /// Path to the config file (default: ~/.xt/config.yaml)
    #[arg(long, global = true, env = "XT_CONFIG")]
    config: Option<String>,

    /// Profile to use instead of the default one
    #[arg(short = 'p', long, global = true)]
    profile: Option<String>,

    /// Instance tag the host pattern is matched against
    #[arg(short = 't', long, global = true)]
    tag: Option<String>,

    /// Enable debug logging (shows every ssh invocation)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run and inspect multi-step flows
    Flow {
        #[command(subcommand)]
        action: FlowAction,
    },

    /// Run a command on one host, or on all matching hosts with --all
    Run {
        /// Host pattern (tag value or hostname)
        pattern: String,
        /// Command to run remotely
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Run on every matching host at once
        #[arg(short = 'a', long)]
        all: bool,
        /// Skip the confirmation prompt
        #[arg(short = 'f', long)]
        force: bool,
        /// Batch timeout in seconds (default: defaults.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Copy files to or from matching hosts over scp
    File {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Open an interactive ssh session on a matching host
    Connect {
        /// Host pattern (tag value or hostname)
        pattern: String,
    },

    /// List the hosts a pattern resolves to
    Hosts {
        /// Host pattern; empty matches every host carrying the tag
        #[arg(default_value = "")]
        pattern: String,
    },
}

#[derive(Subcommand)]
enum FileAction {
    /// Download a remote file
    Get {
        /// Host pattern (tag value or hostname)
        pattern: String,
        /// Path on the remote host
        remote: String,
        /// Local destination (a directory when used with --all)
        local: String,
        /// Download from every matching host, files prefixed with the host name
        #[arg(short = 'a', long)]
        all: bool,
        /// Batch timeout in seconds (default: defaults.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Upload a local file
    Put {
        /// Host pattern (tag value or hostname)
        pattern: String,
        /// Local file to upload
        local: String,
        /// Destination path on the remote host
        remote: String,
        /// Upload to every matching host
        #[arg(short = 'a', long)]
        all: bool,
        /// Batch timeout in seconds (default: defaults.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum FlowAction {
    /// Run a flow against the hosts matching a pattern
    Run {
        /// Flow name from the config file
        flow: String,
        /// Host pattern (tag value or hostname)
        pattern: String,
        /// Step/batch timeout in seconds (default: defaults.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List configured flows
    List,

    /// Validate a flow without running it
    Validate {
        /// Flow name from the config file
        flow: String,
    },
}

fn default_filter(debug: bool) -> &'static str {
    if debug {
        "xt_core=debug,xt_cli=debug"
    } else {
        "xt_core=warn,xt_cli=info"
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.debug).into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let globals = commands::GlobalArgs {
        config: cli.config.as_deref(),
        profile: cli.profile.as_deref(),
        tag: cli.tag.as_deref(),
    };

    let result = if let Some(command) = cli.command {
        match command {
            Commands::Flow { action } => match action {
                FlowAction::Run {
                    flow,
                    pattern,
                    timeout,
                } => commands::flow::run(&globals, &flow, &pattern, timeout).await,
                FlowAction::List => commands::flow::list(&globals),
                FlowAction::Validate { flow } => commands::flow::validate(&globals, &flow),
            },

            Commands::Run {
                pattern,
                command,
                all,
                force,
                timeout,
            } => {
                let options = commands::run::RunOptions {
                    all,
                    force,
                    timeout,
                };
                commands::run::run(&globals, &pattern, &command, &options).await
            }

            Commands::File { action } => match action {
                FileAction::Get {
                    pattern,
                    remote,
                    local,
                    all,
                    timeout,
                } => {
                    let options = commands::file::TransferOptions { all, timeout };
                    commands::file::get(&globals, &pattern, &remote, &local, &options).await
                }
                FileAction::Put {
                    pattern,
                    local,
                    remote,
                    all,
                    timeout,
                } => {
                    let options = commands::file::TransferOptions { all, timeout };
                    commands::file::put(&globals, &pattern, &local, &remote, &options).await
                }
            },

            Commands::Connect { pattern } => commands::connect::run(&globals, &pattern).await,

            Commands::Hosts { pattern } => commands::hosts::list(&globals, &pattern).await,
        }
    } else {
        // No subcommand: show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
