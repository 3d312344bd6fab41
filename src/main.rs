//! dev-env: register local projects and start, stop and list them.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, resolves the installation root and its configuration, and hands
//! each command to the `LifecycleController`.

mod config;
mod error;
mod lifecycle;
mod process;
mod runner;
mod server;
mod store;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};

use crate::config::DashboardSettings;
use crate::lifecycle::{LifecycleController, RegisterRequest};
use crate::runner::SystemProcessControl;
use crate::store::FileBackend;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "dev-env",
    version,
    about = "Register local projects and start, stop and list them",
    styles = help_styles()
)]
struct Cli {
    /// Installation root holding projects.json and stats.json (default: ~/dev-env).
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the installation root with an empty project registry.
    Init,
    /// Register a new project.
    Add {
        /// Name of the project.
        #[arg(long)]
        name: String,
        /// Command to run the project, e.g. "npm run dev".
        #[arg(long)]
        cmd: Option<String>,
        /// Working directory (default: the current directory).
        #[arg(long)]
        path: Option<PathBuf>,
        /// Command words, alternatively given after `--`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List projects and whether they are running.
    List {
        /// Show only this project, including its path.
        #[arg(long)]
        name: Option<String>,
    },
    /// Start a project in the background.
    Start {
        /// Name of the project.
        name: String,
    },
    /// Stop a running project.
    Stop {
        /// Name of the project.
        name: String,
    },
    /// Serve the web dashboard and open it in the browser.
    Dashboard {
        /// Address to bind (default: 127.0.0.1).
        #[arg(long)]
        host: Option<IpAddr>,
        /// Port to listen on (default: 8080).
        #[arg(long)]
        port: Option<u16>,
        /// Do not open the browser.
        #[arg(long)]
        no_browser: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(match cli.command {
        Commands::Dashboard { .. } => "info",
        _ => "warn",
    });

    let root = config::resolve_root(cli.root)?;
    let config = config::load_root_config(&root)?;
    let backend = Arc::new(FileBackend::new(&root));
    let controller = LifecycleController::new(backend, Arc::new(SystemProcessControl))
        .with_liveness_check(config.check_liveness());

    match cli.command {
        Commands::Init => {
            controller.init()?;
            println!("Initialized dev-env in {}", root.display());
        }
        Commands::Add {
            name,
            cmd,
            path,
            args,
        } => {
            let project = controller.register(RegisterRequest {
                name,
                cmd,
                args,
                path,
            })?;
            println!("Project {} added successfully", project.name);
        }
        Commands::List { name } => {
            let statuses = controller.list_status(name.as_deref())?;
            for status in &statuses {
                if name.is_some() {
                    println!("{} - {} - {}", status.label(), status.name, status.path);
                } else {
                    println!("{} - {}", status.label(), status.name);
                }
            }
        }
        Commands::Start { name } => {
            let pid = controller.start(&name)?;
            println!("Successfully started '{}' (pid {})", name, pid);
        }
        Commands::Stop { name } => {
            let outcome = controller.stop(&name)?;
            if outcome.already_exited {
                println!("'{}' was no longer running; cleared its record", name);
            } else {
                println!("Successfully stopped '{}' (pid {})", name, outcome.pid);
            }
        }
        Commands::Dashboard {
            host,
            port,
            no_browser,
        } => {
            let settings = DashboardSettings::resolve(&config, host, port, no_browser);
            server::run_dashboard(Arc::new(controller), settings).await?;
        }
    }
    Ok(())
}

fn init_logging(default_filter: &str) {
    let filter = std::env::var("DEV_ENV_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_filter.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accepts_trailing_command_words() {
        let cli = Cli::try_parse_from([
            "dev-env", "add", "--name", "web", "--path", "/srv/web", "--", "npm", "run", "--watch",
        ])
        .unwrap();
        match cli.command {
            Commands::Add {
                name,
                cmd,
                path,
                args,
            } => {
                assert_eq!(name, "web");
                assert_eq!(cmd, None);
                assert_eq!(path, Some(PathBuf::from("/srv/web")));
                assert_eq!(args, vec!["npm", "run", "--watch"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn add_accepts_cmd_flag() {
        let cli =
            Cli::try_parse_from(["dev-env", "add", "--name", "api", "--cmd", "node server.js"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Add { cmd: Some(ref cmd), ref args, .. } if cmd == "node server.js" && args.is_empty()
        ));
    }

    #[test]
    fn root_flag_is_global() {
        let cli = Cli::try_parse_from(["dev-env", "list", "--root", "/tmp/devenv"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/devenv")));
        assert!(matches!(cli.command, Commands::List { name: None }));
    }

    #[test]
    fn start_requires_a_name() {
        assert!(Cli::try_parse_from(["dev-env", "start"]).is_err());
    }
}
