use std::path::PathBuf;

use clap::{Parser, Subcommand};
use maintd::{
   Result,
   cmd,
   config::ServiceContext,
   maintenance::MaintenanceTask,
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for maintd
#[derive(Parser)]
#[command(name = "maintd")]
#[command(about = "Background git maintenance for registered repositories")]
#[command(version)]
struct Cli {
   #[arg(long, global = true, help = "Service instance to talk to (default: maintd)")]
   service_name: Option<String>,

   #[arg(long, global = true, hide = true, help = "Set when launched by the service")]
   internal_service: bool,

   #[command(subcommand)]
   command: Cmd,
}

/// Available subcommands for maintd
#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Run the maintenance service in the foreground")]
   Serve,

   #[command(about = "Register a repository for scheduled maintenance")]
   Register {
      #[arg(help = "Path inside the repository (default: cwd)")]
      path: Option<PathBuf>,
   },

   #[command(about = "Remove a repository from the registry")]
   Unregister {
      #[arg(help = "Path inside the repository (default: cwd)")]
      path: Option<PathBuf>,
   },

   #[command(about = "Deactivate a repository without unregistering it")]
   Unmount {
      #[arg(help = "Path inside the repository (default: cwd)")]
      path: Option<PathBuf>,
   },

   #[command(about = "Show service status, or a repository's mount status")]
   Status {
      #[arg(help = "Path inside a repository")]
      path: Option<PathBuf>,

      #[arg(long, requires = "path", help = "Wait until the repository is ready")]
      wait: bool,
   },

   #[command(about = "List active repositories")]
   List {
      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Run maintenance on one repository now")]
   Maintenance {
      #[arg(help = "Path inside the repository")]
      path: PathBuf,

      #[arg(long, default_value = "all", help = "Task to run")]
      task: MaintenanceTask,
   },

   #[command(about = "Pause scheduled maintenance")]
   Pause {
      #[arg(help = "Hours to pause for")]
      hours: u32,
   },

   #[command(about = "Resume scheduled maintenance")]
   Resume,
}

#[tokio::main]
async fn main() {
   let cli = Cli::parse();

   let default_level = if matches!(cli.command, Cmd::Serve) { Level::INFO } else { Level::WARN };
   tracing_subscriber::fmt()
      .with_env_filter(
         EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.as_str())),
      )
      .with_writer(std::io::stderr)
      .init();

   if let Err(err) = run(cli).await {
      eprintln!("{err}");
      std::process::exit(err.exit_code());
   }
}

async fn run(cli: Cli) -> Result<()> {
   let mut ctx = ServiceContext::load()?.with_service_name(cli.service_name);
   ctx.config.validate()?;
   ctx.started_by_service = cli.internal_service;

   match cli.command {
      Cmd::Serve => cmd::serve::execute(ctx).await,
      Cmd::Register { path } => cmd::register::execute(&ctx, path).await,
      Cmd::Unregister { path } => cmd::unregister::execute(&ctx, path).await,
      Cmd::Unmount { path } => cmd::unmount::execute(&ctx, path).await,
      Cmd::Status { path, wait } => cmd::status::execute(&ctx, path, wait).await,
      Cmd::List { json } => cmd::list::execute(&ctx, json).await,
      Cmd::Maintenance { path, task } => {
         tokio::task::spawn_blocking(move || cmd::maintenance::execute(&ctx, path, task))
            .await
            .map_err(|e| maintd::Error::Server { op: "maintenance", reason: e.to_string() })?
      },
      Cmd::Pause { hours } => cmd::pause::pause(&ctx, hours).await,
      Cmd::Resume => cmd::pause::resume(&ctx).await,
   }
}
