use anyhow::Result;
use clap::Parser;
use envfarm::cleanup::{SharedCleanupContext, new_shared};
use envfarm::commands::{self, Config, ConfigOverrides, EnvTarget};
use envfarm::link::LinkMode;
use envfarm::runtime::RealRuntime;
use std::path::PathBuf;
use std::sync::Arc;

/// envfarm - environment materialization for a conda-style package cache
///
/// Extracts cached package archives, links them into environments and renames
/// environments by replaying their packages into a new prefix.
///
/// Examples:
///   envfarm rename -n work renamed        # Rename <root>/envs/work to <root>/envs/renamed
///   envfarm rename -p ./env /tmp/env -d   # Show what renaming would do
///   envfarm extract zlib-1.2.13-0         # Extract <pkgs>/zlib-1.2.13-0.tar.bz2
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root environment directory (overrides defaults; also via ENVFARM_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "ENVFARM_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub root: Option<PathBuf>,

    /// Package cache directory (defaults to <root>/pkgs)
    #[arg(long = "pkgs-dir", env = "ENVFARM_PKGS_DIR", value_name = "PATH", global = true)]
    pub pkgs_dir: Option<PathBuf>,

    /// Channel repodata used to locate packages: a file, a directory or a URL
    #[arg(long = "index", env = "ENVFARM_INDEX", value_name = "LOCATION", global = true)]
    pub index: Option<String>,

    /// How files are placed into environments: hardlink, symlink or copy
    #[arg(long = "link-mode", value_name = "MODE", global = true)]
    pub link_mode: Option<LinkMode>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            root: self.root.clone(),
            pkgs_dir: self.pkgs_dir.clone(),
            index: self.index.clone(),
            link_mode: self.link_mode,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Rename an environment (clone it, then remove the original)
    Rename(RenameArgs),

    /// Extract a cached package archive
    Extract(ExtractArgs),

    /// Link an extracted package into an environment
    Activate(LinkArgs),

    /// Unlink a package from an environment
    Deactivate(LinkArgs),
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub struct EnvArgs {
    /// Environment name under <root>/envs ("base" is the root environment)
    #[arg(short = 'n', long = "name", value_name = "NAME")]
    pub name: Option<String>,

    /// Environment prefix path
    #[arg(short = 'p', long = "prefix", value_name = "PATH")]
    pub prefix: Option<PathBuf>,
}

impl EnvArgs {
    fn target(self) -> Result<EnvTarget> {
        EnvTarget::from_args(self.name, self.prefix)
    }
}

#[derive(clap::Args, Debug)]
pub struct RenameArgs {
    #[command(flatten)]
    pub env: EnvArgs,

    /// New environment name or path
    #[arg(value_name = "DESTINATION")]
    pub destination: String,

    /// Replace the destination if it already exists
    #[arg(long)]
    pub force: bool,

    /// Only print the actions that would be taken
    #[arg(short = 'd', long = "dry-run")]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub struct ExtractArgs {
    /// Package identifier, e.g. zlib-1.2.13-0
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Delete the archive after extracting it
    #[arg(long)]
    pub cleanup: bool,
}

#[derive(clap::Args, Debug)]
pub struct LinkArgs {
    /// Package identifier, e.g. zlib-1.2.13-0
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    #[command(flatten)]
    pub env: EnvArgs,
}

fn run(cli: Cli, cleanup_ctx: SharedCleanupContext) -> Result<()> {
    let runtime = RealRuntime;
    let config = Config::load(&runtime, cli.overrides())?;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Rename(args) => {
            commands::rename(
                &runtime,
                &config,
                &args.env.target()?,
                &args.destination,
                args.force,
                args.dry_run,
                cleanup_ctx,
                &mut out,
            )?;
        }
        Commands::Extract(args) => {
            commands::extract(&runtime, &config, &args.package, args.cleanup, cleanup_ctx, &mut out)?;
        }
        Commands::Activate(args) => {
            commands::activate(&runtime, &config, &args.package, &args.env.target()?, &mut out)?;
        }
        Commands::Deactivate(args) => {
            commands::deactivate(&runtime, &config, &args.package, &args.env.target()?, &mut out)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let cleanup_ctx = new_shared();
    let handler_ctx = Arc::clone(&cleanup_ctx);
    let ctrl_c_handler = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            if let Ok(ctx) = handler_ctx.lock() {
                ctx.cleanup();
            }
            std::process::exit(130); // Standard exit code for Ctrl-C
        }
    });

    let result = tokio::task::spawn_blocking(move || run(cli, cleanup_ctx)).await?;
    ctrl_c_handler.abort();
    result
}
