// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use hostprep::{
    config::HostConfig,
    menu::run_menu,
    path::{default_config_path, invoking_user_name, TargetUser},
    syscall::SystemRunner,
    task::{AliasMode, Provisioner, Task},
};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::{fs::File, path::PathBuf, process::exit, sync::Arc};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  hostprep [options] [<hostprep-command>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Account to provision instead of the invoking user.
    #[arg(short, long, global = true, value_name = "name")]
    pub user: Option<String>,

    /// Also write log output to file.
    #[arg(long, global = true, value_name = "path")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => default_config_path()?,
        };
        let config = HostConfig::load(&config_path)?;
        debug!("configuration:\n{config}");

        let name = self
            .user
            .or_else(|| config.user.name.clone())
            .or_else(invoking_user_name)
            .ok_or_else(|| anyhow!("cannot determine user to provision, use --user"))?;
        let user = TargetUser::lookup(&name)?;

        let provisioner = Provisioner::new(Arc::new(SystemRunner), config, user);
        match self.command.unwrap_or(Command::Menu) {
            Command::Preflight => provisioner.run(Task::Preflight).await?,
            Command::Update => provisioner.run(Task::Update).await?,
            Command::Sudoers => provisioner.run(Task::Sudoers).await?,
            Command::Ssh => provisioner.run(Task::Ssh).await?,
            Command::Keygen => provisioner.run(Task::Keygen).await?,
            Command::Bashrc => provisioner.run(Task::Bashrc).await?,
            Command::Aliases(opts) => run_aliases(provisioner, opts).await?,
            Command::Snmpd => provisioner.run(Task::Snmpd).await?,
            Command::Docker => provisioner.run(Task::Docker).await?,
            Command::All => provisioner.run_all().await?,
            Command::Menu => run_menu(&provisioner).await?,
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Check required commands and install missing packages.
    Preflight,

    /// Upgrade system packages.
    Update,

    /// Grant sudo rights to user.
    Sudoers,

    /// Enforce SSH daemon settings.
    Ssh,

    /// Generate SSH key pair for user.
    Keygen,

    /// Install managed .bashrc for user.
    Bashrc,

    /// Merge managed aliases into user's alias file.
    #[command(override_usage = "hostprep aliases [options]")]
    Aliases(AliasOptions),

    /// Install and configure SNMP daemon.
    Snmpd,

    /// Install Docker engine.
    Docker,

    /// Run every step in order.
    All,

    /// Pick steps from an interactive menu.
    Menu,
}

#[derive(Args, Clone, Debug)]
struct AliasOptions {
    /// Keep every unrecognized alias without asking.
    #[arg(long, group = "decision")]
    pub keep_all: bool,

    /// Drop every unrecognized alias without asking.
    #[arg(long, group = "decision")]
    pub discard_unknown: bool,

    /// Alias file to reconcile, relative to user's home unless absolute.
    #[arg(short, long, value_name = "path")]
    pub file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(error) = init_logging(cli.log_file.as_ref()) {
        eprintln!("{error:?}");
        exit(1);
    }

    if let Err(error) = cli.run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let file_layer = match log_file {
        Some(path) => {
            let file = File::options().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(layer)
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

async fn run_aliases(provisioner: Provisioner<SystemRunner>, opts: AliasOptions) -> Result<()> {
    let mode = if opts.keep_all {
        AliasMode::KeepAll
    } else if opts.discard_unknown {
        AliasMode::DiscardUnknown
    } else {
        AliasMode::Interactive
    };

    let mut provisioner = provisioner.with_alias_mode(mode);
    if let Some(file) = opts.file {
        provisioner = provisioner.with_alias_file(file);
    }
    provisioner.run(Task::Aliases).await?;

    Ok(())
}
