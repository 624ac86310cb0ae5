//! oproxy: service registry and access control for a layered game relay.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};

mod access;
mod config;
mod engine;
mod error;
mod firewall;
mod node;
mod process;
mod registry;
mod role;
mod service;
mod store;

use access::{AccessDimension, AccessMode};
use config::Config;
use engine::SystemdEngine;
use firewall::{FirewallMode, FirewallSync, Ufw};
use node::Node;
use role::{relay_service, Bootstrap, EdgeGate, Role};
use store::{DocumentStore, Snapshot};

#[derive(Parser)]
#[command(
    name = "oproxy",
    version,
    about = "Configure edge and relay nodes of a ZBProxy-based game relay"
)]
struct Cli {
    /// Extra TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage an edge node (proxy server)
    Proxy {
        #[command(subcommand)]
        command: ProxyCommand,
    },
    /// Manage a relay node (transit server)
    Transit {
        #[command(subcommand)]
        command: TransitCommand,
    },
    /// Reconcile the host firewall with the document
    Firewall {
        #[command(subcommand)]
        command: FirewallCommand,
    },
    /// Ask the service manager to reload the proxy engine
    Reload,
    /// Show services and access lists
    Status,
}

#[derive(Subcommand)]
enum ProxyCommand {
    /// Write a fresh edge document forwarding to one upstream
    Setup {
        target_ip: String,
        target_port: u16,
        listen_port: u16,
        /// Face players directly instead of sitting behind relays
        #[arg(long)]
        standalone: bool,
        /// Replace an existing document
        #[arg(long)]
        force: bool,
    },
    /// Manage the relays this edge admits
    Transit {
        #[command(subcommand)]
        action: MemberAction,
    },
    /// Switch hostname gating on or off
    Hostname { state: Toggle },
}

#[derive(Subcommand)]
enum MemberAction {
    Add { id: String },
    Remove { id: String },
}

#[derive(Subcommand)]
enum TransitCommand {
    /// Write a fresh, empty relay document
    Setup {
        /// Replace an existing document
        #[arg(long)]
        force: bool,
    },
    /// Manage relayed services
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },
    /// Manage access list members and gating
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },
    /// Create or delete access lists
    List {
        #[command(subcommand)]
        action: ListAction,
    },
}

#[derive(Subcommand)]
enum TargetAction {
    Add {
        target_ip: String,
        target_port: u16,
        listen_port: u16,
        name: String,
        /// Start with the player list not enforced
        #[arg(long)]
        open: bool,
    },
    Remove {
        name: String,
        /// Also delete the service's list and close its port
        #[arg(long)]
        purge: bool,
    },
}

#[derive(Subcommand)]
enum WhitelistAction {
    Add {
        id: String,
        group: String,
    },
    Remove {
        id: String,
        group: String,
    },
    /// Gate a service on a list
    On {
        service: String,
        /// ip, hostname or name
        #[arg(long, default_value = "name")]
        by: AccessDimension,
        /// List to gate on; defaults to the one last used
        #[arg(long)]
        list: Option<String>,
    },
    /// Stop gating a service
    Off {
        service: String,
        #[arg(long, default_value = "name")]
        by: AccessDimension,
    },
}

#[derive(Subcommand)]
enum ListAction {
    Create { name: String },
    Delete { name: String },
}

#[derive(Subcommand)]
enum FirewallCommand {
    /// Allow every listen port in the document again
    Sync,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn mode(self) -> AccessMode {
        match self {
            Toggle::On => AccessMode::AllowByList,
            Toggle::Off => AccessMode::Unrestricted,
        }
    }
}

impl Command {
    /// `firewall`, `reload` and `status` never consult the role; they get
    /// `Relay`, which places no limit on the document they read.
    fn role(&self) -> Role {
        match self {
            Command::Proxy { .. } => Role::Edge,
            _ => Role::Relay,
        }
    }

    fn needs_privilege(&self) -> bool {
        !matches!(self, Command::Status)
    }
}

type ZbNode = Node<Ufw, SystemdEngine>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;
    debug!("Loaded config: {:?}", cfg);

    if cfg.require_root && cli.command.needs_privilege() {
        preflight()?;
    }

    let node = Node::new(
        cli.command.role(),
        DocumentStore::new(&cfg.document_path),
        FirewallSync::new(Ufw::new(&cfg.firewall_program), cfg.firewall_mode),
        SystemdEngine::new(&cfg.service_manager, &cfg.engine_action, &cfg.engine_unit),
    )
    .reload_after_change(cfg.reload_after_change);

    match cli.command {
        Command::Proxy { command } => run_proxy(&node, command).await,
        Command::Transit { command } => run_transit(&node, command).await,
        Command::Firewall {
            command: FirewallCommand::Sync,
        } => sync_firewall(&node, cfg.firewall_mode).await,
        Command::Reload => {
            node.reload().await?;
            info!("Proxy engine reloaded");
            Ok(())
        }
        Command::Status => {
            print_status(&node.snapshot()?);
            Ok(())
        }
    }
}

async fn run_proxy(node: &ZbNode, command: ProxyCommand) -> anyhow::Result<()> {
    match command {
        ProxyCommand::Setup {
            target_ip,
            target_port,
            listen_port,
            standalone,
            force,
        } => {
            let gate = if standalone {
                EdgeGate::Standalone
            } else {
                EdgeGate::RelayAware
            };
            let bootstrap = Bootstrap::Edge {
                target_address: target_ip,
                target_port,
                listen: listen_port,
                gate,
            };
            node.setup(&bootstrap, force).await?;
        }
        ProxyCommand::Transit {
            action: MemberAction::Add { id },
        } => tolerate(node.allow_relay(&id).await)?,
        ProxyCommand::Transit {
            action: MemberAction::Remove { id },
        } => tolerate(node.forget_relay(&id).await)?,
        ProxyCommand::Hostname { state } => node.set_edge_gate(state.mode()).await?,
    }
    Ok(())
}

async fn run_transit(node: &ZbNode, command: TransitCommand) -> anyhow::Result<()> {
    match command {
        TransitCommand::Setup { force } => node.setup(&Bootstrap::Relay, force).await?,
        TransitCommand::Target { action } => match action {
            TargetAction::Add {
                target_ip,
                target_port,
                listen_port,
                name,
                open,
            } => {
                let service = relay_service(&name, &target_ip, target_port, listen_port, !open);
                node.add_service(service).await?;
            }
            TargetAction::Remove { name, purge } => {
                node.remove_service(&name, purge).await?;
            }
        },
        TransitCommand::Whitelist { action } => match action {
            WhitelistAction::Add { id, group } => {
                if !node.ensure_member(&group, &id).await? {
                    warn!("{} is already in {}", id, group);
                }
            }
            WhitelistAction::Remove { id, group } => {
                tolerate(node.remove_member(&group, &id).await)?
            }
            WhitelistAction::On { service, by, list } => {
                node.set_access_mode(&service, by, AccessMode::AllowByList, list.as_deref())
                    .await?
            }
            WhitelistAction::Off { service, by } => {
                node.set_access_mode(&service, by, AccessMode::Unrestricted, None)
                    .await?
            }
        },
        TransitCommand::List { action } => match action {
            ListAction::Create { name } => node.create_list(&name).await?,
            ListAction::Delete { name } => node.remove_list(&name).await?,
        },
    }
    Ok(())
}

/// Membership no-ops are reported but do not fail the command.
fn tolerate(result: error::Result<()>) -> anyhow::Result<()> {
    match result {
        Err(e) if e.is_membership_noop() => {
            warn!("{}", e);
            Ok(())
        }
        other => Ok(other?),
    }
}

async fn sync_firewall(node: &ZbNode, mode: FirewallMode) -> anyhow::Result<()> {
    let outcomes = node.resync_firewall().await?;
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("{:>5}/tcp  allowed", outcome.port),
            Err(e) => {
                failed += 1;
                println!("{:>5}/tcp  failed: {}", outcome.port, e);
            }
        }
    }
    if failed > 0 && mode == FirewallMode::Strict {
        bail!("{} of {} port(s) could not be allowed", failed, outcomes.len());
    }
    Ok(())
}

fn print_status(snap: &Snapshot) {
    let registry = &snap.registry;
    println!("Revision {}", &snap.revision.as_str()[..12]);

    println!("Services:");
    if registry.services().is_empty() {
        println!("  (none)");
    }
    for service in registry.services() {
        let rules: Vec<String> = service
            .rules()
            .map(|(dimension, rule)| {
                if rule.is_restricted() {
                    format!("{}=allow[{}]", dimension, rule.list_tags.join(","))
                } else {
                    format!("{}=open", dimension)
                }
            })
            .collect();
        println!(
            "  {:<20} :{:<5} -> {}:{}  {}",
            service.name,
            service.listen,
            service.target_address,
            service.target_port,
            rules.join(" ")
        );
    }

    println!("Lists:");
    if registry.lists().next().is_none() {
        println!("  (none)");
    }
    for (name, list) in registry.lists() {
        if list.is_empty() {
            println!("  {:<20} (empty)", name);
            continue;
        }
        let members: Vec<&str> = list.iter().collect();
        println!("  {:<20} ({}) {}", name, list.len(), members.join(", "));
    }
}

/// Mutating commands need Linux and an effective uid of 0.
fn preflight() -> anyhow::Result<()> {
    if std::env::consts::OS != "linux" {
        bail!("oproxy only runs on Linux (set require_root = false to skip this check)");
    }
    let status = std::fs::read_to_string("/proc/self/status")
        .context("Failed to read /proc/self/status")?;
    let euid = effective_uid(&status).context("Could not determine effective uid")?;
    if euid != 0 {
        bail!("This command must be run as root (set require_root = false to skip this check)");
    }
    Ok(())
}

/// Second field of the `Uid:` line: real, effective, saved, filesystem.
fn effective_uid(proc_status: &str) -> Option<u32> {
    proc_status
        .lines()
        .find_map(|l| l.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().nth(1))
        .and_then(|uid| uid.parse().ok())
}
