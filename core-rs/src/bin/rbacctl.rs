//! rbacctl - administration CLI for the self-service RBAC core
//!
//! Inspect and edit role assignments, and ask the enforcer for decisions the
//! way the HTTP layer would.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use selfservice_rbac::roles::{migrate_legacy, Migration};
use selfservice_rbac::{Enforcer, RbacConfig, RbacError, RoleStore};

#[derive(Parser)]
#[command(name = "rbacctl")]
#[command(version)]
#[command(about = "Self-service RBAC administration", long_about = None)]
struct Cli {
    /// YAML config file (environment variables still override it)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
    /// Configuration root, overrides the config file
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a legacy roles.yaml into the split file layout
    Migrate,
    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that work on an opened role store.
#[derive(Subcommand)]
enum StoreCommand {
    /// Show the resolved principal context of a user
    Context {
        user: String,
    },
    /// Decide whether a user may perform an action on a resource
    Check {
        user: String,
        resource: String,
        action: String,
        /// Application the request is scoped to
        #[arg(long, default_value = "")]
        app: String,
    },
    /// Show canView/canManage for a user on a resource
    Permissions {
        user: String,
        resource: String,
        #[arg(long, default_value = "")]
        app: String,
    },
    /// Print all role assignments (YAML)
    Dump,
    /// List the active policy rows
    Policy,
    /// Grant a role to a group for one application
    GrantAppRole { group: String, app: String, role: String },
    /// Revoke an application role from a group
    RevokeAppRole { group: String, app: String, role: String },
    /// Grant a global role to a group
    GrantGroupRole { group: String, role: String },
    /// Revoke a global role from a group
    RevokeGroupRole { group: String, role: String },
    /// Grant a global role to a user
    GrantUserRole { user: String, role: String },
    /// Revoke a global role from a user
    RevokeUserRole { user: String, role: String },
}

fn load_config(cli: &Cli) -> Result<RbacConfig> {
    let mut config = match &cli.config {
        Some(path) => RbacConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RbacConfig::from_env()?,
    };
    if let Some(dir) = &cli.config_dir {
        config.config_dir = dir.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Migrate => migrate(&config),
        Commands::Store(command) => run(command, &config),
    }
}

fn migrate(config: &RbacConfig) -> Result<()> {
    let dir = config.roles_dir();
    match migrate_legacy(&dir)? {
        Migration::Migrated { from } => println!("Migrated {} into {}", from.display(), dir.display()),
        Migration::NotNeeded => println!("Nothing to migrate in {}", dir.display()),
    }
    Ok(())
}

fn run(command: StoreCommand, config: &RbacConfig) -> Result<()> {
    let store = Arc::new(RoleStore::open(config.clone()).context("opening role store")?);

    match command {
        StoreCommand::Context { user } => {
            let enforcer = Enforcer::from_config(config, Arc::clone(&store));
            let ctx = enforcer.get_user_context(&user);
            print!("{}", serde_yaml::to_string(&ctx)?);
        }
        StoreCommand::Check { user, resource, action, app } => {
            let enforcer = Enforcer::from_config(config, Arc::clone(&store));
            match enforcer.enforce_for_user(&user, &resource, &action, &app) {
                Ok(()) => println!("{} {} {} {}", "ALLOW".green().bold(), user, action, resource),
                Err(RbacError::Forbidden(denied)) => {
                    println!("{} {}", "DENY".red().bold(), denied.message);
                    println!("  roles: {}", denied.roles.join(", "));
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
        StoreCommand::Permissions { user, resource, app } => {
            let enforcer = Enforcer::from_config(config, Arc::clone(&store));
            let ctx = enforcer.get_user_context(&user);
            let permissions = enforcer.calculate_resource_permissions(&ctx, &resource, &app, None, None);
            println!("{}", serde_json::to_string_pretty(&permissions)?);
        }
        StoreCommand::Dump => {
            print!("{}", serde_yaml::to_string(&store.snapshot()?)?);
        }
        StoreCommand::Policy => {
            let enforcer = Enforcer::from_config(config, Arc::clone(&store));
            let rules = enforcer.engine().rule_set();
            if rules.rules.is_empty() {
                println!("No policy rows loaded from {}", config.policy_file_path().display());
            }
            for rule in &rules.rules {
                let actions: Vec<String> = rule.actions.iter().map(|a| a.to_string()).collect();
                println!(
                    "{:<20} {:<32} {:<24} {}",
                    rule.subject,
                    rule.object,
                    actions.join("|"),
                    rule.app
                );
            }
        }
        StoreCommand::GrantAppRole { group, app, role } => {
            store.add_grp2apps2roles(&group, &app, &role)?;
            println!("{} {} -> {}:{}", "granted".green(), group, app, role);
        }
        StoreCommand::RevokeAppRole { group, app, role } => {
            store.del_grp2apps2roles(&group, &app, &role)?;
            println!("{} {} -> {}:{}", "revoked".yellow(), group, app, role);
        }
        StoreCommand::GrantGroupRole { group, role } => {
            store.add_grp2globalroles(&group, &role)?;
            println!("{} {} -> {}", "granted".green(), group, role);
        }
        StoreCommand::RevokeGroupRole { group, role } => {
            store.del_grp2globalroles(&group, &role)?;
            println!("{} {} -> {}", "revoked".yellow(), group, role);
        }
        StoreCommand::GrantUserRole { user, role } => {
            store.add_users2globalroles(&user, &role)?;
            println!("{} {} -> {}", "granted".green(), user, role);
        }
        StoreCommand::RevokeUserRole { user, role } => {
            store.del_users2globalroles(&user, &role)?;
            println!("{} {} -> {}", "revoked".yellow(), user, role);
        }
    }

    Ok(())
}
