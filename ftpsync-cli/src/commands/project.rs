//! `ftpsync project add|update|remove|list|show`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use ftpsync_core::{
    registry,
    types::{ProjectName, ProjectProfile, Protocol, RemoteTarget},
};
use ftpsync_sync::pipeline;

use super::super::ProtocolArg;
use super::home;

/// Manage project profiles.
#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Register a new project.
    Add(AddArgs),

    /// Change settings of an existing project.
    Update(UpdateArgs),

    /// Unregister a project. Sync state is kept unless --purge-state is given.
    Remove(RemoveArgs),

    /// List registered projects.
    List(ListArgs),

    /// Print one project's profile.
    Show(ShowArgs),

    /// Treat the current local tree as already uploaded.
    MarkSynced(MarkSyncedArgs),
}

/// Settings shared by `add` and `update`; every field is optional on update.
#[derive(Args, Debug, Default)]
pub struct ProfileFields {
    /// Transport: ftp | local.
    #[arg(long, value_name = "PROTOCOL")]
    pub protocol: Option<ProtocolArg>,

    /// FTP server host name.
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Remote directory that mirrors the local root.
    #[arg(long = "remote-path", value_name = "PATH")]
    pub remote_path: Option<String>,

    /// Login user name.
    #[arg(long = "user", short = 'u')]
    pub username: Option<String>,

    /// Environment variable that holds the password.
    #[arg(long = "password-env", value_name = "VAR")]
    pub password_env: Option<String>,

    /// Password stored in plain text in the profile.
    #[arg(long)]
    pub password: Option<String>,

    /// Extra ignore pattern (repeatable).
    #[arg(long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Maximum simultaneous transfers.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Skip files larger than this many bytes (0 = no limit).
    #[arg(long = "max-file-size", value_name = "BYTES")]
    pub max_file_size: Option<u64>,

    /// Keep remote copies of files deleted locally.
    #[arg(long = "keep-remote-deletes")]
    pub keep_remote_deletes: bool,
}

impl ProfileFields {
    fn apply(self, profile: &mut ProjectProfile) {
        if let Some(protocol) = self.protocol {
            profile.remote.protocol = protocol.into();
        }
        if let Some(host) = self.host {
            profile.remote.host = host;
        }
        if let Some(port) = self.port {
            profile.remote.port = port;
        }
        if let Some(path) = self.remote_path {
            profile.remote.base_path = path;
        }
        if let Some(user) = self.username {
            profile.credentials.username = user;
        }
        if let Some(var) = self.password_env {
            profile.credentials.password_env = Some(var);
            profile.credentials.password = None;
        }
        if let Some(password) = self.password {
            profile.credentials.password = Some(password);
            profile.credentials.password_env = None;
        }
        for pattern in self.ignore {
            if !profile.ignore.contains(&pattern) {
                profile.ignore.push(pattern);
            }
        }
        if let Some(concurrency) = self.concurrency {
            profile.settings.concurrency = concurrency.max(1);
        }
        if let Some(limit) = self.max_file_size {
            profile.settings.max_file_size = limit;
        }
        if self.keep_remote_deletes {
            profile.settings.delete_remote = false;
        }
    }
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Project name (letters, digits, '-', '_', '.').
    pub name: String,

    /// Local directory to mirror.
    #[arg(long)]
    pub root: PathBuf,

    /// The remote already holds this tree: record every file as synced
    /// so the first sync only uploads later changes.
    #[arg(long = "mark-synced")]
    pub mark_synced: bool,

    #[command(flatten)]
    pub fields: ProfileFields,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub name: String,

    /// Move the project to another local directory.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Drop an ignore pattern (repeatable).
    #[arg(long = "unignore", value_name = "GLOB")]
    pub unignore: Vec<String>,

    /// Delete remote copies of files deleted locally again.
    #[arg(long = "delete-remote", conflicts_with = "keep_remote_deletes")]
    pub delete_remote: bool,

    #[command(flatten)]
    pub fields: ProfileFields,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub name: String,

    /// Also delete the project's sync state.
    #[arg(long = "purge-state")]
    pub purge_state: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub name: String,
}

#[derive(Args, Debug)]
pub struct MarkSyncedArgs {
    pub name: String,
}

pub fn run(cmd: ProjectCommand) -> Result<()> {
    match cmd {
        ProjectCommand::Add(args) => add(args),
        ProjectCommand::Update(args) => update(args),
        ProjectCommand::Remove(args) => remove(args),
        ProjectCommand::List(args) => list(args),
        ProjectCommand::Show(args) => show(args),
        ProjectCommand::MarkSynced(args) => {
            mark_synced(&home()?, &ProjectName::from(args.name))
        }
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    let root = fs::canonicalize(root)
        .with_context(|| format!("local root '{}' does not exist", root.display()))?;
    if !root.is_dir() {
        bail!("local root '{}' is not a directory", root.display());
    }
    Ok(root)
}

fn add(args: AddArgs) -> Result<()> {
    let home = home()?;
    let root = canonical_root(&args.root)?;
    let mut profile = ProjectProfile::new(
        ProjectName::from(args.name.clone()),
        root,
        RemoteTarget {
            protocol: Protocol::Ftp,
            host: String::new(),
            port: 21,
            base_path: String::new(),
        },
    );
    args.fields.apply(&mut profile);
    if profile.remote.protocol == Protocol::Ftp && profile.remote.host.is_empty() {
        bail!("--host is required for ftp projects");
    }

    let profile = registry::add_at(&home, profile)
        .with_context(|| format!("failed to add project '{}'", args.name))?;
    println!(
        "✓ Added '{}' ({} → {})",
        profile.name,
        profile.local_root.display(),
        remote_label(&profile)
    );
    if args.mark_synced {
        mark_synced(&home, &profile.name)?;
    }
    Ok(())
}

fn mark_synced(home: &Path, name: &ProjectName) -> Result<()> {
    let marked = pipeline::mark_synced(home, name)
        .with_context(|| format!("failed to mark '{name}' as synced"))?;
    println!("✓ Marked {marked} file(s) of '{name}' as already synced");
    Ok(())
}

fn update(args: UpdateArgs) -> Result<()> {
    let home = home()?;
    let root = args.root.as_deref().map(canonical_root).transpose()?;
    let name = ProjectName::from(args.name.clone());
    let UpdateArgs {
        unignore,
        delete_remote,
        fields,
        ..
    } = args;

    let profile = registry::update_at(&home, &name, |profile| {
        if let Some(root) = root {
            profile.local_root = root;
        }
        fields.apply(profile);
        profile.ignore.retain(|p| !unignore.contains(p));
        if delete_remote {
            profile.settings.delete_remote = true;
        }
    })
    .with_context(|| format!("failed to update project '{name}'"))?;

    println!("✓ Updated '{}'", profile.name);
    Ok(())
}

fn remove(args: RemoveArgs) -> Result<()> {
    let home = home()?;
    let name = ProjectName::from(args.name);
    let profile = pipeline::remove_project(&home, &name, args.purge_state)
        .with_context(|| format!("failed to remove project '{name}'"))?;
    if args.purge_state {
        println!("✓ Removed '{}' and its sync state", profile.name);
    } else {
        println!(
            "✓ Removed '{}' (sync state kept; re-adding {} resumes it)",
            profile.name,
            profile.local_root.display()
        );
    }
    Ok(())
}

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "project")]
    name: String,
    #[tabled(rename = "local root")]
    root: String,
    #[tabled(rename = "remote")]
    remote: String,
    #[tabled(rename = "ignores")]
    ignores: usize,
}

fn list(args: ListArgs) -> Result<()> {
    let home = home()?;
    let profiles = pipeline::list_projects(&home).context("failed to load project registry")?;

    if args.json {
        let redacted: Vec<ProjectProfile> = profiles.iter().cloned().map(redact).collect();
        println!("{}", serde_json::to_string_pretty(&redacted)?);
        return Ok(());
    }
    if profiles.is_empty() {
        println!("No projects registered.");
        println!("Run: ftpsync project add <name> --root <dir> --host <host>");
        return Ok(());
    }

    let rows: Vec<ProjectRow> = profiles
        .iter()
        .map(|p| ProjectRow {
            name: p.name.to_string(),
            root: p.local_root.display().to_string(),
            remote: remote_label(p),
            ignores: p.ignore.len(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

/// Replace an inline password with a placeholder for display.
fn redact(mut profile: ProjectProfile) -> ProjectProfile {
    if profile.credentials.password.is_some() {
        profile.credentials.password = Some(REDACTED.to_string());
    }
    profile
}

const REDACTED: &str = "********";

fn show(args: ShowArgs) -> Result<()> {
    let home = home()?;
    let name = ProjectName::from(args.name);
    let profile = registry::select_at(&home, &name)
        .with_context(|| format!("unknown project '{name}'"))?;

    let password = match (&profile.credentials.password_env, &profile.credentials.password) {
        (Some(var), _) => format!("${var}"),
        (None, Some(_)) => "(inline, hidden)".to_string(),
        (None, None) => "(none)".to_string(),
    };
    println!("name:           {}", profile.name);
    println!("id:             {}", profile.id);
    println!("local root:     {}", profile.local_root.display());
    println!("remote:         {}", remote_label(&profile));
    println!("user:           {}", profile.credentials.username);
    println!("password:       {password}");
    println!("ignore:         {}", profile.ignore.join(", "));
    println!("concurrency:    {}", profile.settings.concurrency);
    println!("retries:        {}", profile.settings.max_retries);
    println!("max file size:  {}", profile.settings.max_file_size);
    println!("delete remote:  {}", profile.settings.delete_remote);
    Ok(())
}

fn remote_label(profile: &ProjectProfile) -> String {
    let remote = &profile.remote;
    match remote.protocol {
        Protocol::Ftp => format!("ftp://{}:{}{}", remote.host, remote.port, remote.base_path),
        Protocol::Local => format!("local:{}", remote.base_path),
    }
}
