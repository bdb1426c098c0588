use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use git_flow::branches::FinishOptions;
use git_flow::flow::{GitFlow, InitOptions};
use git_flow::git::{Git2Backend, RepositoryBackend, TagInfo};
use git_flow::ui;

#[derive(Parser)]
#[command(
    name = "git-flow",
    about = "Automate the git-flow branching model: feature, release, hotfix and support branches"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Verbose output")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize git-flow configuration in this repository
    Init(InitArgs),
    /// Show all local branches with their tips
    Status,
    /// Manage feature branches
    Feature {
        #[command(subcommand)]
        action: FeatureAction,
    },
    /// Manage release branches
    Release {
        #[command(subcommand)]
        action: ReleaseAction,
    },
    /// Manage hotfix branches
    Hotfix {
        #[command(subcommand)]
        action: HotfixAction,
    },
    /// Manage support branches
    Support {
        #[command(subcommand)]
        action: SupportAction,
    },
    /// Restore branch tips from the most recent snapshot
    Undo {
        #[arg(long, help = "Do not park backup/<branch> refs before restoring")]
        no_backup: bool,
    },
}

#[derive(Args)]
struct InitArgs {
    #[arg(short, long, help = "Overwrite already-configured values with the defaults")]
    force: bool,
    #[arg(long, help = "Name of the production branch")]
    master: Option<String>,
    #[arg(long, help = "Name of the integration branch")]
    develop: Option<String>,
    #[arg(long, help = "Prefix for feature branches")]
    feature: Option<String>,
    #[arg(long, help = "Prefix for release branches")]
    release: Option<String>,
    #[arg(long, help = "Prefix for hotfix branches")]
    hotfix: Option<String>,
    #[arg(long, help = "Prefix for support branches")]
    support: Option<String>,
    #[arg(long, help = "Prefix for version tags")]
    versiontag: Option<String>,
}

#[derive(Args)]
struct StartArgs {
    /// Short name of the new branch
    name: String,
    /// Base to branch off from, instead of the type's default base
    base: Option<String>,
    #[arg(short = 'F', long, help = "Fetch from the remote before creating")]
    fetch: bool,
}

#[derive(Args)]
struct FinishArgs {
    /// Short name (or unique prefix) of the branch; defaults to the current branch
    name: Option<String>,
    #[arg(short = 'F', long, help = "Fetch from the remote before the up-to-date checks")]
    fetch: bool,
    #[arg(short, long, help = "Rebase onto the default base before merging")]
    rebase: bool,
    #[arg(short, long, help = "Keep the branch after finishing")]
    keep: bool,
    #[arg(short = 'D', long, help = "Force-delete even when not fully merged")]
    force_delete: bool,
    #[arg(short, long, help = "Push the advanced branches to the remote afterwards")]
    push: bool,
}

#[derive(Args)]
struct TaggedFinishArgs {
    #[command(flatten)]
    finish: FinishArgs,
    #[arg(short, long, help = "Message for the version tag")]
    message: Option<String>,
    #[arg(short, long, help = "Sign the version tag")]
    sign: bool,
    #[arg(short = 'u', long, help = "Key id to sign the version tag with")]
    signingkey: Option<String>,
    #[arg(short = 'n', long, help = "Do not create a version tag")]
    notag: bool,
}

#[derive(Subcommand)]
enum FeatureAction {
    /// List feature branches
    List,
    /// Start a new feature branch off develop
    Start(StartArgs),
    /// Merge a feature branch into develop and delete it
    Finish(FinishArgs),
    /// Push a feature branch to the remote and track it
    Publish {
        name: Option<String>,
    },
    /// Create a local feature branch tracking its remote counterpart
    Track {
        name: String,
    },
    /// Show a summary of the changes a feature branch holds
    Diff {
        name: Option<String>,
    },
    /// Rebase a feature branch onto develop
    Rebase {
        name: Option<String>,
    },
    /// Check out a feature branch
    Checkout {
        name: String,
    },
    /// Pull a feature branch from an arbitrary remote
    Pull {
        remote: String,
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ReleaseAction {
    /// List release branches
    List,
    /// Start a new release branch off develop
    Start(StartArgs),
    /// Merge a release branch into master and develop, tag it, delete it
    Finish(TaggedFinishArgs),
    /// Push a release branch to the remote and track it
    Publish {
        name: Option<String>,
    },
    /// Create a local release branch tracking its remote counterpart
    Track {
        name: String,
    },
}

#[derive(Subcommand)]
enum HotfixAction {
    /// List hotfix branches
    List,
    /// Start a new hotfix branch off master
    Start(StartArgs),
    /// Merge a hotfix branch into master and develop, tag it, delete it
    Finish(TaggedFinishArgs),
    /// Push a hotfix branch to the remote and track it
    Publish {
        name: Option<String>,
    },
    /// Create a local hotfix branch tracking its remote counterpart
    Track {
        name: String,
    },
}

#[derive(Subcommand)]
enum SupportAction {
    /// List support branches
    List,
    /// Start a new support branch off master
    Start(StartArgs),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        ui::display_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let backend = Git2Backend::open(".")?;
    let flow = GitFlow::new(backend);

    if !matches!(cli.command, Command::Init(_)) && !flow.is_initialized()? {
        return Err(git_flow::GitFlowError::NotInitialized.into());
    }

    match cli.command {
        Command::Init(args) => init(&flow, args),
        Command::Status => {
            ui::display_report(&flow.status()?);
            Ok(())
        }
        Command::Feature { action } => feature(&flow, action, cli.verbose),
        Command::Release { action } => release(&flow, action, cli.verbose),
        Command::Hotfix { action } => hotfix(&flow, action, cli.verbose),
        Command::Support { action } => support(&flow, action, cli.verbose),
        Command::Undo { no_backup } => {
            let snapshot = flow.undo(!no_backup)?;
            ui::display_success(&format!("Restored snapshot '{}'", snapshot.description));
            Ok(())
        }
    }
}

fn init(flow: &GitFlow<Git2Backend>, args: InitArgs) -> Result<()> {
    flow.init(&InitOptions {
        master: args.master,
        develop: args.develop,
        feature: args.feature,
        release: args.release,
        hotfix: args.hotfix,
        support: args.support,
        versiontag: args.versiontag,
        force_defaults: args.force,
    })?;
    // Integration branches must exist before any branch type can work.
    let backend = flow.backend();
    for branch in [flow.master_name()?, flow.develop_name()?] {
        if !backend.branch_exists(&branch)? {
            ui::display_status(&format!(
                "Branch '{}' does not exist yet; create it before starting branches",
                branch
            ));
        }
    }
    ui::display_success("Initialized git-flow configuration");
    Ok(())
}

fn list_type(flow: &GitFlow<Git2Backend>, identifier: &str, verbose: bool) -> Result<()> {
    let branches = flow.manager(identifier)?.list()?;
    if branches.is_empty() {
        ui::display_status(&format!("No {} branches exist", identifier));
        return Ok(());
    }
    let status: Vec<_> = flow
        .status()?
        .into_iter()
        .filter(|s| branches.contains(&s.name))
        .collect();
    ui::display_branches(&status, verbose);
    Ok(())
}

fn start(flow: &GitFlow<Git2Backend>, identifier: &str, args: StartArgs) -> Result<()> {
    let branch =
        flow.manager(identifier)?
            .create(&args.name, args.base.as_deref(), args.fetch)?;
    ui::display_success(&format!(
        "Created branch '{}'; it is now checked out",
        branch.name
    ));
    Ok(())
}

fn finish_options(args: &FinishArgs, tagging: Option<TagInfo>) -> FinishOptions {
    FinishOptions {
        fetch: args.fetch,
        rebase: args.rebase,
        keep: args.keep,
        force_delete: args.force_delete,
        push: args.push,
        tagging,
    }
}

fn finish(
    flow: &GitFlow<Git2Backend>,
    identifier: &str,
    args: &FinishArgs,
    tagging: Option<TagInfo>,
) -> Result<()> {
    let name = flow.name_or_current(identifier, args.name.as_deref().unwrap_or_default())?;
    let manager = flow.manager(identifier)?;
    flow.snap(
        &format!("finish {} {}", identifier, name),
        None,
    )?;
    manager.finish(&name, &finish_options(args, tagging))?;
    ui::display_success(&format!("Finished {} '{}'", identifier, name));
    Ok(())
}

fn publish(flow: &GitFlow<Git2Backend>, identifier: &str, name: Option<String>) -> Result<()> {
    let name = flow.name_or_current(identifier, name.as_deref().unwrap_or_default())?;
    flow.publish(identifier, &name)?;
    ui::display_success(&format!("Published {} '{}'", identifier, name));
    Ok(())
}

fn track(flow: &GitFlow<Git2Backend>, identifier: &str, name: &str) -> Result<()> {
    flow.track(identifier, name)?;
    ui::display_success(&format!("Tracking {} '{}'", identifier, name));
    Ok(())
}

fn tag_info(args: &TaggedFinishArgs) -> Option<TagInfo> {
    if args.notag {
        return None;
    }
    // No -m means no annotation: the tag stays lightweight.
    Some(TagInfo {
        message: args.message.clone(),
        sign: args.sign,
        signing_key: args.signingkey.clone(),
    })
}

fn feature(flow: &GitFlow<Git2Backend>, action: FeatureAction, verbose: bool) -> Result<()> {
    const TYPE: &str = "feature";
    match action {
        FeatureAction::List => list_type(flow, TYPE, verbose),
        FeatureAction::Start(args) => start(flow, TYPE, args),
        FeatureAction::Finish(args) => finish(flow, TYPE, &args, None),
        FeatureAction::Publish { name } => publish(flow, TYPE, name),
        FeatureAction::Track { name } => track(flow, TYPE, &name),
        FeatureAction::Diff { name } => {
            let name = flow.name_or_current(TYPE, name.as_deref().unwrap_or_default())?;
            let manager = flow.manager(TYPE)?;
            let backend = flow.backend();
            let base = backend.branch_head(&manager.default_base()?)?;
            let tip = backend.branch_head(&manager.full_name(&name))?;
            println!("{}", backend.diff_summary(base, tip)?);
            Ok(())
        }
        FeatureAction::Rebase { name } => {
            let name = flow.name_or_current(TYPE, name.as_deref().unwrap_or_default())?;
            let manager = flow.manager(TYPE)?;
            flow.backend()
                .rebase(&manager.full_name(&name), &manager.default_base()?)?;
            ui::display_success(&format!("Rebased feature '{}'", name));
            Ok(())
        }
        FeatureAction::Checkout { name } => {
            let manager = flow.manager(TYPE)?;
            let full = manager.by_name_prefix(&name)?;
            flow.backend().checkout(&full)?;
            ui::display_success(&format!("Switched to '{}'", full));
            Ok(())
        }
        FeatureAction::Pull { remote, name } => {
            let name = match name {
                Some(name) => name,
                None => flow.name_or_current(TYPE, "")?,
            };
            flow.pull(TYPE, &remote, &name)?;
            ui::display_success(&format!("Pulled feature '{}' from '{}'", name, remote));
            Ok(())
        }
    }
}

fn release(flow: &GitFlow<Git2Backend>, action: ReleaseAction, verbose: bool) -> Result<()> {
    const TYPE: &str = "release";
    match action {
        ReleaseAction::List => list_type(flow, TYPE, verbose),
        ReleaseAction::Start(args) => start(flow, TYPE, args),
        ReleaseAction::Finish(args) => {
            let tagging = tag_info(&args);
            finish(flow, TYPE, &args.finish, tagging)
        }
        ReleaseAction::Publish { name } => publish(flow, TYPE, name),
        ReleaseAction::Track { name } => track(flow, TYPE, &name),
    }
}

fn hotfix(flow: &GitFlow<Git2Backend>, action: HotfixAction, verbose: bool) -> Result<()> {
    const TYPE: &str = "hotfix";
    match action {
        HotfixAction::List => list_type(flow, TYPE, verbose),
        HotfixAction::Start(args) => start(flow, TYPE, args),
        HotfixAction::Finish(args) => {
            let tagging = tag_info(&args);
            finish(flow, TYPE, &args.finish, tagging)
        }
        HotfixAction::Publish { name } => publish(flow, TYPE, name),
        HotfixAction::Track { name } => track(flow, TYPE, &name),
    }
}

fn support(flow: &GitFlow<Git2Backend>, action: SupportAction, verbose: bool) -> Result<()> {
    const TYPE: &str = "support";
    match action {
        SupportAction::List => list_type(flow, TYPE, verbose),
        SupportAction::Start(args) => start(flow, TYPE, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged_args(message: Option<&str>, sign: bool, notag: bool) -> TaggedFinishArgs {
        TaggedFinishArgs {
            finish: FinishArgs {
                name: None,
                fetch: false,
                rebase: false,
                keep: false,
                force_delete: false,
                push: false,
            },
            message: message.map(str::to_string),
            sign,
            signingkey: None,
            notag,
        }
    }

    #[test]
    fn test_tag_info_without_message_stays_lightweight() {
        let info = tag_info(&tagged_args(None, false, false)).unwrap();
        assert_eq!(info.message, None);
        assert!(!info.sign);
    }

    #[test]
    fn test_tag_info_carries_message_and_signing() {
        let info = tag_info(&tagged_args(Some("Release 1.0"), true, false)).unwrap();
        assert_eq!(info.message.as_deref(), Some("Release 1.0"));
        assert!(info.sign);
    }

    #[test]
    fn test_tag_info_notag_suppresses_tagging() {
        assert!(tag_info(&tagged_args(None, false, true)).is_none());
    }
}
