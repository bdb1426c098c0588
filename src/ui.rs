//! Terminal output helpers.
//!
//! Pure printing; no state and no interaction. The workflow engine never
//! prints, everything user-facing funnels through here.

use console::style;
use git2::Oid;

use crate::flow::BranchStatus;

pub fn display_error(message: &str) {
    eprintln!("{} {}", style("ERROR:").red(), message);
}

pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green(), message);
}

pub fn display_status(message: &str) {
    println!("{} {}", style("→").yellow(), message);
}

fn short_hash(oid: Oid) -> String {
    let hash = oid.to_string();
    hash[..hash.len().min(7)].to_string()
}

/// Print the branch list for one type. The active branch gets a `*` marker;
/// verbose mode adds the short tip hash.
pub fn display_branches(branches: &[BranchStatus], verbose: bool) {
    for branch in branches {
        let marker = if branch.active { "*" } else { " " };
        if verbose {
            println!(
                "{} {}  {}",
                marker,
                branch.name,
                style(short_hash(branch.head)).dim()
            );
        } else {
            println!("{} {}", marker, branch.name);
        }
    }
}

/// Print the full repository status report.
pub fn display_report(branches: &[BranchStatus]) {
    println!("{}", style("Branches:").bold());
    display_branches(branches, true);
}
