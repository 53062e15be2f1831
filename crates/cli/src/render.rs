//! Human and JSON output for command results.

use anyhow::Result;
use plinth_apply::{GroupOutcome, UpdateReport};
use plinth_core::{Parent, ProjectState};
use plinth_persist::Snapshot;

use crate::Output;

fn parent_label(p: &Parent) -> String {
    match p {
        Parent::None => "-".to_string(),
        Parent::Organization(id) => format!("organizations/{}", id),
        Parent::Folder(id) => format!("folders/{}", id),
    }
}

fn print_state(s: &ProjectState) {
    let id = s.id.as_deref().unwrap_or("(untracked)");
    println!("project:       {} [{}]", s.project_id, id);
    println!("number:        {}", if s.number.is_empty() { "-" } else { s.number.as_str() });
    println!("name:          {}", s.display_name);
    println!("parent:        {}", parent_label(&s.parent));
    let billing = if s.billing_account_id.is_empty() { "(unlinked)" } else { s.billing_account_id.as_str() };
    println!("billing:       {}", billing);
    if !s.labels.is_empty() {
        let labels: Vec<String> = s.labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!("labels:        {}", labels.join(","));
    }
    println!("skip_delete:   {}", s.skip_delete);
    for app in &s.app_runtime {
        println!("app runtime:   {} ({}, {})", app.name, app.location_id, app.serving_status);
        if !app.default_hostname.is_empty() {
            println!("  hostname:    {}", app.default_hostname);
        }
        for r in &app.dispatch_rules {
            println!("  dispatch:    {}{} -> {}", r.domain, r.path, r.service);
        }
    }
}

pub(crate) fn state(out: Output, s: &ProjectState) -> Result<()> {
    match out {
        Output::Human => print_state(s),
        Output::Json => println!("{}", serde_json::to_string_pretty(s)?),
    }
    Ok(())
}

pub(crate) fn up_to_date(out: Output, s: &ProjectState) -> Result<()> {
    match out {
        Output::Human => println!("{} is up to date", s.project_id),
        Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({"up_to_date": true, "state": s}))?),
    }
    Ok(())
}

pub(crate) fn update_report(out: Output, s: &ProjectState, report: &UpdateReport) -> Result<()> {
    match out {
        Output::Human => {
            for (group, outcome) in report.groups() {
                match outcome {
                    GroupOutcome::Unchanged => {}
                    GroupOutcome::Succeeded => println!("{:<13} updated", group),
                    GroupOutcome::Failed(reason) => println!("{:<13} FAILED: {}", group, reason),
                }
            }
            print_state(s);
        }
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({"report": report, "state": s}))?)
        }
    }
    Ok(())
}

pub(crate) fn destroyed(out: Output, project_id: &str, skipped: bool) -> Result<()> {
    match out {
        Output::Human if skipped => println!("{} forgotten (skip_delete is set; remote project left in place)", project_id),
        Output::Human => println!("{} deleted", project_id),
        Output::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({"project_id": project_id, "remote_deleted": !skipped}))?
        ),
    }
    Ok(())
}

pub(crate) fn snapshots(out: Output, snaps: &[Snapshot]) -> Result<()> {
    match out {
        Output::Human => {
            for (i, snap) in snaps.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                println!("saved:         {}", snap.saved_at.to_rfc3339());
                print_state(&snap.state);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(snaps)?),
    }
    Ok(())
}

pub(crate) fn listing(out: Output, snaps: &[Snapshot]) -> Result<()> {
    match out {
        Output::Human => {
            println!("{:<32} {:<8} {:<14} SAVED", "PROJECT", "TRACKED", "NUMBER");
            for s in snaps {
                println!(
                    "{:<32} {:<8} {:<14} {}",
                    s.project_id,
                    if s.state.is_tracked() { "yes" } else { "no" },
                    if s.state.number.is_empty() { "-" } else { s.state.number.as_str() },
                    s.saved_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(snaps)?),
    }
    Ok(())
}
