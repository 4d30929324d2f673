//! Reading command handlers

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;

use pagelog_core::aggregate::daily_totals;
use pagelog_core::{
    AddOutcome, AddRejection, DeleteOutcome, DeleteRejection, DocumentStore, ReadingEntry,
    ReadingsView, Session,
};

use crate::output::{short_id, Output, Stats};

/// How long one-shot commands wait on the store
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Add a reading and print it once the store confirms it
pub async fn add<S: DocumentStore>(
    session: &mut Session<S>,
    pages: &str,
    output: &Output,
) -> Result<()> {
    load(session).await?;

    let id = match session.add_reading(pages).await {
        AddOutcome::Added { id } => id,
        AddOutcome::Rejected(reason) => bail!(rejection_message(reason, pages)),
        AddOutcome::Failed(message) => bail!("Failed to add reading: {}", message),
    };

    let reading = wait_for(session, |view| {
        view.readings.iter().find(|r| r.id == id).cloned()
    })
    .await?;

    output.print_added(&reading);
    Ok(())
}

/// Delete a reading by id or unique id prefix
pub async fn delete<S: DocumentStore>(
    session: &mut Session<S>,
    id: &str,
    output: &Output,
) -> Result<()> {
    let view = load(session).await?;
    let reading = resolve_id(&view.readings, id)?.clone();

    // Confirm deletion
    if output.should_prompt() {
        println!(
            "Delete reading: {} - {} pages",
            short_id(&reading.id),
            reading.pages
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    match session.delete_reading(&reading.id).await {
        DeleteOutcome::Deleted => {}
        DeleteOutcome::Rejected(reason) => bail!(delete_rejection_message(reason)),
        DeleteOutcome::Failed(message) => bail!("Failed to delete reading: {}", message),
    }

    wait_for(session, |view| {
        (!view.readings.iter().any(|r| r.id == reading.id)).then_some(())
    })
    .await?;

    output.success(&format!("Deleted reading: {}", reading.id));
    Ok(())
}

/// List all readings with totals
pub async fn list<S: DocumentStore>(session: &mut Session<S>, output: &Output) -> Result<()> {
    let view = load(session).await?;
    output.print_readings(&view.readings, stats(&view));
    Ok(())
}

/// Show today's and total pages
pub async fn show_stats<S: DocumentStore>(
    session: &mut Session<S>,
    output: &Output,
) -> Result<()> {
    let view = load(session).await?;
    output.print_stats(stats(&view));
    Ok(())
}

/// Show pages per day, newest first
pub async fn history<S: DocumentStore>(
    session: &mut Session<S>,
    days: Option<usize>,
    output: &Output,
) -> Result<()> {
    let view = load(session).await?;
    let mut totals = daily_totals(&view.readings, &Local);
    if let Some(days) = days {
        totals.truncate(days);
    }
    output.print_history(&totals);
    Ok(())
}

pub fn stats(view: &ReadingsView) -> Stats {
    Stats {
        today_pages: view.today_pages,
        total_pages: view.total_pages,
        entries: view.readings.len(),
    }
}

/// User-facing explanation of a rejected add
pub fn rejection_message(reason: AddRejection, input: &str) -> String {
    match reason {
        AddRejection::InvalidInput => format!("'{}' is not a whole number of pages", input.trim()),
        AddRejection::NotPositive => "Page count must be greater than zero".to_string(),
        AddRejection::NoStore => "No document store available".to_string(),
        AddRejection::NoIdentity => "No identity available".to_string(),
        AddRejection::AlreadyAdding => "Another reading is still being added".to_string(),
    }
}

/// User-facing explanation of a rejected delete
pub fn delete_rejection_message(reason: DeleteRejection) -> String {
    match reason {
        DeleteRejection::NoStore => "No document store available".to_string(),
        DeleteRejection::NoIdentity => "No identity available".to_string(),
    }
}

/// Wait for the first delivery and make sure it is usable
async fn load<S: DocumentStore>(session: &mut Session<S>) -> Result<ReadingsView> {
    tokio::time::timeout(STORE_TIMEOUT, session.wait_until_loaded())
        .await
        .context("Timed out waiting for the reading list")?;

    let view = session.view();
    if view.user_id.is_none() {
        bail!("No identity available. Check `pagelog identity show`.");
    }
    if let Some(ref error) = view.last_error {
        bail!("Failed to load readings: {}", error);
    }
    Ok(view)
}

/// Wait until `check` finds what it is looking for in the view
async fn wait_for<S: DocumentStore, T>(
    session: &mut Session<S>,
    mut check: impl FnMut(&ReadingsView) -> Option<T>,
) -> Result<T> {
    tokio::time::timeout(STORE_TIMEOUT, async {
        loop {
            if let Some(found) = check(&session.view()) {
                return found;
            }
            session.changed().await;
        }
    })
    .await
    .context("Timed out waiting for the store to confirm the change")
}

/// Find a reading by full id or unique prefix
pub fn resolve_id<'a>(readings: &'a [ReadingEntry], id: &str) -> Result<&'a ReadingEntry> {
    if let Some(exact) = readings.iter().find(|r| r.id == id) {
        return Ok(exact);
    }

    let matches: Vec<_> = readings.iter().filter(|r| r.id.starts_with(id)).collect();

    match matches.len() {
        0 => bail!("No reading found matching: {}", id),
        1 => Ok(matches[0]),
        _ => {
            eprintln!("Multiple readings match '{}':", id);
            for reading in &matches {
                eprintln!("  {} - {} pages", reading.id, reading.pages);
            }
            Err(anyhow!("Ambiguous ID. Please provide more characters."))
        }
    }
}

/// Ask a yes/no question on stdin
fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{self, Write};

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
