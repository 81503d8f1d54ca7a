//! Status and show commands.

use std::collections::BTreeMap;

use console::style;

use crate::cli::helpers::{open_store, print_card};
use crate::config::Settings;
use crate::models::{CardField, FieldStatus};

/// Print per-field status counts.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let ctx = open_store(settings).await?;
    let repo = ctx.cards();

    let total = repo.count().await?;
    let mut counts: BTreeMap<(CardField, &'static str), u64> = BTreeMap::new();
    for count in repo.status_counts().await? {
        counts.insert((count.field, count.status.as_str()), count.count);
    }

    println!("{} {} card(s)", style("Cards:").bold(), total);
    println!();
    println!(
        "  {:<12} {:>8} {:>12} {:>8} {:>8}",
        "field", "pending", "in_progress", "done", "failed"
    );
    for field in CardField::ALL {
        let get = |status: FieldStatus| {
            counts
                .get(&(field, status.as_str()))
                .copied()
                .unwrap_or(0)
        };
        let enabled = settings.field(field).map(|f| f.enabled).unwrap_or(false);
        println!(
            "  {:<12} {:>8} {:>12} {:>8} {:>8}{}",
            field.label(),
            get(FieldStatus::Pending),
            get(FieldStatus::InProgress),
            get(FieldStatus::Done),
            get(FieldStatus::Failed),
            if enabled {
                String::new()
            } else {
                format!("  {}", style("(disabled)").dim())
            }
        );
    }

    Ok(())
}

/// Print one card.
pub async fn cmd_show(settings: &Settings, card_id: &str) -> anyhow::Result<()> {
    let ctx = open_store(settings).await?;
    match ctx.cards().get(card_id).await? {
        Some(card) => {
            print_card(&card);
            Ok(())
        }
        None => {
            eprintln!("{} Card not found: {}", style("✗").red(), card_id);
            anyhow::bail!("card {} not found", card_id)
        }
    }
}
