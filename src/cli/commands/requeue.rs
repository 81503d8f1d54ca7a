//! Requeue command.

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;
use crate::models::CardField;

/// Move every failed `field` back to pending with a fresh attempt count.
pub async fn cmd_requeue(settings: &Settings, field: CardField) -> anyhow::Result<()> {
    let ctx = open_store(settings).await?;
    let requeued = ctx.cards().requeue_failed(field).await?;

    if requeued == 0 {
        println!("{} No failed {} fields", style("!").yellow(), field);
    } else {
        println!(
            "{} Requeued {} {} field(s)",
            style("✓").green(),
            requeued,
            field
        );
    }
    Ok(())
}
