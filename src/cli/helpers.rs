//! Shared helper functions for CLI commands.

use console::style;

use crate::config::Settings;
use crate::models::{Card, CardField, FieldStatus};
use crate::repository::DieselDbContext;

/// Open the store and make sure its tables exist.
pub async fn open_store(settings: &Settings) -> anyhow::Result<DieselDbContext> {
    let ctx = settings.create_db_context();
    ctx.init_schema().await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to open database {}: {}",
            settings.database_url(),
            e
        )
    })?;
    Ok(ctx)
}

/// Status word styled by state.
pub fn styled_status(status: FieldStatus) -> String {
    match status {
        FieldStatus::Pending => style(status.as_str()).yellow().to_string(),
        FieldStatus::InProgress => style(status.as_str()).cyan().to_string(),
        FieldStatus::Done => style(status.as_str()).green().to_string(),
        FieldStatus::Failed => style(status.as_str()).red().to_string(),
    }
}

pub fn print_card(card: &Card) {
    println!("{} {}", style("Card").bold(), card.id);
    println!("  {:<12} {}", "filename", card.filename);
    println!("  {:<12} {}", "source", card.source_image_path.display());
    println!("  {:<12} {}", "created", card.created_at.to_rfc3339());
    println!();

    for field in CardField::ALL {
        let status = card.status(field);
        let value = card.value(field).unwrap_or("-");
        println!("  {:<12} {:<20} {}", field.label(), styled_status(status), value);
        if let Some(slot) = card.slot(field) {
            if status != FieldStatus::Done {
                if let Some(ref error) = slot.last_error {
                    println!(
                        "  {:<12} {} (attempt {})",
                        "",
                        style(error).dim(),
                        slot.attempts
                    );
                }
            }
        }
    }
}
