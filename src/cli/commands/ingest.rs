//! Ingest command.

use std::path::PathBuf;

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;
use crate::services::IngestService;

/// Ingest local image files as new cards.
pub async fn cmd_ingest(settings: &Settings, files: &[PathBuf]) -> anyhow::Result<()> {
    let ctx = open_store(settings).await?;
    let service = IngestService::new(ctx.cards(), settings.upload_dir.clone());

    let mut failed = 0usize;
    for file in files {
        match service.ingest_file(file).await {
            Ok(card) => {
                println!("  {} {} {}", style("✓").green(), card.id, card.filename);
            }
            Err(e) => {
                eprintln!("  {} {}: {}", style("✗").red(), file.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} files failed to ingest", failed, files.len());
    }
    println!("{} Ingested {} card(s)", style("✓").green(), files.len());
    Ok(())
}
