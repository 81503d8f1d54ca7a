//! Initialize command.

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;
use crate::ocr::TextRecognizer;

/// Create the data directories and the database schema.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    open_store(settings).await?;

    println!("  {} Database ready at {}", style("✓").green(), settings.database_url());
    println!("  {} Uploads go to {}", style("✓").green(), settings.upload_dir.display());
    for dir in settings.output_dirs() {
        println!("  {} Output directory {}", style("✓").green(), dir.display());
    }

    let recognizer = settings.recognizer();
    if !recognizer.is_available() {
        println!("{} {}", style("!").yellow(), recognizer.availability_hint());
        println!("  Text fields will keep retrying until it is installed");
    }

    println!(
        "{} Initialized cardscan in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
