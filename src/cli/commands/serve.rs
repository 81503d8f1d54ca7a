//! Web server command.

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;

/// Start the upload gateway.
pub async fn cmd_serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    println!("{} Preparing database...", style("→").cyan());
    match open_store(settings).await {
        Ok(_) => println!("  {} Database ready", style("✓").green()),
        Err(e) => {
            eprintln!("  {} {}", style("✗").red(), e);
            return Err(e);
        }
    }

    println!(
        "{} Starting cardscan gateway at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(settings, host, port).await
}
