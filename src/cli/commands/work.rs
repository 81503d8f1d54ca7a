//! Extraction worker command.

use std::sync::Arc;

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;
use crate::extraction::FieldSpec;
use crate::models::CardField;
use crate::ocr::TextRecognizer;
use crate::work_queue::{
    generate_worker_id, shutdown, DbFieldQueue, ExtractionWorker, FieldPipeline, PipelineLimits,
    WorkerPool, WorkerSummary,
};

/// Run extraction workers for `fields` (all enabled fields when empty).
pub async fn cmd_work(
    settings: &Settings,
    fields: &[CardField],
    instances: usize,
    once: bool,
) -> anyhow::Result<()> {
    if instances == 0 {
        anyhow::bail!("--instances must be at least 1");
    }
    settings.ensure_directories()?;
    let ctx = open_store(settings).await?;

    let fields = if fields.is_empty() {
        settings.enabled_fields()
    } else {
        fields.to_vec()
    };
    if fields.is_empty() {
        println!("{} No fields enabled, nothing to do", style("!").yellow());
        return Ok(());
    }

    let recognizer = settings.recognizer();
    if !recognizer.is_available() {
        println!("{} {}", style("!").yellow(), recognizer.availability_hint());
    }
    let recognizer: Arc<dyn TextRecognizer> = Arc::new(recognizer);
    let limits = PipelineLimits::from(&settings.worker);

    let mut pool = WorkerPool::new();
    for field in &fields {
        let Some(field_settings) = settings.field(*field) else {
            anyhow::bail!("no settings for field {}", field);
        };
        for _ in 0..instances {
            let queue = DbFieldQueue::new(ctx.cards(), generate_worker_id(*field))
                .with_store_timeout(settings.worker.store_timeout);
            let spec = FieldSpec::from_settings(*field, field_settings, recognizer.clone());
            let pipeline = FieldPipeline::new(spec, Arc::new(queue), limits.clone());
            println!(
                "  {} {} worker {}",
                style("→").cyan(),
                field,
                style(pipeline.worker_id()).dim()
            );
            pool.add(ExtractionWorker::new(pipeline));
        }
    }

    let summaries = if once {
        pool.run_once().await
    } else {
        let (trigger, shutdown) = shutdown::channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, finishing in-flight work");
                trigger.trigger();
            }
        });
        println!("  Press Ctrl+C to stop");
        pool.run(shutdown).await
    };

    print_summaries(&summaries);
    Ok(())
}

fn print_summaries(summaries: &[WorkerSummary]) {
    println!();
    println!(
        "  {:<12} {:>7} {:>7} {:>7} {:>7} {:>7}",
        "field", "cycles", "done", "retried", "failed", "lost"
    );
    for summary in summaries {
        println!(
            "  {:<12} {:>7} {:>7} {:>7} {:>7} {:>7}",
            summary.field.label(),
            summary.cycles,
            summary.completed(),
            summary.retried,
            summary.failed,
            summary.contended
        );
    }
    let completed: usize = summaries.iter().map(WorkerSummary::completed).sum();
    println!("{} Completed {} field(s)", style("✓").green(), completed);
}
