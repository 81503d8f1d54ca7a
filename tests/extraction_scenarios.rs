//! End-to-end extraction scenarios
//!
//! Cards are ingested the way the gateway does it, then driven through the
//! field pipelines against a real SQLite store in a temp directory.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

use cardscan::config::Settings;
use cardscan::extraction::{ExtractError, Extraction, Extractor, FieldSpec, ImagePersist};
use cardscan::models::{Capability, Card, CardField, FieldStatus};
use cardscan::ocr::{OcrError, OcrResult, TextRecognizer};
use cardscan::repository::DieselDbContext;
use cardscan::services::IngestService;
use cardscan::work_queue::{DbFieldQueue, FieldPipeline, PipelineLimits, Shutdown};

const CARD_WIDTH: u32 = 734;
const CARD_HEIGHT: u32 = 1024;

/// Reads "CHARIZARD" from any region with dark ink in it.
struct InkRecognizer;

#[async_trait]
impl TextRecognizer for InkRecognizer {
    fn backend_name(&self) -> &'static str {
        "ink"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn availability_hint(&self) -> String {
        String::new()
    }

    async fn recognize(&self, image: DynamicImage) -> Result<OcrResult, OcrError> {
        let inked = image.to_luma8().pixels().any(|p| p.0[0] < 64);
        Ok(OcrResult {
            text: if inked { "CHARIZARD\n".into() } else { String::new() },
            confidence: None,
            backend: "ink",
            processing_time_ms: 0,
        })
    }
}

/// Delegates to an inner extractor and counts calls.
struct Counting {
    inner: ImagePersist,
    calls: AtomicUsize,
}

#[async_trait]
impl Extractor for Counting {
    fn capability(&self) -> Capability {
        self.inner.capability()
    }

    async fn extract(&self, card: &Card, region: DynamicImage) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which a second worker could race us
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.extract(card, region).await
    }
}

struct Harness {
    settings: Settings,
    ctx: DieselDbContext,
    _dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_data_dir(dir.path().to_path_buf());
        settings.ensure_directories().unwrap();
        let ctx = settings.create_db_context();
        ctx.init_schema().await.unwrap();
        Self {
            settings,
            ctx,
            _dir: dir,
        }
    }

    /// Upload a white card, with ink painted over `ink` (l, t, r, b) if given.
    async fn upload(&self, ink: Option<(u32, u32, u32, u32)>) -> Card {
        let mut img = RgbImage::from_pixel(CARD_WIDTH, CARD_HEIGHT, Rgb([255, 255, 255]));
        if let Some((left, top, right, bottom)) = ink {
            for x in left..right {
                for y in top..bottom {
                    img.put_pixel(x, y, Rgb([10, 10, 10]));
                }
            }
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        IngestService::new(self.ctx.cards(), self.settings.upload_dir.clone())
            .ingest_bytes("card.png", &bytes)
            .await
            .unwrap()
    }

    fn pipeline(&self, field: CardField, worker_id: &str) -> FieldPipeline {
        let spec = FieldSpec::from_settings(
            field,
            self.settings.field(field).unwrap(),
            Arc::new(InkRecognizer),
        );
        self.pipeline_for(spec, worker_id)
    }

    fn pipeline_for(&self, spec: FieldSpec, worker_id: &str) -> FieldPipeline {
        let queue = Arc::new(DbFieldQueue::new(self.ctx.cards(), worker_id));
        FieldPipeline::new(spec, queue, PipelineLimits::from(&self.settings.worker))
    }

    async fn reload(&self, card: &Card) -> Card {
        self.ctx.cards().get(&card.id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_name_text_is_recognized() {
    let h = Harness::new().await;
    let card = h.upload(Some((80, 40, 300, 70))).await;

    let report = h
        .pipeline(CardField::Name, "name-1")
        .run_cycle(&Shutdown::never())
        .await;
    assert_eq!(report.committed, 1);

    let stored = h.reload(&card).await;
    assert_eq!(stored.name(), Some("CHARIZARD"));
    assert_eq!(stored.status(CardField::Name), FieldStatus::Done);
    // Other fields are untouched
    assert_eq!(stored.status(CardField::Lore), FieldStatus::Pending);
}

#[tokio::test]
async fn test_blank_weakness_region_is_persisted_at_crop_size() {
    let h = Harness::new().await;
    let card = h.upload(None).await;
    let crop = h.settings.field(CardField::Weakness).unwrap().crop_box;

    let report = h
        .pipeline(CardField::Weakness, "weakness-1")
        .run_cycle(&Shutdown::never())
        .await;
    assert_eq!(report.committed, 1);

    let stored = h.reload(&card).await;
    let path = stored.weakness_image_path().unwrap();
    let saved = image::open(path).unwrap();
    assert_eq!(
        (saved.width(), saved.height()),
        (crop.right - crop.left, crop.bottom - crop.top)
    );
}

#[tokio::test]
async fn test_blank_name_gets_sentinel_and_is_not_retried() {
    let h = Harness::new().await;
    let card = h.upload(None).await;
    let pipeline = h.pipeline(CardField::Name, "name-1");

    let report = pipeline.run_cycle(&Shutdown::never()).await;
    assert_eq!(report.sentinels, 1);
    assert_eq!(h.reload(&card).await.name(), Some("UNKNOWN"));

    let report = pipeline.run_cycle(&Shutdown::never()).await;
    assert_eq!(report.candidates, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_workers_commit_once() {
    let h = Harness::new().await;
    let card = h.upload(None).await;
    let settings = h.settings.field(CardField::Moves).unwrap();

    let counting = Arc::new(Counting {
        inner: ImagePersist::new(settings.output_dir.clone(), settings.format),
        calls: AtomicUsize::new(0),
    });
    let spec = || FieldSpec::new(CardField::Moves, settings.crop_box, counting.clone());
    let first = h.pipeline_for(spec(), "moves-1");
    let second = h.pipeline_for(spec(), "moves-2");

    let shutdown = Shutdown::never();
    let (a, b) = tokio::join!(first.run_cycle(&shutdown), second.run_cycle(&shutdown));

    assert_eq!(a.committed + b.committed, 1);
    assert_eq!(a.store_errors + b.store_errors, 0);
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

    let stored = h.reload(&card).await;
    assert_eq!(stored.status(CardField::Moves), FieldStatus::Done);
    assert_eq!(stored.attempts(CardField::Moves), 1);
}

#[tokio::test]
async fn test_done_value_survives_later_cycles() {
    let h = Harness::new().await;
    let card = h.upload(None).await;
    let pipeline = h.pipeline(CardField::Resistance, "resistance-1");

    pipeline.run_cycle(&Shutdown::never()).await;
    let first = h.reload(&card).await;
    let value = first.resistance_image_path().unwrap().to_string();

    for _ in 0..3 {
        assert!(pipeline.run_cycle(&Shutdown::never()).await.is_idle());
    }
    let stored = h.reload(&card).await;
    assert_eq!(stored.resistance_image_path(), Some(value.as_str()));
    assert_eq!(stored.slot(CardField::Resistance), first.slot(CardField::Resistance));
}

#[tokio::test]
async fn test_unreadable_source_leaves_field_pending() {
    let h = Harness::new().await;
    let card = h.upload(None).await;
    std::fs::write(&card.source_image_path, b"not an image").unwrap();

    let report = h
        .pipeline(CardField::Lore, "lore-1")
        .run_cycle(&Shutdown::never())
        .await;
    assert_eq!(report.retried, 1);

    let stored = h.reload(&card).await;
    let slot = stored.slot(CardField::Lore).unwrap();
    assert_eq!(slot.status, FieldStatus::Pending);
    assert_eq!(slot.value, None);
    assert!(slot.last_error.is_some());
}
