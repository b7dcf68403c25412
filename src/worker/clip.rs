//! Clip worker: cuts a polygon region out of a source image into a new
//! derived image, then hands the result to the tile worker.

use std::sync::Arc;

use async_trait::async_trait;
use image::ImageFormat;
use tracing::{error, info};

use crate::error::{StorageError, WorkerError};
use crate::queue::{ClipJob, Job, JobQueue, TileJob, Topic};
use crate::raster::{bounding_rect, render_mask, CompositeLayer, Raster};
use crate::store::{BlobStore, ImageState, MediaType, RecordStore, RecordUpdate, StorageLayout};

use super::JobHandler;

/// Consumes clip jobs. The polygon is rasterized into an alpha mask, the
/// source is resized to the canvas the polygon was drawn on, and an
/// alpha-extraction composite keeps only the pixels inside the polygon.
/// The follow-up tile job is enqueued only after the derived image is
/// persisted; a failed clip marks its record `Failed` instead of cascading
/// a broken source into the tile worker.
pub struct ClipWorker {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
    layout: StorageLayout,
}

impl ClipWorker {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn JobQueue>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            blobs,
            records,
            queue,
            layout,
        }
    }

    async fn fetch_source(&self, owner_id: u64, image_id: &str) -> Result<Raster, WorkerError> {
        let media_type = self
            .records
            .media_type(owner_id, image_id)
            .await?
            .ok_or_else(|| {
                WorkerError::Input(format!(
                    "source image {} has no media type (not finalized?)",
                    image_id
                ))
            })?;

        let key = self.layout.image_key(owner_id, image_id, media_type);
        let bytes = match self.blobs.get(&key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(key)) => {
                return Err(WorkerError::Input(format!("source object missing: {}", key)));
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Raster::decode(&bytes)?)
    }

    async fn process(&self, job: &ClipJob) -> Result<(), WorkerError> {
        self.records
            .get(job.owner_id, &job.new_image_id)
            .await?
            .ok_or_else(|| {
                WorkerError::Input(format!(
                    "no record for derived image {}",
                    job.new_image_id
                ))
            })?;

        self.records
            .update(
                job.owner_id,
                &job.new_image_id,
                RecordUpdate::state(ImageState::Processing),
            )
            .await?;

        let source = self.fetch_source(job.owner_id, &job.source_image_id).await?;
        let canvas = source.resize(job.canvas_width, job.canvas_height)?;

        let mask = render_mask(job.canvas_width, job.canvas_height, &job.polygon)?;
        let clipped = canvas.composite(&[CompositeLayer::mask(mask)]);

        // Crop to the polygon's bounding box; a degenerate zero-area
        // polygon keeps the full canvas.
        let output = match bounding_rect(&job.polygon) {
            Some(bbox) if bbox.has_area() => {
                let left = bbox.left.min(job.canvas_width.saturating_sub(1));
                let top = bbox.top.min(job.canvas_height.saturating_sub(1));
                let width = bbox.width.min(job.canvas_width - left);
                let height = bbox.height.min(job.canvas_height - top);
                clipped.extract(left, top, width, height)?
            }
            _ => clipped,
        };

        let bytes = output.encode(ImageFormat::Png)?;
        let key = self
            .layout
            .image_key(job.owner_id, &job.new_image_id, MediaType::Png);
        self.blobs.put(&key, bytes, "image/png").await?;

        self.records
            .update(
                job.owner_id,
                &job.new_image_id,
                RecordUpdate::media_type(MediaType::Png),
            )
            .await?;

        // Success only: the derived raster exists, so tiling can proceed.
        self.queue
            .enqueue(&Job::Tile(TileJob {
                owner_id: job.owner_id,
                image_id: job.new_image_id.clone(),
                media_type: MediaType::Png.extension().to_string(),
                original_name: format!("clipped-{}.png", job.source_image_id),
            }))
            .await?;

        info!(
            owner_id = job.owner_id,
            new_image_id = %job.new_image_id,
            source_image_id = %job.source_image_id,
            width = output.width(),
            height = output.height(),
            "clip complete"
        );

        Ok(())
    }
}

#[async_trait]
impl JobHandler for ClipWorker {
    fn topic(&self) -> Topic {
        Topic::Clip
    }

    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        let Job::Clip(clip_job) = job else {
            return Err(WorkerError::Input(format!(
                "clip worker received a {} job",
                job.topic()
            )));
        };
        job.validate()?;
        self.process(clip_job).await
    }

    async fn on_final_failure(&self, job: &Job, error: &WorkerError) {
        let (owner_id, image_id) = job.target_image();
        error!(owner_id, image_id, %error, "clip failed terminally");

        let update = RecordUpdate::state(ImageState::Failed);
        if let Err(err) = self.records.update(owner_id, image_id, update).await {
            error!(owner_id, image_id, %err, "could not mark record failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::queue::MemoryJobQueue;
    use crate::raster::Point;
    use crate::store::{DerivationKind, ImageRecord, MemoryBlobStore, MemoryRecordStore};

    struct Fixture {
        blobs: Arc<MemoryBlobStore>,
        records: Arc<MemoryRecordStore>,
        queue: Arc<MemoryJobQueue>,
        worker: ClipWorker,
    }

    impl Fixture {
        async fn new() -> Self {
            let blobs = Arc::new(MemoryBlobStore::new());
            let records = Arc::new(MemoryRecordStore::new());
            let queue = Arc::new(MemoryJobQueue::default());
            let worker = ClipWorker::new(
                blobs.clone(),
                records.clone(),
                queue.clone(),
                StorageLayout::new("images", "tiles"),
            );
            Self {
                blobs,
                records,
                queue,
                worker,
            }
        }

        /// Seed a finalized source image and a pending derived record.
        async fn seed(&self, source_id: &str, new_id: &str, width: u32, height: u32) {
            let raster = Raster::from_rgba(RgbaImage::from_pixel(
                width,
                height,
                Rgba([200, 50, 50, 255]),
            ));
            let key = StorageLayout::new("images", "tiles").image_key(1, source_id, MediaType::Png);
            self.blobs
                .put(&key, raster.encode(ImageFormat::Png).unwrap(), "image/png")
                .await
                .unwrap();

            self.records
                .insert(ImageRecord::new(
                    1,
                    source_id,
                    format!("{}.png", source_id),
                    Some(MediaType::Png),
                    DerivationKind::Original,
                ))
                .await
                .unwrap();
            self.records
                .insert(ImageRecord::new(
                    1,
                    new_id,
                    format!("{}.png", new_id),
                    None,
                    DerivationKind::Clipped,
                ))
                .await
                .unwrap();
        }
    }

    fn clip_job(new_id: &str, source_id: &str, polygon: Vec<Point>) -> Job {
        Job::Clip(ClipJob {
            owner_id: 1,
            new_image_id: new_id.to_string(),
            source_image_id: source_id.to_string(),
            canvas_width: 200,
            canvas_height: 100,
            polygon,
        })
    }

    #[tokio::test]
    async fn test_clip_crops_to_polygon_bbox() {
        let fx = Fixture::new().await;
        fx.seed("src", "new", 400, 200).await;

        let polygon = vec![
            Point::new(20.0, 10.0),
            Point::new(120.0, 10.0),
            Point::new(120.0, 70.0),
            Point::new(20.0, 70.0),
        ];
        fx.worker.handle(&clip_job("new", "src", polygon)).await.unwrap();

        let key = StorageLayout::new("images", "tiles").image_key(1, "new", MediaType::Png);
        let output = Raster::decode(&fx.blobs.get(&key).await.unwrap()).unwrap();
        assert_eq!(output.dimensions(), (100, 60));

        // Inside the polygon the source pixels survive.
        assert_eq!(output.pixel(50, 30), Rgba([200, 50, 50, 255]));

        let record = fx.records.get(1, "new").await.unwrap().unwrap();
        assert_eq!(record.media_type, Some(MediaType::Png));
        assert_eq!(record.state, ImageState::Processing);
    }

    #[tokio::test]
    async fn test_full_canvas_polygon_keeps_canvas_dimensions() {
        let fx = Fixture::new().await;
        fx.seed("src", "new", 400, 200).await;

        let polygon = vec![
            Point::new(0.0, 0.0),
            Point::new(200.0, 0.0),
            Point::new(200.0, 100.0),
            Point::new(0.0, 100.0),
        ];
        fx.worker.handle(&clip_job("new", "src", polygon)).await.unwrap();

        let key = StorageLayout::new("images", "tiles").image_key(1, "new", MediaType::Png);
        let output = Raster::decode(&fx.blobs.get(&key).await.unwrap()).unwrap();
        assert_eq!(output.dimensions(), (200, 100));
    }

    #[tokio::test]
    async fn test_zero_area_polygon_keeps_full_canvas() {
        let fx = Fixture::new().await;
        fx.seed("src", "new", 400, 200).await;

        // Three points on a vertical line: bbox width is 0.
        let polygon = vec![
            Point::new(50.0, 10.0),
            Point::new(50.0, 40.0),
            Point::new(50.0, 80.0),
        ];
        fx.worker.handle(&clip_job("new", "src", polygon)).await.unwrap();

        let key = StorageLayout::new("images", "tiles").image_key(1, "new", MediaType::Png);
        let output = Raster::decode(&fx.blobs.get(&key).await.unwrap()).unwrap();
        assert_eq!(output.dimensions(), (200, 100));
    }

    #[tokio::test]
    async fn test_success_enqueues_tile_job() {
        let fx = Fixture::new().await;
        fx.seed("src", "new", 400, 200).await;

        let polygon = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(50.0, 80.0),
        ];
        fx.worker.handle(&clip_job("new", "src", polygon)).await.unwrap();

        let delivery = fx.queue.claim(Topic::Tile, "test").await.unwrap().unwrap();
        match delivery.job {
            Job::Tile(tile) => {
                assert_eq!(tile.image_id, "new");
                assert_eq!(tile.media_type, "png");
                assert_eq!(tile.original_name, "clipped-src.png");
            }
            other => panic!("expected tile job, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_polygon_rejected_without_enqueue() {
        let fx = Fixture::new().await;
        fx.seed("src", "new", 400, 200).await;

        let polygon = vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)];
        let err = fx
            .worker
            .handle(&clip_job("new", "src", polygon))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Input(_)));
        assert_eq!(fx.queue.ready_depth(Topic::Tile), 0);
    }

    #[tokio::test]
    async fn test_missing_source_no_follow_up() {
        let fx = Fixture::new().await;
        // Only the derived record exists; no source image or record.
        fx.records
            .insert(ImageRecord::new(
                1,
                "new",
                "new.png",
                None,
                DerivationKind::Clipped,
            ))
            .await
            .unwrap();

        let polygon = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 8.0),
        ];
        let err = fx
            .worker
            .handle(&clip_job("new", "ghost", polygon))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Input(_)));
        assert_eq!(fx.queue.ready_depth(Topic::Tile), 0);
    }

    #[tokio::test]
    async fn test_final_failure_marks_derived_record_failed() {
        let fx = Fixture::new().await;
        fx.seed("src", "new", 400, 200).await;
        fx.records
            .update(1, "new", RecordUpdate::state(ImageState::Processing))
            .await
            .unwrap();

        let polygon = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
        let job = clip_job("new", "src", polygon);
        fx.worker
            .on_final_failure(&job, &WorkerError::Input("too few points".to_string()))
            .await;

        let record = fx.records.get(1, "new").await.unwrap().unwrap();
        assert_eq!(record.state, ImageState::Failed);
    }
}
