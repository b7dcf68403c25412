//! Tile worker: builds the tile pyramid for an image and finalizes its
//! record.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::{StorageError, WorkerError};
use crate::pyramid::PyramidGenerator;
use crate::queue::{Job, TileJob, Topic};
use crate::raster::Raster;
use crate::store::{BlobStore, ImageState, MediaType, RecordStore, RecordUpdate, StorageLayout};

use super::JobHandler;

/// Consumes tile jobs: decode the source, regenerate the pyramid, mark the
/// record `Ready` with its geometry.
pub struct TileWorker {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    layout: StorageLayout,
    generator: PyramidGenerator,
}

impl TileWorker {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        layout: StorageLayout,
    ) -> Self {
        let generator = PyramidGenerator::new(blobs.clone());
        Self {
            blobs,
            records,
            layout,
            generator,
        }
    }

    async fn process(&self, job: &TileJob) -> Result<(), WorkerError> {
        let media_type = MediaType::from_extension(&job.media_type).ok_or_else(|| {
            WorkerError::Input(format!("unsupported media type {:?}", job.media_type))
        })?;

        // A job for a record that does not exist can never succeed.
        self.records
            .get(job.owner_id, &job.image_id)
            .await?
            .ok_or_else(|| {
                WorkerError::Input(format!(
                    "no record for owner {} image {}",
                    job.owner_id, job.image_id
                ))
            })?;

        self.records
            .update(
                job.owner_id,
                &job.image_id,
                RecordUpdate::state(ImageState::Processing),
            )
            .await?;

        let source_key = self.layout.image_key(job.owner_id, &job.image_id, media_type);
        let bytes = match self.blobs.get(&source_key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(key)) => {
                return Err(WorkerError::Input(format!("source object missing: {}", key)));
            }
            Err(err) => return Err(err.into()),
        };

        let source = Raster::decode(&bytes)?;
        let prefix = self.layout.tile_prefix(job.owner_id, &job.image_id);

        // Clear any tiles from a previous source so a replayed job never
        // leaves stale deep levels behind.
        self.blobs.delete_prefix(&prefix).await?;

        let summary = match self.generator.generate(&source, &prefix).await {
            Ok(summary) => summary,
            Err(err) => {
                // Partial pyramids are worse than none.
                if let Err(cleanup_err) = self.blobs.delete_prefix(&prefix).await {
                    error!(%prefix, %cleanup_err, "failed to clean up partial pyramid");
                }
                return Err(err);
            }
        };

        self.records
            .update(
                job.owner_id,
                &job.image_id,
                RecordUpdate::ready(summary.width, summary.height, summary.levels, media_type),
            )
            .await?;

        info!(
            owner_id = job.owner_id,
            image_id = %job.image_id,
            levels = summary.levels,
            tiles = summary.tile_count,
            "pyramid built"
        );

        Ok(())
    }
}

#[async_trait]
impl JobHandler for TileWorker {
    fn topic(&self) -> Topic {
        Topic::Tile
    }

    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        let Job::Tile(tile_job) = job else {
            return Err(WorkerError::Input(format!(
                "tile worker received a {} job",
                job.topic()
            )));
        };
        job.validate()?;
        self.process(tile_job).await
    }

    async fn on_final_failure(&self, job: &Job, error: &WorkerError) {
        let (owner_id, image_id) = job.target_image();
        error!(owner_id, image_id, %error, "tiling failed terminally");

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
    use image::{ImageFormat, Rgba, RgbaImage};

    use super::*;
    use crate::store::{DerivationKind, ImageRecord, MemoryBlobStore, MemoryRecordStore};

    fn layout() -> StorageLayout {
        StorageLayout::new("images", "tiles")
    }

    async fn seed_image(
        blobs: &MemoryBlobStore,
        records: &MemoryRecordStore,
        owner_id: u64,
        image_id: &str,
        width: u32,
        height: u32,
    ) {
        let raster = Raster::from_rgba(RgbaImage::from_pixel(
            width,
            height,
            Rgba([40, 80, 120, 255]),
        ));
        let bytes = raster.encode(ImageFormat::Png).unwrap();
        let key = layout().image_key(owner_id, image_id, MediaType::Png);
        blobs.put(&key, bytes, "image/png").await.unwrap();

        records
            .insert(ImageRecord::new(
                owner_id,
                image_id,
                format!("{}.png", image_id),
                Some(MediaType::Png),
                DerivationKind::Original,
            ))
            .await
            .unwrap();
    }

    fn tile_job(image_id: &str) -> Job {
        Job::Tile(TileJob {
            owner_id: 1,
            image_id: image_id.to_string(),
            media_type: "png".to_string(),
            original_name: format!("{}.png", image_id),
        })
    }

    #[tokio::test]
    async fn test_successful_tiling_finalizes_record() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        seed_image(&blobs, &records, 1, "img", 1000, 500).await;

        let worker = TileWorker::new(blobs.clone(), records.clone(), layout());
        worker.handle(&tile_job("img")).await.unwrap();

        let record = records.get(1, "img").await.unwrap().unwrap();
        assert_eq!(record.state, ImageState::Ready);
        assert_eq!(record.width, Some(1000));
        assert_eq!(record.height, Some(500));
        assert_eq!(record.max_zoom_level, Some(4));

        let tiles = blobs.list("tiles/1/img").await.unwrap();
        assert_eq!(tiles.len(), 12);
    }

    #[tokio::test]
    async fn test_jpg_source_is_read_from_its_literal_key() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());

        let raster = Raster::from_rgba(RgbaImage::from_pixel(80, 50, Rgba([200, 60, 20, 255])));
        let bytes = raster.encode(ImageFormat::Jpeg).unwrap();
        // The upload side stores the file under the extension it received,
        // so a `.jpg` source must not be looked up at `.jpeg`.
        blobs.put("images/1/img.jpg", bytes, "image/jpeg").await.unwrap();
        records
            .insert(ImageRecord::new(
                1,
                "img",
                "photo.jpg",
                Some(MediaType::Jpg),
                DerivationKind::Original,
            ))
            .await
            .unwrap();

        let worker = TileWorker::new(blobs.clone(), records.clone(), layout());
        let job = Job::Tile(TileJob {
            owner_id: 1,
            image_id: "img".to_string(),
            media_type: "jpg".to_string(),
            original_name: "photo.jpg".to_string(),
        });
        worker.handle(&job).await.unwrap();

        let record = records.get(1, "img").await.unwrap().unwrap();
        assert_eq!(record.state, ImageState::Ready);
        assert_eq!(record.media_type, Some(MediaType::Jpg));
        // max dim 80 -> 3 levels, one tile each.
        assert_eq!(blobs.list("tiles/1/img").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_source_is_input_error() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        records
            .insert(ImageRecord::new(
                1,
                "img",
                "img.png",
                Some(MediaType::Png),
                DerivationKind::Original,
            ))
            .await
            .unwrap();

        let worker = TileWorker::new(blobs, records, layout());
        let err = worker.handle(&tile_job("img")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Input(_)));
    }

    #[tokio::test]
    async fn test_missing_record_is_input_error() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());

        let worker = TileWorker::new(blobs, records, layout());
        let err = worker.handle(&tile_job("ghost")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Input(_)));
    }

    #[tokio::test]
    async fn test_undecodable_source_leaves_no_tiles() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        records
            .insert(ImageRecord::new(
                1,
                "img",
                "img.png",
                Some(MediaType::Png),
                DerivationKind::Original,
            ))
            .await
            .unwrap();
        let key = layout().image_key(1, "img", MediaType::Png);
        blobs
            .put(&key, bytes::Bytes::from_static(b"not an image"), "image/png")
            .await
            .unwrap();

        let worker = TileWorker::new(blobs.clone(), records, layout());
        let err = worker.handle(&tile_job("img")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Engine(_)));
        assert!(blobs.list("tiles/1/img").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        seed_image(&blobs, &records, 1, "img", 300, 300).await;

        let worker = TileWorker::new(blobs.clone(), records.clone(), layout());
        worker.handle(&tile_job("img")).await.unwrap();
        let first_tiles = blobs.list("tiles/1/img").await.unwrap();

        // Ready -> Processing -> Ready is a legal reprocess cycle.
        worker.handle(&tile_job("img")).await.unwrap();
        let second_tiles = blobs.list("tiles/1/img").await.unwrap();

        assert_eq!(first_tiles, second_tiles);
        let record = records.get(1, "img").await.unwrap().unwrap();
        assert_eq!(record.state, ImageState::Ready);
    }

    #[tokio::test]
    async fn test_smaller_replacement_leaves_no_stale_tiles() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        seed_image(&blobs, &records, 1, "img", 1000, 500).await;

        let worker = TileWorker::new(blobs.clone(), records.clone(), layout());
        worker.handle(&tile_job("img")).await.unwrap();
        assert_eq!(blobs.list("tiles/1/img").await.unwrap().len(), 12);

        // Replace the source with a much smaller image and re-tile.
        let small = Raster::from_rgba(RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 255])));
        let key = layout().image_key(1, "img", MediaType::Png);
        blobs
            .put(&key, small.encode(ImageFormat::Png).unwrap(), "image/png")
            .await
            .unwrap();

        worker.handle(&tile_job("img")).await.unwrap();

        // max dim 50 -> 3 levels, one tile each; nothing from the old run.
        let tiles = blobs.list("tiles/1/img").await.unwrap();
        assert_eq!(tiles.len(), 3);

        let record = records.get(1, "img").await.unwrap().unwrap();
        assert_eq!(record.width, Some(50));
        assert_eq!(record.max_zoom_level, Some(3));
    }

    #[tokio::test]
    async fn test_final_failure_marks_record_failed() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        records
            .insert(ImageRecord::new(
                1,
                "img",
                "img.png",
                Some(MediaType::Png),
                DerivationKind::Original,
            ))
            .await
            .unwrap();
        // Move it to Processing first, as the failing handle would have.
        records
            .update(1, "img", RecordUpdate::state(ImageState::Processing))
            .await
            .unwrap();

        let worker = TileWorker::new(blobs, records.clone(), layout());
        worker
            .on_final_failure(
                &tile_job("img"),
                &WorkerError::Input("source object missing".to_string()),
            )
            .await;

        let record = records.get(1, "img").await.unwrap().unwrap();
        assert_eq!(record.state, ImageState::Failed);
    }
}
