//! Blend worker: composites placed sub-images onto a background canvas and
//! hands the result to the tile worker.

use std::sync::Arc;

use async_trait::async_trait;
use image::ImageFormat;
use tracing::{error, info};

use crate::error::{StorageError, WorkerError};
use crate::queue::{BlendJob, Job, JobQueue, Placement, TileJob, Topic};
use crate::raster::{CompositeLayer, Raster};
use crate::store::{BlobStore, ImageState, MediaType, RecordStore, RecordUpdate, StorageLayout};

use super::JobHandler;

/// Consumes blend jobs. The background is resized to the canvas the layout
/// was composed on; each placement is fetched, resized to its declared
/// size, and painted in list order, so later placements draw over earlier
/// ones. The follow-up tile job is enqueued only on success.
pub struct BlendWorker {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
    layout: StorageLayout,
}

impl BlendWorker {
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

    async fn fetch_raster(
        &self,
        owner_id: u64,
        image_id: &str,
        media_type: MediaType,
    ) -> Result<Raster, WorkerError> {
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

    async fn placement_layer(
        &self,
        owner_id: u64,
        placement: &Placement,
    ) -> Result<CompositeLayer, WorkerError> {
        let media_type = MediaType::from_extension(&placement.media_type).ok_or_else(|| {
            WorkerError::Input(format!(
                "placement {} has unsupported media type {:?}",
                placement.image_id, placement.media_type
            ))
        })?;

        let raster = self
            .fetch_raster(owner_id, &placement.image_id, media_type)
            .await?;
        let resized = raster.resize(
            placement.width.ceil() as u32,
            placement.height.ceil() as u32,
        )?;

        Ok(CompositeLayer::over(
            resized,
            placement.left.ceil() as i64,
            placement.top.ceil() as i64,
        ))
    }

    async fn process(&self, job: &BlendJob) -> Result<(), WorkerError> {
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

        let background_type = self
            .records
            .media_type(job.owner_id, &job.source_image_id)
            .await?
            .ok_or_else(|| {
                WorkerError::Input(format!(
                    "source image {} has no media type (not finalized?)",
                    job.source_image_id
                ))
            })?;

        let background = self
            .fetch_raster(job.owner_id, &job.source_image_id, background_type)
            .await?;
        let canvas = background.resize(job.canvas_width, job.canvas_height)?;

        // List order is z-order.
        let mut layers = Vec::with_capacity(job.placements.len());
        for placement in &job.placements {
            layers.push(self.placement_layer(job.owner_id, placement).await?);
        }
        let blended = canvas.composite(&layers);

        let bytes = blended.encode(ImageFormat::Png)?;
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

        self.queue
            .enqueue(&Job::Tile(TileJob {
                owner_id: job.owner_id,
                image_id: job.new_image_id.clone(),
                media_type: MediaType::Png.extension().to_string(),
                original_name: format!("blended-{}.png", job.source_image_id),
            }))
            .await?;

        info!(
            owner_id = job.owner_id,
            new_image_id = %job.new_image_id,
            source_image_id = %job.source_image_id,
            placements = job.placements.len(),
            "blend complete"
        );

        Ok(())
    }
}

#[async_trait]
impl JobHandler for BlendWorker {
    fn topic(&self) -> Topic {
        Topic::Blend
    }

    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        let Job::Blend(blend_job) = job else {
            return Err(WorkerError::Input(format!(
                "blend worker received a {} job",
                job.topic()
            )));
        };
        job.validate()?;
        self.process(blend_job).await
    }

    async fn on_final_failure(&self, job: &Job, error: &WorkerError) {
        let (owner_id, image_id) = job.target_image();
        error!(owner_id, image_id, %error, "blend failed terminally");

        let update = RecordUpdate::state(ImageState::Failed);
        if let Err(err) = self.records.update(owner_id, image_id, update).await {
            error!(owner_id, image_id, %err, "could not mark record failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
