use thiserror::Error;

/// Errors from the raster engine (decode, resize, extract, composite, encode).
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Source bytes could not be decoded as an image
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Image could not be encoded in the requested format
    #[error("Encode error: {message}")]
    Encode { message: String },

    /// Extraction region falls outside the image bounds
    #[error(
        "Extract region out of bounds: requested {width}x{height} at ({left},{top}), image is {image_width}x{image_height}"
    )]
    RegionOutOfBounds {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    /// A polygon mask needs at least three vertices
    #[error("Invalid polygon: {reason}")]
    InvalidPolygon { reason: String },

    /// Zero-dimension target for a resize or mask canvas
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Errors from blob storage (filesystem or S3).
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Object does not exist at the given key
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Local filesystem error
    #[error("Filesystem error: {0}")]
    Io(String),
}

/// Errors from the image record store.
#[derive(Debug, Clone, Error)]
pub enum RecordError {
    /// No record exists for the given owner + image id
    #[error("Record not found: owner {owner_id}, image {image_id}")]
    NotFound { owner_id: u64, image_id: String },

    /// The requested lifecycle transition is not allowed
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Geometry fields may only be written together with the Ready transition
    #[error("Geometry fields require a transition to Ready (attempted on {state})")]
    GeometryOutsideReady { state: String },

    /// Error from the backing store (DynamoDB etc.)
    #[error("Record backend error: {0}")]
    Backend(String),
}

/// Errors from the job queue.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Connection to the queue backend failed
    #[error("Queue connection error: {0}")]
    Connection(String),

    /// Job payload could not be serialized or deserialized
    #[error("Payload error: {0}")]
    Payload(String),

    /// Error from the queue backend (Redis etc.)
    #[error("Queue backend error: {0}")]
    Backend(String),
}

/// Top-level worker error, carrying the retry taxonomy.
///
/// `Input` is a malformed job: it fails fast, never consumes the retry
/// budget, and transitions the record straight to `Failed`. Everything else
/// is treated as transient and relies on queue redelivery up to the
/// configured attempt budget.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// Malformed job: missing source, bad polygon, empty placements, etc.
    #[error("Invalid job input: {0}")]
    Input(String),

    /// Raster engine failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Blob storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Record store failure
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Queue failure (e.g. enqueueing the follow-up tile job)
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl WorkerError {
    /// Whether redelivering the job could plausibly succeed.
    ///
    /// Decode failures count as non-retryable: the stored bytes will not
    /// change between attempts. A missing source object is mapped to
    /// `Input` by the workers before it reaches here.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Input(_) => false,
            WorkerError::Engine(_) => false,
            WorkerError::Storage(StorageError::NotFound(_)) => false,
            WorkerError::Storage(_) => true,
            WorkerError::Record(RecordError::InvalidTransition { .. }) => false,
            WorkerError::Record(RecordError::GeometryOutsideReady { .. }) => false,
            WorkerError::Record(_) => true,
            WorkerError::Queue(_) => true,
        }
    }
}
