use thiserror::Error;

/// Failures reported by a device backend.
/// A failing rebuild is aborted and the previously built structures stay in use.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("out of device memory allocating {requested} bytes")]
    OutOfDeviceMemory { requested: u64 },
    #[error("handle {0} is not live on this backend")]
    InvalidHandle(u64),
    #[error("update build is not compatible with the structure: {0}")]
    InvalidUpdate(String),
    #[error("device error: {0}")]
    Device(String),
}

/// Caller broke the contract of an operation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[error("population changed since the last full build: built {built}, now {current}")]
    PopulationMismatch { built: usize, current: usize },
    #[error("bounding boxes changed since the structures were built (epoch {built}, now {current})")]
    StaleGeneration { built: u64, current: u64 },
    #[error("top level update does not match the last full build at instance {index}")]
    TopLevelMismatch { index: usize },
    #[error("patch subdivision is not implemented (requested depth {depth})")]
    SubdivisionUnsupported { depth: u32 },
    #[error("unknown scene {0}")]
    UnknownScene(u32),
    #[error("unsupported degree {0}, expected 1 to 4")]
    InvalidDegree(usize),
    #[error("instance index {index} out of range ({count} instances)")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("scene is full, at most {limit} ray traceable objects fit")]
    TooManyObjects { limit: usize },
    #[error("sphere radius must be finite and non-negative")]
    InvalidRadius,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
