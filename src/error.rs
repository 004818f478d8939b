//! Unified error handling for the segmentation pipeline.
//!
//! Every contract violation is raised before any partial processing, so a
//! failed stage never hands back a half-annotated collection. Degenerate but
//! valid results (no staypoints for a user, no tours at all) are *not* errors;
//! they come back as empty collections with a warning on the log facade.

use thiserror::Error;

use crate::Crs;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SegmentationError>;

/// Errors raised by the segmentation stages and collection constructors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegmentationError {
    /// A positionfix carries a NaN or infinite coordinate. The whole batch is
    /// rejected: silently skipping the record would corrupt the time ordering
    /// the sliding window depends on.
    #[error("positionfix {index} of user {user_id} has a non-finite coordinate")]
    NonFiniteCoordinate { user_id: u64, index: usize },

    /// An interval record finishes before it starts.
    #[error("{kind} at position {index} finishes before it starts")]
    NegativeInterval { kind: &'static str, index: usize },

    /// A geometry does not satisfy the requirements of its record kind, e.g.
    /// a tripleg path with fewer than two coordinates.
    #[error("{kind} at position {index} has an invalid geometry: {detail}")]
    InvalidGeometry {
        kind: &'static str,
        index: usize,
        detail: &'static str,
    },

    /// Two ids collide within one collection.
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: u64 },

    /// A stage needs an annotation a previous stage should have produced.
    #[error("input is missing {what}")]
    MissingAnnotation { what: &'static str },

    /// A staypoint reached the trip assembler without an activity flag.
    #[error("staypoint {staypoint_id} has no activity flag; run create_activity_flag first")]
    MissingActivityFlag { staypoint_id: u64 },

    /// An unrecognized method name was parsed.
    #[error("unknown method: {value}")]
    UnknownMethod { value: String },

    /// An unrecognized distance metric name was parsed.
    #[error("unknown distance metric: {value}")]
    UnknownMetric { value: String },

    /// A duration string could not be parsed.
    #[error("cannot parse duration {value:?}; expected a value like \"1d\", \"2h\", \"30m\" or \"45s\"")]
    InvalidDuration { value: String },

    /// Two collections that must share a coordinate reference system do not.
    #[error("coordinate reference systems differ: {left:?} vs {right:?}")]
    CrsMismatch { left: Crs, right: Crs },

    /// An input collection that must not be empty is empty.
    #[error("{what} must not be empty")]
    EmptyInput { what: &'static str },
}
