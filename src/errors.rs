//! Error Types
//!
//! This module defines the error types used throughout the frame graph core.
//!
//! # Overview
//!
//! The main error type [`ForgeError`] covers the *recoverable* failure modes:
//! - Drawable / swap-chain acquisition failures
//! - Render-target view creation failures
//! - Frame submission validation errors
//!
//! Invariant violations (writing to an immutable resource, disposing an
//! unknown handle, merging two clears into one encoder) are programming
//! errors and **panic** instead — a frame either commits or the process
//! aborts.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, ForgeError>`.

use thiserror::Error;

/// The main error type for the frame graph core.
///
/// Only *transient* conditions are represented here; every variant is one a
/// caller can meaningfully react to (usually by skipping a pass or retrying
/// next frame).
#[derive(Error, Debug)]
pub enum ForgeError {
    // ========================================================================
    // Presentation Errors
    // ========================================================================
    /// The presentation layer could not provide a drawable this frame.
    ///
    /// The draw pass rendering to the window-handle texture is skipped; the
    /// rest of the frame still commits.
    #[error("Failed to acquire a drawable from the presentation layer: {0}")]
    DrawableAcquisitionFailed(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Creating a texture view over an existing texture failed.
    #[error("Failed to create a texture view: {0}")]
    TextureViewCreationFailed(String),

    /// A handle was used before its parent resource was materialised.
    #[error("Resource backing not materialised for {0}")]
    BackingMissing(&'static str),

    // ========================================================================
    // Submission Errors
    // ========================================================================
    /// A frame submission referenced data inconsistently (e.g. a pass whose
    /// command range lies outside the submitted command stream).
    #[error("Invalid frame submission: {0}")]
    InvalidSubmission(String),
}

/// Alias for `Result<T, ForgeError>`.
pub type Result<T> = std::result::Result<T, ForgeError>;
