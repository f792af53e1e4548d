//! # nupush-core
//!
//! The engine behind the `nupush` CLI: idempotent NuGet package
//! publishing for CI pipelines.
//!
//! The core flow is **resolve → check → build → push → report**:
//!
//! 1. [`engine::run_publish`] resolves the working directory, project
//!    file, package name, and version (explicit flags win, project
//!    metadata and CI environment variables fill the gaps).
//! 2. The registry's per-package version index is consulted; a version
//!    that is already listed short-circuits the run as an
//!    `already-published` success — nothing is built, nothing is pushed.
//! 3. Otherwise the restore/clean/build/pack stages run sequentially,
//!    each captured into the [`outcome::PublishOutcome`], and the packed
//!    artifact is pushed with duplicate tolerance.
//! 4. The outcome is returned on **every** exit path — success, skip,
//!    failure, or cancellation — so the caller can always write the
//!    report before mapping the status to an exit code.
//!
//! ## Modules
//!
//! - [`engine`] — resolution, publish decision, and pipeline driver
//! - [`outcome`] — the outcome accumulator and report rendering

/// Resolution, publish decision, and pipeline driver.
pub mod engine;

/// Outcome accumulator and report rendering.
pub mod outcome;
