//! The content-serving collaborator.
//!
//! The catalog core only drives serving contexts through the narrow
//! [`ServingContext`] interface: start, stop, activity probe, and size.
//! How bytes of the underlying scientific format actually reach the wire
//! is not this crate's concern.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use voxserve_core::{CatalogError, Dataset, Result};

/// A live, independently addressable unit that serves one dataset's
/// content once started.
///
/// Start failures leave the context registered but inactive; callers must
/// poll [`ServingContext::is_active`] rather than assume success.
pub trait ServingContext: Send + Sync {
    /// Begin serving. Idempotent.
    fn start(&self) -> Result<()>;

    /// Stop serving. Idempotent.
    fn stop(&self);

    /// Whether the context is currently serving.
    fn is_active(&self) -> bool;

    /// Size in bytes of the dataset content, 0 until started.
    fn dataset_size(&self) -> u64;
}

/// Builds serving contexts from dataset records.
///
/// The registry owns lifecycle and routing; the factory owns the
/// transport-specific handle construction.
pub trait ContextFactory: Send + Sync {
    fn build(&self, dataset: &Dataset) -> Result<Arc<dyn ServingContext>>;
}

/// Serving context backed by a dataset descriptor file on the local
/// filesystem.
pub struct FsServingContext {
    content_path: PathBuf,
    active: AtomicBool,
    size: AtomicU64,
}

impl FsServingContext {
    pub fn new(content_path: impl Into<PathBuf>) -> Self {
        Self {
            content_path: content_path.into(),
            active: AtomicBool::new(false),
            size: AtomicU64::new(0),
        }
    }
}

impl ServingContext for FsServingContext {
    fn start(&self) -> Result<()> {
        let meta = std::fs::metadata(&self.content_path).map_err(|e| {
            CatalogError::Other(format!(
                "cannot read dataset content at {}: {}",
                self.content_path.display(),
                e
            ))
        })?;
        self.size.store(meta.len(), Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn dataset_size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }
}

/// Default factory: one [`FsServingContext`] per dataset, rooted at the
/// dataset's content path.
#[derive(Default)]
pub struct FsContextFactory;

impl ContextFactory for FsContextFactory {
    fn build(&self, dataset: &Dataset) -> Result<Arc<dyn ServingContext>> {
        Ok(Arc::new(FsServingContext::new(&dataset.path)))
    }
}
