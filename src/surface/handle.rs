// Surface handle
// Shared ownership of one decode reference on a pooled surface. Clones share
// a single binding; the pool is notified once, when the last clone drops.

use super::{SurfaceId, SurfacePool};
use crate::device::{DecodeSurface, RawSurface, SurfaceFormat};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct Binding {
    pool: Arc<SurfacePool>,
    id: SurfaceId,
    surface: Arc<dyn DecodeSurface>,
    rendering: AtomicBool,
}

impl Drop for Binding {
    fn drop(&mut self) {
        if self.rendering.load(Ordering::Acquire) {
            self.pool.clear_render(self.id);
        }
        self.pool.clear_reference(self.id);
    }
}

#[derive(Clone)]
pub struct SurfaceHandle {
    binding: Arc<Binding>,
}

impl SurfaceHandle {
    /// Takes over the decode reference `id` already holds in `pool`
    pub(super) fn new(
        pool: Arc<SurfacePool>,
        id: SurfaceId,
        surface: Arc<dyn DecodeSurface>,
    ) -> Self {
        Self {
            binding: Arc::new(Binding {
                pool,
                id,
                surface,
                rendering: AtomicBool::new(false),
            }),
        }
    }

    /// Mark the surface as held by the render path. The mark is taken once
    /// per binding and cleared when the last clone drops.
    pub fn mark_render(&self) -> bool {
        if self.binding.rendering.swap(true, Ordering::AcqRel) {
            return true;
        }
        if !self.binding.pool.mark_render(self.binding.id) {
            self.binding.rendering.store(false, Ordering::Release);
            return false;
        }
        true
    }

    pub fn is_rendering(&self) -> bool {
        self.binding.rendering.load(Ordering::Acquire)
    }

    pub fn id(&self) -> SurfaceId {
        self.binding.id
    }

    pub fn raw(&self) -> RawSurface {
        self.binding.surface.raw()
    }

    pub fn format(&self) -> SurfaceFormat {
        self.binding.surface.format()
    }

    pub fn pool(&self) -> &Arc<SurfacePool> {
        &self.binding.pool
    }

    /// Number of live clones sharing this binding
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.binding)
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("id", &self.binding.id)
            .field("raw", &self.raw())
            .field("rendering", &self.is_rendering())
            .finish()
    }
}
