// Frame buffer pool
// Recycles the buffers the media pipeline receives as decoded frames. Slot
// ids are stable; returned slots are reused before new ones are allocated.
// Every hand-out bumps the slot generation, so a lease that outlives a raw
// `return_buffer` can no longer reach the slot's next owner.

use crate::codec::PixelFormat;
use crate::device::SurfaceFormat;
use crate::surface::SurfaceHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

/// Buffer-pool contract of the media pipeline
pub trait BufferPool: Send + Sync {
    /// Hand out a free buffer, `None` when the pool cannot provide one
    fn get(&self) -> Option<VideoBuffer>;

    /// Give a buffer id back to the pool
    fn return_buffer(&self, id: usize);
}

/// Slot record behind a `VideoBuffer`
#[derive(Debug)]
pub(crate) struct FrameBuffer {
    id: usize,
    generation: u64,
    picture: Option<SurfaceHandle>,
    pixel_format: PixelFormat,
    surface_format: Option<SurfaceFormat>,
}

impl FrameBuffer {
    fn new(id: usize) -> Self {
        Self {
            id,
            generation: 0,
            picture: None,
            pixel_format: PixelFormat::D3d11Va,
            surface_format: None,
        }
    }
}

struct PoolState {
    all: Vec<FrameBuffer>,
    used: VecDeque<usize>,
    free: VecDeque<usize>,
}

impl PoolState {
    /// Slot `id` if it still belongs to the lease of `generation`
    fn leased(&self, id: usize, generation: u64) -> Option<&FrameBuffer> {
        self.all.get(id).filter(|b| b.generation == generation)
    }

    fn leased_mut(&mut self, id: usize, generation: u64) -> Option<&mut FrameBuffer> {
        self.all.get_mut(id).filter(|b| b.generation == generation)
    }

    /// Move `id` from USED to FREE
    fn recycle(&mut self, id: usize) -> bool {
        match self.used.iter().position(|used| *used == id) {
            Some(pos) => {
                self.used.remove(pos);
                self.free.push_back(id);
                true
            }
            None => false,
        }
    }
}

pub struct FrameBufferPool {
    /// `None` grows on demand
    limit: Option<usize>,
    state: Mutex<PoolState>,
    me: Weak<FrameBufferPool>,
}

impl FrameBufferPool {
    /// Pool that allocates a new slot whenever none is free
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Pool that never holds more than `limit` slots
    pub fn with_limit(limit: usize) -> Arc<Self> {
        Self::build(Some(limit))
    }

    fn build(limit: Option<usize>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            limit,
            state: Mutex::new(PoolState {
                all: Vec::new(),
                used: VecDeque::new(),
                free: VecDeque::new(),
            }),
            me: me.clone(),
        })
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Slots allocated so far
    pub fn len(&self) -> usize {
        self.state.lock().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn used_count(&self) -> usize {
        self.state.lock().used.len()
    }

    fn set_picture(&self, lease: &Lease, picture: SurfaceHandle, format: PixelFormat) {
        let old = {
            let mut state = self.state.lock();
            let Some(buffer) = state.leased_mut(lease.id, lease.generation) else {
                log::warn!("set_picture: buffer {} was handed out again", lease.id);
                return;
            };
            buffer.pixel_format = format;
            buffer.surface_format = Some(picture.format());
            buffer.picture.replace(picture)
        };
        drop(old);
    }

    fn picture(&self, lease: &Lease) -> Option<SurfaceHandle> {
        self.state
            .lock()
            .leased(lease.id, lease.generation)
            .and_then(|b| b.picture.clone())
    }

    fn pixel_format(&self, lease: &Lease) -> PixelFormat {
        self.state
            .lock()
            .leased(lease.id, lease.generation)
            .map(|b| b.pixel_format)
            .unwrap_or(PixelFormat::D3d11Va)
    }

    fn surface_format(&self, lease: &Lease) -> Option<SurfaceFormat> {
        self.state
            .lock()
            .leased(lease.id, lease.generation)
            .and_then(|b| b.surface_format)
    }

    /// Last lease dropped: release the payload, then recycle the slot unless
    /// it was already returned by id
    fn release_lease(&self, id: usize, generation: u64) {
        let picture = {
            let mut state = self.state.lock();
            let Some(buffer) = state.leased_mut(id, generation) else {
                log::debug!("Frame buffer {} already handed out again", id);
                return;
            };
            let picture = buffer.picture.take();
            buffer.surface_format = None;
            state.recycle(id);
            picture
        };
        // Surface pool callbacks run without our lock held
        drop(picture);
    }
}

impl BufferPool for FrameBufferPool {
    fn get(&self) -> Option<VideoBuffer> {
        let pool = self.me.upgrade()?;

        let (id, generation, stale) = {
            let mut state = self.state.lock();
            let id = match state.free.pop_front() {
                Some(id) => id,
                None => {
                    if self.limit.is_some_and(|limit| state.all.len() >= limit) {
                        log::debug!("Frame buffer pool exhausted ({} buffers)", state.all.len());
                        return None;
                    }
                    let id = state.all.len();
                    state.all.push(FrameBuffer::new(id));
                    id
                }
            };
            state.used.push_back(id);
            let buffer = &mut state.all[id];
            debug_assert_eq!(buffer.id, id);
            buffer.generation += 1;
            buffer.pixel_format = PixelFormat::D3d11Va;
            buffer.surface_format = None;
            (id, buffer.generation, buffer.picture.take())
        };
        drop(stale);

        Some(VideoBuffer {
            lease: Arc::new(Lease {
                pool,
                id,
                generation,
            }),
        })
    }

    fn return_buffer(&self, id: usize) {
        if !self.state.lock().recycle(id) {
            log::warn!("return_buffer: buffer {} is not in use", id);
        }
    }
}

impl fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameBufferPool")
            .field("limit", &self.limit)
            .field("len", &state.all.len())
            .field("used", &state.used.len())
            .field("free", &state.free.len())
            .finish()
    }
}

struct Lease {
    pool: Arc<FrameBufferPool>,
    id: usize,
    generation: u64,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.release_lease(self.id, self.generation);
    }
}

/// Reference-counted lease on one pooled frame buffer. The slot goes back to
/// the pool when the last clone drops.
#[derive(Clone)]
pub struct VideoBuffer {
    lease: Arc<Lease>,
}

impl VideoBuffer {
    pub fn id(&self) -> usize {
        self.lease.id
    }

    pub fn set_picture(&self, picture: SurfaceHandle, format: PixelFormat) {
        self.lease.pool.set_picture(&self.lease, picture, format);
    }

    pub fn picture(&self) -> Option<SurfaceHandle> {
        self.lease.pool.picture(&self.lease)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.lease.pool.pixel_format(&self.lease)
    }

    pub fn surface_format(&self) -> Option<SurfaceFormat> {
        self.lease.pool.surface_format(&self.lease)
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.lease)
    }
}

impl fmt::Debug for VideoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoBuffer")
            .field("id", &self.lease.id)
            .field("refs", &self.ref_count())
            .finish()
    }
}
