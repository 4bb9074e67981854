// Decode surface pool
// Fixed-size table of GPU decode surfaces. Each slot carries a decode
// reference count and a render count; a slot is handed out again only when
// both are zero. Exhaustion is reported by `get_free` returning `None`, never
// by growing the pool.

mod handle;

pub use handle::SurfaceHandle;

use crate::device::{DecodeSurface, RawSurface};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Index of a surface in its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(usize);

impl SurfaceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Usage of one surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceState {
    /// Outstanding decode references
    pub refs: u32,
    /// Outstanding render marks
    pub render: u32,
}

impl SurfaceState {
    pub fn is_free(&self) -> bool {
        self.refs == 0 && self.render == 0
    }

    pub fn is_referenced(&self) -> bool {
        self.refs > 0
    }

    pub fn is_rendering(&self) -> bool {
        self.render > 0
    }
}

struct Slot {
    surface: Arc<dyn DecodeSurface>,
    state: SurfaceState,
}

struct PoolInner {
    slots: Vec<Slot>,
    /// FREE slots, oldest first
    free: VecDeque<SurfaceId>,
}

impl PoolInner {
    fn slot_mut(&mut self, id: SurfaceId) -> Option<&mut Slot> {
        self.slots.get_mut(id.0)
    }

    fn requeue_if_free(&mut self, id: SurfaceId) {
        let free = self.slots[id.0].state.is_free();
        if free && !self.free.contains(&id) {
            self.free.push_back(id);
        }
    }
}

pub struct SurfacePool {
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl SurfacePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            inner: Mutex::new(PoolInner {
                slots: Vec::with_capacity(capacity),
                free: VecDeque::with_capacity(capacity),
            }),
        })
    }

    /// Register a surface as FREE. Adding a surface twice returns its
    /// existing id; `None` means the pool is full.
    pub fn add_surface(&self, surface: Arc<dyn DecodeSurface>) -> Option<SurfaceId> {
        let mut inner = self.inner.lock();
        let raw = surface.raw();

        if let Some(index) = inner.slots.iter().position(|s| s.surface.raw() == raw) {
            log::debug!("Surface {} already tracked", raw);
            return Some(SurfaceId(index));
        }

        if inner.slots.len() >= self.capacity {
            log::warn!(
                "Surface pool full ({} surfaces), ignoring {}",
                self.capacity,
                raw
            );
            return None;
        }

        let id = SurfaceId(inner.slots.len());
        inner.slots.push(Slot {
            surface,
            state: SurfaceState::default(),
        });
        inner.free.push_back(id);
        Some(id)
    }

    /// Take the oldest FREE surface other than `exclude` and mark it
    /// referenced. `None` is backpressure, not an error.
    pub fn get_free(&self, exclude: Option<SurfaceId>) -> Option<SurfaceId> {
        let mut inner = self.inner.lock();
        let pos = inner.free.iter().position(|id| Some(*id) != exclude)?;
        let id = inner.free.remove(pos)?;
        inner.slots[id.0].state = SurfaceState { refs: 1, render: 0 };
        Some(id)
    }

    /// `get_free` wrapped in a handle that drops the reference when released
    pub fn acquire(self: &Arc<Self>, exclude: Option<SurfaceId>) -> Option<SurfaceHandle> {
        let id = self.get_free(exclude)?;
        let surface = self.surface(id)?;
        Some(SurfaceHandle::new(self.clone(), id, surface))
    }

    pub fn clear_reference(&self, id: SurfaceId) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slot_mut(id) else {
            log::warn!("clear_reference: surface {} is not valid", id);
            return;
        };
        slot.state.refs = slot.state.refs.saturating_sub(1);
        inner.requeue_if_free(id);
    }

    /// Mark a surface as queued or shown on the render path. Fails for
    /// surfaces the pool does not track.
    pub fn mark_render(&self, id: SurfaceId) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slot_mut(id) else {
            log::warn!("mark_render: surface {} is not valid", id);
            return false;
        };
        slot.state.render += 1;
        inner.free.retain(|f| *f != id);
        true
    }

    pub fn clear_render(&self, id: SurfaceId) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slot_mut(id) else {
            log::warn!("clear_render: surface {} is not valid", id);
            return;
        };
        slot.state.render = slot.state.render.saturating_sub(1);
        inner.requeue_if_free(id);
    }

    pub fn is_valid(&self, id: SurfaceId) -> bool {
        id.0 < self.inner.lock().slots.len()
    }

    /// Translate an opaque surface value into its pool id
    pub fn lookup(&self, raw: RawSurface) -> Option<SurfaceId> {
        self.inner
            .lock()
            .slots
            .iter()
            .position(|s| s.surface.raw() == raw)
            .map(SurfaceId)
    }

    pub fn contains(&self, raw: RawSurface) -> bool {
        self.lookup(raw).is_some()
    }

    pub fn surface(&self, id: SurfaceId) -> Option<Arc<dyn DecodeSurface>> {
        self.inner.lock().slots.get(id.0).map(|s| s.surface.clone())
    }

    /// Opaque values of all surfaces, in slot order
    pub fn raw_surfaces(&self) -> Vec<RawSurface> {
        self.inner
            .lock()
            .slots
            .iter()
            .map(|s| s.surface.raw())
            .collect()
    }

    pub fn state(&self, id: SurfaceId) -> Option<SurfaceState> {
        self.inner.lock().slots.get(id.0).map(|s| s.state)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_free(&self) -> bool {
        !self.inner.lock().free.is_empty()
    }

    pub fn has_refs(&self) -> bool {
        self.inner
            .lock()
            .slots
            .iter()
            .any(|s| s.state.is_referenced())
    }
}

impl fmt::Debug for SurfacePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SurfacePool")
            .field("capacity", &self.capacity)
            .field("len", &inner.slots.len())
            .field("free", &inner.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::FakeSurface;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pool_of(n: usize) -> Arc<SurfacePool> {
        let pool = SurfacePool::new(n);
        for i in 0..n {
            let (surface, _) = FakeSurface::standalone(0x1000 + i);
            pool.add_surface(surface).unwrap();
        }
        pool
    }

    #[test]
    fn test_four_surface_scenario() {
        let pool = pool_of(4);
        assert_eq!(pool.len(), 4);

        let mut taken = Vec::new();
        for _ in 0..4 {
            taken.push(pool.get_free(None).unwrap());
        }
        taken.sort();
        taken.dedup();
        assert_eq!(taken.len(), 4);
        assert!(pool.get_free(None).is_none());
        assert!(!pool.has_free());

        let id = taken[0];
        assert!(pool.mark_render(id));
        pool.clear_reference(id);
        assert!(!pool.has_free(), "still rendering");

        pool.clear_render(id);
        assert!(pool.has_free());
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.get_free(None), Some(id));
    }

    #[test]
    fn test_add_surface_is_idempotent() {
        let pool = SurfacePool::new(2);
        let (surface, _) = FakeSurface::standalone(0x10);

        let first = pool.add_surface(surface.clone()).unwrap();
        let second = pool.add_surface(surface).unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.len(), 1);

        // Only one free entry even though it was added twice
        assert!(pool.get_free(None).is_some());
        assert!(pool.get_free(None).is_none());
    }

    #[test]
    fn test_add_surface_respects_capacity() {
        let pool = pool_of(2);
        let (extra, _) = FakeSurface::standalone(0x99);
        assert!(pool.add_surface(extra).is_none());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_get_free_skips_excluded() {
        let pool = pool_of(2);
        let first = pool.get_free(None).unwrap();
        pool.clear_reference(first);

        // `first` is now at the back of the queue; exclude the other one
        let other = pool.get_free(Some(first)).unwrap();
        assert_ne!(other, first);
        pool.clear_reference(other);

        let only = SurfaceId(0);
        let single = pool_of(1);
        assert!(single.get_free(Some(only)).is_none());
        assert_eq!(single.get_free(None), Some(only));
    }

    #[test]
    fn test_mark_render_untracked_fails() {
        let pool = pool_of(1);
        assert!(!pool.mark_render(SurfaceId(7)));
        assert!(!pool.is_valid(SurfaceId(7)));
        // Clearing an untracked surface is a logged no-op
        pool.clear_render(SurfaceId(7));
        pool.clear_reference(SurfaceId(7));
        assert!(pool.has_free());
    }

    #[test]
    fn test_mark_render_removes_free_surface() {
        let pool = pool_of(1);
        assert!(pool.mark_render(SurfaceId(0)));
        assert!(!pool.has_free());
        assert!(!pool.has_refs());
        pool.clear_render(SurfaceId(0));
        assert!(pool.has_free());
    }

    #[test]
    fn test_lookup_translates_raw_values() {
        let pool = pool_of(3);
        assert_eq!(pool.lookup(RawSurface(0x1002)), Some(SurfaceId(2)));
        assert!(pool.lookup(RawSurface(0xdead)).is_none());
        assert_eq!(
            pool.raw_surfaces(),
            vec![RawSurface(0x1000), RawSurface(0x1001), RawSurface(0x1002)]
        );
    }

    #[test]
    fn test_pool_drop_releases_surfaces() {
        let pool = SurfacePool::new(1);
        let (surface, state) = FakeSurface::standalone(0x20);
        pool.add_surface(surface);
        assert_eq!(state.live_surfaces(), 1);
        drop(pool);
        assert_eq!(state.live_surfaces(), 0);
    }

    /// Random operation sequences checked against a reference model
    #[test]
    fn test_random_sequences_keep_invariants() {
        const SIZE: usize = 5;

        for seed in 0..64u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let pool = pool_of(SIZE);
            let mut model = [SurfaceState::default(); SIZE];

            for _ in 0..400 {
                match rng.gen_range(0..4) {
                    0 => {
                        let exclude = if rng.gen_bool(0.3) {
                            Some(SurfaceId(rng.gen_range(0..SIZE)))
                        } else {
                            None
                        };
                        let expect_some = (0..SIZE)
                            .any(|i| model[i].is_free() && Some(SurfaceId(i)) != exclude);
                        match pool.get_free(exclude) {
                            Some(id) => {
                                assert!(model[id.0].is_free(), "seed {seed}: handed out busy surface");
                                assert_ne!(Some(id), exclude);
                                model[id.0] = SurfaceState { refs: 1, render: 0 };
                            }
                            None => assert!(!expect_some, "seed {seed}: free surface not handed out"),
                        }
                    }
                    1 => {
                        let i = rng.gen_range(0..SIZE);
                        pool.clear_reference(SurfaceId(i));
                        model[i].refs = model[i].refs.saturating_sub(1);
                    }
                    2 => {
                        let i = rng.gen_range(0..SIZE);
                        assert!(pool.mark_render(SurfaceId(i)));
                        model[i].render += 1;
                    }
                    _ => {
                        let i = rng.gen_range(0..SIZE);
                        pool.clear_render(SurfaceId(i));
                        model[i].render = model[i].render.saturating_sub(1);
                    }
                }

                for (i, expected) in model.iter().enumerate() {
                    assert_eq!(pool.state(SurfaceId(i)), Some(*expected), "seed {seed}");
                }
                assert_eq!(pool.has_free(), model.iter().any(|s| s.is_free()));
                assert_eq!(pool.has_refs(), model.iter().any(|s| s.refs > 0));
                assert_eq!(pool.len(), SIZE);
            }
        }
    }
}
