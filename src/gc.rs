//! Chunked heap with reference-counted handles and mark-and-sweep backup.
//!
//! Every record the promise core works with (promises, reactions, jobs,
//! capabilities, functions) lives in a `GcBox` inside a fixed-capacity chunk, so
//! its address and id never change while it is alive. When the last handle to
//! an object drops, the object is reset and pooled. Objects released by that
//! reset are queued and handled by the same loop, so releasing a long chain
//! never recurses. Cycles never reach a zero count; the collector finds them by
//! subtracting the handles held inside the heap from each box's count. Boxes
//! with handles left over are roots, and whatever they cannot reach is reset
//! and pooled.
//!
//! Handles keep their chunk allocated. When the heap goes away every object is
//! reset, and handles that outlive it see default objects.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

/// Objects per chunk. Chunks are allocated with exactly this capacity and never
/// grow, which keeps every `GcBox` pointer stable.
const CHUNK_CAPACITY: usize = 256;

/// Collect after this many net allocations.
pub const DEFAULT_GC_THRESHOLD: usize = 100;

// ============================================================================
// Traits
// ============================================================================

/// Types whose references the collector can discover.
pub trait Traceable: Sized + Default + Reset {
    /// Call `visitor` for every `Gc<Self>` stored in this object.
    fn trace<F: FnMut(GcPtr<Self>)>(&self, visitor: F);
}

/// Types that can be cleared in place before going back to the pool.
pub trait Reset: Default {
    fn reset(&mut self);
}

// ============================================================================
// GcBox
// ============================================================================

/// Storage slot for one heap object.
pub struct GcBox<T: Traceable> {
    /// Linear index: chunk * CHUNK_CAPACITY + position in chunk
    index: usize,
    /// Bumped every time the slot is handed out again
    generation: Cell<u32>,
    data: RefCell<T>,
    ref_count: Cell<usize>,
    /// Handles to this box held by other heap objects, recounted each mark
    internal: Cell<usize>,
    pooled: Cell<bool>,
    marked: Cell<bool>,
}

impl<T: Traceable> GcBox<T> {
    /// Slots start out pooled; `alloc` clears the flag when it hands one out.
    fn new(index: usize) -> Self {
        Self {
            index,
            generation: Cell::new(0),
            data: RefCell::new(T::default()),
            ref_count: Cell::new(0),
            internal: Cell::new(0),
            pooled: Cell::new(true),
            marked: Cell::new(false),
        }
    }
}

/// Fixed block of `CHUNK_CAPACITY` slots, shared by the space and by every
/// handle into it.
struct Chunk<T: Traceable> {
    boxes: Box<[GcBox<T>]>,
}

impl<T: Traceable> Chunk<T> {
    fn new(first_index: usize) -> Self {
        Self {
            boxes: (0..CHUNK_CAPACITY)
                .map(|offset| GcBox::new(first_index + offset))
                .collect(),
        }
    }
}

/// A slot together with the chunk that keeps it allocated
type Slot<T> = (Rc<Chunk<T>>, NonNull<GcBox<T>>);

// ============================================================================
// Gc / GcPtr / WeakGc
// ============================================================================

/// Strong handle to a heap object. Cloning increments the reference count,
/// dropping the last handle resets the object and returns its slot to the pool.
pub struct Gc<T: Traceable> {
    id: usize,
    ptr: NonNull<GcBox<T>>,
    /// Keeps `ptr` valid, even after the heap is gone
    chunk: Rc<Chunk<T>>,
    /// Reference counts are only touched while the space is alive.
    space: Weak<RefCell<Space<T>>>,
}

impl<T: Traceable> Gc<T> {
    pub fn borrow(&self) -> Ref<'_, T> {
        // SAFETY: `chunk` keeps the box allocated, and a live handle keeps the
        // slot from being reused.
        unsafe { self.ptr.as_ref().data.borrow() }
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        // SAFETY: see `borrow`.
        unsafe { self.ptr.as_ref().data.borrow_mut() }
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, T>, std::cell::BorrowError> {
        // SAFETY: see `borrow`.
        unsafe { self.ptr.as_ref().data.try_borrow() }
    }

    /// Stable object id. Two handles with the same id denote the same object.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn ptr_eq(a: &Gc<T>, b: &Gc<T>) -> bool {
        a.id == b.id
    }

    /// A non-owning copy used while tracing.
    pub fn copy_ref(&self) -> GcPtr<T> {
        GcPtr {
            id: self.id,
            ptr: self.ptr,
        }
    }

    /// Observe this object without keeping it alive.
    pub fn downgrade(&self) -> WeakGc<T> {
        // SAFETY: see `borrow`.
        let generation = unsafe { self.ptr.as_ref().generation.get() };
        WeakGc {
            id: self.id,
            generation,
            ptr: self.ptr,
            chunk: Rc::downgrade(&self.chunk),
            space: self.space.clone(),
        }
    }
}

impl<T: Traceable> Clone for Gc<T> {
    fn clone(&self) -> Self {
        if self.space.upgrade().is_some() {
            // SAFETY: `chunk` keeps the box allocated.
            let gc_box = unsafe { self.ptr.as_ref() };
            if !gc_box.pooled.get() {
                gc_box.ref_count.set(gc_box.ref_count.get() + 1);
            }
        }
        Self {
            id: self.id,
            ptr: self.ptr,
            chunk: self.chunk.clone(),
            space: self.space.clone(),
        }
    }
}

impl<T: Traceable> Drop for Gc<T> {
    fn drop(&mut self) {
        let Some(space) = self.space.upgrade() else {
            return;
        };

        // SAFETY: `chunk` keeps the box allocated.
        let gc_box = unsafe { self.ptr.as_ref() };
        if gc_box.pooled.get() {
            return;
        }

        let count = gc_box.ref_count.get().saturating_sub(1);
        gc_box.ref_count.set(count);
        if count > 0 {
            return;
        }

        // A borrowed space means a collection is running; its sweep takes the box.
        let outermost = {
            let Ok(mut space) = space.try_borrow_mut() else {
                return;
            };
            space.release_queue.push((self.chunk.clone(), self.ptr));
            !std::mem::replace(&mut space.releasing, true)
        };
        if outermost {
            release_queued(&space);
        }
    }
}

/// Reset and pool queued objects until the queue is empty. Handles dropped by
/// a reset land back in the queue instead of recursing.
fn release_queued<T: Traceable>(space: &RefCell<Space<T>>) {
    loop {
        let next = match space.try_borrow_mut() {
            Ok(mut space) => space.release_queue.pop(),
            Err(_) => None,
        };
        let Some((chunk, ptr)) = next else {
            break;
        };

        // SAFETY: `chunk` keeps the box allocated.
        let gc_box = unsafe { ptr.as_ref() };
        if gc_box.pooled.get() || gc_box.ref_count.get() > 0 {
            continue;
        }
        match gc_box.data.try_borrow_mut() {
            Ok(mut data) => data.reset(),
            // Still borrowed: left for the collector
            Err(_) => continue,
        }
        if let Ok(mut space) = space.try_borrow_mut() {
            space.pool_object(chunk, ptr);
        }
    }
    if let Ok(mut space) = space.try_borrow_mut() {
        space.releasing = false;
    }
}

impl<T: Traceable> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: Traceable> Eq for Gc<T> {}

impl<T: Traceable> std::hash::Hash for Gc<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: Traceable> std::fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gc").field("id", &self.id).finish()
    }
}

/// Copyable pointer without Drop, handed to `Traceable::trace` visitors.
pub struct GcPtr<T: Traceable> {
    pub(crate) id: usize,
    pub(crate) ptr: NonNull<GcBox<T>>,
}

impl<T: Traceable> Copy for GcPtr<T> {}

impl<T: Traceable> Clone for GcPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Traceable> GcPtr<T> {
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Weak observation of a heap object: identity plus the slot generation it was
/// taken at. Upgrading fails once the object has been released, even if the
/// slot was handed out again.
pub struct WeakGc<T: Traceable> {
    id: usize,
    generation: u32,
    ptr: NonNull<GcBox<T>>,
    chunk: Weak<Chunk<T>>,
    space: Weak<RefCell<Space<T>>>,
}

impl<T: Traceable> WeakGc<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether `gc` is the very object this weak handle was taken from.
    pub fn is(&self, gc: &Gc<T>) -> bool {
        self.id == gc.id && self.is_alive()
    }

    pub fn is_alive(&self) -> bool {
        if self.space.upgrade().is_none() {
            return false;
        }
        // SAFETY: the space is alive, so the chunk holding the box is too.
        let gc_box = unsafe { self.ptr.as_ref() };
        !gc_box.pooled.get() && gc_box.generation.get() == self.generation
    }

    pub fn upgrade(&self) -> Option<Gc<T>> {
        if !self.is_alive() {
            return None;
        }
        let chunk = self.chunk.upgrade()?;
        // SAFETY: checked alive above.
        let gc_box = unsafe { self.ptr.as_ref() };
        gc_box.ref_count.set(gc_box.ref_count.get() + 1);
        Some(Gc {
            id: self.id,
            ptr: self.ptr,
            chunk,
            space: self.space.clone(),
        })
    }
}

impl<T: Traceable> Clone for WeakGc<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            generation: self.generation,
            ptr: self.ptr,
            chunk: self.chunk.clone(),
            space: self.space.clone(),
        }
    }
}

impl<T: Traceable> std::fmt::Debug for WeakGc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakGc")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}

// ============================================================================
// Space
// ============================================================================

struct Space<T: Traceable> {
    chunks: Vec<Rc<Chunk<T>>>,
    /// Slots handed out at least once
    used_slots: usize,
    free_list: Vec<Slot<T>>,
    /// Objects whose last handle dropped, waiting to be reset and pooled
    release_queue: Vec<Slot<T>>,
    /// Set while some drop is working through `release_queue`
    releasing: bool,
    /// Reused between cycles
    mark_stack: Vec<NonNull<GcBox<T>>>,
    net_allocs: isize,
    /// 0 disables automatic collection
    gc_threshold: isize,
    collections: usize,
    self_weak: Weak<RefCell<Space<T>>>,
}

impl<T: Traceable> Space<T> {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            used_slots: 0,
            free_list: Vec::new(),
            release_queue: Vec::new(),
            releasing: false,
            mark_stack: Vec::new(),
            net_allocs: 0,
            gc_threshold: DEFAULT_GC_THRESHOLD as isize,
            collections: 0,
            self_weak: Weak::new(),
        }
    }

    fn alloc(&mut self) -> Gc<T> {
        if self.gc_threshold > 0 && self.net_allocs >= self.gc_threshold {
            self.collect();
        }

        let (chunk, ptr) = match self.free_list.pop() {
            Some(slot) => slot,
            None => self.fresh_slot(),
        };

        // SAFETY: `chunk` keeps the box allocated.
        let gc_box = unsafe { ptr.as_ref() };
        gc_box.pooled.set(false);
        gc_box.generation.set(gc_box.generation.get().wrapping_add(1));
        gc_box.ref_count.set(1);
        self.net_allocs += 1;

        Gc {
            id: gc_box.index,
            ptr,
            chunk,
            space: self.self_weak.clone(),
        }
    }

    fn fresh_slot(&mut self) -> Slot<T> {
        let offset = self.used_slots % CHUNK_CAPACITY;
        let chunk = match self.chunks.last() {
            Some(chunk) if offset != 0 => chunk.clone(),
            _ => {
                let chunk = Rc::new(Chunk::new(self.used_slots));
                self.chunks.push(chunk.clone());
                chunk
            }
        };
        self.used_slots += 1;
        let ptr = chunk
            .boxes
            .get(offset)
            .map_or(NonNull::dangling(), NonNull::from);
        (chunk, ptr)
    }

    fn pool_object(&mut self, chunk: Rc<Chunk<T>>, ptr: NonNull<GcBox<T>>) {
        // SAFETY: `chunk` keeps the box allocated.
        let gc_box = unsafe { ptr.as_ref() };
        if gc_box.pooled.get() {
            return;
        }
        gc_box.pooled.set(true);
        self.net_allocs -= 1;
        self.free_list.push((chunk, ptr));
    }

    /// Roots are boxes with more handles than heap objects account for: some
    /// are held from outside the heap. Cycles reachable only from themselves
    /// stay unmarked.
    fn mark(&mut self) {
        let mut stack = std::mem::take(&mut self.mark_stack);
        stack.clear();

        for chunk in &self.chunks {
            for gc_box in chunk.boxes.iter() {
                gc_box.marked.set(false);
                gc_box.internal.set(0);
            }
        }

        for chunk in &self.chunks {
            for gc_box in chunk.boxes.iter() {
                if gc_box.pooled.get() {
                    continue;
                }
                match gc_box.data.try_borrow() {
                    Ok(data) => data.trace(|child: GcPtr<T>| {
                        // SAFETY: traced children are objects in our chunks.
                        let child_box = unsafe { child.ptr.as_ref() };
                        child_box.internal.set(child_box.internal.get() + 1);
                    }),
                    // Borrowed mutably right now, so reached through a live handle.
                    Err(_) => stack.push(NonNull::from(gc_box)),
                }
            }
        }

        for chunk in &self.chunks {
            for gc_box in chunk.boxes.iter() {
                if !gc_box.pooled.get() && gc_box.ref_count.get() > gc_box.internal.get() {
                    stack.push(NonNull::from(gc_box));
                }
            }
        }

        while let Some(ptr) = stack.pop() {
            // SAFETY: the stack only ever holds pointers into our chunks.
            let gc_box = unsafe { ptr.as_ref() };
            if gc_box.marked.replace(true) {
                continue;
            }
            let Ok(data) = gc_box.data.try_borrow() else {
                continue;
            };
            data.trace(|child: GcPtr<T>| {
                // SAFETY: traced children are live objects in our chunks.
                let child_box = unsafe { child.ptr.as_ref() };
                if !child_box.marked.get() && !child_box.pooled.get() {
                    stack.push(child.ptr);
                }
            });
        }

        self.mark_stack = stack;
    }

    /// Returns the number of objects reclaimed.
    ///
    /// Every unmarked box is reset by this loop. Handles dropped by a reset
    /// only lower counts, since the space is borrowed for the whole sweep.
    fn sweep(&mut self) -> usize {
        let mut unmarked = Vec::new();
        for chunk in &self.chunks {
            for gc_box in chunk.boxes.iter() {
                if gc_box.pooled.get() || gc_box.marked.get() {
                    continue;
                }
                if let Ok(mut data) = gc_box.data.try_borrow_mut() {
                    data.reset();
                    unmarked.push((chunk.clone(), NonNull::from(gc_box)));
                }
            }
        }

        // Pool only once every reset is done and the counts have settled.
        let mut collected = 0;
        for (chunk, ptr) in unmarked {
            // SAFETY: `chunk` keeps the box allocated.
            let gc_box = unsafe { ptr.as_ref() };
            if gc_box.ref_count.get() == 0 {
                self.pool_object(chunk, ptr);
                collected += 1;
            }
        }
        collected
    }

    fn collect(&mut self) -> usize {
        self.mark();
        let collected = self.sweep();
        self.net_allocs = 0;
        self.collections += 1;
        collected
    }

    fn stats(&self) -> GcStats {
        GcStats {
            total_objects: self.used_slots,
            pooled_objects: self.free_list.len(),
            live_objects: self.used_slots - self.free_list.len(),
            collections: self.collections,
        }
    }
}

impl<T: Traceable> Drop for Space<T> {
    fn drop(&mut self) {
        // Resetting drops the handles objects hold on each other, so chunks
        // stay allocated only for handles held outside the heap. Those see
        // `pooled` and default data from here on.
        for chunk in &self.chunks {
            for gc_box in chunk.boxes.iter() {
                gc_box.pooled.set(true);
                if let Ok(mut data) = gc_box.data.try_borrow_mut() {
                    data.reset();
                }
            }
        }
    }
}

// ============================================================================
// Heap
// ============================================================================

/// Public entry point to the collector.
pub struct Heap<T: Traceable> {
    inner: Rc<RefCell<Space<T>>>,
}

impl<T: Traceable> Heap<T> {
    pub fn new() -> Self {
        let inner = Rc::new(RefCell::new(Space::new()));
        inner.borrow_mut().self_weak = Rc::downgrade(&inner);
        Self { inner }
    }

    /// Allocate a default-initialized object. The returned handle holds the
    /// only reference.
    pub fn alloc(&self) -> Gc<T> {
        self.inner.borrow_mut().alloc()
    }

    /// Allocate and initialize in one step.
    pub fn alloc_with(&self, data: T) -> Gc<T> {
        let gc = self.alloc();
        *gc.borrow_mut() = data;
        gc
    }

    /// Force a full collection, returning the number of objects reclaimed.
    pub fn collect(&self) -> usize {
        self.inner.borrow_mut().collect()
    }

    pub fn stats(&self) -> GcStats {
        self.inner.borrow().stats()
    }

    /// Set the GC threshold (0 = disable automatic collection)
    pub fn set_gc_threshold(&self, threshold: usize) {
        self.inner.borrow_mut().gc_threshold = threshold as isize;
    }
}

impl<T: Traceable> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the garbage collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Total number of slots ever created (including pooled)
    pub total_objects: usize,
    pub pooled_objects: usize,
    pub live_objects: usize,
    /// Completed mark-and-sweep cycles
    pub collections: usize,
}
