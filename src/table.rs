use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// Test-and-test-and-set spinlock.
///
/// Bucket critical sections are a single prepend or one chain scan, so the
/// waiter spins instead of parking the thread.
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: `lock` hands out at most one `SpinGuard` at a time, so `&mut T`
// is never aliased across threads.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Wait on plain loads until the holder releases; keeps the
            // cache line out of the RMW path while contended.
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
        SpinGuard { lock: self }
    }
}

pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

struct Entry {
    key: u64,
    value: u64,
    next: Option<Box<Entry>>,
}

/// One bucket's entries. Insertion prepends, so a scan sees the most
/// recently inserted match first. Entries are never removed.
#[derive(Default)]
struct Chain {
    head: Option<Box<Entry>>,
}

impl Chain {
    fn push_front(&mut self, key: u64, value: u64) {
        let next = self.head.take();
        self.head = Some(Box::new(Entry { key, value, next }));
    }

    fn find(&self, key: u64) -> Option<&Entry> {
        let mut cur = self.head.as_deref();
        while let Some(entry) = cur {
            if entry.key == key {
                return Some(entry);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head.as_deref();
        while let Some(entry) = cur {
            n += 1;
            cur = entry.next.as_deref();
        }
        n
    }
}

impl Drop for Chain {
    // The derived drop recurses once per entry; chains run tens of
    // thousands of entries deep at small bucket counts.
    fn drop(&mut self) {
        let mut cur = self.head.take();
        while let Some(mut entry) = cur {
            cur = entry.next.take();
        }
    }
}

/// Fixed-width chained hash table with one spinlock per bucket.
///
/// Supports insert and lookup only. Deletion, resizing, and iteration are
/// outside its contract; the bench accesses it strictly insert-then-lookup
/// with a full barrier between the phases.
pub struct Table {
    buckets: Vec<SpinLock<Chain>>,
}

impl Table {
    pub fn with_buckets(n: usize) -> Self {
        assert!(n > 0, "table needs at least one bucket");
        let mut buckets = Vec::with_capacity(n);
        for _ in 0..n {
            buckets.push(SpinLock::new(Chain::default()));
        }
        Table { buckets }
    }

    /// Bucket owning `key`. Must compute identically on insert and lookup.
    #[inline]
    pub fn bucket_index(&self, key: u64) -> usize {
        (key % self.buckets.len() as u64) as usize
    }

    pub fn insert(&self, key: u64, value: u64) {
        let i = self.bucket_index(key);
        self.buckets[i].lock().push_front(key, value);
    }

    /// Value of the most recently inserted entry under `key`, copied out
    /// before the bucket lock is released.
    pub fn get(&self, key: u64) -> Option<u64> {
        let i = self.bucket_index(key);
        let chain = self.buckets[i].lock();
        chain.find(key).map(|entry| entry.value)
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Number of entries chained in bucket `index`.
    pub fn bucket_len(&self, index: usize) -> usize {
        self.buckets[index].lock().len()
    }
}
