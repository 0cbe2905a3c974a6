//! Fixed-capacity lock-free SPSC queues.
//!
//! The two execution contexts communicate exclusively through two of
//! these (status: control → supervisory, command: supervisory → control),
//! and the companion-link receive path uses a byte-sized one as its ring
//! buffer.
//!
//! ```text
//! ┌──────────────┐   try_add / add_blocking    ┌──────────────┐
//! │   producer   │ ──────────────────────────▶ │   consumer   │
//! │  (one ctx)   │      [ring of N slots]      │ (other ctx)  │
//! └──────────────┘  try_remove/remove_blocking └──────────────┘
//! ```
//!
//! Single-producer/single-consumer by discipline: exactly one context
//! calls the add methods and exactly one calls the remove methods.
//! Correctness comes from the acquire/release pairing on the free-running
//! head/tail counters, not from any lock.
//!
//! The non-blocking `try_*` operations report capacity exhaustion instead
//! of waiting (status delivery drops the latest message on a full queue).
//! The blocking operations spin with a pause hint and are used where
//! backpressure must propagate (routine entry-command replay, consumer
//! drains).

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Fixed-capacity SPSC queue of `Copy` items.
pub struct SpscQueue<T: Copy, const N: usize> {
    buf: [UnsafeCell<MaybeUninit<T>>; N],
    /// Free-running write counter (owned by the producer).
    head: AtomicUsize,
    /// Free-running read counter (owned by the consumer).
    tail: AtomicUsize,
}

// SAFETY: the SPSC discipline guarantees a slot is never written and read
// concurrently. The producer only writes slots that the consumer has
// already released (head - tail < N checked with an Acquire load of tail),
// and publishes them with a Release store of head; the consumer mirrors
// this. Items are `Copy`, so dropping the queue with items still inside
// needs no destructor work.
unsafe impl<T: Copy + Send, const N: usize> Sync for SpscQueue<T, N> {}
unsafe impl<T: Copy + Send, const N: usize> Send for SpscQueue<T, N> {}

impl<T: Copy, const N: usize> SpscQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            buf: [const { UnsafeCell::new(MaybeUninit::uninit()) }; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    /// Non-blocking enqueue. Returns the item back on a full queue.
    ///
    /// Producer side only.
    pub fn try_add(&self, item: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= N {
            return Err(item); // Full — caller decides whether to drop.
        }

        // SAFETY: slot `head % N` is not visible to the consumer until the
        // Release store below, and the capacity check above proves the
        // consumer has finished with it.
        unsafe {
            (*self.buf[head % N].get()).write(item);
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Non-blocking dequeue. Consumer side only.
    pub fn try_remove(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail == head {
            return None; // Empty.
        }

        // SAFETY: head > tail proves the producer published this slot.
        let item = unsafe { (*self.buf[tail % N].get()).assume_init() };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Enqueue, spinning until space is available.
    pub fn add_blocking(&self, item: T) {
        let mut item = item;
        loop {
            match self.try_add(item) {
                Ok(()) => return,
                Err(back) => {
                    item = back;
                    core::hint::spin_loop();
                }
            }
        }
    }

    /// Dequeue, spinning until an item arrives.
    pub fn remove_blocking(&self) -> T {
        loop {
            if let Some(item) = self.try_remove() {
                return item;
            }
            core::hint::spin_loop();
        }
    }
}

impl<T: Copy, const N: usize> Default for SpscQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
