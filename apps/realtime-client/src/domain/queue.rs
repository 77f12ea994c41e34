//! Ring Queue
//!
//! Growable circular buffer with O(1) enqueue and dequeue. Capacity doubles
//! when the buffer is full, so elements are never dropped.

/// Default initial capacity.
const DEFAULT_CAPACITY: usize = 16;

/// Circular FIFO buffer.
///
/// # Example
///
/// ```rust
/// use realtime_client::domain::queue::RingQueue;
///
/// let mut queue = RingQueue::new();
/// queue.enqueue(1);
/// queue.enqueue(2);
/// assert_eq!(queue.dequeue(), Some(1));
/// assert_eq!(queue.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct RingQueue<T> {
    buffer: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> Default for RingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RingQueue<T> {
    /// Create an empty queue with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty queue with room for `capacity` elements before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);
        Self {
            buffer,
            head: 0,
            len: 0,
        }
    }

    /// Append an element at the tail.
    pub fn enqueue(&mut self, item: T) {
        if self.len == self.buffer.len() {
            self.grow();
        }
        let tail = (self.head + self.len) % self.buffer.len();
        self.buffer[tail] = Some(item);
        self.len += 1;
    }

    /// Remove and return the element at the head.
    pub fn dequeue(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.buffer[self.head].take();
        self.head = (self.head + 1) % self.buffer.len();
        self.len -= 1;
        item
    }

    /// Borrow the element at the head without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        if self.len == 0 {
            None
        } else {
            self.buffer[self.head].as_ref()
        }
    }

    /// Number of queued elements.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the queue is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current allocated capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Drop every queued element, keeping the allocation.
    pub fn clear(&mut self) {
        while self.dequeue().is_some() {}
        self.head = 0;
    }

    fn grow(&mut self) {
        let old_capacity = self.buffer.len();
        let mut buffer: Vec<Option<T>> = Vec::with_capacity(old_capacity * 2);
        // unroll so the head lands at index 0
        for offset in 0..self.len {
            let index = (self.head + offset) % old_capacity;
            buffer.push(self.buffer[index].take());
        }
        buffer.resize_with(old_capacity * 2, || None);
        self.buffer = buffer;
        self.head = 0;
    }
}

impl<T> Extend<T> for RingQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.enqueue(item);
        }
    }
}
