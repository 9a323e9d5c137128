//! Audio buffers and delay lines for the routing graph.
//!
//! The [`BufferPool`] holds the physical buffers a compiled schedule writes
//! into. Slot assignment is done at compile time by liveness analysis, so a
//! pool only needs as many buffers as are simultaneously live.
//!
//! [`CompensationDelay`] is the ring buffer behind every latency
//! compensation node. Its capacity is fixed at construction; the active delay
//! can move anywhere below it without allocating.

#[cfg(not(feature = "std"))]
use alloc::vec;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// A stereo audio buffer.
#[derive(Debug, Default, Clone)]
pub struct StereoBuffer {
    /// Left channel samples.
    pub left: Vec<f32>,
    /// Right channel samples.
    pub right: Vec<f32>,
}

impl StereoBuffer {
    /// Creates a zeroed buffer of `block_size` samples per channel.
    pub fn new(block_size: usize) -> Self {
        Self {
            left: vec![0.0; block_size],
            right: vec![0.0; block_size],
        }
    }

    /// Zeroes both channels.
    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }

    /// Resizes both channels, zeroing new samples.
    pub fn resize(&mut self, block_size: usize) {
        self.left.resize(block_size, 0.0);
        self.right.resize(block_size, 0.0);
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// True if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Copies the first `len` samples of `other` into `self`.
    #[inline]
    pub fn copy_prefix(&mut self, other: &StereoBuffer, len: usize) {
        self.left[..len].copy_from_slice(&other.left[..len]);
        self.right[..len].copy_from_slice(&other.right[..len]);
    }

    /// Adds the first `len` samples of `other` into `self`.
    #[inline]
    pub fn accumulate_prefix(&mut self, other: &StereoBuffer, len: usize) {
        for (dst, src) in self.left[..len].iter_mut().zip(&other.left[..len]) {
            *dst += *src;
        }
        for (dst, src) in self.right[..len].iter_mut().zip(&other.right[..len]) {
            *dst += *src;
        }
    }
}

/// Pool of reusable stereo buffers indexed by physical slot.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<StereoBuffer>,
    block_size: usize,
}

impl BufferPool {
    /// Creates `count` zeroed buffers of `block_size` samples.
    pub fn new(count: usize, block_size: usize) -> Self {
        let buffers = (0..count).map(|_| StereoBuffer::new(block_size)).collect();
        Self {
            buffers,
            block_size,
        }
    }

    /// Number of slots.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Samples per channel in every slot.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Buffer at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= count()`.
    #[inline]
    pub fn get(&self, idx: usize) -> &StereoBuffer {
        &self.buffers[idx]
    }

    /// Mutable buffer at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= count()`.
    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut StereoBuffer {
        &mut self.buffers[idx]
    }

    /// Moves the buffer at `idx` out, leaving an empty one behind.
    ///
    /// Used by the runner to write a node's output while its inputs stay
    /// borrowed from the pool. Neither direction allocates.
    #[inline]
    pub(crate) fn take(&mut self, idx: usize) -> StereoBuffer {
        core::mem::take(&mut self.buffers[idx])
    }

    /// Puts a buffer obtained from [`take`](Self::take) back.
    #[inline]
    pub(crate) fn restore(&mut self, idx: usize, buffer: StereoBuffer) {
        self.buffers[idx] = buffer;
    }

    /// Resizes every slot.
    pub fn resize_all(&mut self, block_size: usize) {
        self.block_size = block_size;
        for buf in &mut self.buffers {
            buf.resize(block_size);
        }
    }

    /// Zeroes every slot.
    pub fn clear_all(&mut self) {
        for buf in &mut self.buffers {
            buf.clear();
        }
    }
}

/// Fixed-capacity stereo ring buffer delaying by a whole number of samples.
///
/// A delay of zero is a straight feed-through.
#[derive(Debug, Clone)]
pub struct CompensationDelay {
    left: Vec<f32>,
    right: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
}

impl CompensationDelay {
    /// Creates a delay line of exactly `delay_samples`.
    pub fn new(delay_samples: usize) -> Self {
        Self::with_capacity(delay_samples, delay_samples)
    }

    /// Creates a delay line that can later be set up to `capacity` samples.
    pub fn with_capacity(delay_samples: usize, capacity: usize) -> Self {
        let capacity = capacity.max(delay_samples).max(1);
        Self {
            left: vec![0.0; capacity],
            right: vec![0.0; capacity],
            write_pos: 0,
            delay_samples,
        }
    }

    /// Current delay in samples.
    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    /// Longest delay this line supports without reallocating.
    pub fn capacity(&self) -> usize {
        self.left.len()
    }

    /// Changes the delay, clamped to capacity. Clears the line when it changes.
    pub fn set_delay(&mut self, delay_samples: usize) {
        let delay_samples = delay_samples.min(self.capacity());
        if delay_samples != self.delay_samples {
            self.delay_samples = delay_samples;
            self.clear();
        }
    }

    /// Delays one stereo sample.
    #[inline]
    pub fn process(&mut self, left_in: f32, right_in: f32) -> (f32, f32) {
        if self.delay_samples == 0 {
            return (left_in, right_in);
        }
        let out_l = self.left[self.write_pos];
        let out_r = self.right[self.write_pos];
        self.left[self.write_pos] = left_in;
        self.right[self.write_pos] = right_in;
        self.write_pos += 1;
        if self.write_pos >= self.delay_samples {
            self.write_pos = 0;
        }
        (out_l, out_r)
    }

    /// Delays a block in place.
    pub fn process_block_inplace(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.delay_samples == 0 {
            return;
        }
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let (out_l, out_r) = self.process(*l, *r);
            *l = out_l;
            *r = out_r;
        }
    }

    /// Fills the line with silence.
    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
        self.write_pos = 0;
    }
}
