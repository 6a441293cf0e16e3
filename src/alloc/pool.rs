//! Resource Pool Allocator
//!
//! LRU reuse of *whole* buffers and textures for a fixed descriptor. Used by
//! the registry for non-private transients (the staging pool), history
//! buffers (single bucket) and memoryless render targets.
//!
//! # Reuse Discipline
//!
//! The pool keeps one bucket per in-flight frame. `collect` searches only
//! the current bucket; `deposit` stages the entry in a side list that is
//! appended to the bucket when the ring advances past it again. An entry
//! therefore rests for a full ring revolution before it can be handed out in
//! the same slot — enough to cover in-flight GPU reads without any fence.
//!
//! The pool grows on demand and trims on idleness: entries idle for more
//! than the eviction age are dropped on cycle, and [`ResourcePool::trim`]
//! forces a stricter sweep after resolution changes.

use crate::backend::{Backend, BufferDescriptor, Device, TextureDescriptor};

/// A whole pooled resource plus the descriptor it was created from.
#[derive(Debug)]
pub enum PooledResource<B: Backend> {
    Buffer {
        buffer: B::Buffer,
        descriptor: BufferDescriptor,
    },
    Texture {
        texture: B::Texture,
        descriptor: TextureDescriptor,
    },
}

// Manual impl: a derive would demand `B: Clone`, but only the native
// handles (already cheap-clone by the `Backend` contract) are duplicated.
impl<B: Backend> Clone for PooledResource<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Buffer { buffer, descriptor } => Self::Buffer {
                buffer: buffer.clone(),
                descriptor: *descriptor,
            },
            Self::Texture {
                texture,
                descriptor,
            } => Self::Texture {
                texture: texture.clone(),
                descriptor: *descriptor,
            },
        }
    }
}

impl<B: Backend> PooledResource<B> {
    /// Byte size relevant for best-fit ordering.
    #[cfg(test)]
    fn fit_size(&self) -> u64 {
        match self {
            Self::Buffer { descriptor, .. } => descriptor.length,
            Self::Texture { descriptor, .. } => descriptor.approximate_size(),
        }
    }
}

struct PoolEntry<B: Backend> {
    resource: PooledResource<B>,
    frames_unused: u32,
}

/// Multi-bucket pool with a staging list and idle eviction.
pub struct ResourcePool<B: Backend> {
    device: B::Device,
    buckets: Vec<Vec<PoolEntry<B>>>,
    /// Entries deposited this frame; merged into the bucket that next
    /// becomes current.
    staged: Vec<PoolEntry<B>>,
    bucket_index: usize,
    eviction_age: u32,
    label: &'static str,
}

impl<B: Backend> ResourcePool<B> {
    /// Creates a pool with `num_buckets` ring slots.
    pub fn new(
        device: B::Device,
        num_buckets: usize,
        eviction_age: u32,
        label: &'static str,
    ) -> Self {
        assert!(num_buckets >= 1);
        Self {
            device,
            buckets: (0..num_buckets).map(|_| Vec::new()).collect(),
            staged: Vec::new(),
            bucket_index: 0,
            eviction_age,
            label,
        }
    }

    /// Finds or creates a buffer for `descriptor`.
    ///
    /// Best fit: the smallest pooled buffer whose length satisfies the
    /// request with matching storage/cache bits and a usage superset.
    /// Removal order inside the bucket is not preserved (swap-remove).
    pub fn collect_buffer(&mut self, descriptor: &BufferDescriptor) -> B::Buffer {
        let bucket = &mut self.buckets[self.bucket_index];
        let mut best: Option<(usize, u64)> = None;
        for (i, entry) in bucket.iter().enumerate() {
            let PooledResource::Buffer {
                descriptor: have, ..
            } = &entry.resource
            else {
                continue;
            };
            if have.length >= descriptor.length
                && have.storage_mode == descriptor.storage_mode
                && have.cache_mode == descriptor.cache_mode
                && have.usage.contains(descriptor.usage)
                && best.is_none_or(|(_, size)| have.length < size)
            {
                best = Some((i, have.length));
            }
        }

        if let Some((i, _)) = best {
            let entry = bucket.swap_remove(i);
            let PooledResource::Buffer { buffer, .. } = entry.resource else {
                unreachable!()
            };
            return buffer;
        }
        self.device.make_buffer(descriptor, Some(self.label))
    }

    /// Finds or creates a texture for `descriptor` (exact descriptor
    /// match; a mismatched usage set would fail backend validation).
    pub fn collect_texture(&mut self, descriptor: &TextureDescriptor) -> B::Texture {
        let bucket = &mut self.buckets[self.bucket_index];
        let found = bucket.iter().position(|entry| {
            matches!(
                &entry.resource,
                PooledResource::Texture { descriptor: have, .. } if have == descriptor
            )
        });

        if let Some(i) = found {
            let entry = bucket.swap_remove(i);
            let PooledResource::Texture { texture, .. } = entry.resource else {
                unreachable!()
            };
            return texture;
        }
        self.device.make_texture(descriptor, Some(self.label))
    }

    /// Returns a resource used this frame to the staging list.
    pub fn deposit(&mut self, resource: PooledResource<B>) {
        self.staged.push(PoolEntry {
            resource,
            frames_unused: 0,
        });
    }

    /// Ages and evicts the bucket about to become current, merges the
    /// staged list into it, then advances the ring.
    pub fn cycle_frames(&mut self) {
        let next = (self.bucket_index + 1) % self.buckets.len();
        let eviction_age = self.eviction_age;

        let bucket = &mut self.buckets[next];
        bucket.retain_mut(|entry| {
            entry.frames_unused += 1;
            entry.frames_unused <= eviction_age
        });
        bucket.append(&mut self.staged);

        self.bucket_index = next;
    }

    /// Drops entries idle for more than `max_idle_frames`, regardless of
    /// the regular eviction age. Call after resolution changes to release
    /// stale GPU memory promptly.
    pub fn trim(&mut self, max_idle_frames: u32) {
        for bucket in &mut self.buckets {
            bucket.retain(|entry| entry.frames_unused <= max_idle_frames);
        }
    }

    /// Total entries across buckets and staging (for diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len() + self.buckets.iter().map(Vec::len).sum::<usize>()
    }

    /// Whether the pool holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorts pooled sizes for best-fit verification in tests.
    #[cfg(test)]
    pub(crate) fn pooled_sizes(&self) -> Vec<u64> {
        let mut sizes: Vec<u64> = self
            .buckets
            .iter()
            .flatten()
            .map(|e| e.resource.fit_size())
            .collect();
        sizes.sort_unstable();
        sizes
    }
}
