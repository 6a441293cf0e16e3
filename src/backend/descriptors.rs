//! Backend-Facing Descriptors
//!
//! Plain-data descriptions of GPU objects, consumed by [`Device`] when
//! creating backing resources and used as pool keys by the allocators.
//! Everything here is `Eq + Hash` so descriptors can drive best-fit lookups
//! without indirection.
//!
//! [`Device`]: super::Device

use bitflags::bitflags;

// ─── Storage & Cache Modes ────────────────────────────────────────────────────

/// Where a resource's backing memory lives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum StorageMode {
    /// CPU and GPU share one coherent allocation.
    Shared,
    /// Separate CPU/GPU copies with explicit synchronisation points.
    Managed,
    /// GPU-only memory; the CPU never maps it.
    Private,
    /// Tile memory only; contents never exist in main memory. Render targets
    /// with no readers outside their encoder are eligible.
    Memoryless,
}

/// CPU cache behaviour for host-visible storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CpuCacheMode {
    /// Normal write-back caching.
    #[default]
    DefaultCache,
    /// Write-combined memory; sequential CPU writes, no CPU reads.
    WriteCombined,
}

/// Purgeable-state transition applied to idle heaps.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum PurgeableState {
    /// Leave the current state untouched.
    #[default]
    KeepCurrent,
    /// Contents must be preserved.
    NonVolatile,
    /// Contents may be discarded under memory pressure.
    Volatile,
    /// Contents are discarded immediately.
    Empty,
}

// ─── Usage Flags ──────────────────────────────────────────────────────────────

bitflags! {
    /// Hints about how a buffer will be used.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct BufferUsage: u16 {
        const SHADER_READ      = 1 << 0;
        const SHADER_WRITE     = 1 << 1;
        const BLIT_SOURCE      = 1 << 2;
        const BLIT_DESTINATION = 1 << 3;
        const VERTEX_BUFFER    = 1 << 4;
        const INDEX_BUFFER     = 1 << 5;
        const CONSTANT_BUFFER  = 1 << 6;
        const INDIRECT_BUFFER  = 1 << 7;
        /// Backs an argument (descriptor) table.
        const ARGUMENT_BUFFER  = 1 << 8;
    }
}

bitflags! {
    /// Hints about how a texture will be used.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct TextureUsage: u16 {
        const SHADER_READ      = 1 << 0;
        const SHADER_WRITE     = 1 << 1;
        const RENDER_TARGET    = 1 << 2;
        const BLIT_SOURCE      = 1 << 3;
        const BLIT_DESTINATION = 1 << 4;
        /// Views with a different pixel format may be created over this
        /// texture.
        const PIXEL_FORMAT_VIEW = 1 << 5;
    }
}

// ─── Pixel Formats ────────────────────────────────────────────────────────────

/// Texture element formats (the subset the core needs to reason about).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PixelFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
    Rg11B10Float,
    Rgb10A2Unorm,
    Depth16Unorm,
    Depth32Float,
    Depth32FloatStencil8,
    Stencil8,
}

impl PixelFormat {
    /// Whether the format carries a depth aspect.
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth32Float | Self::Depth32FloatStencil8
        )
    }

    /// Whether the format carries a stencil aspect.
    #[must_use]
    pub const fn is_stencil(self) -> bool {
        matches!(self, Self::Depth32FloatStencil8 | Self::Stencil8)
    }

    /// Whether the format is usable as a depth/stencil attachment.
    #[must_use]
    pub const fn is_depth_stencil(self) -> bool {
        self.is_depth() || self.is_stencil()
    }

    /// Bytes per pixel, ignoring block compression (none of the supported
    /// formats are compressed).
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::R8Unorm | Self::Stencil8 => 1,
            Self::Rg8Unorm | Self::R16Float | Self::Depth16Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rg16Float
            | Self::R32Float
            | Self::R32Uint
            | Self::Rg11B10Float
            | Self::Rgb10A2Unorm
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

// ─── Resource Descriptors ─────────────────────────────────────────────────────

/// Description of a GPU buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferDescriptor {
    /// Length in bytes.
    pub length: u64,
    pub usage: BufferUsage,
    pub storage_mode: StorageMode,
    pub cache_mode: CpuCacheMode,
}

impl BufferDescriptor {
    /// Convenience constructor for a private GPU-only buffer.
    #[must_use]
    pub fn private(length: u64, usage: BufferUsage) -> Self {
        Self {
            length,
            usage,
            storage_mode: StorageMode::Private,
            cache_mode: CpuCacheMode::DefaultCache,
        }
    }

    /// Convenience constructor for a CPU-visible shared buffer.
    #[must_use]
    pub fn shared(length: u64, usage: BufferUsage) -> Self {
        Self {
            length,
            usage,
            storage_mode: StorageMode::Shared,
            cache_mode: CpuCacheMode::DefaultCache,
        }
    }
}

/// Dimensionality of a texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum TextureType {
    D1,
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
}

/// Description of a GPU texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TextureDescriptor {
    pub texture_type: TextureType,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub array_length: u32,
    pub usage: TextureUsage,
    pub storage_mode: StorageMode,
    pub cache_mode: CpuCacheMode,
}

impl TextureDescriptor {
    /// A 2D render-target texture with a single mip.
    #[must_use]
    pub fn render_target_2d(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            texture_type: TextureType::D2,
            pixel_format,
            width,
            height,
            depth: 1,
            mip_level_count: 1,
            sample_count: 1,
            array_length: 1,
            usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
            storage_mode: StorageMode::Private,
            cache_mode: CpuCacheMode::DefaultCache,
        }
    }

    /// Approximate total byte size, used for allocator routing. Mip chains
    /// are accounted at the usual 4/3 geometric bound.
    #[must_use]
    pub fn approximate_size(&self) -> u64 {
        let base = u64::from(self.width)
            * u64::from(self.height)
            * u64::from(self.depth)
            * u64::from(self.array_length)
            * u64::from(self.sample_count)
            * self.pixel_format.bytes_per_pixel();
        if self.mip_level_count > 1 {
            base + base / 3
        } else {
            base
        }
    }
}

/// Description of a texture view over an existing texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TextureViewDescriptor {
    /// View format; may differ from the parent only when the parent carries
    /// `TextureUsage::PIXEL_FORMAT_VIEW`.
    pub pixel_format: PixelFormat,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

/// Description of a GPU heap that transient resources suballocate from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HeapDescriptor {
    /// Heap size in bytes.
    pub size: u64,
    pub storage_mode: StorageMode,
    pub cache_mode: CpuCacheMode,
}

/// A `(size, alignment)` pair returned by device placement queries.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SizeAlign {
    pub size: u64,
    pub align: u64,
}

// ─── Render-Target Actions ────────────────────────────────────────────────────

/// What an encoder does with an attachment's existing contents at load time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum LoadAction {
    /// Contents are undefined; cheapest.
    #[default]
    DontCare,
    /// Preserve the previous contents.
    Load,
    /// Fill with the attachment's clear value.
    Clear,
}

/// What an encoder does with an attachment's contents at store time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum StoreAction {
    /// Contents may be discarded after the encoder ends.
    #[default]
    DontCare,
    /// Write contents back to memory.
    Store,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_stencil_classification() {
        assert!(PixelFormat::Depth32Float.is_depth());
        assert!(!PixelFormat::Depth32Float.is_stencil());
        assert!(PixelFormat::Depth32FloatStencil8.is_depth());
        assert!(PixelFormat::Depth32FloatStencil8.is_stencil());
        assert!(PixelFormat::Stencil8.is_depth_stencil());
        assert!(!PixelFormat::Rgba8Unorm.is_depth_stencil());
    }

    #[test]
    fn test_texture_approximate_size() {
        let desc = TextureDescriptor::render_target_2d(256, 256, PixelFormat::Rgba8Unorm);
        assert_eq!(desc.approximate_size(), 256 * 256 * 4);

        let mut mipped = desc;
        mipped.mip_level_count = 9;
        assert_eq!(mipped.approximate_size(), 256 * 256 * 4 + (256 * 256 * 4) / 3);
    }
}
