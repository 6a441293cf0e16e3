//! Resource Handles
//!
//! Client code describes every buffer and texture it will ever use through a
//! stable [`ResourceHandle`]. Handles outlive their GPU backing: a transient
//! resource's backing exists only between its materialise and dispose
//! commands inside one frame, while the handle stays valid for as long as
//! the client keeps it registered.
//!
//! The [`ResourceTable`] is the authority on what a handle *is* (kind,
//! descriptor, flags); the registry is the authority on what currently
//! *backs* it.

use bitflags::bitflags;
use slotmap::SlotMap;

use crate::backend::{BufferDescriptor, StorageMode, TextureDescriptor, TextureViewDescriptor};

slotmap::new_key_type! {
    /// Stable opaque identifier for a declared resource.
    pub struct ResourceHandle;
}

bitflags! {
    /// Behavioural flags set at handle creation.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct ResourceFlags: u8 {
        /// Backing outlives frames until explicit disposal.
        const PERSISTENT = 1 << 0;
        /// Transient on allocation, but survives exactly one frame boundary
        /// so the next frame can read it.
        const HISTORY_BUFFER = 1 << 1;
        /// Backed by a swap-chain drawable acquired mid-frame.
        const WINDOW_HANDLE = 1 << 2;
        /// Once written and marked initialised, the contents never change
        /// again; write usages after that point are invariant violations.
        const IMMUTABLE_ONCE_INITIALISED = 1 << 3;
        /// Texture views with a different pixel format may be created.
        const PIXEL_FORMAT_VIEW = 1 << 4;
    }
}

bitflags! {
    /// Mutable lifecycle state, updated as frames execute.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct ResourceStateFlags: u8 {
        /// The resource has held defined contents at least once.
        const INITIALISED = 1 << 0;
    }
}

/// Kind + descriptor of a declared resource, carried inline so the few call
/// sites that need to case on buffer vs texture can do so without chasing
/// indirection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceDescriptor {
    Buffer(BufferDescriptor),
    Texture(TextureDescriptor),
    /// A view over another texture handle.
    TextureView {
        parent: ResourceHandle,
        descriptor: TextureViewDescriptor,
    },
}

impl ResourceDescriptor {
    /// Whether this handle names a buffer.
    #[must_use]
    pub const fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }

    /// Whether this handle names a texture or texture view.
    #[must_use]
    pub const fn is_texture(&self) -> bool {
        matches!(self, Self::Texture(_) | Self::TextureView { .. })
    }

    /// Storage mode, if the handle owns its own memory (views have none).
    #[must_use]
    pub fn storage_mode(&self) -> Option<StorageMode> {
        match self {
            Self::Buffer(d) => Some(d.storage_mode),
            Self::Texture(d) => Some(d.storage_mode),
            Self::TextureView { .. } => None,
        }
    }

    /// Approximate byte size, used for allocator routing.
    #[must_use]
    pub fn approximate_size(&self) -> u64 {
        match self {
            Self::Buffer(d) => d.length,
            Self::Texture(d) => d.approximate_size(),
            Self::TextureView { .. } => 0,
        }
    }
}

/// Everything the table knows about one handle.
#[derive(Clone, Debug)]
pub struct ResourceInfo {
    pub descriptor: ResourceDescriptor,
    pub flags: ResourceFlags,
    pub state: ResourceStateFlags,
    /// Debug label forwarded to backend objects.
    pub label: Option<&'static str>,
}

impl ResourceInfo {
    /// Whether the resource already holds defined contents.
    #[must_use]
    pub fn is_initialised(&self) -> bool {
        self.state.contains(ResourceStateFlags::INITIALISED)
    }
}

// ─── Resource Table ───────────────────────────────────────────────────────────

/// The handle table: maps stable [`ResourceHandle`]s to their descriptions.
///
/// Handles are created by client code before recording and stay valid until
/// [`ResourceTable::remove`]; slot reuse never produces a colliding handle
/// (slotmap versioning).
#[derive(Default)]
pub struct ResourceTable {
    entries: SlotMap<ResourceHandle, ResourceInfo>,
}

impl ResourceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a buffer resource.
    pub fn new_buffer(
        &mut self,
        descriptor: BufferDescriptor,
        flags: ResourceFlags,
        label: Option<&'static str>,
    ) -> ResourceHandle {
        self.entries.insert(ResourceInfo {
            descriptor: ResourceDescriptor::Buffer(descriptor),
            flags,
            state: ResourceStateFlags::empty(),
            label,
        })
    }

    /// Declares a texture resource.
    pub fn new_texture(
        &mut self,
        descriptor: TextureDescriptor,
        flags: ResourceFlags,
        label: Option<&'static str>,
    ) -> ResourceHandle {
        self.entries.insert(ResourceInfo {
            descriptor: ResourceDescriptor::Texture(descriptor),
            flags,
            state: ResourceStateFlags::empty(),
            label,
        })
    }

    /// Declares a texture view over `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a texture handle, or if the view format
    /// differs from the parent's without `ResourceFlags::PIXEL_FORMAT_VIEW`
    /// on the parent.
    pub fn new_texture_view(
        &mut self,
        parent: ResourceHandle,
        descriptor: TextureViewDescriptor,
        label: Option<&'static str>,
    ) -> ResourceHandle {
        let parent_info = &self.entries[parent];
        let ResourceDescriptor::Texture(parent_desc) = parent_info.descriptor else {
            panic!("texture views may only be created over texture handles");
        };
        assert!(
            descriptor.pixel_format == parent_desc.pixel_format
                || parent_info.flags.contains(ResourceFlags::PIXEL_FORMAT_VIEW),
            "re-formatted view of {label:?} requires the pixelFormatView flag on its parent",
        );

        self.entries.insert(ResourceInfo {
            descriptor: ResourceDescriptor::TextureView { parent, descriptor },
            flags: parent_info.flags,
            state: ResourceStateFlags::empty(),
            label,
        })
    }

    /// Removes a handle. The caller must have disposed any persistent
    /// backing first.
    pub fn remove(&mut self, handle: ResourceHandle) {
        self.entries.remove(handle);
    }

    /// Looks up a handle.
    ///
    /// # Panics
    ///
    /// Panics on an unknown (stale or foreign) handle; using one is an
    /// invariant violation.
    #[must_use]
    pub fn info(&self, handle: ResourceHandle) -> &ResourceInfo {
        self.entries
            .get(handle)
            .expect("unknown resource handle (was it removed?)")
    }

    /// Non-panicking lookup.
    #[must_use]
    pub fn get(&self, handle: ResourceHandle) -> Option<&ResourceInfo> {
        self.entries.get(handle)
    }

    /// Marks a resource as holding defined contents.
    pub fn mark_initialised(&mut self, handle: ResourceHandle) {
        if let Some(info) = self.entries.get_mut(handle) {
            info.state |= ResourceStateFlags::INITIALISED;
        }
    }

    /// Resets the contents state, e.g. when a history buffer's window ends
    /// and the handle starts its next generation.
    pub fn clear_initialised(&mut self, handle: ResourceHandle) {
        if let Some(info) = self.entries.get_mut(handle) {
            info.state &= !ResourceStateFlags::INITIALISED;
        }
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
