//! Recording mock backend shared by the integration tests.
//!
//! Every device and encoder operation appends an [`Event`] to a shared log;
//! tests assert on the ordered event stream the way a GPU would observe it.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use forge::backend::{
    Backend, BarrierScope, BufferDescriptor, CommandBuffer, Device, DrawableSource, Encoder,
    HeapDescriptor, LoadAction, NativeResource, PurgeableState, RenderPassDescriptor, SizeAlign,
    StoreAction, TextureDescriptor, TextureViewDescriptor,
};
use forge::graph::FrameCommand;
use forge::resource::{RenderStages, UsageMask};

// ─── Event Log ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateBuffer { id: u64, length: u64 },
    CreateTexture { id: u64 },
    CreateHeap { id: u64, size: u64 },
    CreateFence { id: u64 },
    HeapCreateBuffer { heap: u64, id: u64, length: u64 },
    HeapCreateTexture { heap: u64, id: u64 },
    MakeAliasable { id: u64 },
    SetPurgeable { heap: u64, state: PurgeableState },
    BeginRender {
        label: Option<&'static str>,
        colors: Vec<(u64, LoadAction, StoreAction)>,
        depth: Option<(u64, LoadAction, StoreAction)>,
    },
    BeginCompute,
    BeginBlit,
    BeginExternal,
    EndEncoding,
    UpdateFence { fence: u64, stages: RenderStages },
    WaitFence { fence: u64, stages: RenderStages },
    UseResource { id: u64, usage: UsageMask, stages: RenderStages },
    MemoryBarrier {
        scope: BarrierScope,
        after: RenderStages,
        before: RenderStages,
    },
    TextureBarrier,
    Command(FrameCommand),
    Present { drawable: u64 },
    Commit,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

// ─── Native Objects ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct MockBuffer {
    pub id: u64,
    pub length: u64,
}

#[derive(Clone, Debug)]
pub struct MockTexture {
    pub id: u64,
}

#[derive(Debug)]
pub struct MockHeap {
    pub id: u64,
    pub size: u64,
    used: AtomicU64,
}

#[derive(Clone, Debug)]
pub struct MockFence {
    pub id: u64,
}

#[derive(Debug)]
pub struct MockDrawable {
    pub id: u64,
}

// ─── Backend ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockBackend;

impl Backend for MockBackend {
    type Device = MockDevice;
    type Buffer = MockBuffer;
    type Texture = MockTexture;
    type Heap = MockHeap;
    type Fence = MockFence;
    type Drawable = MockDrawable;
    type CommandBuffer = MockCommandBuffer;
}

#[derive(Clone)]
pub struct MockDevice {
    pub events: EventLog,
    next_id: Arc<AtomicU64>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn log(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    /// Drains and returns the events recorded so far.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl Device<MockBackend> for MockDevice {
    fn make_buffer(&self, descriptor: &BufferDescriptor, _label: Option<&str>) -> MockBuffer {
        let id = self.fresh_id();
        self.log(Event::CreateBuffer {
            id,
            length: descriptor.length,
        });
        MockBuffer {
            id,
            length: descriptor.length,
        }
    }

    fn make_texture(&self, _descriptor: &TextureDescriptor, _label: Option<&str>) -> MockTexture {
        let id = self.fresh_id();
        self.log(Event::CreateTexture { id });
        MockTexture { id }
    }

    fn make_texture_view(
        &self,
        _texture: &MockTexture,
        _descriptor: &TextureViewDescriptor,
    ) -> Option<MockTexture> {
        let id = self.fresh_id();
        self.log(Event::CreateTexture { id });
        Some(MockTexture { id })
    }

    fn make_heap(&self, descriptor: &HeapDescriptor) -> MockHeap {
        let id = self.fresh_id();
        self.log(Event::CreateHeap {
            id,
            size: descriptor.size,
        });
        MockHeap {
            id,
            size: descriptor.size,
            used: AtomicU64::new(0),
        }
    }

    fn make_fence(&self) -> MockFence {
        let id = self.fresh_id();
        self.log(Event::CreateFence { id });
        MockFence { id }
    }

    fn buffer_size_and_align(&self, descriptor: &BufferDescriptor) -> SizeAlign {
        SizeAlign {
            size: descriptor.length.next_multiple_of(256),
            align: 256,
        }
    }

    fn texture_size_and_align(&self, descriptor: &TextureDescriptor) -> SizeAlign {
        SizeAlign {
            size: descriptor.approximate_size().next_multiple_of(4096),
            align: 4096,
        }
    }

    fn heap_make_buffer(
        &self,
        heap: &MockHeap,
        descriptor: &BufferDescriptor,
        _label: Option<&str>,
    ) -> Option<MockBuffer> {
        let size = self.buffer_size_and_align(descriptor).size;
        if heap.used.load(Ordering::Relaxed) + size > heap.size {
            return None;
        }
        heap.used.fetch_add(size, Ordering::Relaxed);
        let id = self.fresh_id();
        self.log(Event::HeapCreateBuffer {
            heap: heap.id,
            id,
            length: descriptor.length,
        });
        Some(MockBuffer {
            id,
            length: descriptor.length,
        })
    }

    fn heap_make_texture(
        &self,
        heap: &MockHeap,
        descriptor: &TextureDescriptor,
        _label: Option<&str>,
    ) -> Option<MockTexture> {
        let size = self.texture_size_and_align(descriptor).size;
        if heap.used.load(Ordering::Relaxed) + size > heap.size {
            return None;
        }
        heap.used.fetch_add(size, Ordering::Relaxed);
        let id = self.fresh_id();
        self.log(Event::HeapCreateTexture { heap: heap.id, id });
        Some(MockTexture { id })
    }

    fn heap_used_size(&self, heap: &MockHeap) -> u64 {
        heap.used.load(Ordering::Relaxed)
    }

    fn make_aliasable_buffer(&self, buffer: &MockBuffer) {
        self.log(Event::MakeAliasable { id: buffer.id });
    }

    fn make_aliasable_texture(&self, texture: &MockTexture) {
        self.log(Event::MakeAliasable { id: texture.id });
    }

    fn set_heap_purgeable_state(&self, heap: &MockHeap, state: PurgeableState) {
        self.log(Event::SetPurgeable {
            heap: heap.id,
            state,
        });
    }

    fn new_command_buffer(&self) -> MockCommandBuffer {
        MockCommandBuffer {
            device: self.clone(),
        }
    }
}

// ─── Command Buffer & Encoder ─────────────────────────────────────────────────

pub struct MockCommandBuffer {
    device: MockDevice,
}

impl CommandBuffer<MockBackend> for MockCommandBuffer {
    type RenderEncoder = MockEncoder;
    type ComputeEncoder = MockEncoder;
    type BlitEncoder = MockEncoder;
    type ExternalEncoder = MockEncoder;

    fn render_command_encoder(
        &mut self,
        descriptor: &RenderPassDescriptor<MockBackend>,
    ) -> MockEncoder {
        let colors = descriptor
            .color_attachments
            .iter()
            .flatten()
            .map(|a| (a.texture.id, a.load_action, a.store_action))
            .collect();
        let depth = descriptor
            .depth_attachment
            .as_ref()
            .map(|a| (a.texture.id, a.load_action, a.store_action));
        self.device.log(Event::BeginRender {
            label: descriptor.label,
            colors,
            depth,
        });
        MockEncoder::new(self.device.clone())
    }

    fn compute_command_encoder(&mut self) -> MockEncoder {
        self.device.log(Event::BeginCompute);
        MockEncoder::new(self.device.clone())
    }

    fn blit_command_encoder(&mut self) -> MockEncoder {
        self.device.log(Event::BeginBlit);
        MockEncoder::new(self.device.clone())
    }

    fn external_command_encoder(&mut self) -> MockEncoder {
        self.device.log(Event::BeginExternal);
        MockEncoder::new(self.device.clone())
    }

    fn present(&mut self, drawable: MockDrawable) {
        self.device.log(Event::Present { drawable: drawable.id });
    }

    fn commit(self, on_complete: Option<Box<dyn FnOnce() + Send>>) {
        self.device.log(Event::Commit);
        if let Some(callback) = on_complete {
            callback();
        }
    }
}

/// Records every operation; deduplicates fence waits per the encoder
/// contract (no repeated `(fence, stages)` wait, no wait on a self-updated
/// fence).
pub struct MockEncoder {
    device: MockDevice,
    waited: HashSet<(u64, u8)>,
    updated: HashSet<u64>,
}

impl MockEncoder {
    fn new(device: MockDevice) -> Self {
        Self {
            device,
            waited: HashSet::new(),
            updated: HashSet::new(),
        }
    }
}

impl Encoder<MockBackend> for MockEncoder {
    fn set_label(&mut self, _label: &str) {}

    fn push_debug_group(&mut self, _label: &str) {}

    fn pop_debug_group(&mut self) {}

    fn update_fence(&mut self, fence: &MockFence, after_stages: RenderStages) {
        self.updated.insert(fence.id);
        self.device.log(Event::UpdateFence {
            fence: fence.id,
            stages: after_stages,
        });
    }

    fn wait_for_fence(&mut self, fence: &MockFence, before_stages: RenderStages) {
        if self.updated.contains(&fence.id) {
            return;
        }
        if !self.waited.insert((fence.id, before_stages.bits())) {
            return;
        }
        self.device.log(Event::WaitFence {
            fence: fence.id,
            stages: before_stages,
        });
    }

    fn use_resource(
        &mut self,
        resource: NativeResource<'_, MockBackend>,
        usage: UsageMask,
        stages: RenderStages,
    ) {
        let id = match resource {
            NativeResource::Buffer(buffer) => buffer.id,
            NativeResource::Texture(texture) => texture.id,
        };
        self.device.log(Event::UseResource { id, usage, stages });
    }

    fn memory_barrier(
        &mut self,
        scope: BarrierScope,
        after_stages: RenderStages,
        before_stages: RenderStages,
    ) {
        self.device.log(Event::MemoryBarrier {
            scope,
            after: after_stages,
            before: before_stages,
        });
    }

    fn texture_barrier(&mut self) {
        self.device.log(Event::TextureBarrier);
    }

    fn execute(&mut self, command: &FrameCommand) {
        self.device.log(Event::Command(command.clone()));
    }

    fn end_encoding(&mut self) {
        self.device.log(Event::EndEncoding);
    }
}

// ─── Drawable Source ──────────────────────────────────────────────────────────

/// Presentation-layer stand-in; set `fail` to simulate an unavailable
/// swap chain.
pub struct MockDrawables {
    pub device: MockDevice,
    pub fail: bool,
}

impl DrawableSource<MockBackend> for MockDrawables {
    fn next_drawable(&mut self) -> forge::Result<(MockTexture, MockDrawable)> {
        if self.fail {
            return Err(forge::ForgeError::DrawableAcquisitionFailed(
                "swap chain exhausted".into(),
            ));
        }
        let id = self.device.fresh_id();
        Ok((MockTexture { id }, MockDrawable { id }))
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
