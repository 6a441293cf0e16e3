//! Resource Binding Paths
//!
//! A [`ResourceBindingPath`] packs the location of one shader argument into
//! 64 bits so reflection lookups and binding comparisons are single integer
//! operations.
//!
//! # Bit Layout
//!
//! | Bits | Field |
//! |------|-------|
//! | `[0..32)`  | array index |
//! | `[32..54)` | binding index |
//! | `[54..59)` | argument-buffer index (all-ones = not in an argument buffer) |
//! | `[59..62)` | resource type (texture / buffer / sampler) |
//! | `[62..64)` | stage flags (fragment / vertex) |
//!
//! Equality is bitwise.

/// The kind of shader resource a path addresses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum BindingType {
    Texture = 0b001,
    Buffer = 0b010,
    Sampler = 0b100,
}

/// A packed shader-argument location.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceBindingPath(u64);

const ARRAY_INDEX_BITS: u32 = 32;
const INDEX_BITS: u32 = 22;
const ARGUMENT_BUFFER_BITS: u32 = 5;
const TYPE_BITS: u32 = 3;

const INDEX_SHIFT: u32 = ARRAY_INDEX_BITS;
const ARGUMENT_BUFFER_SHIFT: u32 = INDEX_SHIFT + INDEX_BITS;
const TYPE_SHIFT: u32 = ARGUMENT_BUFFER_SHIFT + ARGUMENT_BUFFER_BITS;
const STAGE_SHIFT: u32 = TYPE_SHIFT + TYPE_BITS;

const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const ARGUMENT_BUFFER_MASK: u64 = (1 << ARGUMENT_BUFFER_BITS) - 1;
const TYPE_MASK: u64 = (1 << TYPE_BITS) - 1;

const STAGE_FRAGMENT: u64 = 0b01;
const STAGE_VERTEX: u64 = 0b10;

impl ResourceBindingPath {
    /// Sentinel argument-buffer index meaning "bound at top level".
    pub const NO_ARGUMENT_BUFFER: u32 = (1 << ARGUMENT_BUFFER_BITS) - 1;

    /// Packs a binding location.
    ///
    /// # Panics
    ///
    /// Panics if `index` or `argument_buffer_index` overflow their fields.
    #[must_use]
    pub fn new(
        binding_type: BindingType,
        index: u32,
        array_index: u32,
        argument_buffer_index: Option<u32>,
    ) -> Self {
        assert!(u64::from(index) <= INDEX_MASK, "binding index out of range");
        let arg_buffer = argument_buffer_index.map_or(Self::NO_ARGUMENT_BUFFER, |i| {
            assert!(
                i < Self::NO_ARGUMENT_BUFFER,
                "argument-buffer index out of range"
            );
            i
        });

        let bits = u64::from(array_index)
            | (u64::from(index) << INDEX_SHIFT)
            | (u64::from(arg_buffer) << ARGUMENT_BUFFER_SHIFT)
            | ((binding_type as u64) << TYPE_SHIFT);
        Self(bits)
    }

    /// The array element this path addresses.
    #[must_use]
    pub fn array_index(self) -> u32 {
        (self.0 & u64::from(u32::MAX)) as u32
    }

    /// The binding index within its table.
    #[must_use]
    pub fn index(self) -> u32 {
        ((self.0 >> INDEX_SHIFT) & INDEX_MASK) as u32
    }

    /// The enclosing argument-buffer index, or `None` for top-level
    /// bindings.
    #[must_use]
    pub fn argument_buffer_index(self) -> Option<u32> {
        let raw = ((self.0 >> ARGUMENT_BUFFER_SHIFT) & ARGUMENT_BUFFER_MASK) as u32;
        (raw != Self::NO_ARGUMENT_BUFFER).then_some(raw)
    }

    /// The resource type flag.
    #[must_use]
    pub fn binding_type(self) -> BindingType {
        match (self.0 >> TYPE_SHIFT) & TYPE_MASK {
            0b001 => BindingType::Texture,
            0b010 => BindingType::Buffer,
            0b100 => BindingType::Sampler,
            other => panic!("corrupt binding path: bad type bits {other:#b}"),
        }
    }

    /// Marks the path as visible to the fragment stage.
    #[must_use]
    pub fn with_fragment_stage(self) -> Self {
        Self(self.0 | (STAGE_FRAGMENT << STAGE_SHIFT))
    }

    /// Marks the path as visible to the vertex stage.
    #[must_use]
    pub fn with_vertex_stage(self) -> Self {
        Self(self.0 | (STAGE_VERTEX << STAGE_SHIFT))
    }

    /// Whether the fragment stage sees this binding.
    #[must_use]
    pub fn fragment_stage(self) -> bool {
        (self.0 >> STAGE_SHIFT) & STAGE_FRAGMENT != 0
    }

    /// Whether the vertex stage sees this binding.
    #[must_use]
    pub fn vertex_stage(self) -> bool {
        (self.0 >> STAGE_SHIFT) & STAGE_VERTEX != 0
    }

    /// The raw 64-bit representation.
    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Reconstructs a path from its raw bits.
    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl std::fmt::Debug for ResourceBindingPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBindingPath")
            .field("type", &self.binding_type())
            .field("index", &self.index())
            .field("array_index", &self.array_index())
            .field("argument_buffer", &self.argument_buffer_index())
            .field("fragment", &self.fragment_stage())
            .field("vertex", &self.vertex_stage())
            .finish()
    }
}
