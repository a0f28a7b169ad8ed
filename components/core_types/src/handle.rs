//! Typed handles for engine-side objects.
//!
//! Every object the engine exposes to the host is identified by a 32-bit
//! integer that is only meaningful inside the engine's own memory and
//! bookkeeping. Each kind of object gets its own newtype so that passing, say,
//! a [`ValueHandle`] where a [`ContextHandle`] is expected fails to compile.
//!
//! Zero is the null sentinel for every kind.
//!
//! # Examples
//!
//! ```
//! use core_types::{ContextHandle, ValueHandle};
//!
//! let ctx = ContextHandle::new(0x40);
//! assert!(!ctx.is_null());
//! assert!(ValueHandle::NULL.is_null());
//! assert_eq!(ctx.to_string(), "ContextHandle(0x40)");
//! ```

use std::fmt;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// The null handle ("no object").
            pub const NULL: Self = Self(0);

            /// Wraps a raw value received from the engine.
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the raw 32-bit value passed across the boundary.
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Reports whether this is the null handle.
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{:x})", stringify!($name), self.0)
            }
        }

        impl From<$name> for u32 {
            fn from(handle: $name) -> u32 {
                handle.0
            }
        }
    };
}

handle_type!(
    /// A `JSRuntime` in engine memory: the top-level engine instance.
    RuntimeHandle
);

handle_type!(
    /// A `JSContext` in engine memory: one realm with its own global object.
    ContextHandle
);

handle_type!(
    /// A reference-counted JavaScript value in engine memory.
    ValueHandle
);

handle_type!(
    /// An ES module definition in engine memory.
    ModuleDefHandle
);

handle_type!(
    /// A raw offset into the engine's linear memory.
    MemoryOffset
);

impl MemoryOffset {
    /// Returns the offset `bytes` further along, or `None` on overflow.
    pub fn checked_add(self, bytes: u32) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

/// Identifier of a host-defined class registered with the engine.
///
/// Class ids are not pointers, so a zero id reads as "invalid" rather than
/// "null".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct ClassId(u32);

impl ClassId {
    /// The invalid class id.
    pub const INVALID: Self = Self(0);

    /// Wraps a raw class id received from the engine.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw class id.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Reports whether the id refers to a registered class.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}
