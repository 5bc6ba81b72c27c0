#![doc = include_str!("../README.md")]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

#[cfg(feature = "deserialize")]
pub mod de;

pub mod buffer;
pub mod codec;
pub mod stencil;

mod mesh_info;
pub use mesh_info::*;

pub use buffer::{BufferScalar, ScalarType};
pub use codec::CodecError;
pub use stencil::{LoopSubdivisionStencil, StencilError, Triangle};
