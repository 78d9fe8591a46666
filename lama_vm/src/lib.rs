//! A stack-based bytecode interpreter for a small functional/imperative
//! source language: a loader for the compiled image format, a one-byte
//! opcode decoder, the dual operand/control stack machine, and the
//! runtime-primitive seam (string/array/s-expression/closure allocation,
//! tag hashing, pattern tests, console I/O) that the interpreter calls
//! through but never implements a garbage collector for.
//!
//! ```text
//! Image::load(path) -> Image -> Vm::new(image, runtime) -> Vm::run()
//! ```

pub mod decode;
pub mod error;
pub mod image;
pub mod interp;
pub mod runtime;
pub mod stack;
pub mod word;

mod utilities;

pub use error::{VmError, VmResult};
pub use image::Image;
pub use interp::Vm;
pub use runtime::{ArenaRuntime, RuntimePrimitives};
pub use word::Word;
