//! Centralized, fail-fast error reporting. Every failure category from the
//! instruction set and the image loader collapses into [`VmError`]; there is
//! no recovery path, only a human-readable reason surfaced to the caller.

use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum VmError {
	/// The bytecode image is missing, truncated, or has an inconsistent header.
	Image(String),
	/// `std::io` failure while reading the image file.
	Io(std::io::Error),
	/// An opcode `(h, l)` pair has no handler, or an inline operand read past
	/// the end of the code segment.
	Decode(String),
	/// Operand-stack or control-stack overflow/underflow.
	Stack(String),
	/// An argument/local/closed/global index was out of range, or `closed`
	/// was accessed outside a closure frame.
	Slice(String),
	/// A word expected to be unboxed was boxed (or vice versa), or a
	/// division/modulo by a boxed zero.
	Type(String),
	/// An explicit `FAIL` instruction, carrying its source location.
	Fail { line: i32, col: i32 },
}

impl VmError {
	pub(crate) fn decode(msg: impl Into<String>) -> VmError {
		VmError::Decode(msg.into())
	}

	pub(crate) fn stack(msg: impl Into<String>) -> VmError {
		VmError::Stack(msg.into())
	}

	pub(crate) fn slice(msg: impl Into<String>) -> VmError {
		VmError::Slice(msg.into())
	}

	pub(crate) fn ty(msg: impl Into<String>) -> VmError {
		VmError::Type(msg.into())
	}
}

impl From<std::io::Error> for VmError {
	fn from(value: std::io::Error) -> Self {
		VmError::Io(value)
	}
}

impl Display for VmError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			VmError::Image(msg) => write!(f, "image error: {msg}"),
			VmError::Io(err) => write!(f, "image error: {err}"),
			VmError::Decode(msg) => write!(f, "decode error: {msg}"),
			VmError::Stack(msg) => write!(f, "stack error: {msg}"),
			VmError::Slice(msg) => write!(f, "slice error: {msg}"),
			VmError::Type(msg) => write!(f, "type error: {msg}"),
			VmError::Fail { line, col } => write!(f, "match failure at line {line}, column {col}"),
		}
	}
}

impl std::error::Error for VmError {}

pub type VmResult<T> = Result<T, VmError>;
