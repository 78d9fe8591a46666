//! The runtime-primitive boundary. These are the allocating operations the
//! source language's standard library provides externally to the
//! interpreter — string/array/s-expr/closure construction, tag hashing,
//! pattern tests, and console I/O.
//!
//! [`RuntimePrimitives`] is the seam: the interpreter only ever calls
//! through it, never assumes a representation for heap objects. Collecting
//! garbage is a collaborating collector's job, not the interpreter's, so
//! [`ArenaRuntime`] — the bundled implementation — never reclaims a handle;
//! it is an arena that only grows, which is sufficient to run a program to
//! completion but not to run one forever.

use std::io::Write as _;

use fxhash::FxHasher;
use std::hash::Hasher;

use crate::error::{VmError, VmResult};
use crate::word::Word;

/// A heap value as seen by the runtime primitives. The interpreter itself
/// never matches on this — only [`ArenaRuntime`] does.
#[derive(Clone, Debug)]
enum Object {
	Str(Vec<u8>),
	Array(Vec<Word>),
	Sexp { tag: i32, fields: Vec<Word> },
	Closure { entry: i32, captured: Vec<Word> },
}

/// Everything the interpreter needs from the source language's runtime
/// support library, expressed as a trait so the interpreter core stays
/// independent of any one heap representation.
pub trait RuntimePrimitives {
	fn alloc_string(&mut self, bytes: &[u8]) -> Word;
	fn string_of(&mut self, v: Word) -> VmResult<Word>;
	fn length(&self, v: Word) -> VmResult<i32>;
	fn elem(&self, container: Word, idx: i32) -> VmResult<Word>;
	fn store_indexed(&mut self, container: Word, idx: i32, value: Word) -> VmResult<Word>;
	fn array_from(&mut self, values: &[Word]) -> Word;
	fn sexp_from(&mut self, tag_hash: i32, values: &[Word]) -> Word;
	fn closure_from(&mut self, entry: i32, captured: &[Word]) -> Word;
	fn tag_hash(&self, name: &str) -> i32;
	fn tag_check(&self, v: Word, tag_hash: i32, n: i32) -> bool;
	fn array_check(&self, v: Word, n: i32) -> bool;
	fn string_eq(&self, a: Word, b: Word) -> bool;
	fn is_string(&self, v: Word) -> bool;
	fn is_array(&self, v: Word) -> bool;
	fn is_sexp(&self, v: Word) -> bool;
	fn is_fun(&self, v: Word) -> bool;
	fn closure_entry(&self, v: Word) -> VmResult<i32>;
	fn closure_capture(&self, v: Word, idx: i32) -> VmResult<Word>;
	fn closure_set_capture(&mut self, v: Word, idx: i32, value: Word) -> VmResult<()>;
	fn closure_captures_len(&self, v: Word) -> VmResult<i32>;
	fn read_int(&mut self) -> VmResult<i32>;
	fn write_int(&mut self, n: i32) -> VmResult<i32>;
}

/// A bump-only arena backing [`RuntimePrimitives`]. Handles are indices,
/// never reclaimed — the collaborating collector this stands in for is
/// explicitly out of scope.
#[derive(Default)]
pub struct ArenaRuntime {
	objects: Vec<Object>,
	stdin_words: std::collections::VecDeque<i32>,
	stdin_buffered: bool,
}

impl ArenaRuntime {
	pub fn new() -> ArenaRuntime {
		ArenaRuntime::default()
	}

	fn push(&mut self, obj: Object) -> Word {
		let handle = self.objects.len() as u32;
		self.objects.push(obj);
		Word::boxed_ref(handle)
	}

	fn get(&self, v: Word) -> VmResult<&Object> {
		if v.is_unboxed() {
			return Err(VmError::ty("expected a heap reference, found an unboxed integer"));
		}
		self.objects
			.get(v.handle() as usize)
			.ok_or_else(|| VmError::ty(format!("dangling handle {}", v.handle())))
	}

	/// Lazily tokenizes whitespace-separated integers out of stdin the
	/// first time `read_int` is called, so repeated `READ`s behave like the
	/// reference runtime's `scanf("%d", ...)` loop without re-reading.
	fn fill_stdin_buffer(&mut self) -> VmResult<()> {
		if self.stdin_buffered {
			return Ok(());
		}
		self.stdin_buffered = true;
		let mut input = String::new();
		std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)?;
		for tok in input.split_whitespace() {
			let n: i32 = tok
				.parse()
				.map_err(|_| VmError::ty(format!("malformed integer on stdin: {tok:?}")))?;
			self.stdin_words.push_back(n);
		}
		Ok(())
	}
}

impl RuntimePrimitives for ArenaRuntime {
	fn alloc_string(&mut self, bytes: &[u8]) -> Word {
		self.push(Object::Str(bytes.to_vec()))
	}

	fn string_of(&mut self, v: Word) -> VmResult<Word> {
		let rendered = if v.is_unboxed() {
			v.unbox().to_string()
		} else {
			match self.get(v)? {
				Object::Str(bytes) => String::from_utf8_lossy(bytes).into_owned(),
				Object::Array(items) => {
					let items = items.clone();
					let mut parts = Vec::with_capacity(items.len());
					for item in items {
						parts.push(self.render_owned(item)?);
					}
					format!("[{}]", parts.join(", "))
				}
				Object::Sexp { fields, .. } => {
					let fields = fields.clone();
					let mut parts = Vec::with_capacity(fields.len());
					for item in fields {
						parts.push(self.render_owned(item)?);
					}
					if parts.is_empty() {
						"`<sexp>".to_string()
					} else {
						format!("`<sexp> ({})", parts.join(", "))
					}
				}
				Object::Closure { .. } => "<fun>".to_string(),
			}
		};
		Ok(self.alloc_string(rendered.as_bytes()))
	}

	fn length(&self, v: Word) -> VmResult<i32> {
		match self.get(v)? {
			Object::Str(bytes) => Ok(bytes.len() as i32),
			Object::Array(items) => Ok(items.len() as i32),
			Object::Sexp { fields, .. } => Ok(fields.len() as i32),
			Object::Closure { captured, .. } => Ok(captured.len() as i32),
		}
	}

	fn elem(&self, container: Word, idx: i32) -> VmResult<Word> {
		match self.get(container)? {
			Object::Array(items) => items
				.get(idx as usize)
				.copied()
				.ok_or_else(|| VmError::slice(format!("array index {idx} out of range"))),
			Object::Sexp { fields, .. } => fields
				.get(idx as usize)
				.copied()
				.ok_or_else(|| VmError::slice(format!("s-expression field {idx} out of range"))),
			Object::Str(bytes) => bytes
				.get(idx as usize)
				.map(|b| Word::boxed_int(*b as i32))
				.ok_or_else(|| VmError::slice(format!("string index {idx} out of range"))),
			Object::Closure { .. } => Err(VmError::ty("ELEM on a closure")),
		}
	}

	fn store_indexed(&mut self, container: Word, idx: i32, value: Word) -> VmResult<Word> {
		if container.is_unboxed() {
			return Err(VmError::ty("indexed store into an unboxed value"));
		}
		let handle = container.handle() as usize;
		let obj = self
			.objects
			.get_mut(handle)
			.ok_or_else(|| VmError::ty(format!("dangling handle {handle}")))?;
		match obj {
			Object::Array(items) => {
				let slot = items
					.get_mut(idx as usize)
					.ok_or_else(|| VmError::slice(format!("array index {idx} out of range")))?;
				*slot = value;
			}
			Object::Sexp { fields, .. } => {
				let slot = fields
					.get_mut(idx as usize)
					.ok_or_else(|| VmError::slice(format!("s-expression field {idx} out of range")))?;
				*slot = value;
			}
			_ => return Err(VmError::ty("indexed store into a non-container value")),
		}
		Ok(value)
	}

	fn array_from(&mut self, values: &[Word]) -> Word {
		self.push(Object::Array(values.to_vec()))
	}

	fn sexp_from(&mut self, tag_hash: i32, values: &[Word]) -> Word {
		self.push(Object::Sexp { tag: tag_hash, fields: values.to_vec() })
	}

	fn closure_from(&mut self, entry: i32, captured: &[Word]) -> Word {
		self.push(Object::Closure { entry, captured: captured.to_vec() })
	}

	fn tag_hash(&self, name: &str) -> i32 {
		let mut hasher = FxHasher::default();
		hasher.write(name.as_bytes());
		hasher.finish() as i32
	}

	fn tag_check(&self, v: Word, tag_hash: i32, n: i32) -> bool {
		matches!(self.get(v), Ok(Object::Sexp { tag, fields }) if *tag == tag_hash && fields.len() as i32 == n)
	}

	fn array_check(&self, v: Word, n: i32) -> bool {
		matches!(self.get(v), Ok(Object::Array(items)) if items.len() as i32 == n)
	}

	fn string_eq(&self, a: Word, b: Word) -> bool {
		match (self.get(a), self.get(b)) {
			(Ok(Object::Str(x)), Ok(Object::Str(y))) => x == y,
			_ => false,
		}
	}

	fn is_string(&self, v: Word) -> bool {
		!v.is_unboxed() && matches!(self.get(v), Ok(Object::Str(_)))
	}

	fn is_array(&self, v: Word) -> bool {
		!v.is_unboxed() && matches!(self.get(v), Ok(Object::Array(_)))
	}

	fn is_sexp(&self, v: Word) -> bool {
		!v.is_unboxed() && matches!(self.get(v), Ok(Object::Sexp { .. }))
	}

	fn is_fun(&self, v: Word) -> bool {
		!v.is_unboxed() && matches!(self.get(v), Ok(Object::Closure { .. }))
	}

	fn closure_entry(&self, v: Word) -> VmResult<i32> {
		match self.get(v)? {
			Object::Closure { entry, .. } => Ok(*entry),
			_ => Err(VmError::ty("expected a closure")),
		}
	}

	fn closure_capture(&self, v: Word, idx: i32) -> VmResult<Word> {
		match self.get(v)? {
			Object::Closure { captured, .. } => captured
				.get(idx as usize)
				.copied()
				.ok_or_else(|| VmError::slice(format!("closure capture {idx} out of range"))),
			_ => Err(VmError::ty("expected a closure")),
		}
	}

	fn closure_set_capture(&mut self, v: Word, idx: i32, value: Word) -> VmResult<()> {
		if v.is_unboxed() {
			return Err(VmError::ty("expected a closure"));
		}
		let handle = v.handle() as usize;
		match self.objects.get_mut(handle) {
			Some(Object::Closure { captured, .. }) => {
				let slot = captured
					.get_mut(idx as usize)
					.ok_or_else(|| VmError::slice(format!("closure capture {idx} out of range")))?;
				*slot = value;
				Ok(())
			}
			Some(_) => Err(VmError::ty("expected a closure")),
			None => Err(VmError::ty(format!("dangling handle {handle}"))),
		}
	}

	fn closure_captures_len(&self, v: Word) -> VmResult<i32> {
		match self.get(v)? {
			Object::Closure { captured, .. } => Ok(captured.len() as i32),
			_ => Err(VmError::ty("expected a closure")),
		}
	}

	fn read_int(&mut self) -> VmResult<i32> {
		self.fill_stdin_buffer()?;
		self.stdin_words
			.pop_front()
			.ok_or_else(|| VmError::ty("READ past end of input"))
	}

	fn write_int(&mut self, n: i32) -> VmResult<i32> {
		let stdout = std::io::stdout();
		let mut lock = stdout.lock();
		writeln!(lock, "{n}")?;
		Ok(n)
	}
}

impl ArenaRuntime {
	fn render_owned(&self, v: Word) -> VmResult<String> {
		if v.is_unboxed() {
			return Ok(v.unbox().to_string());
		}
		match self.get(v)? {
			Object::Str(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
			Object::Closure { .. } => Ok("<fun>".to_string()),
			Object::Array(_) | Object::Sexp { .. } => Ok("...".to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn array_roundtrip() {
		let mut rt = ArenaRuntime::new();
		let arr = rt.array_from(&[Word::boxed_int(1), Word::boxed_int(2), Word::boxed_int(3)]);
		assert_eq!(rt.length(arr).unwrap(), 3);
		assert_eq!(rt.elem(arr, 1).unwrap(), Word::boxed_int(2));
		assert!(rt.array_check(arr, 3));
		assert!(!rt.array_check(arr, 2));
	}

	#[test]
	fn sexp_tag_and_store() {
		let mut rt = ArenaRuntime::new();
		let tag = rt.tag_hash("Cons");
		let sexp = rt.sexp_from(tag, &[Word::boxed_int(1), Word::boxed_int(2)]);
		assert!(rt.tag_check(sexp, tag, 2));
		assert!(!rt.tag_check(sexp, tag, 1));
		rt.store_indexed(sexp, 0, Word::boxed_int(99)).unwrap();
		assert_eq!(rt.elem(sexp, 0).unwrap(), Word::boxed_int(99));
	}

	#[test]
	fn closure_captures() {
		let mut rt = ArenaRuntime::new();
		let closure = rt.closure_from(1024, &[Word::boxed_int(5), Word::boxed_int(6)]);
		assert!(rt.is_fun(closure));
		assert_eq!(rt.closure_entry(closure).unwrap(), 1024);
		assert_eq!(rt.closure_capture(closure, 1).unwrap(), Word::boxed_int(6));
		assert_eq!(rt.closure_captures_len(closure).unwrap(), 2);
	}

	#[test]
	fn string_equality_by_value() {
		let mut rt = ArenaRuntime::new();
		let a = rt.alloc_string(b"hi");
		let b = rt.alloc_string(b"hi");
		assert!(rt.string_eq(a, b));
		let c = rt.alloc_string(b"no");
		assert!(!rt.string_eq(a, c));
	}

	#[test]
	fn indexed_store_out_of_range_is_fatal() {
		let mut rt = ArenaRuntime::new();
		let arr = rt.array_from(&[Word::boxed_int(1)]);
		assert!(rt.store_indexed(arr, 5, Word::boxed_int(2)).is_err());
	}
}
