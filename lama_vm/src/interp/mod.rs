//! The fetch/decode/execute driver and instruction handlers: four frame
//! views (`globals`/`locals`/`args`/`closed`) addressed off a single base
//! pointer, a separate untagged control stack for return bookkeeping, and a
//! runtime-primitive seam for every allocating operation.

use crate::decode::{decode, BinOp, Instruction, Mem, Pattern};
use crate::error::{VmError, VmResult};
use crate::image::Image;
use crate::runtime::RuntimePrimitives;
use crate::stack::{ControlStack, ControlWord, OperandStack, DEFAULT_OPERAND_CAPACITY};
use crate::word::Word;

/// Emits a `tracing::trace!` call when the `tracing` feature is enabled,
/// and compiles to nothing otherwise — the optional dependency is never
/// referenced from a build that doesn't enable it.
macro_rules! vm_trace {
	($($arg:tt)*) => {
		#[cfg(feature = "tracing")]
		tracing::trace!($($arg)*);
	};
}

/// A memory location previously produced by `LDA`, to be written through by
/// a later `STI`. Lives entirely at the interpreter level — unlike the
/// heap objects behind [`RuntimePrimitives`], these handles are never
/// exposed to the runtime primitive layer.
#[derive(Copy, Clone, Debug)]
enum SlotRef {
	Global(usize),
	Stack(usize),
	Closed(Word, i32),
}

/// The interpreter's mutable state for a single program run. Generic over
/// the runtime-primitive implementation so the core fetch/execute loop
/// never depends on how strings, arrays, or closures are represented.
pub struct Vm<R: RuntimePrimitives> {
	image: Image,
	operand: OperandStack,
	control: ControlStack,
	globals: Vec<Word>,
	refs: Vec<SlotRef>,
	runtime: R,

	ip: usize,
	bp: usize,
	argc: usize,
	locals_n: usize,
	closure: Option<Word>,
	closed_n: usize,
}

impl<R: RuntimePrimitives> Vm<R> {
	pub fn new(image: Image, runtime: R) -> Vm<R> {
		let globals = vec![Word::boxed_int(0); image.global_area_size() as usize];
		Vm {
			image,
			operand: OperandStack::with_capacity(DEFAULT_OPERAND_CAPACITY),
			control: ControlStack::new(),
			globals,
			refs: Vec::new(),
			runtime,
			ip: 0,
			bp: 0,
			argc: 0,
			locals_n: 0,
			closure: None,
			closed_n: 0,
		}
	}

	/// Runs the program to completion: either an `EXIT` instruction or an
	/// `END` that empties the operand stack (a return from `main`). Returns
	/// the process exit code.
	#[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
	pub fn run(&mut self) -> VmResult<i32> {
		// The compiled entry point always opens with `BEGIN 2 0`: two
		// placeholder arguments conventionally reserved for top-level
		// programs. Nothing calls main, so nothing else would push them.
		self.operand.push(Word::boxed_int(0))?;
		self.operand.push(Word::boxed_int(0))?;

		loop {
			let (instruction, next_ip) = decode(self.image.code(), self.ip)?;
			self.ip = next_ip;
			vm_trace!(ip = self.ip, ?instruction, "dispatch");

			match instruction {
				Instruction::Exit => return Ok(0),
				Instruction::End | Instruction::Ret => {
					if let Some(code) = self.handle_end()? {
						return Ok(code);
					}
				}
				other => self.execute(other)?,
			}
		}
	}

	fn execute(&mut self, instruction: Instruction) -> VmResult<()> {
		match instruction {
			Instruction::BinOp(op) => self.handle_binop(op),

			Instruction::Const(n) => self.operand.push(Word::boxed_int(n)),
			Instruction::PushString(idx) => {
				let s = self.image.string_at(idx)?.as_bytes().to_vec();
				let w = self.runtime.alloc_string(&s);
				self.operand.push(w)
			}
			Instruction::Sexp { tag_idx, n } => self.handle_sexp(tag_idx, n),
			Instruction::Sti => self.handle_sti(),
			Instruction::Sta => self.handle_sta(),
			Instruction::Jump(off) => {
				self.ip = off as usize;
				Ok(())
			}
			Instruction::Drop => self.operand.pop().map(|_| ()),
			Instruction::Dup => {
				let w = self.operand.peek(0)?;
				self.operand.push(w)
			}
			Instruction::Swap => self.handle_swap(),
			Instruction::Elem => self.handle_elem(),

			Instruction::Ld(mem, idx) => {
				let w = self.mem_get(mem, idx)?;
				self.operand.push(w)
			}
			Instruction::Lda(mem, idx) => {
				let w = self.mem_ref(mem, idx)?;
				self.operand.push(w)
			}
			Instruction::St(mem, idx) => {
				let w = self.operand.peek(0)?;
				self.mem_set(mem, idx, w)
			}

			Instruction::CJmpZ(off) => {
				if self.pop_unboxed()? == 0 {
					self.ip = off as usize;
				}
				Ok(())
			}
			Instruction::CJmpNz(off) => {
				if self.pop_unboxed()? != 0 {
					self.ip = off as usize;
				}
				Ok(())
			}
			Instruction::Begin { argc, locals } => self.handle_begin(argc, locals, false),
			Instruction::CBegin { argc, locals } => self.handle_begin(argc, locals, true),
			Instruction::Closure { entry, captures } => self.handle_closure(entry, &captures),
			Instruction::Callc { argc } => self.handle_callc(argc),
			Instruction::Call { offset, argc } => self.handle_call(offset, argc),
			Instruction::Tag { tag_idx, n } => self.handle_tag(tag_idx, n),
			Instruction::Array(n) => self.handle_array_check(n),
			Instruction::Fail { line, col } => Err(VmError::Fail { line, col }),
			Instruction::Line(_) => Ok(()),

			Instruction::Pattern(p) => self.handle_pattern(p),

			Instruction::Read => {
				let n = self.runtime.read_int()?;
				self.operand.push(Word::boxed_int(n))
			}
			Instruction::Write => {
				let n = self.pop_unboxed()?;
				let res = self.runtime.write_int(n)?;
				self.operand.push(Word::boxed_int(res))
			}
			Instruction::Length => {
				let v = self.operand.pop()?;
				let n = self.runtime.length(v)?;
				self.operand.push(Word::boxed_int(n))
			}
			Instruction::StringOf => {
				let v = self.operand.pop()?;
				let s = self.runtime.string_of(v)?;
				self.operand.push(s)
			}
			Instruction::MakeArray(n) => self.handle_make_array(n),

			Instruction::End | Instruction::Ret | Instruction::Exit => unreachable!("handled in run()"),
		}
	}

	// -- BINOP -----------------------------------------------------------

	fn handle_binop(&mut self, op: BinOp) -> VmResult<()> {
		let y = self.pop_unboxed()?;
		let x = self.pop_unboxed()?;
		let result = match op {
			BinOp::Add => x.wrapping_add(y),
			BinOp::Sub => x.wrapping_sub(y),
			BinOp::Mul => x.wrapping_mul(y),
			BinOp::Div => {
				if y == 0 {
					return Err(VmError::ty("division by zero"));
				}
				x.wrapping_div(y)
			}
			BinOp::Mod => {
				if y == 0 {
					return Err(VmError::ty("modulo by zero"));
				}
				x.wrapping_rem(y)
			}
			BinOp::Lt => (x < y) as i32,
			BinOp::Leq => (x <= y) as i32,
			BinOp::Gt => (x > y) as i32,
			BinOp::Geq => (x >= y) as i32,
			BinOp::Eq => (x == y) as i32,
			BinOp::Neq => (x != y) as i32,
			BinOp::And => (x != 0 && y != 0) as i32,
			BinOp::Or => (x != 0 || y != 0) as i32,
		};
		self.operand.push(Word::boxed_int(result))
	}

	// -- DATA --------------------------------------------------------------

	fn handle_sexp(&mut self, tag_idx: i32, n: i32) -> VmResult<()> {
		let tag_name = self.image.string_at(tag_idx)?.to_string();
		let hash = self.runtime.tag_hash(&tag_name);
		let mut children = Vec::with_capacity(n as usize);
		for _ in 0..n {
			children.push(self.operand.pop()?);
		}
		children.reverse();
		let sexp = self.runtime.sexp_from(hash, &children);
		self.operand.push(sexp)
	}

	fn handle_sti(&mut self) -> VmResult<()> {
		let value = self.operand.pop()?;
		let reference = self.operand.pop()?;
		self.write_through(reference, value)
	}

	fn handle_sta(&mut self) -> VmResult<()> {
		let value = self.operand.pop()?;
		let idx_or_var = self.operand.pop()?;
		let result = if idx_or_var.is_unboxed() {
			let container = self.operand.pop()?;
			self.runtime.store_indexed(container, idx_or_var.unbox(), value)?
		} else {
			// Preserved as-is from the source behavior this port follows: the
			// same boxed word serves as both the index and the container.
			let raw_idx = (idx_or_var.0 >> 1) as i32;
			self.runtime.store_indexed(idx_or_var, raw_idx, value)?
		};
		self.operand.push(result)
	}

	fn handle_swap(&mut self) -> VmResult<()> {
		let top = self.operand.pop()?;
		let second = self.operand.pop()?;
		self.operand.push(top)?;
		self.operand.push(second)
	}

	fn handle_elem(&mut self) -> VmResult<()> {
		let idx = self.pop_unboxed()?;
		let container = self.operand.pop()?;
		let elem = self.runtime.elem(container, idx)?;
		self.operand.push(elem)
	}

	// -- memory addressing -------------------------------------------------

	fn mem_get(&self, mem: Mem, idx: i32) -> VmResult<Word> {
		let idx = idx as usize;
		match mem {
			Mem::Global => self
				.globals
				.get(idx)
				.copied()
				.ok_or_else(|| VmError::slice(format!("global {idx} out of range"))),
			Mem::Local => {
				if idx >= self.locals_n {
					return Err(VmError::slice(format!("local {idx} out of range")));
				}
				self.operand.slot(self.bp + idx)
			}
			Mem::Arg => {
				if idx >= self.argc {
					return Err(VmError::slice(format!("argument {idx} out of range")));
				}
				self.operand.slot(self.bp - self.argc + idx)
			}
			Mem::Closed => {
				if idx >= self.closed_n {
					return Err(VmError::slice(format!("closed {idx} out of range")));
				}
				let closure = self.closure.ok_or_else(|| VmError::slice("closed accessed outside a closure frame"))?;
				self.runtime.closure_capture(closure, idx as i32)
			}
		}
	}

	fn mem_set(&mut self, mem: Mem, idx: i32, value: Word) -> VmResult<()> {
		let idx_usize = idx as usize;
		match mem {
			Mem::Global => {
				let slot = self
					.globals
					.get_mut(idx_usize)
					.ok_or_else(|| VmError::slice(format!("global {idx} out of range")))?;
				*slot = value;
				Ok(())
			}
			Mem::Local => {
				if idx_usize >= self.locals_n {
					return Err(VmError::slice(format!("local {idx} out of range")));
				}
				self.operand.set_slot(self.bp + idx_usize, value)
			}
			Mem::Arg => {
				if idx_usize >= self.argc {
					return Err(VmError::slice(format!("argument {idx} out of range")));
				}
				self.operand.set_slot(self.bp - self.argc + idx_usize, value)
			}
			Mem::Closed => {
				if idx_usize >= self.closed_n {
					return Err(VmError::slice(format!("closed {idx} out of range")));
				}
				let closure = self.closure.ok_or_else(|| VmError::slice("closed accessed outside a closure frame"))?;
				self.runtime.closure_set_capture(closure, idx, value)
			}
		}
	}

	fn mem_ref(&mut self, mem: Mem, idx: i32) -> VmResult<Word> {
		let idx_usize = idx as usize;
		let target = match mem {
			Mem::Global => {
				if idx_usize >= self.globals.len() {
					return Err(VmError::slice(format!("global {idx} out of range")));
				}
				SlotRef::Global(idx_usize)
			}
			Mem::Local => {
				if idx_usize >= self.locals_n {
					return Err(VmError::slice(format!("local {idx} out of range")));
				}
				SlotRef::Stack(self.bp + idx_usize)
			}
			Mem::Arg => {
				if idx_usize >= self.argc {
					return Err(VmError::slice(format!("argument {idx} out of range")));
				}
				SlotRef::Stack(self.bp - self.argc + idx_usize)
			}
			Mem::Closed => {
				if idx_usize >= self.closed_n {
					return Err(VmError::slice(format!("closed {idx} out of range")));
				}
				let closure = self.closure.ok_or_else(|| VmError::slice("closed accessed outside a closure frame"))?;
				SlotRef::Closed(closure, idx)
			}
		};
		let handle = self.refs.len() as u32;
		self.refs.push(target);
		Ok(Word::boxed_ref(handle))
	}

	fn write_through(&mut self, reference: Word, value: Word) -> VmResult<()> {
		if reference.is_unboxed() {
			return Err(VmError::ty("STI target is not a reference"));
		}
		let target = *self
			.refs
			.get(reference.handle() as usize)
			.ok_or_else(|| VmError::ty("dangling STI reference"))?;
		match target {
			SlotRef::Global(idx) => {
				let slot = self.globals.get_mut(idx).ok_or_else(|| VmError::slice(format!("global {idx} out of range")))?;
				*slot = value;
				Ok(())
			}
			SlotRef::Stack(idx) => self.operand.set_slot(idx, value),
			SlotRef::Closed(closure, idx) => self.runtime.closure_set_capture(closure, idx, value),
		}
	}

	// -- CONTROL -------------------------------------------------------------

	fn handle_begin(&mut self, argc: i32, locals: i32, is_closure_frame: bool) -> VmResult<()> {
		let argc = argc as usize;
		let locn = locals as usize;

		let prev_argc = self.argc;
		let prev_locn = self.locals_n;
		let prev_bp = self.bp;

		self.bp = self.operand.len();
		self.argc = argc;
		self.locals_n = locn;
		for _ in 0..locn {
			self.operand.push(Word::boxed_int(0))?;
		}

		self.control.cpush(ControlWord::Count(prev_argc));
		self.control.cpush(ControlWord::Count(prev_locn));
		self.control.cpush(ControlWord::BasePtr(prev_bp));

		if is_closure_frame {
			let idx = self
				.bp
				.checked_sub(argc + 1)
				.ok_or_else(|| VmError::slice("CBEGIN with no closure slot beneath its arguments"))?;
			let closure = self.operand.slot(idx)?;
			self.set_closure(Some(closure))?;
		} else {
			self.set_closure(None)?;
		}
		vm_trace!(bp = self.bp, argc, locn, is_closure_frame, closed_n = self.closed_n, "frame opened");
		Ok(())
	}

	/// Installs the current closure frame's `closed` view, enforcing
	/// `closed.n = header_length(closure) - 1` explicitly rather than
	/// leaving it implicit in `closure_capture`'s own bounds check.
	fn set_closure(&mut self, closure: Option<Word>) -> VmResult<()> {
		self.closed_n = match closure {
			Some(w) => self.runtime.closure_captures_len(w)? as usize,
			None => 0,
		};
		self.closure = closure;
		Ok(())
	}

	/// Returns `Some(exit_code)` if this `END` returned from `main`
	/// (terminating the program), `None` if execution should continue in
	/// the caller's frame.
	fn handle_end(&mut self) -> VmResult<Option<i32>> {
		let ret = self.operand.pop()?;
		let extra = usize::from(self.closure.is_some());
		self.operand.drop_n(self.locals_n + self.argc + extra)?;

		if self.operand.is_empty() {
			vm_trace!("frame closed: returned from main");
			return Ok(Some(0));
		}
		self.operand.push(ret)?;

		let prev_bp = self.control.cpop_base()?;
		let prev_locn = self.control.cpop_count()?;
		let prev_argc = self.control.cpop_count()?;
		let prev_is_closure = self.control.cpop_flag()?;
		let prev_ip = self.control.cpop_ip()?;

		self.ip = prev_ip;
		self.bp = prev_bp;
		self.argc = prev_argc;
		self.locals_n = prev_locn;

		if prev_is_closure {
			let idx = self
				.bp
				.checked_sub(self.argc + 1)
				.ok_or_else(|| VmError::slice("resumed closure frame has no closure slot beneath its arguments"))?;
			let closure = self.operand.slot(idx)?;
			self.set_closure(Some(closure))?;
		} else {
			self.set_closure(None)?;
		}
		vm_trace!(bp = self.bp, closed_n = self.closed_n, "frame closed");
		Ok(None)
	}

	fn handle_closure(&mut self, entry: i32, captures: &[crate::decode::Capture]) -> VmResult<()> {
		let mut values = Vec::with_capacity(captures.len());
		for capture in captures {
			values.push(self.mem_get(capture.mem, capture.idx)?);
		}
		let closure = self.runtime.closure_from(entry, &values);
		self.operand.push(closure)
	}

	fn handle_callc(&mut self, argc: i32) -> VmResult<()> {
		let depth = argc as usize;
		let closure = self.operand.peek(depth)?;
		if !self.runtime.is_fun(closure) {
			return Err(VmError::ty("CALLC target is not a closure"));
		}
		let entry = self.runtime.closure_entry(closure)?;
		self.control.cpush(ControlWord::Ip(self.ip));
		self.control.cpush(ControlWord::Flag(self.closure.is_some()));
		self.ip = entry as usize;
		Ok(())
	}

	fn handle_call(&mut self, offset: i32, _argc: i32) -> VmResult<()> {
		self.control.cpush(ControlWord::Ip(self.ip));
		self.control.cpush(ControlWord::Flag(self.closure.is_some()));
		self.ip = offset as usize;
		Ok(())
	}

	fn handle_tag(&mut self, tag_idx: i32, n: i32) -> VmResult<()> {
		let name = self.image.string_at(tag_idx)?.to_string();
		let hash = self.runtime.tag_hash(&name);
		let v = self.operand.pop()?;
		let ok = !v.is_unboxed() && self.runtime.tag_check(v, hash, n);
		self.operand.push(Word::from_bool(ok))
	}

	fn handle_array_check(&mut self, n: i32) -> VmResult<()> {
		let v = self.operand.pop()?;
		let ok = !v.is_unboxed() && self.runtime.array_check(v, n);
		self.operand.push(Word::from_bool(ok))
	}

	// -- PATT ----------------------------------------------------------------

	fn handle_pattern(&mut self, pattern: Pattern) -> VmResult<()> {
		let result = match pattern {
			Pattern::StrEq => {
				let b = self.operand.pop()?;
				let a = self.operand.pop()?;
				!a.is_unboxed() && !b.is_unboxed() && self.runtime.string_eq(a, b)
			}
			Pattern::IsString => {
				let v = self.operand.pop()?;
				!v.is_unboxed() && self.runtime.is_string(v)
			}
			Pattern::IsArray => {
				let v = self.operand.pop()?;
				!v.is_unboxed() && self.runtime.is_array(v)
			}
			Pattern::IsSexp => {
				let v = self.operand.pop()?;
				!v.is_unboxed() && self.runtime.is_sexp(v)
			}
			Pattern::IsRef => {
				let v = self.operand.pop()?;
				v.is_boxed()
			}
			Pattern::IsVal => {
				let v = self.operand.pop()?;
				v.is_unboxed()
			}
			Pattern::IsFun => {
				let v = self.operand.pop()?;
				!v.is_unboxed() && self.runtime.is_fun(v)
			}
		};
		self.operand.push(Word::from_bool(result))
	}

	fn handle_make_array(&mut self, n: i32) -> VmResult<()> {
		let mut values = Vec::with_capacity(n as usize);
		for _ in 0..n {
			values.push(self.operand.pop()?);
		}
		values.reverse();
		let array = self.runtime.array_from(&values);
		self.operand.push(array)
	}

	// -- helpers ---------------------------------------------------------

	fn pop_unboxed(&mut self) -> VmResult<i32> {
		let w = self.operand.pop()?;
		if w.is_unboxed() {
			Ok(w.unbox())
		} else {
			Err(VmError::ty("expected an unboxed integer"))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::runtime::ArenaRuntime;

	fn image_with_code(code: &[u8]) -> Image {
		let mut bytes = Vec::new();
		bytes.extend_from_slice(&0i32.to_le_bytes()); // no string table
		bytes.extend_from_slice(&2i32.to_le_bytes()); // global area size
		bytes.extend_from_slice(&0i32.to_le_bytes()); // no public symbols
		bytes.extend_from_slice(code);
		Image::from_bytes(bytes).unwrap()
	}

	fn run_ok(code: &[u8]) -> i32 {
		let image = image_with_code(code);
		let mut vm = Vm::new(image, ArenaRuntime::new());
		vm.run().expect("program should run to completion")
	}

	// BEGIN 2 0; CONST 42; CALL-PRIM WRITE; DROP; CONST 0; END; EXIT
	#[test]
	fn hello_integer() {
		let code: Vec<u8> = [
			vec![0x52, 2, 0, 0, 0, 0, 0, 0, 0], // BEGIN 2 0
			vec![0x10],
			42i32.to_le_bytes().to_vec(),
			vec![0x71], // WRITE
			vec![0x18], // DROP
			vec![0x10],
			0i32.to_le_bytes().to_vec(),
			vec![0x16], // END
			vec![0xF0], // EXIT
		]
		.concat();
		assert_eq!(run_ok(&code), 0);
	}

	// BEGIN 2 0; CONST 6; CONST 7; BINOP *; CALL-PRIM WRITE; DROP; CONST 0; END
	#[test]
	fn arithmetic() {
		let code: Vec<u8> = [
			vec![0x52, 2, 0, 0, 0, 0, 0, 0, 0],
			vec![0x10],
			6i32.to_le_bytes().to_vec(),
			vec![0x10],
			7i32.to_le_bytes().to_vec(),
			vec![0x03], // BINOP Mul
			vec![0x71],
			vec![0x18],
			vec![0x10],
			0i32.to_le_bytes().to_vec(),
			vec![0x16],
		]
		.concat();
		assert_eq!(run_ok(&code), 0);
	}

	// BEGIN 1 0; LD ARG 0; END  -- callee `f` is placed right after main's code.
	#[test]
	fn identity_function_call() {
		let f_code: Vec<u8> = [
			vec![0x52, 1, 0, 0, 0, 0, 0, 0, 0], // BEGIN 1 0
			vec![0x22],
			0i32.to_le_bytes().to_vec(), // LD ARG 0
			vec![0x16],                  // END
		]
		.concat();

		// main: BEGIN 2 0; CONST 9; CALL f 1; WRITE; DROP; CONST 0; END
		// Byte lengths: BEGIN=9, CONST=5, CALL=9, WRITE=1, DROP=1, CONST=5, END=1 -> 31 total.
		const FN_OFFSET: i32 = 31;
		let main_code: Vec<u8> = [
			vec![0x52, 2, 0, 0, 0, 0, 0, 0, 0], // BEGIN 2 0
			vec![0x10],
			9i32.to_le_bytes().to_vec(), // CONST 9
			vec![0x56],
			FN_OFFSET.to_le_bytes().to_vec(),
			1i32.to_le_bytes().to_vec(), // CALL f, argc=1
			vec![0x71],                  // WRITE
			vec![0x18],                  // DROP
			vec![0x10],
			0i32.to_le_bytes().to_vec(), // CONST 0
			vec![0x16],                  // END
		]
		.concat();
		assert_eq!(main_code.len() as i32, FN_OFFSET);

		let code = [main_code, f_code].concat();
		assert_eq!(run_ok(&code), 0);
	}

	#[test]
	fn closure_capture() {
		// g: CBEGIN 0 0; LD CLOSED 0; END
		let g_code: Vec<u8> = [
			vec![0x53, 0, 0, 0, 0, 0, 0, 0, 0], // CBEGIN 0 0
			vec![0x23],
			0i32.to_le_bytes().to_vec(), // LD CLOSED 0
			vec![0x16],                  // END
		]
		.concat();

		// main: BEGIN 2 1; CONST 5; ST LOCAL 0; DROP; CLOSURE g [L 0]; CALLC 0; WRITE; DROP; CONST 0; END
		// (argc is 2 because every top-level program's frame reserves the two
		// implicit arguments `run()` pushes before entering the fetch loop.)
		// Byte lengths: BEGIN=9, CONST=5, ST=5, DROP=1, CLOSURE(1 capture)=14, CALLC=5,
		// WRITE=1, DROP=1, CONST=5, END=1 -> 47 total.
		const G_OFFSET: i32 = 47;
		let main_code: Vec<u8> = [
			vec![0x52, 2, 0, 0, 0, 1, 0, 0, 0], // BEGIN argc=2 locn=1
			vec![0x10],
			5i32.to_le_bytes().to_vec(), // CONST 5
			vec![0x41],
			0i32.to_le_bytes().to_vec(), // ST LOCAL 0
			vec![0x18],                  // DROP (ST writes through without popping)
			vec![0x54],                  // CLOSURE
			G_OFFSET.to_le_bytes().to_vec(),
			1i32.to_le_bytes().to_vec(), // 1 capture
			vec![1],                     // Mem::Local
			0i32.to_le_bytes().to_vec(), // idx 0
			vec![0x55],                  // CALLC
			0i32.to_le_bytes().to_vec(), // argc 0
			vec![0x71],                  // WRITE
			vec![0x18],                  // DROP
			vec![0x10],
			0i32.to_le_bytes().to_vec(), // CONST 0
			vec![0x16],                  // END
		]
		.concat();
		assert_eq!(main_code.len() as i32, G_OFFSET);

		let code = [main_code, g_code].concat();
		assert_eq!(run_ok(&code), 0);
	}

	// BEGIN 2 0; CONST 0; CJMPZ L1; CONST 1; JUMP L2; L1: CONST 2; L2: WRITE; DROP; CONST 0; END
	#[test]
	fn conditional_branch_takes_the_zero_arm() {
		// Byte offsets: BEGIN=9(0..9), CONST=5(9..14), CJMPZ=5(14..19),
		// CONST=5(19..24), JUMP=5(24..29), L1 CONST=5(29..34) -> L1=29,
		// L2 WRITE=1(34..35) -> L2=34.
		const L1: i32 = 29;
		const L2: i32 = 34;
		let code: Vec<u8> = [
			vec![0x52, 2, 0, 0, 0, 0, 0, 0, 0], // BEGIN 2 0
			vec![0x10],
			0i32.to_le_bytes().to_vec(), // CONST 0
			vec![0x50],
			L1.to_le_bytes().to_vec(), // CJMPZ L1
			vec![0x10],
			1i32.to_le_bytes().to_vec(), // CONST 1
			vec![0x15],
			L2.to_le_bytes().to_vec(), // JUMP L2
			vec![0x10],
			2i32.to_le_bytes().to_vec(), // CONST 2 (L1)
			vec![0x71],                  // WRITE (L2)
			vec![0x18],
			vec![0x10],
			0i32.to_le_bytes().to_vec(),
			vec![0x16],
		]
		.concat();
		assert_eq!(code.len() as i32, L2 + 1);
		assert_eq!(run_ok(&code), 0);
	}

	#[test]
	fn division_by_zero_is_fatal() {
		let code: Vec<u8> = [
			vec![0x52, 2, 0, 0, 0, 0, 0, 0, 0],
			vec![0x10],
			1i32.to_le_bytes().to_vec(),
			vec![0x10],
			0i32.to_le_bytes().to_vec(),
			vec![0x04], // BINOP Div
		]
		.concat();
		let image = image_with_code(&code);
		let mut vm = Vm::new(image, ArenaRuntime::new());
		assert!(vm.run().is_err());
	}

	#[test]
	fn operand_stack_underflow_is_fatal() {
		// run() seeds the stack with two placeholder words for the top-level
		// frame; a third DROP runs past them into genuine underflow.
		let code = vec![0x18u8, 0x18, 0x18];
		let image = image_with_code(&code);
		let mut vm = Vm::new(image, ArenaRuntime::new());
		match vm.run() {
			Err(VmError::Stack(_)) => {}
			other => panic!("expected a stack error, got {other:?}"),
		}
	}

	#[test]
	fn dup_and_swap() {
		let code: Vec<u8> = [
			vec![0x52, 2, 0, 0, 0, 0, 0, 0, 0],
			vec![0x10],
			1i32.to_le_bytes().to_vec(), // CONST 1
			vec![0x10],
			2i32.to_le_bytes().to_vec(), // CONST 2
			vec![0x1A],                  // SWAP -> top=1, below=2
			vec![0x71],                  // WRITE pops top (1), writes 1
			vec![0x18],                  // DROP the WRITE result
			vec![0x19],                  // DUP the remaining 2
			vec![0x71],                  // WRITE pops 2, writes 2
			vec![0x18],
			vec![0x18], // drop the original 2
			vec![0x10],
			0i32.to_le_bytes().to_vec(),
			vec![0x16],
		]
		.concat();
		assert_eq!(run_ok(&code), 0);
	}
}
