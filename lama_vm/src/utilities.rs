//! Small stream-reading helpers shared by the image loader and the decoder.
//! Covers the primitive widths this format actually uses, without any
//! `unsafe` POD reads (nothing here is a repr(C) struct read in bulk).

use std::io::{Cursor, Read};
use std::mem::size_of;

/// A little-endian value read from a byte cursor.
pub trait FromByteStream: Sized {
	fn read(stream: &mut Cursor<&[u8]>) -> std::io::Result<Self>;
}

macro_rules! impl_from_le_byte_stream {
	($($ty: ty),*) => {$(
		impl FromByteStream for $ty {
			#[inline]
			fn read(stream: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
				let mut bytes = [0u8; size_of::<$ty>()];
				stream.read_exact(&mut bytes)?;
				Ok(Self::from_le_bytes(bytes))
			}
		}
	)*};
}

impl FromByteStream for u8 {
	#[inline]
	fn read(stream: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
		let mut byte = 0u8;
		stream.read_exact(std::slice::from_mut(&mut byte))?;
		Ok(byte)
	}
}

impl_from_le_byte_stream!(i8, i16, i32, i64, u16, u32, u64);

/// Reads a NUL-terminated string starting at `offset` in `data`, the way the
/// string table's entries are laid out (no padding or alignment rounding).
pub(crate) fn read_nul_terminated_str(data: &[u8], offset: usize) -> std::io::Result<&str> {
	let slice = data
		.get(offset..)
		.ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;
	let end = slice
		.iter()
		.position(|b| *b == 0)
		.unwrap_or(slice.len());
	std::str::from_utf8(&slice[..end]).map_err(|_| std::io::ErrorKind::InvalidData.into())
}
