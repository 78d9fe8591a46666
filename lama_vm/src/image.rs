//! The parsed bytecode image: string table, code segment, and declared
//! global-area size. A fixed header is read with [`FromByteStream`], and the
//! string/code regions are kept as zero-copy views into the backing buffer
//! via `owning_ref::ArcRef`, so that `Image` is a plain `'static`,
//! `Send + Sync` value instead of carrying a lifetime parameter.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use owning_ref::ArcRef;

use crate::error::{VmError, VmResult};
use crate::utilities::{read_nul_terminated_str, FromByteStream};

const HEADER_SIZE: usize = 3 * 4;
const PUBLIC_ENTRY_SIZE: usize = 2 * 4;

/// A parsed bytecode image.
///
/// ```text
/// +----+---------------------+------------------------+
/// |  0 | stringtab_size      | i32                    |
/// |  4 | global_area_size    | i32                    |
/// |  8 | public_symbols_num  | i32                    |
/// | 12 | public table        | 2*i32 * public_count   |
/// |    | string table        | stringtab_size bytes   |
/// |    | code                | remainder              |
/// +----+---------------------+------------------------+
/// ```
#[derive(Clone)]
pub struct Image {
	global_area_size: i32,
	public_symbols_number: i32,
	strings: ArcRef<[u8]>,
	code: ArcRef<[u8]>,
}

impl Image {
	/// Reads and parses a bytecode image from `path`.
	#[cfg_attr(feature = "tracing", tracing::instrument)]
	pub fn load(path: &Path) -> VmResult<Image> {
		let bytes = std::fs::read(path)?;
		Self::parse(Arc::<[u8]>::from(bytes))
	}

	/// Like [`Image::load`], but memory-maps the file instead of copying it
	/// into a heap buffer. Requires the `mmap` feature.
	#[cfg(feature = "mmap")]
	#[cfg_attr(feature = "tracing", tracing::instrument)]
	pub fn load_mmap(path: &Path) -> VmResult<Image> {
		let file = std::fs::File::open(path)?;
		// Safety contract is the caller's: the file must not be mutated out
		// from under the mapping while the image is in use.
		let mmap = unsafe { memmap2::Mmap::map(&file)? };
		Self::parse(Arc::<[u8]>::from(mmap.to_vec()))
	}

	fn parse(data: Arc<[u8]>) -> VmResult<Image> {
		if data.len() < HEADER_SIZE {
			return Err(VmError::Image("truncated header".into()));
		}

		let mut stream = Cursor::new(&*data);
		let stringtab_size = i32::read(&mut stream)? as usize;
		let global_area_size = i32::read(&mut stream)?;
		let public_symbols_number = i32::read(&mut stream)?;

		if global_area_size < 0 || public_symbols_number < 0 {
			return Err(VmError::Image("negative size in header".into()));
		}

		let public_table_size = public_symbols_number as usize * PUBLIC_ENTRY_SIZE;
		let strings_start = HEADER_SIZE + public_table_size;
		let strings_end = strings_start
			.checked_add(stringtab_size)
			.ok_or_else(|| VmError::Image("string table size overflow".into()))?;

		if strings_end > data.len() {
			return Err(VmError::Image("string table runs past end of file".into()));
		}

		let root = ArcRef::new(data.clone());
		let strings = root.clone().map(|d| &d[strings_start..strings_end]);
		let code = root.map(|d| &d[strings_end..]);

		Ok(Image {
			global_area_size,
			public_symbols_number,
			strings,
			code,
		})
	}

	pub fn global_area_size(&self) -> i32 {
		self.global_area_size
	}

	pub fn public_symbols_number(&self) -> i32 {
		self.public_symbols_number
	}

	pub fn code(&self) -> &[u8] {
		&self.code
	}

	/// Looks up a NUL-terminated string at byte offset `idx` in the string
	/// table, as used by `STRING`, `SEXP`, `TAG`, and `CALL-PRIM STRING`.
	pub fn string_at(&self, idx: i32) -> VmResult<&str> {
		if idx < 0 {
			return Err(VmError::slice(format!("negative string table offset {idx}")));
		}
		read_nul_terminated_str(&self.strings, idx as usize)
			.map_err(|_| VmError::slice(format!("string table offset {idx} out of range")))
	}

	/// Builds an image directly from an in-memory buffer, bypassing the
	/// filesystem. Used by conformance tests that assemble a literal
	/// bytecode sequence in place.
	#[cfg(test)]
	pub(crate) fn from_bytes(data: Vec<u8>) -> VmResult<Image> {
		Self::parse(Arc::from(data))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn build_image(strings: &[u8], code: &[u8], globals: i32) -> Vec<u8> {
		let mut bytes = Vec::new();
		bytes.extend_from_slice(&(strings.len() as i32).to_le_bytes());
		bytes.extend_from_slice(&globals.to_le_bytes());
		bytes.extend_from_slice(&0i32.to_le_bytes()); // no public symbols
		bytes.extend_from_slice(strings);
		bytes.extend_from_slice(code);
		bytes
	}

	#[test]
	fn parses_header_and_regions() {
		let strings = b"hello\0world\0";
		let code = &[0x0F; 3][..]; // three EXIT opcodes
		let bytes = build_image(strings, code, 2);
		let image = Image::parse(Arc::from(bytes)).unwrap();

		assert_eq!(image.global_area_size(), 2);
		assert_eq!(image.code(), code);
		assert_eq!(image.string_at(0).unwrap(), "hello");
		assert_eq!(image.string_at(6).unwrap(), "world");
	}

	#[test]
	fn rejects_truncated_header() {
		assert!(Image::parse(Arc::from(vec![0u8; 2])).is_err());
	}

	#[test]
	fn rejects_string_table_past_eof() {
		let mut bytes = Vec::new();
		bytes.extend_from_slice(&100i32.to_le_bytes());
		bytes.extend_from_slice(&0i32.to_le_bytes());
		bytes.extend_from_slice(&0i32.to_le_bytes());
		assert!(Image::parse(Arc::from(bytes)).is_err());
	}
}
