use std::path::PathBuf;
use std::process::ExitCode;

use lama_vm::{ArenaRuntime, Image, Vm};

fn main() -> ExitCode {
	let mut args = std::env::args_os().skip(1);
	let path = match args.next() {
		Some(path) => PathBuf::from(path),
		None => {
			eprintln!("usage: lamavm <bytecode-image>");
			return ExitCode::FAILURE;
		}
	};

	let image = match Image::load(&path) {
		Ok(image) => image,
		Err(err) => {
			eprintln!("{err}");
			return ExitCode::FAILURE;
		}
	};

	let mut vm = Vm::new(image, ArenaRuntime::new());
	match vm.run() {
		Ok(code) => ExitCode::from(code as u8),
		Err(err) => {
			eprintln!("{err}");
			ExitCode::FAILURE
		}
	}
}
