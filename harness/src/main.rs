use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::SystemTime;

use memory_stats::memory_stats;
use tracing_flame::FlameLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use lama_vm::{ArenaRuntime, Image, Vm};

fn setup_global_subscriber() -> impl Drop {
	let file = File::create("./trace.folded").unwrap();
	let flame_layer = FlameLayer::new(BufWriter::new(file)).with_file_and_line(false);
	let guard = flame_layer.flush_on_drop();

	let subscriber = Registry::default().with(flame_layer);

	tracing::subscriber::set_global_default(subscriber).expect("Could not set global default");
	guard
}

fn main() {
	let _guard = setup_global_subscriber();

	let path = std::env::args_os().nth(1).map(PathBuf::from).expect("usage: harness <bytecode-image>");

	let mut start = SystemTime::now();
	let image = Image::load_mmap(&path).unwrap();

	println! {
		"Image load time: {:?}, RAM: {}MB",
		start.elapsed().unwrap(),
		memory_stats().unwrap().virtual_mem as f32 / 1000000.0,
	}

	start = SystemTime::now();
	let mut vm = Vm::new(image, ArenaRuntime::new());
	let exit_code = vm.run().unwrap();

	println! {
		"Run time: {:?}, RAM: {}MB, exit code: {}",
		start.elapsed().unwrap(),
		memory_stats().unwrap().virtual_mem as f32 / 1000000.0,
		exit_code,
	}
}
