use std::path::Path;

fn main() {
	let dir = Path::new(env!("CARGO_MANIFEST_DIR"));
	println!("cargo:rustc-link-search=native={}", dir.display());
	println!("cargo:rustc-link-arg=-Tlinker.ld");
	println!("cargo:rerun-if-changed=linker.ld");
}
