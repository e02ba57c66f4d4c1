use vergen::{BuildBuilder, CargoBuilder, Emitter};

// Emits VERGEN_BUILD_TIMESTAMP, VERGEN_CARGO_DEBUG and VERGEN_CARGO_TARGET_TRIPLE
// for the `--version` long text. Missing values only degrade that text.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let mut emitter = Emitter::default();
    match BuildBuilder::all_build() {
        Ok(build) => {
            if let Err(e) = emitter.add_instructions(&build) {
                println!("cargo:warning=build metadata unavailable: {e}");
            }
        }
        Err(e) => println!("cargo:warning=build metadata unavailable: {e}"),
    }
    match CargoBuilder::all_cargo() {
        Ok(cargo) => {
            if let Err(e) = emitter.add_instructions(&cargo) {
                println!("cargo:warning=cargo metadata unavailable: {e}");
            }
        }
        Err(e) => println!("cargo:warning=cargo metadata unavailable: {e}"),
    }
    if let Err(e) = emitter.emit() {
        println!("cargo:warning=vergen emit skipped: {e}");
    }
}
