fn main() {
    cc::Build::new()
        .file("src/fault_guard.c")
        .compile("perftools_fault_guard");
    println!("cargo:rerun-if-changed=src/fault_guard.c");
}
