fn main() {
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("-none") {
        let manifest = std::env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg=-T{}/link.ld", manifest);
        println!("cargo:rerun-if-changed=link.ld");
    }
}
