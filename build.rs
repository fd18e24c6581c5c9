use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Ensure a working `protoc` is available across all CI runners by using a vendored binary.
    // This avoids relying on system packages on macOS/Windows/Linux (including cross builds).
    if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
        std::env::set_var("PROTOC", &path);
        eprintln!("build.rs: Using vendored protoc at {}", path.display());
    }

    println!("cargo:rerun-if-changed=protos");

    let proto_root = PathBuf::from("protos");
    let mut protos = Vec::new();

    fn collect_protos(dir: &Path, acc: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    collect_protos(&path, acc);
                } else if path.extension().and_then(|e| e.to_str()) == Some("proto") {
                    acc.push(path);
                }
            }
        }
    }

    collect_protos(&proto_root, &mut protos);

    if protos.is_empty() {
        panic!("No .proto files found under protos/");
    }

    // Imports are written as `meshtastic/<file>.proto`, so the include path is
    // the protos/ root, never the meshtastic/ directory itself. Passing both
    // would make the same file visible under two names and protoc rejects the
    // resulting duplicate definitions.
    protos.sort();
    protos.dedup();

    eprintln!("build.rs: Compiling {} proto files", protos.len());
    for p in &protos {
        eprintln!("  proto: {}", p.display());
    }

    let mut config = prost_build::Config::new();
    config.bytes(["."]);
    config
        .compile_protos(&protos, &[proto_root])
        .expect("Failed to compile protos");
}
