// Build script: compile every GLSL stage under shaders/ to SPIR-V
//
// Outputs sit next to their sources as `<name>.<stage>.spv`. A missing
// compiler only warns so the crate still builds against prebuilt binaries.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_DIR: &str = "shaders";
const STAGES: [&str; 2] = ["vert", "frag"];

fn main() {
    println!("cargo:rerun-if-changed={}", SHADER_DIR);
    println!("cargo:rerun-if-env-changed=GLSLC");

    let compiler = std::env::var("GLSLC").unwrap_or_else(|_| "glslc".to_string());

    for source in shader_sources(Path::new(SHADER_DIR)) {
        println!("cargo:rerun-if-changed={}", source.display());

        let target = spirv_path(&source);
        if is_up_to_date(&source, &target) {
            continue;
        }
        compile(&compiler, &source, &target);
    }
}

fn shader_sources(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        println!("cargo:warning=No {} directory, nothing to compile", dir.display());
        return Vec::new();
    };

    let mut sources: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| STAGES.contains(&ext))
        })
        .collect();
    sources.sort();
    sources
}

fn spirv_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(".spv");
    PathBuf::from(name)
}

fn is_up_to_date(source: &Path, target: &Path) -> bool {
    let modified = |path: &Path| fs::metadata(path).and_then(|m| m.modified()).ok();
    match (modified(source), modified(target)) {
        (Some(src), Some(dst)) => dst >= src,
        _ => false,
    }
}

fn compile(compiler: &str, source: &Path, target: &Path) {
    match Command::new(compiler).arg(source).arg("-o").arg(target).status() {
        Ok(status) if status.success() => {}
        Ok(status) => println!(
            "cargo:warning={} exited with {:?} on {}",
            compiler,
            status.code(),
            source.display()
        ),
        Err(e) => println!(
            "cargo:warning={} unavailable ({}); {} not rebuilt",
            compiler,
            e,
            target.display()
        ),
    }
}
