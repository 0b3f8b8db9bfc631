//! Build script: compiles the CUDA kernels (.cu) to PTX at build time.
//!
//! With the `cuda` feature enabled, every `.cu` file in `kernels/` is run
//! through `nvcc --ptx` and the result lands in `$OUT_DIR/kernels/`, where
//! the launcher picks it up with `include_str!`.

fn main() {
    #[cfg(feature = "cuda")]
    cuda::compile_kernels();
}

#[cfg(feature = "cuda")]
mod cuda {
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::{env, fs};

    pub fn compile_kernels() {
        let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
        let kernel_dir = manifest_dir.join("kernels");
        let ptx_dir = PathBuf::from(env::var("OUT_DIR").unwrap()).join("kernels");

        fs::create_dir_all(&ptx_dir).expect("Failed to create PTX output directory");
        println!("cargo:rerun-if-changed={}", kernel_dir.display());

        let cu_files: Vec<PathBuf> = fs::read_dir(&kernel_dir)
            .expect("Failed to read kernels/ directory")
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                path.extension().is_some_and(|ext| ext == "cu").then_some(path)
            })
            .collect();

        assert!(
            !cu_files.is_empty(),
            "No .cu files found in {}",
            kernel_dir.display()
        );

        for cu_path in &cu_files {
            compile_cu(&ptx_dir, cu_path);
        }
    }

    fn compile_cu(ptx_dir: &Path, cu_path: &Path) {
        let stem = cu_path.file_stem().unwrap().to_str().unwrap();
        let ptx_path = ptx_dir.join(format!("{stem}.ptx"));

        println!("cargo:rerun-if-changed={}", cu_path.display());

        // __hadd/__hmul need sm_53 or newer
        let arch = env::var("DISENTANGLE_CUDA_ARCH").unwrap_or_else(|_| "sm_70".to_string());
        let status = Command::new("nvcc")
            .args([
                "--ptx",
                &format!("-arch={arch}"),
                "-o",
                ptx_path.to_str().unwrap(),
                cu_path.to_str().unwrap(),
            ])
            .status()
            .expect("Failed to execute nvcc. Is the CUDA toolkit installed?");

        assert!(
            status.success(),
            "nvcc failed to compile {}",
            cu_path.display()
        );
    }
}
