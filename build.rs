use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    enforce_estimator_boundary();
}

fn enforce_estimator_boundary() {
    // Keep the estimator core free of terminal output and file-format glue.
    let forbidden = [
        "clap::",
        "csv::",
        "comfy_table",
        "env_logger",
        "println!",
        "eprintln!",
    ];
    // Glue layers allowed to use the forbidden tokens.
    let exempt = ["main.rs", "io.rs"];

    let mut violations = Vec::new();
    let src_root = PathBuf::from("src");
    let mut stack = vec![src_root];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let is_exempt = path.parent() == Some(PathBuf::from("src").as_path())
                && path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .is_some_and(|name| exempt.contains(&name));
            if is_exempt {
                continue;
            }
            let rel = path.to_string_lossy().to_string();
            let src = match fs::read_to_string(&path) {
                Ok(s) => s,
                Err(_) => continue,
            };
            for (line_no, line) in src.lines().enumerate() {
                for token in &forbidden {
                    if line.contains(token) {
                        violations.push(format!(
                            "{}:{} contains forbidden token '{}'",
                            rel,
                            line_no + 1,
                            token
                        ));
                    }
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nerror: boundary violations detected in shadow-ipw estimator modules:");
        for v in violations {
            eprintln!("  - {v}");
        }
        panic!("CLI or CSV code leaked into estimator modules");
    }
}
