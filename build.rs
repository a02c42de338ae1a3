use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn main() {
    // "<short hash>[-dirty]", reported in the startup banner
    let build_version = git(&["describe", "--always", "--dirty"]).unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BUILD_VERSION={}", build_version);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
