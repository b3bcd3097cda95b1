use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|text| text.trim().to_owned())
}

fn main() {
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/index");

    // 7 hex digits, the commit field of the startup frame is 28 bits wide.
    let commit_id = git(&["rev-parse", "--short=7", "HEAD"]).unwrap_or_else(|| "0".to_owned());
    let commit_index = git(&["rev-list", "--count", "HEAD"]).unwrap_or_else(|| "0".to_owned());
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .is_some_and(|status| !status.is_empty());

    println!("cargo:rustc-env=PSUMON_COMMIT_ID={commit_id}");
    println!("cargo:rustc-env=PSUMON_COMMIT_INDEX={commit_index}");
    println!("cargo:rustc-env=PSUMON_DIRTY={}", u8::from(dirty));
}
