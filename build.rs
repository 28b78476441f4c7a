use std::process::Command;

// Stamp the build with the commit it came from, so 'heraldd --version' can
// say more than the crate version.  Builds outside a git checkout (release
// tarballs, vendored builds) get a plain "no-git" marker.
fn main() {
    println!("cargo::rerun-if-changed=Cargo.toml");
    println!("cargo::rerun-if-changed=build.rs");

    let describe = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string());

    let version = match describe {
        Some(hash) => {
            println!("cargo::rerun-if-changed=.git/HEAD");
            let dirty = Command::new("git")
                .args(["diff-index", "--quiet", "HEAD"])
                .status()
                .map(|status| !status.success())
                .unwrap_or(false);
            let suffix = if dirty { "-dirty" } else { "" };
            format!("{} at {hash}{suffix}", env!("CARGO_PKG_VERSION"))
        }
        None => format!("{} at no-git", env!("CARGO_PKG_VERSION")),
    };

    println!("cargo::rustc-env=HERALD_BUILD_VERSION={version}");
}
