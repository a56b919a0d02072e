#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use git_relay::pack::InboundStream;
use git_relay::PackRelay;

/// A relay whose backend is `sh -c <script>`; the script sees the pack
/// subcommand as `$1`, the flags next and the repository last.
pub fn stub_relay(script: &str) -> PackRelay {
    stub_relay_with_chunk_size(script, 8192)
}

pub fn stub_relay_with_chunk_size(script: &str, chunk_size: usize) -> PackRelay {
    PackRelay::new("sh", chunk_size).with_args(["-c", script, "git-stub"])
}

pub fn inbound(chunks: &[&'static str]) -> InboundStream {
    let chunks: Vec<std::io::Result<Bytes>> = chunks
        .iter()
        .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
        .collect();
    stream::iter(chunks).boxed()
}

/// A repository root holding an empty `foo.git` directory.
pub fn repo_root() -> (tempfile::TempDir, PathBuf) {
    let root = tempfile::tempdir().unwrap();
    let repo = root.path().join("foo.git");
    std::fs::create_dir(&repo).unwrap();
    (root, repo)
}

/// Script fragment that records the backend pid and then blocks.
pub fn pid_and_block(pid_file: &Path) -> String {
    format!("echo $$ > '{}'; exec sleep 30", pid_file.display())
}

pub async fn wait_for_pid(pid_file: &Path) -> u32 {
    for _ in 0..200 {
        if let Ok(content) = std::fs::read_to_string(pid_file) {
            if let Ok(pid) = content.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("backend never wrote {}", pid_file.display());
}

/// Waits for `pid` to be killed and reaped.
pub async fn assert_process_gone(pid: u32) {
    let proc_dir = PathBuf::from(format!("/proc/{pid}"));
    for _ in 0..200 {
        if !proc_dir.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("backend process {pid} is still alive");
}
