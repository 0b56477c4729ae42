//! File transfers over the classic scp wire protocol.
//!
//! Every transfer opens one exec channel running the remote `scp` binary in
//! sink (`-t`) or source (`-f`) mode and drives it with control bytes and
//! `C`/`D`/`E`/`T` headers. Once the exchange completes the channel's stdin
//! is closed and the remote exit status is checked, so a remote failure that
//! was not visible mid-stream still surfaces as [`SshError::CommandFailed`].

mod download;
mod local;
pub mod protocol;
mod upload;

use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, SshError};
use crate::transport::ExecChannel;

pub use download::{download_directory, download_file};
pub use upload::{upload_directory, upload_file};

/// How long to wait for the remote `scp` to exit once the exchange is done.
const EXIT_TIMEOUT: Duration = Duration::from_secs(30);

async fn finish(mut channel: ExecChannel, outcome: Result<()>) -> Result<()> {
    let closed = channel.stdin.shutdown().await;
    outcome?;
    closed?;

    match tokio::time::timeout(EXIT_TIMEOUT, channel.wait()).await {
        Ok(Some(0)) => Ok(()),
        Ok(status) => Err(SshError::CommandFailed {
            status,
            stderr: channel.stderr(),
        }),
        Err(_) => Err(SshError::Timeout(EXIT_TIMEOUT.as_secs())),
    }
}

/// Quotes a path for the remote shell. A leading `~/` stays unquoted so the
/// remote shell still expands it.
pub fn quote_remote_path(path: &str) -> String {
    if path == "~" {
        return path.to_string();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("~/{}", shell_quote(rest));
    }
    shell_quote(path)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Splits an upload destination into the remote directory and file name.
///
/// A destination ending in `/` names a directory and the file keeps
/// `fallback_name`, as does an empty destination.
fn split_remote_target(remote: &str, fallback_name: &str) -> (String, String) {
    let remote = remote.replace('\\', "/");
    if remote.is_empty() {
        return (".".to_string(), fallback_name.to_string());
    }
    if remote.ends_with('/') {
        let dir = remote.trim_end_matches('/');
        let dir = if dir.is_empty() { "/" } else { dir };
        return (dir.to_string(), fallback_name.to_string());
    }
    match remote.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (".".to_string(), remote),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnection;
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn write_tree(root: &Path) {
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::write(root.join("a.txt"), b"alpha").unwrap();
        std::fs::write(root.join("empty"), b"").unwrap();
        std::fs::write(root.join("sub/b.bin"), fixture(70_000)).unwrap();
        std::fs::write(root.join("sub/deeper/c.txt"), b"gamma").unwrap();
    }

    fn assert_tree(root: &Path) {
        assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(root.join("empty")).unwrap(), b"");
        assert_eq!(std::fs::read(root.join("sub/b.bin")).unwrap(), fixture(70_000));
        assert_eq!(std::fs::read(root.join("sub/deeper/c.txt")).unwrap(), b"gamma");
    }

    #[test]
    fn test_quote_remote_path() {
        assert_eq!(quote_remote_path("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(quote_remote_path("it's"), "'it'\\''s'");
        assert_eq!(quote_remote_path("~/docs"), "~/'docs'");
        assert_eq!(quote_remote_path("~"), "~");
    }

    #[test]
    fn test_split_remote_target() {
        assert_eq!(
            split_remote_target("/srv/data/file.txt", "x"),
            ("/srv/data".to_string(), "file.txt".to_string())
        );
        assert_eq!(
            split_remote_target("file.txt", "x"),
            (".".to_string(), "file.txt".to_string())
        );
        assert_eq!(
            split_remote_target("/file.txt", "x"),
            ("/".to_string(), "file.txt".to_string())
        );
        assert_eq!(
            split_remote_target("uploads/", "local.txt"),
            ("uploads".to_string(), "local.txt".to_string())
        );
        assert_eq!(
            split_remote_target("", "local.txt"),
            (".".to_string(), "local.txt".to_string())
        );
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::create_dir(remote.path().join("uploads")).unwrap();
        let conn = FakeConnection::with_root(remote.path());

        for len in [0usize, 1, 100_000] {
            let name = format!("file-{}.bin", len);
            let source = local.path().join(&name);
            std::fs::write(&source, fixture(len)).unwrap();

            upload_file(conn.as_ref(), &source, &format!("uploads/{}", name))
                .await
                .unwrap();
            assert_eq!(
                std::fs::read(remote.path().join("uploads").join(&name)).unwrap(),
                fixture(len)
            );

            let back = local.path().join(format!("back-{}", name));
            download_file(conn.as_ref(), &format!("uploads/{}", name), &back)
                .await
                .unwrap();
            assert_eq!(std::fs::read(&back).unwrap(), fixture(len));
        }

        let commands = conn.commands();
        assert_eq!(commands[0], "scp -vt 'uploads'");
        assert_eq!(commands[1], "scp -vf 'uploads/file-0.bin'");
    }

    #[tokio::test]
    async fn test_download_file_into_directory() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(remote.path().join("report.txt"), b"quarterly").unwrap();
        let conn = FakeConnection::with_root(remote.path());

        download_file(conn.as_ref(), "report.txt", local.path())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(local.path().join("report.txt")).unwrap(),
            b"quarterly"
        );
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let conn = FakeConnection::with_root(remote.path());

        let err = download_file(conn.as_ref(), "missing.txt", &local.path().join("m"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "SCP protocol error: scp: missing.txt: No such file or directory"
        );
    }

    #[tokio::test]
    async fn test_upload_rejected_by_remote() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let source = local.path().join("a.txt");
        std::fs::write(&source, b"data").unwrap();
        let conn = FakeConnection::with_root(remote.path());
        conn.reject_scp("scp: /readonly: Permission denied");

        let err = upload_file(conn.as_ref(), &source, "/readonly/a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Protocol(ref m) if m == "scp: /readonly: Permission denied"));
    }

    #[tokio::test]
    async fn test_directory_round_trip() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let source = local.path().join("tree");
        write_tree(&source);
        std::fs::create_dir(remote.path().join("dest")).unwrap();
        let conn = FakeConnection::with_root(remote.path());

        upload_directory(conn.as_ref(), &source, "dest").await.unwrap();
        assert_tree(&remote.path().join("dest/tree"));

        let back = local.path().join("back");
        download_directory(conn.as_ref(), "dest/tree", &back)
            .await
            .unwrap();
        assert_tree(&back);

        let commands = conn.commands();
        assert_eq!(commands[0], "scp -vrt 'dest'");
        assert_eq!(commands[1], "scp -rf 'dest/tree'");
    }

    #[tokio::test]
    async fn test_upload_directory_contents_only() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let source = local.path().join("tree");
        write_tree(&source);
        std::fs::create_dir(remote.path().join("dest")).unwrap();
        let conn = FakeConnection::with_root(remote.path());

        let with_slash = format!("{}/", source.display());
        upload_directory(conn.as_ref(), Path::new(&with_slash), "dest")
            .await
            .unwrap();
        assert_tree(&remote.path().join("dest"));
        assert!(!remote.path().join("dest/tree").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_directory_keeps_symlink_name() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let real = local.path().join("real");
        std::fs::create_dir(&real).unwrap();
        std::fs::write(real.join("f"), b"via link").unwrap();
        let link = local.path().join("mylink");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let conn = FakeConnection::with_root(remote.path());

        upload_directory(conn.as_ref(), &link, ".").await.unwrap();
        assert_eq!(
            std::fs::read(remote.path().join("mylink/f")).unwrap(),
            b"via link"
        );
        assert!(!remote.path().join("real").exists());
    }

    #[tokio::test]
    async fn test_upload_file_rejected_mid_transfer() {
        let local = TempDir::new().unwrap();
        let source = local.path().join("a.txt");
        std::fs::write(&source, b"data").unwrap();

        // 1: after the C header, 2: after the data's trailing zero
        for acks in [1, 2] {
            let remote = TempDir::new().unwrap();
            let conn = FakeConnection::with_root(remote.path());
            conn.reject_after(acks, "scp: a.txt: No space left on device");

            let err = upload_file(conn.as_ref(), &source, "a.txt")
                .await
                .unwrap_err();
            assert!(
                matches!(err, SshError::Protocol(ref m) if m == "scp: a.txt: No space left on device"),
                "ack {acks}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_upload_directory_rejected_mid_transfer() {
        let local = TempDir::new().unwrap();
        let source = local.path().join("tree");
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("sub/f"), b"f").unwrap();

        // Acks: ready, D tree, D sub, C f, data, E sub, E tree
        for acks in [2, 3, 4, 5, 6] {
            let remote = TempDir::new().unwrap();
            let conn = FakeConnection::with_root(remote.path());
            conn.reject_after(acks, "scp: tree: Permission denied");

            let err = upload_directory(conn.as_ref(), &source, ".")
                .await
                .unwrap_err();
            assert!(
                matches!(err, SshError::Protocol(ref m) if m == "scp: tree: Permission denied"),
                "ack {acks}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_upload_directory_requires_directory() {
        let local = TempDir::new().unwrap();
        let file = local.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        let conn = FakeConnection::new();

        let err = upload_directory(conn.as_ref(), &file, "dest").await.unwrap_err();
        assert!(matches!(err, SshError::Io(_)));
        assert!(conn.commands().is_empty());
    }

    #[tokio::test]
    async fn test_download_directory_missing_remote() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let conn = FakeConnection::with_root(remote.path());

        let err = download_directory(conn.as_ref(), "nope", &local.path().join("out"))
            .await
            .unwrap_err();
        match err {
            SshError::CommandFailed { status, stderr } => {
                assert_eq!(status, Some(1));
                assert!(stderr.contains("No such file or directory"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_directory_onto_file() {
        let local = TempDir::new().unwrap();
        let file = local.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        let conn = FakeConnection::new();

        let err = download_directory(conn.as_ref(), "tree", &file)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Io(_)));
    }
}
