//! End-to-end coverage of the virtual filesystem over embedded sqlite:
//! write modes, directory synthesis, delete/rename semantics, quotas and
//! tenant isolation.

mod common;

use common::{auth_a, auth_b, Harness};
use fileio::files::error::ErrorCode;
use fileio::files::types::{EntryType, WriteMode};

const PROJECT: &str = "blog";

#[tokio::test]
async fn write_read_overwrite_truncate() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    let written = service
        .write(&auth, PROJECT, "/a.txt", b"hello", "utf-8", 0, WriteMode::Append)
        .await
        .unwrap();
    assert_eq!(written.bytes_written, 5);
    let read = service.read(&auth, PROJECT, "/a.txt", 0, -1).await.unwrap();
    assert_eq!(read.content, b"hello");
    assert_eq!(read.content_encoding, "utf-8");

    let written = service
        .write(&auth, PROJECT, "/a.txt", b"yo", "utf-8", 0, WriteMode::Overwrite)
        .await
        .unwrap();
    assert_eq!(written.bytes_written, 2);
    let read = service.read(&auth, PROJECT, "/a.txt", 0, -1).await.unwrap();
    assert_eq!(read.content, b"yollo");

    let written = service
        .write(&auth, PROJECT, "/a.txt", b"new", "utf-8", 0, WriteMode::Truncate)
        .await
        .unwrap();
    assert_eq!(written.bytes_written, 3);
    let read = service.read(&auth, PROJECT, "/a.txt", 0, -1).await.unwrap();
    assert_eq!(read.content, b"new");
}

#[tokio::test]
async fn append_grows_and_ranged_reads_slice() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    service
        .write(&auth, PROJECT, "/log.txt", b"one", "", 0, WriteMode::Append)
        .await
        .unwrap();
    service
        .write(&auth, PROJECT, "/log.txt", b"two", "", 0, WriteMode::Append)
        .await
        .unwrap();

    let read = service.read(&auth, PROJECT, "/log.txt", 0, -1).await.unwrap();
    assert_eq!(read.content, b"onetwo");
    let read = service.read(&auth, PROJECT, "/log.txt", 3, 3).await.unwrap();
    assert_eq!(read.content, b"two");
    // offset past the end reads empty, not an error
    let read = service.read(&auth, PROJECT, "/log.txt", 60, -1).await.unwrap();
    assert!(read.content.is_empty());
}

#[tokio::test]
async fn overwrite_past_end_is_invalid_offset() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    service
        .write(&auth, PROJECT, "/a.txt", b"abc", "", 0, WriteMode::Append)
        .await
        .unwrap();
    let err = service
        .write(&auth, PROJECT, "/a.txt", b"zz", "", 4, WriteMode::Overwrite)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidOffset);

    let err = service
        .write(&auth, PROJECT, "/a.txt", b"zz", "", 1, WriteMode::Truncate)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidOffset);

    // overwrite inside the file extends it when needed
    service
        .write(&auth, PROJECT, "/a.txt", b"xyz!", "", 2, WriteMode::Overwrite)
        .await
        .unwrap();
    let read = service.read(&auth, PROJECT, "/a.txt", 0, -1).await.unwrap();
    assert_eq!(read.content, b"abxyz!");
}

#[tokio::test]
async fn path_and_encoding_validation() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    for bad in ["relative.txt", "/a//b", "/a/../b", "/trailing/", "/sp ace"] {
        let err = service
            .write(&auth, PROJECT, bad, b"x", "", 0, WriteMode::Append)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPath, "path {bad}");
    }
    let err = service
        .write(&auth, PROJECT, "/a.txt", b"x", "latin-1", 0, WriteMode::Append)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidQuery);
    let err = service
        .write(&auth, PROJECT, "", b"x", "", 0, WriteMode::Append)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IsDirectory);
}

#[tokio::test]
async fn payload_and_quota_limits() {
    let harness = Harness::with_config(|config| {
        config.max_payload_bytes = 8;
        config.max_project_bytes = 4;
    })
    .await;
    let service = harness.service(None, None);
    let auth = auth_a();

    let err = service
        .write(&auth, PROJECT, "/big.txt", b"way too large", "", 0, WriteMode::Append)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PayloadTooLarge);

    let err = service
        .write(&auth, PROJECT, "/a.txt", b"hello", "", 0, WriteMode::Append)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::QuotaExceeded);

    // within quota still works
    service
        .write(&auth, PROJECT, "/a.txt", b"hi", "", 0, WriteMode::Append)
        .await
        .unwrap();
}

#[tokio::test]
async fn directory_checks_on_write() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    service
        .write(&auth, PROJECT, "/dir/file.txt", b"data", "", 0, WriteMode::Append)
        .await
        .unwrap();

    // the synthesized directory cannot be written as a file
    let err = service
        .write(&auth, PROJECT, "/dir", b"x", "", 0, WriteMode::Append)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IsDirectory);

    // and a file cannot become a directory
    let err = service
        .write(&auth, PROJECT, "/dir/file.txt/child", b"x", "", 0, WriteMode::Append)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotDirectory);
}

#[tokio::test]
async fn stat_synthesizes_directories() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    // the root exists even in an empty project
    let stat = service.stat(&auth, PROJECT, "").await.unwrap();
    assert!(stat.exists);
    assert_eq!(stat.entry_type, Some(EntryType::Directory));
    assert_eq!(stat.updated_at, 0);

    service
        .write(&auth, PROJECT, "/dir/sub/file.txt", b"data", "", 0, WriteMode::Append)
        .await
        .unwrap();

    let file = service.stat(&auth, PROJECT, "/dir/sub/file.txt").await.unwrap();
    assert_eq!(file.entry_type, Some(EntryType::File));
    assert_eq!(file.size, 4);
    assert!(file.updated_at > 0);

    let dir = service.stat(&auth, PROJECT, "/dir").await.unwrap();
    assert!(dir.exists);
    assert_eq!(dir.entry_type, Some(EntryType::Directory));
    assert_eq!(dir.size, 0);
    assert_eq!(dir.updated_at, file.updated_at);

    let missing = service.stat(&auth, PROJECT, "/nope").await.unwrap();
    assert!(!missing.exists);
}

#[tokio::test]
async fn delete_requires_recursive_for_directories() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    service
        .write(&auth, PROJECT, "/dir/file.txt", b"data", "", 0, WriteMode::Append)
        .await
        .unwrap();

    let err = service.delete(&auth, PROJECT, "/dir", false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotEmpty);

    let deleted = service.delete(&auth, PROJECT, "/dir", true).await.unwrap();
    assert_eq!(deleted.deleted_count, 1);
    let stat = service.stat(&auth, PROJECT, "/dir/file.txt").await.unwrap();
    assert!(!stat.exists);

    let err = service.delete(&auth, PROJECT, "/dir", true).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = service.delete(&auth, PROJECT, "", true).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn deleted_paths_are_reusable() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    service
        .write(&auth, PROJECT, "/a.txt", b"first", "", 0, WriteMode::Append)
        .await
        .unwrap();
    service.delete(&auth, PROJECT, "/a.txt", false).await.unwrap();
    let err = service.read(&auth, PROJECT, "/a.txt", 0, -1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    // a fresh write revives the path with fresh content
    service
        .write(&auth, PROJECT, "/a.txt", b"second", "", 0, WriteMode::Append)
        .await
        .unwrap();
    let read = service.read(&auth, PROJECT, "/a.txt", 0, -1).await.unwrap();
    assert_eq!(read.content, b"second");
}

#[tokio::test]
async fn rename_file_and_overwrite_semantics() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    service
        .write(&auth, PROJECT, "/a.txt", b"alpha", "", 0, WriteMode::Append)
        .await
        .unwrap();
    service
        .write(&auth, PROJECT, "/b.txt", b"beta", "", 0, WriteMode::Append)
        .await
        .unwrap();

    // same source and destination is a no-op
    let moved = service.rename(&auth, PROJECT, "/a.txt", "/a.txt", false).await.unwrap();
    assert_eq!(moved.moved_count, 0);

    let err = service
        .rename(&auth, PROJECT, "/a.txt", "/b.txt", false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    let moved = service.rename(&auth, PROJECT, "/a.txt", "/b.txt", true).await.unwrap();
    assert_eq!(moved.moved_count, 1);
    let read = service.read(&auth, PROJECT, "/b.txt", 0, -1).await.unwrap();
    assert_eq!(read.content, b"alpha");
    let stat = service.stat(&auth, PROJECT, "/a.txt").await.unwrap();
    assert!(!stat.exists);
}

#[tokio::test]
async fn rename_directory_rewrites_the_subtree() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    service
        .write(&auth, PROJECT, "/dir/a.txt", b"a", "", 0, WriteMode::Append)
        .await
        .unwrap();
    service
        .write(&auth, PROJECT, "/dir/sub/b.txt", b"b", "", 0, WriteMode::Append)
        .await
        .unwrap();

    // cannot move a directory under itself
    let err = service
        .rename(&auth, PROJECT, "/dir", "/dir/inside", false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPath);

    let moved = service.rename(&auth, PROJECT, "/dir", "/moved", false).await.unwrap();
    assert_eq!(moved.moved_count, 2);
    assert_eq!(
        service.read(&auth, PROJECT, "/moved/a.txt", 0, -1).await.unwrap().content,
        b"a"
    );
    assert_eq!(
        service
            .read(&auth, PROJECT, "/moved/sub/b.txt", 0, -1)
            .await
            .unwrap()
            .content,
        b"b"
    );
    assert!(!service.stat(&auth, PROJECT, "/dir").await.unwrap().exists);

    // directory renames never overwrite an occupied destination
    service
        .write(&auth, PROJECT, "/dir2/c.txt", b"c", "", 0, WriteMode::Append)
        .await
        .unwrap();
    let err = service
        .rename(&auth, PROJECT, "/dir2", "/moved", false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    let err = service.rename(&auth, PROJECT, "/ghost", "/x", false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn list_builds_directory_entries_per_depth() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    for (path, content) in [
        ("/a.txt", "a"),
        ("/dir/b.txt", "b"),
        ("/dir/sub/c.txt", "c"),
    ] {
        service
            .write(&auth, PROJECT, path, content.as_bytes(), "", 0, WriteMode::Append)
            .await
            .unwrap();
    }

    let page = service.list(&auth, PROJECT, "", 1, 0).await.unwrap();
    let paths: Vec<&str> = page.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/a.txt", "/dir"]);
    assert_eq!(page.entries[1].entry_type, EntryType::Directory);
    assert!(!page.has_more);

    let page = service.list(&auth, PROJECT, "", 3, 0).await.unwrap();
    let paths: Vec<&str> = page.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["/a.txt", "/dir", "/dir/b.txt", "/dir/sub", "/dir/sub/c.txt"]
    );

    let page = service.list(&auth, PROJECT, "/dir", 1, 0).await.unwrap();
    let paths: Vec<&str> = page.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/dir/b.txt", "/dir/sub"]);

    // depth 0 returns the entry itself
    let page = service.list(&auth, PROJECT, "/dir", 0, 0).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].entry_type, EntryType::Directory);

    // truncation sets has_more
    let page = service.list(&auth, PROJECT, "", 3, 2).await.unwrap();
    assert_eq!(page.entries.len(), 2);
    assert!(page.has_more);

    let err = service.list(&auth, PROJECT, "", -1, 0).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidOffset);
    let err = service.list(&auth, PROJECT, "/ghost", 1, 0).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn tenants_never_see_each_other() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);

    service
        .write(&auth_a(), PROJECT, "/a.txt", b"alpha", "", 0, WriteMode::Append)
        .await
        .unwrap();

    let err = service.read(&auth_b(), PROJECT, "/a.txt", 0, -1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert!(!service.stat(&auth_b(), PROJECT, "/a.txt").await.unwrap().exists);
    let err = service.list(&auth_b(), PROJECT, "/a.txt", 0, 0).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn reads_of_directories_and_missing_paths() {
    let harness = Harness::new().await;
    let service = harness.service(None, None);
    let auth = auth_a();

    service
        .write(&auth, PROJECT, "/dir/file.txt", b"data", "", 0, WriteMode::Append)
        .await
        .unwrap();

    let err = service.read(&auth, PROJECT, "/dir", 0, -1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::IsDirectory);
    let err = service.read(&auth, PROJECT, "", 0, -1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::IsDirectory);
    let err = service.read(&auth, PROJECT, "/ghost", 0, -1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    let err = service.read(&auth, PROJECT, "/dir/file.txt", -1, -1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidOffset);
}
