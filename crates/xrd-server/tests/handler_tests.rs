//! Handler-level tests: every opcode against a temporary root directory,
//! with streamed replies materialized into in-memory buffers.

use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use xrd_proto::frame::ResponseFrame;
use xrd_proto::messages::{EmbeddedReadRequest, Op, Response};
use xrd_proto::protocol::{stat_flags, ErrorCode, OpenFlags, StatusCode};
use xrd_server::handler::{DataServerHandler, Reply};
use xrd_server::{stream, DataServerConfig};

fn test_handler(dir: &TempDir) -> DataServerHandler {
    let config = DataServerConfig {
        root_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    DataServerHandler::new(Arc::new(config), "127.0.0.1:1094".parse().unwrap(), 1)
}

fn open_op(path: &str, options: u16) -> Op {
    Op::Open {
        path: path.to_string(),
        mode: 0,
        options: OpenFlags(options),
    }
}

async fn open_fd(handler: &mut DataServerHandler, path: &str, options: u16) -> u32 {
    match handler.handle(&open_op(path, options)).await.unwrap() {
        Reply::Complete(Response::Open { fd, .. }) => fd,
        other => panic!("expected open response, got {other:?}"),
    }
}

fn expect_ok(reply: Reply) {
    match reply {
        Reply::Complete(Response::Ok) => {}
        other => panic!("expected ok, got {other:?}"),
    }
}

fn collect_frames(mut out: &[u8]) -> Vec<ResponseFrame> {
    let mut frames = Vec::new();
    while !out.is_empty() {
        frames.push(ResponseFrame::decode(&mut out).unwrap());
    }
    frames
}

/// Materialize a streamed read reply the way the transport would.
async fn materialize_read(handler: &mut DataServerHandler, reply: Reply, max_frame: usize) -> Vec<u8> {
    let mut out = Vec::new();
    match reply {
        Reply::Read { fd, offset, len } => {
            let entry = handler.files.get_mut(fd).unwrap();
            stream::send_read(&mut out, 1, &mut entry.file, offset, len, max_frame)
                .await
                .unwrap();
        }
        Reply::ReadV { requests } => {
            stream::send_readv(&mut out, 1, &mut handler.files, &requests, max_frame)
                .await
                .unwrap();
        }
        other => panic!("expected streamed reply, got {other:?}"),
    }
    out
}

#[tokio::test]
async fn mkdir_then_stat_reports_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);

    expect_ok(
        handler
            .handle(&Op::Mkdir {
                path: "/a".into(),
                mkpath: false,
                mode: 0,
            })
            .await
            .unwrap(),
    );

    match handler.handle(&Op::Stat { path: "/a".into() }).await.unwrap() {
        Reply::Complete(Response::Stat(status)) => {
            assert_ne!(status.flags & stat_flags::IS_DIR, 0);
            assert_eq!(status.id, 0);
        }
        other => panic!("expected stat response, got {other:?}"),
    }
}

#[tokio::test]
async fn write_sync_close_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);

    let fd = open_fd(
        &mut handler,
        "/x",
        OpenFlags::OPEN_UPDT | OpenFlags::NEW | OpenFlags::MKPATH,
    )
    .await;
    assert_eq!(fd, 0);

    expect_ok(
        handler
            .handle(&Op::Write {
                fd,
                offset: 0,
                data: Bytes::from_static(b"hello"),
            })
            .await
            .unwrap(),
    );
    expect_ok(handler.handle(&Op::Sync { fd }).await.unwrap());
    expect_ok(handler.handle(&Op::Close { fd }).await.unwrap());

    let fd = open_fd(&mut handler, "/x", OpenFlags::OPEN_READ).await;
    assert_eq!(fd, 0, "descriptor is reusable after close");

    let reply = handler
        .handle(&Op::Read { fd, offset: 0, len: 5 })
        .await
        .unwrap();
    let out = materialize_read(&mut handler, reply, 2 << 20).await;
    let frames = collect_frames(&out);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].status, StatusCode::Ok as u16);
    assert_eq!(&frames[0].body[..], b"hello");
}

#[tokio::test]
async fn rm_of_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);
    let err = handler
        .handle(&Op::Rm {
            path: "/missing".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn rm_of_directory_is_not_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("d")).unwrap();
    let mut handler = test_handler(&dir);
    let err = handler.handle(&Op::Rm { path: "/d".into() }).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFile);
}

#[tokio::test]
async fn mv_into_missing_parent_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"data").unwrap();
    let mut handler = test_handler(&dir);

    let err = handler
        .handle(&Op::Mv {
            source: "/a".into(),
            target: "/missing-parent/b".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::IoError);
}

#[tokio::test]
async fn mv_renames_within_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"data").unwrap();
    let mut handler = test_handler(&dir);

    expect_ok(
        handler
            .handle(&Op::Mv {
                source: "/a".into(),
                target: "/b".into(),
            })
            .await
            .unwrap(),
    );
    assert!(!dir.path().join("a").exists());
    assert_eq!(std::fs::read(dir.path().join("b")).unwrap(), b"data");
}

#[tokio::test]
async fn mv_with_empty_argument_is_arg_missing() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);
    for (source, target) in [("", "/b"), ("/a", "")] {
        let err = handler
            .handle(&Op::Mv {
                source: source.into(),
                target: target.into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ArgMissing);
    }
}

#[tokio::test]
async fn readv_concatenates_elements_with_headers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("v"), b"ABCDEFGH").unwrap();
    let mut handler = test_handler(&dir);
    let fd = open_fd(&mut handler, "/v", OpenFlags::OPEN_READ).await;

    let requests = vec![
        EmbeddedReadRequest { fd, len: 4, offset: 0 },
        EmbeddedReadRequest { fd, len: 4, offset: 4 },
    ];
    let reply = handler
        .handle(&Op::ReadV {
            requests: requests.clone(),
        })
        .await
        .unwrap();
    let out = materialize_read(&mut handler, reply, 2 << 20).await;

    let frames = collect_frames(&out);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].status, StatusCode::Ok as u16);

    let mut expected = bytes::BytesMut::new();
    requests[0].encode_header(&mut expected);
    expected.extend_from_slice(b"ABCD");
    requests[1].encode_header(&mut expected);
    expected.extend_from_slice(b"EFGH");
    assert_eq!(&frames[0].body[..], &expected[..]);
}

#[tokio::test]
async fn readv_frames_split_inside_elements() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("v"), &[9u8; 64]).unwrap();
    let mut handler = test_handler(&dir);
    let fd = open_fd(&mut handler, "/v", OpenFlags::OPEN_READ).await;

    let requests = vec![
        EmbeddedReadRequest { fd, len: 30, offset: 0 },
        EmbeddedReadRequest { fd, len: 30, offset: 30 },
    ];
    let reply = handler.handle(&Op::ReadV { requests }).await.unwrap();
    // total payload = 2 * (16 + 30) = 92 bytes over 40-byte frames
    let out = materialize_read(&mut handler, reply, 40).await;

    let frames = collect_frames(&out);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].status, StatusCode::OkSoFar as u16);
    assert_eq!(frames[0].body.len(), 40);
    assert_eq!(frames[1].status, StatusCode::OkSoFar as u16);
    assert_eq!(frames[1].body.len(), 40);
    assert_eq!(frames[2].status, StatusCode::Ok as u16);
    assert_eq!(frames[2].body.len(), 12);
}

#[tokio::test]
async fn readv_with_empty_vector_is_arg_missing() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);
    let err = handler
        .handle(&Op::ReadV { requests: vec![] })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ArgMissing);
}

#[tokio::test]
async fn readv_with_unknown_descriptor_fails_whole_request() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("v"), b"ABCDEFGH").unwrap();
    let mut handler = test_handler(&dir);
    let fd = open_fd(&mut handler, "/v", OpenFlags::OPEN_READ).await;

    let err = handler
        .handle(&Op::ReadV {
            requests: vec![
                EmbeddedReadRequest { fd, len: 4, offset: 0 },
                EmbeddedReadRequest {
                    fd: fd + 7,
                    len: 4,
                    offset: 4,
                },
            ],
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::FileNotOpen);
}

#[tokio::test]
async fn statx_reports_per_path_flags() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("d")).unwrap();
    std::fs::write(dir.path().join("f"), b"x").unwrap();
    let mut handler = test_handler(&dir);

    match handler
        .handle(&Op::Statx {
            paths: vec!["/d".into(), "/f".into(), "/missing".into()],
        })
        .await
        .unwrap()
    {
        Reply::Complete(Response::Statx { flags }) => {
            assert_eq!(flags.len(), 3);
            assert_ne!(flags[0] as u32 & stat_flags::IS_DIR, 0);
            assert_eq!(flags[1] as u32 & stat_flags::IS_DIR, 0);
            assert_eq!(flags[2] as u32, stat_flags::OTHER);
        }
        other => panic!("expected statx response, got {other:?}"),
    }
}

#[tokio::test]
async fn statx_with_no_paths_is_arg_missing() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);
    let err = handler
        .handle(&Op::Statx { paths: vec![] })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ArgMissing);
}

#[tokio::test]
async fn open_of_directory_is_is_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("d")).unwrap();
    let mut handler = test_handler(&dir);
    let err = handler
        .handle(&open_op("/d", OpenFlags::OPEN_READ))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::IsDirectory);
}

#[tokio::test]
async fn open_new_of_existing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x"), b"data").unwrap();
    let mut handler = test_handler(&dir);
    let err = handler
        .handle(&open_op("/x", OpenFlags::OPEN_UPDT | OpenFlags::NEW))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::IoError);
}

#[tokio::test]
async fn open_delete_truncates() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x"), b"old content").unwrap();
    let mut handler = test_handler(&dir);

    let fd = open_fd(&mut handler, "/x", OpenFlags::OPEN_UPDT | OpenFlags::DELETE).await;
    expect_ok(handler.handle(&Op::Close { fd }).await.unwrap());
    assert_eq!(std::fs::metadata(dir.path().join("x")).unwrap().len(), 0);
}

#[tokio::test]
async fn open_retstat_includes_status() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x"), b"12345").unwrap();
    let mut handler = test_handler(&dir);

    match handler
        .handle(&open_op("/x", OpenFlags::OPEN_READ | OpenFlags::RETSTAT))
        .await
        .unwrap()
    {
        Reply::Complete(Response::Open {
            status: Some(status),
            ..
        }) => {
            assert_eq!(status.size, 5);
            assert_ne!(status.flags & stat_flags::READABLE, 0);
        }
        other => panic!("expected open response with status, got {other:?}"),
    }
}

#[tokio::test]
async fn escaping_path_is_arg_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);
    let err = handler
        .handle(&Op::Stat {
            path: "/../etc/passwd".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ArgInvalid);
}

#[tokio::test]
async fn read_and_write_on_stale_descriptor_fail() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);

    let fd = open_fd(&mut handler, "/x", OpenFlags::OPEN_UPDT | OpenFlags::NEW).await;
    expect_ok(handler.handle(&Op::Close { fd }).await.unwrap());

    let err = handler
        .handle(&Op::Read { fd, offset: 0, len: 1 })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::FileNotOpen);

    let err = handler
        .handle(&Op::Write {
            fd,
            offset: 0,
            data: Bytes::from_static(b"x"),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::FileNotOpen);

    let err = handler.handle(&Op::Sync { fd }).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::FileNotOpen);

    let err = handler.handle(&Op::Close { fd }).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::FileNotOpen);
}

#[tokio::test]
async fn open_close_balance_is_tracked() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);

    let mut fds = Vec::new();
    for i in 0..4 {
        fds.push(
            open_fd(
                &mut handler,
                &format!("/f{i}"),
                OpenFlags::OPEN_UPDT | OpenFlags::NEW,
            )
            .await,
        );
    }
    assert_eq!(handler.files.open_count(), 4);
    for fd in &fds {
        assert!((*fd as usize) < handler.files.capacity());
    }

    for fd in fds {
        expect_ok(handler.handle(&Op::Close { fd }).await.unwrap());
    }
    assert_eq!(handler.files.open_count(), 0);
}

#[tokio::test]
async fn dirlist_returns_sorted_names() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("d")).unwrap();
    for name in ["zeta", "alpha", "mid"] {
        std::fs::write(dir.path().join("d").join(name), b"").unwrap();
    }
    let mut handler = test_handler(&dir);

    match handler
        .handle(&Op::Dirlist { path: "/d".into() })
        .await
        .unwrap()
    {
        Reply::Complete(Response::Dirlist { names }) => {
            assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        }
        other => panic!("expected dirlist response, got {other:?}"),
    }

    let err = handler
        .handle(&Op::Dirlist {
            path: "/missing".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = handler
        .handle(&Op::Dirlist { path: "".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ArgMissing);
}

#[tokio::test]
async fn locate_reports_access_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x"), b"data").unwrap();
    let mut handler = test_handler(&dir);

    match handler
        .handle(&Op::Locate {
            path: "*/x".into(),
            flags: 0,
        })
        .await
        .unwrap()
    {
        Reply::Complete(Response::Locate(Some(info))) => {
            assert!(info.writable);
        }
        other => panic!("expected locate info, got {other:?}"),
    }

    match handler
        .handle(&Op::Locate {
            path: "/missing".into(),
            flags: 0,
        })
        .await
        .unwrap()
    {
        Reply::Complete(Response::Locate(None)) => {}
        other => panic!("expected empty locate, got {other:?}"),
    }
}

#[tokio::test]
async fn prepare_and_ping_are_noops() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);
    expect_ok(handler.handle(&Op::Prepare).await.unwrap());
    expect_ok(handler.handle(&Op::Ping).await.unwrap());
}

#[tokio::test]
async fn unsupported_opcode_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut handler = test_handler(&dir);
    let err = handler
        .handle(&Op::Unsupported { code: 3005 })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unsupported);
}
