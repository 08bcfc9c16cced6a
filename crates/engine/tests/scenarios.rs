//! End-to-end scenarios driving the control socket through its public
//! surface: overwrite decisions, the rename loop, and cross-socket lock
//! hand-off.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use xfer_core::{
    EngineOptions, Event, Message, Notification, OverwriteAction, RemotePath, ReplyCode,
    ServerInfo, Severity,
};
use xfer_engine::{
    ControlSocket, EngineContext, LockReason, OpContext, OpKind, Operation, TransferData,
};

fn server() -> ServerInfo {
    ServerInfo::new("ftp.example.com", 21).with_user("alice")
}

fn remote_dir() -> RemotePath {
    RemotePath::parse("/pub").unwrap()
}

fn at(seconds_after_epoch: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(seconds_after_epoch)
}

/// 2024-01-01T00:00:00Z and 2024-01-02T00:00:00Z.
const JAN_1_2024: u64 = 1_704_067_200;
const JAN_2_2024: u64 = JAN_1_2024 + 86_400;

/// A transfer operation that runs the overwrite check on its first step and
/// then parks, mirroring its state for inspection.
struct TestTransferOp {
    data: TransferData,
    sends: Arc<AtomicUsize>,
    mirror: Arc<Mutex<Option<TransferData>>>,
    checked: bool,
}

impl TestTransferOp {
    fn new(
        data: TransferData,
        sends: &Arc<AtomicUsize>,
        mirror: &Arc<Mutex<Option<TransferData>>>,
    ) -> Box<Self> {
        Box::new(Self {
            data,
            sends: Arc::clone(sends),
            mirror: Arc::clone(mirror),
            checked: false,
        })
    }
}

impl Operation for TestTransferOp {
    fn kind(&self) -> OpKind {
        OpKind::Transfer
    }

    fn send(&mut self, cx: &mut OpContext<'_>) -> ReplyCode {
        self.sends.fetch_add(1, Ordering::Relaxed);
        *self.mirror.lock().unwrap() = Some(self.data.clone());
        if !self.checked {
            self.checked = true;
            match cx.check_overwrite_file(&mut self.data) {
                ReplyCode::OK => {}
                other => return other,
            }
        }
        *self.mirror.lock().unwrap() = Some(self.data.clone());
        ReplyCode::WOULDBLOCK
    }

    fn transfer_data(&self) -> Option<&TransferData> {
        Some(&self.data)
    }

    fn transfer_data_mut(&mut self) -> Option<&mut TransferData> {
        Some(&mut self.data)
    }
}

struct Harness {
    engine: Arc<EngineContext>,
    socket: ControlSocket,
    sends: Arc<AtomicUsize>,
    mirror: Arc<Mutex<Option<TransferData>>>,
}

fn harness() -> Harness {
    let engine = EngineContext::new(EngineOptions::default());
    let mut socket = ControlSocket::new(Arc::clone(&engine));
    socket.set_current_server(server());
    Harness {
        engine,
        socket,
        sends: Arc::new(AtomicUsize::new(0)),
        mirror: Arc::new(Mutex::new(None)),
    }
}

impl Harness {
    fn push_transfer(&mut self, data: TransferData) {
        self.socket
            .push_op(TestTransferOp::new(data, &self.sends, &self.mirror));
    }

    fn drain_async_requests(&self) -> Vec<xfer_core::FileExistsNotification> {
        self.engine
            .notifications()
            .drain()
            .into_iter()
            .filter_map(|n| match n {
                Notification::AsyncRequest(request) => Some(request.payload),
                _ => None,
            })
            .collect()
    }

    fn logged(&self) -> Vec<Message> {
        self.engine
            .notifications()
            .drain()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Log(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

fn local_file_with_mtime(dir: &tempfile::TempDir, name: &str, mtime: u64) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, b"existing content").unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime as i64, 0)).unwrap();
    path
}

#[test]
fn s1_overwrite_newer_skips_older_remote_download() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    let local = local_file_with_mtime(&dir, "file.bin", JAN_2_2024);
    let mut data = TransferData::new(true, &local, "file.bin", remote_dir());
    data.local_size = Some(16);
    data.remote_size = Some(4096);
    data.file_time = Some(at(JAN_1_2024));
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    let requests = h.drain_async_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].remote_time, Some(at(JAN_1_2024)));
    assert!(requests[0].local_time.is_some());
    assert!(requests[0].can_resume);

    assert!(h
        .socket
        .set_file_exists_action(OverwriteAction::OverwriteNewer));

    // The local side is newer: the download is skipped and the operation
    // resets with OK.
    assert_eq!(h.socket.operation_depth(), 0);
    let messages = h.logged();
    assert!(messages.iter().any(|m| {
        m.severity == Severity::Status && m.text == "Skipping download of /pub/file.bin"
    }));
    assert!(messages
        .iter()
        .any(|m| m.text == "File transfer skipped"));
    // Only the initial check ran; nothing was sent.
    assert_eq!(h.sends.load(Ordering::Relaxed), 1);
}

#[test]
fn s2_resume_sets_flag_and_proceeds_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    let local = local_file_with_mtime(&dir, "big.bin", JAN_1_2024);
    let mut data = TransferData::new(true, &local, "big.bin", remote_dir());
    data.local_size = Some(1024);
    data.remote_size = Some(4096);
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    assert_eq!(h.sends.load(Ordering::Relaxed), 1);
    assert_eq!(h.drain_async_requests().len(), 1);

    assert!(h.socket.set_file_exists_action(OverwriteAction::Resume));

    // send_next_command was invoked exactly once by the reply.
    assert_eq!(h.sends.load(Ordering::Relaxed), 2);
    let mirrored = h.mirror.lock().unwrap().clone().unwrap();
    assert!(mirrored.resume);
    assert_eq!(h.socket.operation_depth(), 1);
}

#[test]
fn s3_rename_onto_cached_entry_asks_again() {
    let mut h = harness();
    h.engine.cache().store_listing(
        &server(),
        &remote_dir(),
        vec![
            xfer_core::CacheEntry::file("orig.bin", Some(5), Some(at(JAN_1_2024))),
            xfer_core::CacheEntry::file("taken.bin", Some(10), Some(at(JAN_1_2024))),
        ],
    );

    let mut data = TransferData::new(false, "/tmp/src.bin", "orig.bin", remote_dir());
    data.local_size = Some(5);
    data.remote_size = Some(5);
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    assert_eq!(h.drain_async_requests().len(), 1);

    assert!(h
        .socket
        .set_file_exists_action(OverwriteAction::Rename("taken.bin".into())));

    // The new name collides with a cached entry of size 10: a second
    // file_exists request goes out instead of proceeding.
    let requests = h.drain_async_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].remote_file, "taken.bin");
    assert_eq!(requests[0].remote_size, Some(10));
    assert!(requests[0].remote_time.is_some());
    assert_eq!(h.socket.operation_depth(), 1);

    // Resolving the second request with Overwrite finally proceeds.
    assert!(h.socket.set_file_exists_action(OverwriteAction::Overwrite));
    assert_eq!(h.sends.load(Ordering::Relaxed), 2);
}

#[test]
fn rename_download_restats_new_target() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    let local = local_file_with_mtime(&dir, "a.bin", JAN_1_2024);
    let renamed = local_file_with_mtime(&dir, "b.bin", JAN_1_2024);
    let mut data = TransferData::new(true, &local, "a.bin", remote_dir());
    data.local_size = Some(16);
    data.remote_size = Some(64);
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    assert_eq!(h.drain_async_requests().len(), 1);

    // The renamed target also exists, so a second request is issued with
    // the re-stat'ed local size.
    assert!(h
        .socket
        .set_file_exists_action(OverwriteAction::Rename("b.bin".into())));
    let requests = h.drain_async_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].local_file, renamed);
    assert_eq!(requests[0].local_size, Some(16));

    // Skipping now logs the download skip notice under the new remote name.
    assert!(h.socket.set_file_exists_action(OverwriteAction::Skip));
    assert_eq!(h.socket.operation_depth(), 0);
    let messages = h.logged();
    assert!(messages
        .iter()
        .any(|m| m.text == "Skipping download of /pub/a.bin"));
}

#[test]
fn rename_download_to_fresh_name_proceeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    let local = local_file_with_mtime(&dir, "a.bin", JAN_1_2024);
    let mut data = TransferData::new(true, &local, "a.bin", remote_dir());
    data.local_size = Some(16);
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    assert_eq!(h.drain_async_requests().len(), 1);

    // The renamed target does not exist: the check passes and the transfer
    // proceeds at once.
    assert!(h
        .socket
        .set_file_exists_action(OverwriteAction::Rename("fresh.bin".into())));
    assert!(h.drain_async_requests().is_empty());
    assert_eq!(h.sends.load(Ordering::Relaxed), 2);
    let mirrored = h.mirror.lock().unwrap().clone().unwrap();
    assert_eq!(mirrored.local_file, dir.path().join("fresh.bin"));
    assert_eq!(mirrored.local_size, None);
}

#[test]
fn overwrite_size_skips_equal_known_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    let local = local_file_with_mtime(&dir, "same.bin", JAN_1_2024);
    let mut data = TransferData::new(true, &local, "same.bin", remote_dir());
    data.local_size = Some(4096);
    data.remote_size = Some(4096);
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    h.drain_async_requests();
    assert!(h
        .socket
        .set_file_exists_action(OverwriteAction::OverwriteSize));
    assert_eq!(h.socket.operation_depth(), 0);
    assert_eq!(h.sends.load(Ordering::Relaxed), 1);
}

#[test]
fn overwrite_size_proceeds_on_differing_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    let local = local_file_with_mtime(&dir, "diff.bin", JAN_1_2024);
    let mut data = TransferData::new(true, &local, "diff.bin", remote_dir());
    data.local_size = Some(100);
    data.remote_size = Some(4096);
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    h.drain_async_requests();
    assert!(h
        .socket
        .set_file_exists_action(OverwriteAction::OverwriteSize));
    assert_eq!(h.sends.load(Ordering::Relaxed), 2);
    assert_eq!(h.socket.operation_depth(), 1);
}

#[test]
fn overwrite_size_skips_when_both_sizes_are_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    // The local file exists but neither side reported a size: unknown
    // compares equal to unknown, so the transfer is skipped.
    let local = local_file_with_mtime(&dir, "blind.bin", JAN_1_2024);
    let mut data = TransferData::new(true, &local, "blind.bin", remote_dir());
    data.file_time = Some(at(JAN_1_2024));
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    let requests = h.drain_async_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].local_size, None);
    assert_eq!(requests[0].remote_size, None);

    assert!(h
        .socket
        .set_file_exists_action(OverwriteAction::OverwriteSize));
    assert_eq!(h.socket.operation_depth(), 0);
    assert_eq!(h.sends.load(Ordering::Relaxed), 1);
    let messages = h.logged();
    assert!(messages
        .iter()
        .any(|m| m.text == "Skipping download of /pub/blind.bin"));
}

#[test]
fn download_without_local_file_never_asks() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    let mut data = TransferData::new(
        true,
        dir.path().join("missing.bin"),
        "missing.bin",
        remote_dir(),
    );
    data.remote_size = Some(4096);
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    assert!(h.drain_async_requests().is_empty());
}

#[test]
fn case_insensitive_cache_match_is_ignored_for_uploads() {
    let mut h = harness();
    h.engine.cache().store_listing(
        &server(),
        &remote_dir(),
        vec![xfer_core::CacheEntry::file(
            "README",
            Some(10),
            Some(at(JAN_1_2024)),
        )],
    );

    // Upload of "readme": the cached "README" must not trigger the
    // overwrite question.
    let data = TransferData::new(false, "/tmp/readme", "readme", remote_dir());
    h.push_transfer(data);

    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    assert!(h.drain_async_requests().is_empty());
    assert_eq!(h.sends.load(Ordering::Relaxed), 1);
}

#[test]
fn stale_file_exists_reply_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness();

    let local = local_file_with_mtime(&dir, "late.bin", JAN_1_2024);
    let mut data = TransferData::new(true, &local, "late.bin", remote_dir());
    data.local_size = Some(1);
    data.remote_size = Some(2);
    h.push_transfer(data);
    assert_eq!(h.socket.send_next_command(), ReplyCode::WOULDBLOCK);
    assert_eq!(h.drain_async_requests().len(), 1);

    // Cancel while the question is pending; the late reply must not match.
    h.socket.cancel();
    assert_eq!(h.socket.operation_depth(), 0);
    assert!(!h.socket.set_file_exists_action(OverwriteAction::Overwrite));
}

/// Lock operation driving `try_lock_cache` and recording acquisitions.
struct LockOp {
    directory: RemotePath,
    acquired: Arc<AtomicUsize>,
}

impl Operation for LockOp {
    fn kind(&self) -> OpKind {
        OpKind::List
    }

    fn send(&mut self, cx: &mut OpContext<'_>) -> ReplyCode {
        if cx.try_lock_cache(LockReason::List, &self.directory) {
            self.acquired.fetch_add(1, Ordering::Relaxed);
        }
        ReplyCode::WOULDBLOCK
    }
}

#[test]
fn s5_unlock_hands_over_to_the_waiting_socket() {
    let engine = EngineContext::new(EngineOptions::default());
    let directory = RemotePath::parse("/x").unwrap();

    let mut a = ControlSocket::new(Arc::clone(&engine));
    a.set_current_server(server());
    let a_acquired = Arc::new(AtomicUsize::new(0));
    a.push_op(Box::new(LockOp {
        directory: directory.clone(),
        acquired: Arc::clone(&a_acquired),
    }));
    assert_eq!(a.send_next_command(), ReplyCode::WOULDBLOCK);
    assert_eq!(a_acquired.load(Ordering::Relaxed), 1);

    let mut b = ControlSocket::new(Arc::clone(&engine));
    b.set_current_server(server());
    let b_acquired = Arc::new(AtomicUsize::new(0));
    b.push_op(Box::new(LockOp {
        directory: directory.clone(),
        acquired: Arc::clone(&b_acquired),
    }));
    assert_eq!(b.send_next_command(), ReplyCode::WOULDBLOCK);
    assert_eq!(b_acquired.load(Ordering::Relaxed), 0);

    // A finishes; exactly one obtain_lock event reaches B.
    a.reset_operation(ReplyCode::OK);
    let event = b.queue().try_next();
    assert!(matches!(event, Some(Event::ObtainLock)));
    assert!(b.queue().try_next().is_none());

    // B's subsequent try_lock (driven from the event) succeeds.
    b.handle_event(event.unwrap());
    assert_eq!(b_acquired.load(Ordering::Relaxed), 1);
}

#[test]
fn transfer_progress_is_reported_with_size_and_time() {
    let mut h = harness();
    let mut data = TransferData::new(true, "/tmp/x", "x", remote_dir());
    data.transfer_initiated = true;
    h.push_transfer(data);
    h.socket.start_transfer_status(0);
    h.socket.update_transfer_status(512);

    h.socket.reset_operation(ReplyCode::OK);
    let messages = h.logged();
    assert!(messages.iter().any(|m| {
        m.text.starts_with("File transfer successful, transferred 512 bytes in")
    }));
}
