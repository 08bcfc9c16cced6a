//! Overwrite decision engine.
//!
//! When a transfer's target already exists the engine asks the user what to
//! do (a `file_exists` async request) and applies the reply: proceed,
//! resume, rename (re-running the check under the new name), or skip.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tracing::debug;
use xfer_core::{FileExistsNotification, Message, OverwriteAction, ReplyCode};

use crate::op::{FrameState, TransferData};
use crate::socket::{ControlSocket, SocketInner};

fn local_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok().and_then(|meta| meta.modified().ok())
}

fn local_file_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(fs::Metadata::is_file)
        .map(|meta| meta.len())
}

/// Runs the overwrite check for a pending transfer.
///
/// Returns `OK` when the transfer may proceed without asking: a download
/// whose local target is not a regular file, or an upload with no cached
/// entry, no known remote size and no remote time. Otherwise consults the
/// directory cache for an authoritative `{size, mtime}` (ignoring entries
/// that match only case-insensitively), issues the `file_exists` request
/// and parks the frame with `WOULDBLOCK`.
pub(crate) fn check_overwrite(
    inner: &mut SocketInner,
    frame: &mut FrameState,
    data: &mut TransferData,
) -> ReplyCode {
    if data.download && local_file_size(&data.local_file).is_none() {
        return ReplyCode::OK;
    }

    let Some(server) = inner.current_server.clone() else {
        debug!("overwrite check without a current server");
        return ReplyCode::INTERNALERROR;
    };
    let lookup_path = if data.try_absolute_path || inner.current_path.is_none() {
        data.remote_path.clone()
    } else {
        inner.current_path.clone().expect("checked above")
    };
    let lookup = inner
        .engine
        .cache()
        .lookup_file(&server, &lookup_path, &data.remote_file);
    // Entries matched with the wrong case would overwrite the wrong file.
    let entry = lookup.entry.filter(|_| lookup.matched_case);

    if !data.download
        && entry.is_none()
        && data.remote_size.is_none()
        && data.file_time.is_none()
    {
        return ReplyCode::OK;
    }

    let mut notification = FileExistsNotification {
        download: data.download,
        local_file: data.local_file.clone(),
        remote_file: data.remote_file.clone(),
        remote_path: data.remote_path.clone(),
        local_size: data.local_size,
        remote_size: data.remote_size,
        remote_time: data.file_time,
        local_time: local_mtime(&data.local_file),
        ascii: !data.transfer_settings.binary,
        can_resume: (data.download && data.local_size.is_some())
            || (!data.download && data.remote_size.is_some()),
    };

    if let Some(entry) = entry {
        if notification.remote_time.is_none() {
            if let Some(mtime) = entry.mtime {
                notification.remote_time = Some(mtime);
                data.file_time = Some(mtime);
            }
        }
    }

    inner.send_async_request(frame, notification);
    ReplyCode::WOULDBLOCK
}

enum Decision {
    Proceed,
    Skip(Message),
    RecheckThenProceed,
    MissingContext,
}

fn skip_message(data: &TransferData) -> Message {
    if data.download {
        Message::status(format!(
            "Skipping download of {}",
            data.remote_path.format_filename(&data.remote_file)
        ))
    } else {
        Message::status(format!(
            "Skipping upload of {}",
            data.local_file.display()
        ))
    }
}

fn sizes_say_proceed(notification: &FileExistsNotification) -> bool {
    // Differing sizes proceed; a known size never equals an unknown one, so
    // one-sided unknowns proceed too. Two equal known sizes, or two unknown
    // ones, skip.
    notification.local_size != notification.remote_size
}

fn age_says_proceed(notification: &FileExistsNotification) -> Option<bool> {
    let (Some(local), Some(remote)) = (notification.local_time, notification.remote_time) else {
        return None;
    };
    Some(if notification.download {
        local < remote
    } else {
        local > remote
    })
}

/// Applies a `file_exists` reply to the pending transfer.
///
/// Returns `false` when no transfer awaits a reply (a stale answer after a
/// reset) or the reply could not be applied.
pub(crate) fn apply_file_exists_action(
    socket: &mut ControlSocket,
    action: OverwriteAction,
) -> bool {
    let Some((notification, mut data_view)) = socket.take_pending_file_exists() else {
        debug!("file_exists reply without a matching transfer, ignoring");
        return false;
    };

    // Phase one: decide, mutating only the transfer data.
    let decision = {
        let data = &mut data_view;
        match action {
            OverwriteAction::Overwrite => Decision::Proceed,
            OverwriteAction::OverwriteNewer => match age_says_proceed(&notification) {
                None | Some(true) => Decision::Proceed,
                Some(false) => Decision::Skip(skip_message(data)),
            },
            OverwriteAction::OverwriteSize => {
                if sizes_say_proceed(&notification) {
                    Decision::Proceed
                } else {
                    Decision::Skip(skip_message(data))
                }
            }
            OverwriteAction::OverwriteSizeOrNewer => {
                match age_says_proceed(&notification) {
                    None | Some(true) => Decision::Proceed,
                    Some(false) if sizes_say_proceed(&notification) => Decision::Proceed,
                    Some(false) => Decision::Skip(skip_message(data)),
                }
            }
            OverwriteAction::Resume => {
                if data.download && data.local_size.is_some() {
                    data.resume = true;
                } else if !data.download && data.remote_size.is_some() {
                    data.resume = true;
                }
                Decision::Proceed
            }
            OverwriteAction::Rename(new_name) => {
                if data.download {
                    let parent = data
                        .local_file
                        .parent()
                        .filter(|parent| !parent.as_os_str().is_empty())
                        .map(Path::to_path_buf);
                    match parent {
                        Some(parent) => {
                            data.local_file = parent.join(&new_name);
                            data.local_size = local_file_size(&data.local_file);
                            Decision::RecheckThenProceed
                        }
                        None => Decision::MissingContext,
                    }
                } else {
                    data.remote_file = new_name;
                    data.file_time = None;
                    data.remote_size = None;
                    Decision::RecheckThenProceed
                }
            }
            OverwriteAction::Skip => Decision::Skip(skip_message(data)),
        }
    };

    socket.store_transfer_data(data_view);

    // Phase two: act on the socket.
    match decision {
        Decision::Proceed => {
            socket.send_next_command();
            true
        }
        Decision::Skip(message) => {
            socket.log_message(message);
            socket.reset_operation(ReplyCode::OK);
            true
        }
        Decision::RecheckThenProceed => {
            // Uploads consult the cache under the new name before the
            // recheck, possibly discovering a fresh collision.
            socket.refresh_transfer_from_cache();
            if socket.check_overwrite_file() == ReplyCode::OK {
                socket.send_next_command();
            }
            true
        }
        Decision::MissingContext => {
            socket.reset_operation(ReplyCode::INTERNALERROR);
            false
        }
    }
}

/// Updates a renamed upload's transfer data from the directory cache.
pub(crate) fn refresh_from_cache(inner: &SocketInner, data: &mut TransferData) {
    if data.download {
        return;
    }
    let Some(server) = inner.current_server.as_ref() else {
        return;
    };
    let lookup_path = if data.try_absolute_path || inner.current_path.is_none() {
        data.remote_path.clone()
    } else {
        inner.current_path.clone().expect("checked above")
    };
    let lookup = inner
        .engine
        .cache()
        .lookup_file(server, &lookup_path, &data.remote_file);
    if let Some(entry) = lookup.entry.filter(|_| lookup.matched_case) {
        data.remote_size = entry.size;
        if let Some(mtime) = entry.mtime {
            data.file_time = Some(mtime);
        }
    }
}
