#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `xfer_engine` is the stateful driver at the heart of the oc-xfer client:
//! the per-connection control socket that sequences operations against a
//! remote file server. It owns the push-down [`Operation`] stack that
//! protocol drivers plug into, enforces the inactivity timeout, arbitrates
//! the process-wide directory [`LockArbiter`] across sibling connections,
//! runs the overwrite decision engine for pre-existing transfer targets, and
//! converts inbound control bytes through the charset fallback chain.
//!
//! # Design
//!
//! Control logic is single-threaded per socket: every entry point runs to
//! completion and yields by returning [`ReplyCode::WOULDBLOCK`]. Progress
//! resumes from events on the socket's queue: timers, lock wake-ups,
//! socket readiness, writer and reader readiness.
//!
//! The [`Operation`] trait is the seam for the wire-protocol drivers, which
//! are out of scope here: an operation's `send` drives the next protocol
//! step, sub-operations bubble their result up through
//! `subcommand_result`, and `reset_operation` centralizes teardown,
//! cache-lock release and the user-facing failure messages.
//!
//! # Invariants
//!
//! - Operation frames are destroyed in LIFO order, exactly once each,
//!   whatever result code unwinds the stack.
//! - A held cache lock is always released by the frame that acquired it;
//!   the pop path guarantees it.
//! - `do_close` is idempotent; user-facing messages appear only at the
//!   root-of-stack reset.

mod charset;
mod domain;
mod engine;
mod lock;
mod op;
mod overwrite;
mod real;
mod socket;

pub use charset::CharsetConverter;
pub use domain::convert_domain_name;
pub use engine::EngineContext;
pub use lock::{LockArbiter, LockReason};
pub use op::{
    ConnectData, FrameState, OpContext, OpKind, Operation, TransferData, TransferSettings,
};
pub use real::{ProtocolHandler, RealControlSocket};
pub use socket::ControlSocket;

pub use xfer_core::ReplyCode;
