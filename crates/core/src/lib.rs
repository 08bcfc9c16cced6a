#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `xfer_core` holds the vocabulary shared by every crate in the `oc-xfer`
//! workspace: the [`ReplyCode`] bitset that operations and the control socket
//! exchange, server identity and remote path types, engine configuration,
//! user-visible [`Message`] values, the notification surface towards the
//! embedding application, the per-socket [`EventQueue`] that the cooperative
//! control loop runs on, and the process-wide [`DirectoryCache`].
//!
//! # Design
//!
//! The crate is deliberately leaf-level: it depends on nothing else in the
//! workspace so that the I/O pipeline (`xfer_aio`), the transport layer
//! (`xfer_transport`) and the control-socket engine (`xfer_engine`) can all
//! speak the same types without cycles.
//!
//! Control flow between the engine and its operations is expressed with
//! [`ReplyCode`] values rather than `Result`, because codes compose
//! (`ERROR | DISCONNECTED`) and because `WOULDBLOCK`/`CONTINUE` are ordinary
//! flow signals, not failures.
//!
//! # Invariants
//!
//! - Events posted to an [`EventQueue`] are delivered in FIFO order.
//! - [`DirectoryCache`] is internally thread-safe; all methods take `&self`.
//! - Async request numbers increase monotonically for the lifetime of a
//!   [`NotificationQueue`].

pub mod cache;
pub mod event;
pub mod message;
pub mod notification;
pub mod options;
pub mod path;
pub mod reply;
pub mod server;
pub mod status;

pub use cache::{CacheEntry, DirectoryCache, FileLookup};
pub use event::{Event, EventQueue, ReaderId, SocketEvent, SocketId, TimerId, WriterId};
pub use message::{Message, Severity};
pub use notification::{
    AsyncRequest, FileExistsNotification, Notification, NotificationQueue, OverwriteAction,
    RequestNumber,
};
pub use options::{EngineOptions, ProxyKind, ProxyOptions};
pub use path::{PathParseError, RemotePath};
pub use reply::ReplyCode;
pub use server::{EncodingType, ServerFormat, ServerInfo};
pub use status::TransferStatus;
