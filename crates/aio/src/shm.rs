//! Ring buffer allocation, optionally backed by shared memory.
//!
//! With [`ShmFlag::Memfd`] the whole ring lives in one anonymous
//! shared-memory file created with `memfd_create`; each slot maps a disjoint,
//! page-aligned window of it. The backing descriptor stays with the ring so
//! it can be handed to a child process without copying buffer contents.

use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;

use memmap2::MmapOptions;
use rustix::fs::{ftruncate, memfd_create, MemfdFlags};
use rustix::param::page_size;

use crate::buffer::Buffer;

/// Buffer allocation mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ShmFlag {
    /// Plain heap allocation.
    #[default]
    None,
    /// Allocation backed by a `memfd` shared-memory descriptor.
    Memfd,
}

pub(crate) struct Allocation {
    pub buffers: Vec<Buffer>,
    /// Backing descriptor of a shared allocation, for child-process
    /// hand-off.
    pub shared_fd: Option<OwnedFd>,
}

pub(crate) fn allocate(count: usize, capacity: usize, shm: ShmFlag) -> io::Result<Allocation> {
    assert!(count >= 2, "a ring needs at least two buffers");
    assert!(capacity > 0, "zero-capacity buffers are useless");

    match shm {
        ShmFlag::None => Ok(Allocation {
            buffers: (0..count).map(|_| Buffer::heap(capacity)).collect(),
            shared_fd: None,
        }),
        ShmFlag::Memfd => {
            let page = page_size();
            let stride = capacity.div_ceil(page) * page;
            let fd = memfd_create("xfer-aio-ring", MemfdFlags::CLOEXEC)?;
            ftruncate(&fd, (stride * count) as u64)?;
            let file = File::from(fd);
            let mut buffers = Vec::with_capacity(count);
            for index in 0..count {
                // SAFETY: each slot maps a disjoint [index * stride,
                // index * stride + capacity) window of a descriptor this
                // allocation exclusively owns; no aliasing mappings exist.
                let map = unsafe {
                    MmapOptions::new()
                        .offset((index * stride) as u64)
                        .len(capacity)
                        .map_mut(&file)?
                };
                buffers.push(Buffer::shared(map));
            }
            Ok(Allocation {
                buffers,
                shared_fd: Some(file.into()),
            })
        }
    }
}
