//! Raw bindings to the Linux kernel AIO ABI (`linux/aio_abi.h`).
//!
//! This crate deliberately does not use `bindgen`: the struct layout and
//! syscall numbers here have been stable since the ABI was introduced in
//! Linux 2.6 and transcribing them by hand avoids a `libclang` build
//! dependency for something this small and this stable.
#![allow(non_camel_case_types)]

use std::os::raw::{c_int, c_long};

/// Handle to a kernel AIO context, as returned by `io_setup`.
pub type aio_context_t = u64;

pub const IOCB_CMD_PREAD: u16 = 0;
pub const IOCB_CMD_PWRITE: u16 = 1;
pub const IOCB_CMD_FSYNC: u16 = 2;
pub const IOCB_CMD_FDSYNC: u16 = 3;
pub const IOCB_CMD_POLL: u16 = 5;
pub const IOCB_CMD_NOOP: u16 = 6;
pub const IOCB_CMD_PREADV: u16 = 7;
pub const IOCB_CMD_PWRITEV: u16 = 8;

/// Set if `aio_resfd` is valid, i.e. the kernel should signal the given
/// eventfd on completion of this control block.
pub const IOCB_FLAG_RESFD: u32 = 1 << 0;
/// Set if `aio_reqprio` is valid.
pub const IOCB_FLAG_IOPRIO: u32 = 1 << 1;

/// One submission-queue entry: a single read or write fragment.
///
/// Field layout and order must match `struct iocb` from `linux/aio_abi.h`
/// exactly; the kernel reads this struct directly.
#[repr(C)]
#[derive(Debug)]
pub struct iocb {
    pub aio_data: u64,
    pub aio_key: u32,
    pub aio_rw_flags: i32,
    pub aio_lio_opcode: u16,
    pub aio_reqprio: i16,
    pub aio_fildes: u32,
    pub aio_buf: u64,
    pub aio_nbytes: u64,
    pub aio_offset: i64,
    pub aio_reserved2: u64,
    pub aio_flags: u32,
    pub aio_resfd: u32,
}

impl Default for iocb {
    fn default() -> Self {
        // SAFETY: an all-zero iocb is a valid (inert) value; the kernel
        // never reads one we haven't filled in ourselves.
        unsafe { std::mem::zeroed() }
    }
}

/// One completion-queue entry, as returned by `io_getevents`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct io_event {
    pub data: u64,
    pub obj: u64,
    pub res: i64,
    pub res2: i64,
}

/// Mirrors `struct timespec`; used only for `io_getevents`' timeout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

#[cfg(target_arch = "x86_64")]
mod nr {
    pub const IO_SETUP: i64 = 206;
    pub const IO_DESTROY: i64 = 207;
    pub const IO_GETEVENTS: i64 = 208;
    pub const IO_SUBMIT: i64 = 209;
    pub const IO_CANCEL: i64 = 210;
}

// asm-generic syscall table, shared by aarch64, riscv64 and other newer
// architectures that did not carry forward the legacy x86 numbering.
#[cfg(not(target_arch = "x86_64"))]
mod nr {
    pub const IO_SETUP: i64 = 0;
    pub const IO_DESTROY: i64 = 1;
    pub const IO_SUBMIT: i64 = 2;
    pub const IO_CANCEL: i64 = 3;
    pub const IO_GETEVENTS: i64 = 4;
}

// -----------------------------------------------------------------------
// Inline wrappers for the kernel calls corresponding to the Linux AIO
// syscalls. Each returns the raw kernel code (0 or a negative `-errno`);
// callers are responsible for interpreting it.
// -----------------------------------------------------------------------

/// Initialize an AIO context able to hold up to `nr` concurrent requests.
///
/// See [io_setup(2)](http://man7.org/linux/man-pages/man2/io_setup.2.html).
#[inline(always)]
pub fn io_setup(nr: c_long, ctxp: &mut aio_context_t) -> c_long {
    unsafe { libc::syscall(nr::IO_SETUP as c_long, nr, ctxp as *mut aio_context_t) }
}

/// Destroy an AIO context created by [`io_setup`].
///
/// See [io_destroy(2)](http://man7.org/linux/man-pages/man2/io_destroy.2.html).
#[inline(always)]
pub fn io_destroy(ctx: aio_context_t) -> c_long {
    unsafe { libc::syscall(nr::IO_DESTROY as c_long, ctx) }
}

/// Submit up to `nr` control blocks for asynchronous execution.
///
/// See [io_submit(2)](http://man7.org/linux/man-pages/man2/io_submit.2.html).
///
/// # Safety
///
/// `ctx` must come from a live [`io_setup`] call, and `iocbpp` must point to
/// `nr` valid `*mut iocb` pointers, each referencing an `iocb` that stays
/// alive until the kernel reports its completion.
#[inline(always)]
pub unsafe fn io_submit(ctx: aio_context_t, nr: c_long, iocbpp: *mut *mut iocb) -> c_long {
    unsafe { libc::syscall(nr::IO_SUBMIT as c_long, ctx, nr, iocbpp) }
}

/// Retrieve up to `max_nr` completion events, blocking for at most
/// `timeout` until at least `min_nr` are available.
///
/// See [io_getevents(2)](http://man7.org/linux/man-pages/man2/io_getevents.2.html).
///
/// # Safety
///
/// `ctx` must come from a live [`io_setup`] call, and `events` must point to
/// at least `max_nr` writable `io_event` slots. `timeout` may be null to
/// block indefinitely, or point to a valid `timespec`.
#[inline(always)]
pub unsafe fn io_getevents(
    ctx: aio_context_t,
    min_nr: c_long,
    max_nr: c_long,
    events: *mut io_event,
    timeout: *mut timespec,
) -> c_long {
    unsafe {
        libc::syscall(
            nr::IO_GETEVENTS as c_long,
            ctx,
            min_nr,
            max_nr,
            events,
            timeout,
        )
    }
}

/// Attempt to cancel a previously submitted control block. Not used by the
/// engine's scheduling core (cancellation of in-flight operations is out of
/// scope), exposed only because the kernel ABI defines it.
///
/// See [io_cancel(2)](http://man7.org/linux/man-pages/man2/io_cancel.2.html).
///
/// # Safety
///
/// `ctx` must come from a live [`io_setup`] call, `iocb` must point to a
/// control block previously submitted on that context, and `result` must
/// point to a valid, writable `io_event`.
#[inline(always)]
pub unsafe fn io_cancel(ctx: aio_context_t, iocb: *mut iocb, result: *mut io_event) -> c_int {
    unsafe { libc::syscall(nr::IO_CANCEL as c_long, ctx, iocb, result) as c_int }
}
