// Copyright (c) 2025 NaturalIO

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;

use aio_engine_sys::iocb;
use io_buffer::Buffer;

/// Positional operation an [`AioRequest`] performs.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AioOp {
    Read,
    Write,
}

type DoneCallback = Box<dyn FnOnce(AioRequest)>;

/// Shared state for one user request, reachable both from the caller's
/// [`AioRequest`] handle and, via a raw pointer stashed in every one of its
/// kernel control blocks, from the completion dispatcher.
///
/// Lives behind an [`Rc`]; the engine keeps a strong reference from the
/// moment the request is accepted into the pending queue until its last
/// fragment completes, which is what makes holding a raw pointer to it in
/// kernel memory sound (see [`crate::engine`] module docs).
pub(crate) struct RequestInner {
    pub(crate) fd: RawFd,
    pub(crate) op: AioOp,
    pub(crate) offset: i64,
    pub(crate) buffers: RefCell<Vec<Buffer>>,
    pub(crate) control_blocks: RefCell<Option<Box<[iocb]>>>,
    pub(crate) fragment_count: Cell<usize>,
    pub(crate) submitted: Cell<usize>,
    pub(crate) done: Cell<usize>,
    pub(crate) result: Cell<i64>,
    callback: RefCell<Option<DoneCallback>>,
}

/// A vectored positional read or write, ready to hand to [`crate::AioEngine::submit`].
///
/// Construct with [`AioRequest::new`], submit it, and get it back through
/// the completion closure once every buffer has been transferred — at that
/// point [`AioRequest::result`] holds the aggregated outcome and
/// [`AioRequest::into_buffers`] gives the buffers back.
pub struct AioRequest {
    pub(crate) inner: Rc<RequestInner>,
}

impl std::fmt::Debug for AioRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AioRequest")
            .field("fd", &self.inner.fd)
            .field("op", &self.inner.op)
            .field("offset", &self.inner.offset)
            .field("fragment_count", &self.inner.fragment_count.get())
            .field("submitted", &self.inner.submitted.get())
            .field("done", &self.inner.done.get())
            .finish()
    }
}

impl AioRequest {
    /// Build a request for `op` on `fd`, covering `buffers` in order
    /// starting at `offset`. A negative `offset` means "start at 0" once
    /// the request reaches the AIO path (the kernel AIO path has no concept
    /// of the current file position).
    pub fn new(fd: RawFd, op: AioOp, buffers: Vec<Buffer>, offset: i64) -> Self {
        Self {
            inner: Rc::new(RequestInner {
                fd,
                op,
                offset,
                buffers: RefCell::new(buffers),
                control_blocks: RefCell::new(None),
                fragment_count: Cell::new(0),
                submitted: Cell::new(0),
                done: Cell::new(0),
                result: Cell::new(0),
                callback: RefCell::new(None),
            }),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.inner.fd
    }

    pub fn op(&self) -> AioOp {
        self.inner.op
    }

    pub fn nbufs(&self) -> usize {
        self.inner.buffers.borrow().len()
    }

    /// Aggregated result: the sum of per-fragment byte counts while every
    /// fragment observed so far has succeeded, or the first negative
    /// `-errno` observed, whichever happened first (sticky-first-error).
    ///
    /// Only meaningful once the completion callback has fired; before that
    /// it reads as `0`.
    pub fn result(&self) -> i64 {
        self.inner.result.get()
    }

    /// Take the buffers back out, e.g. to inspect a completed read. Panics
    /// if called while the request is still shared elsewhere (i.e. before
    /// the completion callback ran, or if a clone of the handle is held).
    pub fn into_buffers(self) -> Vec<Buffer> {
        let inner = Rc::try_unwrap(self.inner)
            .unwrap_or_else(|_| panic!("AioRequest still has outstanding references"));
        inner.buffers.into_inner()
    }

    pub(crate) fn set_callback(&self, cb: DoneCallback) {
        *self.inner.callback.borrow_mut() = Some(cb);
    }
}

impl RequestInner {
    #[inline(always)]
    pub(crate) fn fire_callback(self: Rc<Self>) {
        let cb = self.callback.borrow_mut().take();
        let request = AioRequest { inner: self };
        if let Some(cb) = cb {
            cb(request);
        }
    }
}
