// Copyright (c) 2025 NaturalIO

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use aio_engine_sys::{
    aio_context_t, io_destroy, io_event, io_getevents, io_setup, io_submit, iocb, timespec,
    IOCB_CMD_PREAD, IOCB_CMD_PWRITE, IOCB_FLAG_RESFD,
};

use crate::reactor::Reactor;
use crate::request::{AioOp, AioRequest, RequestInner};

/// The one synchronous error [`AioEngine::submit`] can return. Kernel-side
/// failures never take this path: they surface through the completion
/// closure via [`AioRequest::result`] instead (see the crate-level docs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioSubmitError {
    /// The request carried no buffers (or a null buffer vector in the
    /// distilled source's terms). Rejected before any control block is
    /// allocated or the pending queue is touched; the done-closure passed
    /// to `submit` is dropped unfired.
    EmptyRequest,
}

impl std::fmt::Display for AioSubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AioSubmitError::EmptyRequest => write!(f, "aio request has no buffers to submit"),
        }
    }
}

impl std::error::Error for AioSubmitError {}

/// Batch capacity the engine falls back to when the caller doesn't size it
/// explicitly. Both the kernel AIO context's depth and the number of
/// completion events fetched per dispatch cycle are drawn from this number
/// (or whatever the caller passed to [`AioEngine::attach`]).
///
/// This is shared system-wide (`/proc/sys/fs/aio-max-nr`); a host process
/// attaching many engines should size each one down accordingly.
pub const DEFAULT_BATCH_CAPACITY: usize = 128;

/// Shared, per-loop engine state.
///
/// All methods run on the loop thread: there is no locking here, mutation
/// is serialized by the reactor only ever calling back into the engine
/// from its own single-threaded poll step. `Cell`/`RefCell` interior
/// mutability (rather than `Mutex`) is a deliberate signal that sharing
/// this across threads is a misuse, not a supported configuration.
struct EngineState {
    context: aio_context_t,
    eventfd: RawFd,
    capacity: usize,
    pending: RefCell<VecDeque<Rc<RequestInner>>>,
    in_flight: RefCell<HashMap<usize, Rc<RequestInner>>>,
    events: RefCell<Vec<io_event>>,
}

impl Drop for EngineState {
    fn drop(&mut self) {
        let r = io_destroy(self.context);
        if r != 0 {
            error!("io_destroy returned {} for context {}", r, self.context);
        }
        unsafe {
            libc::close(self.eventfd);
        }
    }
}

/// A Linux kernel AIO engine attached to one host event loop.
///
/// See the crate-level docs for the submission/completion protocol. Not
/// `Send`/`Sync`: an `AioEngine` belongs to exactly the loop thread it was
/// attached on.
pub struct AioEngine {
    state: Rc<EngineState>,
}

impl AioEngine {
    pub const DEFAULT_BATCH_CAPACITY: usize = DEFAULT_BATCH_CAPACITY;

    /// Create an eventfd and a kernel AIO context sized for `capacity`
    /// concurrent fragments, and register the eventfd as a readable
    /// watcher on `reactor`. Fails (and leaves no engine behind) if either
    /// the eventfd or the AIO context cannot be created.
    pub fn attach(reactor: &mut dyn Reactor, capacity: usize) -> io::Result<Self> {
        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut context: aio_context_t = 0;
        let r = io_setup(capacity as libc::c_long, &mut context);
        if r != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(eventfd);
            }
            return Err(err);
        }

        let state = Rc::new(EngineState {
            context,
            eventfd,
            capacity,
            pending: RefCell::new(VecDeque::new()),
            in_flight: RefCell::new(HashMap::new()),
            events: RefCell::new(Vec::with_capacity(capacity)),
        });

        let watcher_state = state.clone();
        // state's Drop will still run io_destroy/close on the way out if this fails.
        reactor.register_readable(eventfd, Rc::new(move || watcher_state.on_readable()))?;

        info!("aio engine attached, capacity={}", capacity);
        Ok(Self { state })
    }

    /// Stop watching the eventfd on `reactor`. Destroying the kernel AIO
    /// context and closing the eventfd happens when the last reference to
    /// the engine's internal state is dropped (normally right after this
    /// call returns).
    ///
    /// Does *not* wait for in-flight fragments: any request still
    /// `SUBMITTING`/`IN_FLIGHT` at the time of `close` will simply never
    /// have its completion observed. This mirrors the distilled source,
    /// which leaves the same question open (see `SPEC_FULL.md` §9); a host
    /// that needs a clean drain should track outstanding requests itself
    /// (e.g. via [`AioEngine::running_count`]) and call `close` only once
    /// that count reaches zero.
    pub fn close(self, reactor: &mut dyn Reactor) -> io::Result<()> {
        reactor.deregister(self.state.eventfd)
    }

    /// Number of requests that have been accepted but not yet completed
    /// (pending submission, partially submitted, or fully submitted and
    /// awaiting completion). Zero means the engine has no outstanding
    /// work — the host-loop analogue of "this handle keeps the loop
    /// alive".
    pub fn running_count(&self) -> usize {
        self.state.pending.borrow().len() + self.state.in_flight.borrow().len()
    }

    /// Fragment a request into kernel control blocks, enqueue it, and run
    /// the submitter once. The completion closure fires on this loop
    /// thread, exactly once, once every fragment has completed.
    ///
    /// Rejects a request with zero buffers before touching the pending
    /// queue or allocating anything; in that case the closure is dropped
    /// unfired.
    pub fn submit<F>(&self, request: AioRequest, on_done: F) -> Result<(), AioSubmitError>
    where
        F: FnOnce(AioRequest) + 'static,
    {
        let nbufs = request.inner.buffers.borrow().len();
        if nbufs == 0 {
            return Err(AioSubmitError::EmptyRequest);
        }

        request.set_callback(Box::new(on_done));
        self.fragment(&request.inner);

        self.state.pending.borrow_mut().push_back(request.inner);
        self.state.drain_pending();
        Ok(())
    }

    fn fragment(&self, inner: &Rc<RequestInner>) {
        if inner.control_blocks.borrow().is_some() {
            // Already fragmented: resubmission of an in-flight request is a
            // caller protocol violation, not something the engine recovers
            // from (matches the distilled source's own gate).
            return;
        }

        let cookie = Rc::as_ptr(inner) as usize as u64;
        let opcode = match inner.op {
            AioOp::Read => IOCB_CMD_PREAD,
            AioOp::Write => IOCB_CMD_PWRITE,
        };

        let mut buffers = inner.buffers.borrow_mut();
        let mut offset = inner.offset.max(0);
        let mut blocks: Vec<iocb> = Vec::with_capacity(buffers.len());
        for buf in buffers.iter_mut() {
            let len = buf.len();
            blocks.push(iocb {
                aio_data: cookie,
                aio_lio_opcode: opcode,
                aio_fildes: inner.fd as u32,
                aio_buf: buf.get_raw_mut() as u64,
                aio_nbytes: len as u64,
                aio_offset: offset,
                aio_flags: IOCB_FLAG_RESFD,
                aio_resfd: self.state.eventfd as u32,
                ..Default::default()
            });
            offset += len as i64;
        }

        inner.fragment_count.set(blocks.len());
        inner.submitted.set(0);
        *inner.control_blocks.borrow_mut() = Some(blocks.into_boxed_slice());
    }
}

impl EngineState {
    /// Eventfd watcher callback: drain the wakeup counter, then run the
    /// completion dispatcher.
    fn on_readable(&self) {
        self.drain_eventfd();
        self.work_done();
    }

    fn drain_eventfd(&self) {
        let mut buf = [0u8; 1024];
        loop {
            let r = unsafe { libc::read(self.eventfd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if r > 0 {
                if r as usize == buf.len() {
                    continue;
                }
                break;
            } else if r == 0 {
                break;
            } else {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(e) if e == libc::EAGAIN || e == libc::EWOULDBLOCK => break,
                    Some(e) if e == libc::EINTR => continue,
                    _ => {
                        error!("fatal error reading aio eventfd: {}", err);
                        panic!("fatal error reading aio eventfd: {}", err);
                    }
                }
            }
        }
    }

    /// Drain ready completions, aggregate each into its owning request,
    /// fire callbacks for requests that just became fully done, then run
    /// the submitter so freed kernel capacity is put back to work.
    fn work_done(&self) {
        loop {
            let n = {
                let mut events = self.events.borrow_mut();
                events.clear();
                let zero_timeout = timespec { tv_sec: 0, tv_nsec: 0 };
                let mut ts = zero_timeout;
                let r = unsafe {
                    io_getevents(
                        self.context,
                        0,
                        self.capacity as libc::c_long,
                        events.as_mut_ptr(),
                        &mut ts as *mut timespec,
                    )
                };
                if r < 0 {
                    error!(
                        "io_getevents error: {}",
                        io::Error::from_raw_os_error(-r as i32)
                    );
                    break;
                }
                if r == 0 {
                    break;
                }
                unsafe { events.set_len(r as usize) };
                r
            };

            let mut finished = Vec::new();
            {
                let events = self.events.borrow();
                for event in events.iter().take(n as usize) {
                    let ptr = event.data as usize;
                    let inner = match self.in_flight.borrow().get(&ptr) {
                        Some(inner) => inner.clone(),
                        None => {
                            warn!("completion for unknown/stale request cookie {:#x}", ptr);
                            continue;
                        }
                    };

                    if event.res >= 0 && inner.result.get() >= 0 {
                        inner.result.set(inner.result.get() + event.res);
                    } else if inner.result.get() >= 0 {
                        inner.result.set(event.res);
                    }

                    inner.done.set(inner.done.get() + 1);
                    if inner.done.get() >= inner.fragment_count.get() {
                        finished.push(ptr);
                    }
                }
            }

            for ptr in finished {
                let removed = self.in_flight.borrow_mut().remove(&ptr);
                if let Some(inner) = removed {
                    inner.fire_callback();
                }
            }
        }

        self.drain_pending();
    }

    /// Repeatedly submit the head of the pending queue in batches of up to
    /// `capacity` fragments until the queue is empty or the kernel reports
    /// `EAGAIN`. Batches never cross request boundaries, which preserves
    /// within-request submission order.
    fn drain_pending(&self) {
        loop {
            let head = match self.pending.borrow().front() {
                Some(head) => head.clone(),
                None => break,
            };

            let submitted = head.submitted.get();
            let fragment_count = head.fragment_count.get();
            let remaining = fragment_count - submitted;
            let batch = remaining.min(self.capacity);

            let r = {
                let mut cbs = head.control_blocks.borrow_mut();
                let blocks = cbs.as_mut().expect("fragmented before enqueue");
                let mut ptrs: Vec<*mut iocb> = (submitted..submitted + batch)
                    .map(|i| &mut blocks[i] as *mut iocb)
                    .collect();
                unsafe { io_submit(self.context, batch as libc::c_long, ptrs.as_mut_ptr()) }
            };

            if r < 0 {
                let errno = -r as i32;
                if errno == libc::EAGAIN {
                    trace!("io_submit backpressure (EAGAIN), deferring to next completion");
                } else {
                    warn!(
                        "io_submit error, dropping remaining fragments of this drain pass: {}",
                        io::Error::from_raw_os_error(errno)
                    );
                }
                break;
            }

            // Make the request resolvable by the completion dispatcher as soon
            // as any fragment is in the kernel's hands, not only once fully
            // submitted: a large request spans multiple `io_submit` batches,
            // and fragments from the first batch may complete (and arrive
            // via the eventfd) before the last batch is even submitted.
            let cookie = Rc::as_ptr(&head) as usize;
            self.in_flight.borrow_mut().entry(cookie).or_insert_with(|| head.clone());

            head.submitted.set(submitted + r as usize);
            if head.submitted.get() >= fragment_count {
                self.pending.borrow_mut().pop_front();
            }
        }
    }
}
