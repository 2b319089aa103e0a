// Copyright (c) 2025 NaturalIO

use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

/// What the engine needs from a host event loop: registering one raw,
/// already-`O_NONBLOCK` file descriptor for readability, and being able to
/// stop watching it again at teardown.
///
/// The engine never touches timers, handle lifetime, or anything else
/// about the loop; those stay the host's concern entirely. A host
/// application implements this trait once against whatever reactor it
/// already runs (mio, an epoll wrapper, tokio's io driver, ...) and hands
/// `&mut dyn Reactor` to [`crate::AioEngine::attach`].
pub trait Reactor {
    /// Start invoking `on_readable` whenever `fd` is readable. `fd` is
    /// already non-blocking; the callback is expected to drain it.
    fn register_readable(&mut self, fd: RawFd, on_readable: Rc<dyn Fn()>) -> io::Result<()>;

    /// Stop watching `fd`. Idempotent: deregistering an fd that was never
    /// registered (or already deregistered) is not an error.
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;
}
