// Copyright (c) 2025 NaturalIO

//! A minimal single-threaded [`Reactor`] backed by `mio`, built only so this
//! crate's own tests have a real event loop to register the AIO watcher
//! against. Not exported by default (see the `harness` feature); host
//! applications bring their own reactor and implement [`Reactor`] against it
//! instead of depending on this one.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::reactor::Reactor;

/// Drives one `mio::Poll` instance and dispatches readability to whatever
/// watchers were registered through [`Reactor::register_readable`].
pub struct MioReactor {
    poll: Poll,
    events: Events,
    watchers: HashMap<RawFd, Rc<dyn Fn()>>,
}

impl MioReactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self { poll: Poll::new()?, events: Events::with_capacity(16), watchers: HashMap::new() })
    }

    /// Block for up to `timeout` waiting for registered fds to become
    /// readable, then run every watcher whose fd fired. Returns the number
    /// of watchers invoked.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut fired = 0;
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            if let Some(cb) = self.watchers.get(&fd) {
                cb.clone()();
                fired += 1;
            }
        }
        Ok(fired)
    }
}

impl Reactor for MioReactor {
    fn register_readable(&mut self, fd: RawFd, on_readable: Rc<dyn Fn()>) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)?;
        self.watchers.insert(fd, on_readable);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.watchers.remove(&fd);
        let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        Ok(())
    }
}
