use std::io;
use std::os::fd::RawFd;

/// Eventfd-based wake-up for a worker's poll loop.
///
/// Senders write the eventfd after queueing work so a worker blocked in
/// `poll` observes the new command. The counter accumulates, so the fd stays
/// readable until the loop drains it.
pub(crate) struct Waker {
    efd: RawFd,
}

impl Waker {
    pub fn new() -> io::Result<Waker> {
        let efd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if efd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Waker { efd })
    }

    pub fn fd(&self) -> RawFd {
        self.efd
    }

    /// Wake the poll loop. Best-effort; a full counter still wakes.
    pub fn wake(&self) {
        let val: u64 = 1;
        unsafe {
            libc::write(self.efd, &val as *const u64 as *const libc::c_void, 8);
        }
    }

    /// Drain pending wake-ups so the next poll blocks again.
    pub fn drain(&self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(self.efd, &mut buf as *mut u64 as *mut libc::c_void, 8);
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.efd);
        }
    }
}
