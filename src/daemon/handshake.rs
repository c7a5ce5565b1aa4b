use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::{close, read, write};

use crate::error::{DriverError, DriverResult};

const CONTINUE_TOKEN: u8 = 1;

/// A UNIX stream socket pair used as the parent->child "proceed" signal (C5). The
/// child blocks reading the one-byte token before doing anything that depends on
/// post-clone setup; the parent writes it only once that setup has succeeded.
pub struct Handshake {
    parent_end: Option<OwnedFd>,
    child_end: Option<OwnedFd>,
}

impl Handshake {
    pub fn create() -> DriverResult<Self> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .map_err(|e| DriverError::Internal(format!("socketpair failed: {}", e)))?;

        Ok(Self {
            parent_end: Some(a),
            child_end: Some(b),
        })
    }

    /// Raw fd of the child's end, valid only before the child process has cloned
    /// off of this one (the fd is inherited across `clone`/`fork`).
    pub fn child_fd(&self) -> Option<RawFd> {
        self.child_end.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn parent_fd(&self) -> Option<RawFd> {
        self.parent_end.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Parent-side: close the child end (the clone'd child keeps its own copy)
    /// and write the CONTINUE token, retrying on partial writes.
    pub fn release_child(&mut self) -> DriverResult<()> {
        self.close_child_end();

        let fd = self
            .parent_end
            .as_ref()
            .ok_or_else(|| DriverError::Internal("handshake parent end already closed".into()))?
            .as_raw_fd();

        let mut remaining: &[u8] = &[CONTINUE_TOKEN];
        while !remaining.is_empty() {
            match write(unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fd) }, remaining) {
                Ok(0) => return Err(DriverError::Internal("handshake write returned 0".into())),
                Ok(n) => remaining = &remaining[n..],
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(DriverError::Internal(format!("handshake write failed: {}", e))),
            }
        }

        Ok(())
    }

    pub fn close_parent_end(&mut self) {
        self.parent_end = None;
    }

    pub fn close_child_end(&mut self) {
        self.child_end = None;
    }

    /// Closes both ends unconditionally; safe to call more than once. Invariant 4
    /// of §3 requires this on every exit path.
    pub fn close_both(&mut self) {
        self.close_parent_end();
        self.close_child_end();
    }
}

impl Drop for Handshake {
    fn drop(&mut self) {
        self.close_both();
    }
}

/// Child-side half of the protocol, run after `clone` inside the container-root
/// process: close the parent's end, block reading the one-byte token.
pub fn await_continue(own_fd: RawFd, parent_fd: RawFd) -> DriverResult<()> {
    let _ = close(parent_fd);

    let mut byte = [0u8; 1];
    loop {
        match read(own_fd, &mut byte) {
            Ok(0) => return Err(DriverError::Internal("handshake socket closed before CONTINUE".into())),
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(DriverError::Internal(format!("handshake read failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_sends_exactly_one_continue_byte() {
        let mut hs = Handshake::create().unwrap();
        let child_fd = hs.child_fd().unwrap();

        hs.release_child().unwrap();

        let mut buf = [0u8; 2];
        let n = read(child_fd, &mut buf).unwrap();
        assert_eq!(n, 1);
        assert_eq!(buf[0], CONTINUE_TOKEN);
    }

    #[test]
    fn close_both_is_idempotent() {
        let mut hs = Handshake::create().unwrap();
        hs.close_both();
        hs.close_both();
        assert!(hs.parent_fd().is_none());
        assert!(hs.child_fd().is_none());
    }
}
