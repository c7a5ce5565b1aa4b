use std::os::unix::io::{FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::epoll::{epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp};
use nix::sys::termios::{self, SetArg};
use nix::unistd::{read, write};

use crate::definition::ContainerDefinition;
use crate::error::{DriverError, DriverResult};
use crate::utils::console::ConsoleLogger;

/// One end of a PTY pair this driver owns: the master descriptor, and (for the
/// container console) the slave path the in-container init will open (C4).
pub struct PtyHandle {
    pub master: OwnedFd,
    pub slave_name: String,
}

pub struct PtyTunnel;

impl PtyTunnel {
    /// **setup_parent(def) -> master_fd**. Allocates the parent console tunnel if
    /// the definition names a console device, puts the master in raw mode, and
    /// overwrites the definition's console path with the resolved slave. Returns
    /// `None` (the spec's -1) if no console was requested.
    pub fn setup_parent(def: &mut ContainerDefinition) -> DriverResult<Option<PtyHandle>> {
        if def.console_device.is_none() {
            return Ok(None);
        }

        let handle = Self::open_pty_pair()?;
        def.console_device = Some(handle.slave_name.clone());
        Ok(Some(handle))
    }

    /// **setup_container_side() -> (master_fd, slave_name)**.
    pub fn setup_container_side() -> DriverResult<PtyHandle> {
        Self::open_pty_pair()
    }

    fn open_pty_pair() -> DriverResult<PtyHandle> {
        let master: PtyMaster = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK)
            .map_err(|e| DriverError::Internal(format!("posix_openpt failed: {}", e)))?;

        grantpt(&master).map_err(|e| DriverError::Internal(format!("grantpt failed: {}", e)))?;
        unlockpt(&master).map_err(|e| DriverError::Internal(format!("unlockpt failed: {}", e)))?;

        let slave_name =
            ptsname_r(&master).map_err(|e| DriverError::Internal(format!("ptsname failed: {}", e)))?;

        let raw_master = master.into_raw_fd();
        if let Err(e) = Self::set_raw_mode(raw_master) {
            ConsoleLogger::warning(&format!("Failed to set PTY master raw mode: {}", e));
        }

        Ok(PtyHandle {
            master: unsafe { OwnedFd::from_raw_fd(raw_master) },
            slave_name,
        })
    }

    /// Disables all line discipline on the master side: no canonical mode, no
    /// echo, no signal generation, 8-bit clean passthrough.
    fn set_raw_mode(fd: RawFd) -> DriverResult<()> {
        let borrowed = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fd) };
        let mut attrs = termios::tcgetattr(borrowed)?;
        termios::cfmakeraw(&mut attrs);
        termios::tcsetattr(borrowed, SetArg::TCSANOW, &attrs)?;
        Ok(())
    }
}

/// The forwarder pump (§4.3). Runs in a dedicated child process and never
/// returns: the original's unconditional `exit()` on the success path is
/// preserved explicitly by making this the last thing the forwarder process does.
pub fn forward(fd1: RawFd, fd2: RawFd) -> ! {
    let fds = [fd1, fd2];
    let epfd = epoll_create1(EpollCreateFlags::empty()).expect("epoll_create1 failed");

    for (i, fd) in fds.iter().enumerate() {
        let mut ev = EpollEvent::new(EpollFlags::EPOLLIN | EpollFlags::EPOLLET, i as u64);
        epoll_ctl(epfd, EpollOp::EpollCtlAdd, *fd, &mut ev).expect("epoll_ctl ADD failed");
    }

    let mut active = [false, false];
    let mut active_count: u32 = 0;
    let mut cur: usize = 0;

    loop {
        let timeout_ms: isize = if active_count > 0 { 0 } else { -1 };

        let mut events = [EpollEvent::empty(); 2];
        let n = match epoll_wait(epfd, &mut events, timeout_ms) {
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                ConsoleLogger::error(&format!("epoll_wait failed in forwarder: {}", e));
                std::process::exit(1);
            }
        };

        for event in events.iter().take(n) {
            let idx = event.data() as usize;
            let flags = event.events();
            if flags.contains(EpollFlags::EPOLLHUP) || flags.contains(EpollFlags::EPOLLERR) {
                // Edge-triggered hangup is non-fatal: ignore and keep running
                // until the parent kills this process. Re-notification will not
                // occur until the hangup condition itself changes.
                continue;
            }
            if flags.contains(EpollFlags::EPOLLIN) && !active[idx] {
                active[idx] = true;
                active_count += 1;
            }
        }

        if active_count == 0 {
            continue;
        }

        let mut byte = [0u8; 1];
        match read(fds[cur], &mut byte) {
            Ok(0) => {
                active[cur] = false;
                active_count -= 1;
            }
            Ok(_) => {
                let other = cur ^ 1;
                let borrowed_other = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fds[other]) };
                if write(borrowed_other, &byte).is_err() {
                    std::process::exit(0);
                }
                if active_count == 2 {
                    cur ^= 1;
                }
            }
            Err(Errno::EAGAIN | Errno::EWOULDBLOCK) => {
                active[cur] = false;
                active_count -= 1;
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                ConsoleLogger::error(&format!("read failed in forwarder: {}", e));
                std::process::exit(1);
            }
        }
    }
}

/// Sets `O_NONBLOCK` on an already-open descriptor; used for the container-side
/// master which `posix_openpt` does not open non-blocking by default on every
/// platform.
pub fn set_nonblocking(fd: RawFd) -> DriverResult<()> {
    let current = fcntl(fd, FcntlArg::F_GETFL).map_err(DriverError::from)?;
    let flags = OFlag::from_bits_truncate(current) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(DriverError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_parent_returns_none_without_a_console() {
        let mut def = ContainerDefinition::new("no-console");
        let handle = PtyTunnel::setup_parent(&mut def).unwrap();
        assert!(handle.is_none());
    }

    #[test]
    fn setup_parent_allocates_and_rewrites_console_path() {
        let mut def = ContainerDefinition::new("with-console");
        def.console_device = Some("/dev/ptmx".to_string());
        let handle = PtyTunnel::setup_parent(&mut def).unwrap();
        assert!(handle.is_some());
        let handle = handle.unwrap();
        assert!(def.console_device.as_deref() != Some("/dev/ptmx"));
        assert_eq!(def.console_device.as_deref(), Some(handle.slave_name.as_str()));
    }
}
