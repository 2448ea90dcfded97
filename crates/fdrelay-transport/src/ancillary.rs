//! `sendmsg`/`recvmsg` with `SCM_RIGHTS` control messages.
//!
//! Both the blocking and the tokio sockets funnel through these functions.
//! They work on borrowed descriptors and never block on their own: a
//! non-blocking socket yields `WouldBlock` like any other read or write.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

/// Descriptors the receive control buffer can hold from a single message.
pub const MAX_FDS_PER_MESSAGE: usize = 8;

const FD_SIZE: usize = mem::size_of::<libc::c_int>();

// u64 words keep the buffer aligned for `cmsghdr`. 128 bytes covers
// CMSG_SPACE(MAX_FDS_PER_MESSAGE * 4) on every supported target.
const CONTROL_WORDS: usize = 16;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Result of one `recvmsg` call.
#[derive(Debug)]
pub struct RecvOutcome {
    /// Payload bytes written into the caller's buffer. Zero means end-of-stream.
    pub len: usize,
    /// Bytes at the start of the buffer that were written ahead of the
    /// descriptor-carrying message. Always zero without descriptors.
    pub leading: usize,
    /// Every descriptor found in `SCM_RIGHTS` messages, already owned.
    pub descriptors: Vec<OwnedFd>,
    /// `MSG_TRUNC`: the datagram did not fit the buffer.
    pub payload_truncated: bool,
    /// `MSG_CTRUNC`: the kernel discarded ancillary data.
    pub control_truncated: bool,
}

/// Receive the next message without gluing earlier text onto a descriptor.
///
/// On a stream socket a single `recvmsg` may return the bytes of several
/// writes, with the descriptor of the last one attached to all of them. The
/// queue is peeked first; when it holds a descriptor, the bytes ahead of it
/// are read one at a time until the descriptor arrives, then the rest of that
/// write is read. [`RecvOutcome::leading`] counts the bytes ahead of it.
pub fn recv_message(socket: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<RecvOutcome> {
    let peeked = recvmsg_with_flags(socket, buf, libc::MSG_PEEK)?;
    let available = peeked.len;
    let carries_descriptor = !peeked.descriptors.is_empty() || peeked.control_truncated;
    // Peeked descriptors are duplicates; the read below delivers the real ones.
    drop(peeked);

    if available == 0 {
        return recv_with_descriptors(socket, buf);
    }
    if !carries_descriptor {
        return recv_with_descriptors(socket, &mut buf[..available]);
    }

    let mut consumed = 0;
    while consumed < available {
        let mut outcome = recv_with_descriptors(socket, &mut buf[consumed..consumed + 1])?;
        if outcome.len == 0 {
            break;
        }
        consumed += 1;
        if outcome.descriptors.is_empty() && !outcome.control_truncated {
            continue;
        }

        let leading = consumed - 1;
        if consumed < available {
            let rest = recv_with_descriptors(socket, &mut buf[consumed..available])?;
            consumed += rest.len;
            outcome.descriptors.extend(rest.descriptors);
            outcome.control_truncated |= rest.control_truncated;
        }
        outcome.len = consumed;
        outcome.leading = leading;
        return Ok(outcome);
    }

    Ok(RecvOutcome {
        len: consumed,
        leading: 0,
        descriptors: Vec::new(),
        payload_truncated: false,
        control_truncated: false,
    })
}

/// Receive one message and capture any attached descriptors.
///
/// Descriptors are wrapped into [`OwnedFd`] before this function returns, so
/// a caller that drops the outcome (or bails out with `?`) closes them.
pub fn recv_with_descriptors(socket: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<RecvOutcome> {
    recvmsg_with_flags(socket, buf, 0)
}

fn recvmsg_with_flags(
    socket: BorrowedFd<'_>,
    buf: &mut [u8],
    flags: libc::c_int,
) -> io::Result<RecvOutcome> {
    let mut control = [0u64; CONTROL_WORDS];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: buf.len(),
    };

    // SAFETY: `msghdr` is plain old data; all-zero is a valid empty header and
    // also initialises the private padding fields some targets carry.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = mem::size_of_val(&control) as _;

    let len = loop {
        // SAFETY: `msg` points at `iov` and `control`, both alive for the call.
        let rc = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, RECV_FLAGS | flags) };
        if rc >= 0 {
            break rc as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    // SAFETY: `msg` was just filled in by a successful recvmsg over `control`.
    let descriptors = unsafe { take_descriptors(&msg) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    for fd in &descriptors {
        set_cloexec(fd)?;
    }

    Ok(RecvOutcome {
        len,
        leading: 0,
        descriptors,
        payload_truncated: msg.msg_flags & libc::MSG_TRUNC != 0,
        control_truncated: msg.msg_flags & libc::MSG_CTRUNC != 0,
    })
}

/// Send `payload`, attaching `descriptor` as `SCM_RIGHTS` when given.
///
/// Returns the number of payload bytes the kernel accepted. The descriptor
/// travels with the first byte; the caller keeps its own copy open and is
/// responsible for closing it.
pub fn send_with_descriptor(
    socket: BorrowedFd<'_>,
    payload: &[u8],
    descriptor: Option<BorrowedFd<'_>>,
) -> io::Result<usize> {
    let mut control = [0u64; CONTROL_WORDS];
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    // SAFETY: see `recv_with_descriptors`.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some(fd) = descriptor {
        // SAFETY: pure size computation.
        let space = unsafe { libc::CMSG_SPACE(FD_SIZE as libc::c_uint) } as usize;
        debug_assert!(space <= mem::size_of_val(&control));
        msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = space as _;

        // SAFETY: the control buffer is aligned and large enough for one
        // cmsghdr carrying a single c_int, so CMSG_FIRSTHDR is non-null.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(FD_SIZE as libc::c_uint) as _;
            std::ptr::write_unaligned(
                libc::CMSG_DATA(cmsg).cast::<libc::c_int>(),
                fd.as_raw_fd(),
            );
        }
    }

    loop {
        // SAFETY: `msg` points at `iov` and `control`, both alive for the call.
        let rc = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, SEND_FLAGS) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Walk the control messages of `msg` and take ownership of every descriptor.
///
/// # Safety
///
/// `msg` must describe a control buffer filled in by a successful `recvmsg`.
unsafe fn take_descriptors(msg: &libc::msghdr) -> Vec<OwnedFd> {
    let mut fds = Vec::new();
    // SAFETY: guaranteed by the caller; the kernel wrote well-formed headers.
    unsafe {
        let header_len = libc::CMSG_LEN(0) as usize;
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg);
                let count = ((*cmsg).cmsg_len as usize).saturating_sub(header_len) / FD_SIZE;
                for i in 0..count {
                    let fd = std::ptr::read_unaligned(data.add(i * FD_SIZE).cast::<libc::c_int>());
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
    }
    fds
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: `fd` is owned and open.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
