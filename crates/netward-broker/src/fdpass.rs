//! Descriptor transfer over `SCM_RIGHTS` ancillary data.

use netward_core::{Error, Result};
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// Send `payload` with one descriptor attached as ancillary data.
///
/// The kernel duplicates the descriptor into the receiving process; the
/// caller's copy is untouched and may be closed independently afterwards.
pub fn send_with_fd(stream: &UnixStream, payload: &[u8], fd: BorrowedFd<'_>) -> Result<()> {
    let iov = [IoSlice::new(payload)];
    let fds = [fd.as_raw_fd()];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    let sent = sendmsg::<()>(
        stream.as_raw_fd(),
        &iov,
        &cmsgs,
        MsgFlags::empty(),
        None,
    )
    .map_err(|e| Error::TransferFailure(format!("sendmsg: {e}")))?;
    if sent != payload.len() {
        return Err(Error::TransferFailure(format!(
            "short descriptor send: {sent} of {} bytes",
            payload.len()
        )));
    }
    Ok(())
}

/// Receive into `buf`, capturing a descriptor if one rode along.
///
/// Returns the number of payload bytes read and the received descriptor,
/// if any. A zero-byte read means the peer closed the channel.
pub fn recv_with_fd(stream: &UnixStream, buf: &mut [u8]) -> Result<(usize, Option<OwnedFd>)> {
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);
    let mut iov = [IoSliceMut::new(buf)];
    let msg = recvmsg::<()>(
        stream.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::empty(),
    )
    .map_err(|e| match e {
        nix::errno::Errno::EAGAIN => Error::TransferFailure("receive deadline expired".into()),
        other => Error::TransferFailure(format!("recvmsg: {other}")),
    })?;

    let mut fd = None;
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            // SAFETY: the kernel installed these descriptors into this
            // process for us to own.
            fd = received
                .first()
                .map(|raw| unsafe { OwnedFd::from_raw_fd(*raw) });
        }
    }
    Ok((msg.bytes, fd))
}
