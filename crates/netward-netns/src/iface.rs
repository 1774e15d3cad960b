//! Interface-level operations performed inside a namespace.
//!
//! These helpers act on whatever network namespace the *calling thread*
//! currently occupies. Callers are responsible for being on the right
//! thread (see [`crate::worker`]).

use netward_core::error::ConfigError;
use netward_core::{Error, Result};
use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
use std::os::fd::AsRawFd;

/// Bring a network interface up, `ip link set <name> up` style.
///
/// Uses the `SIOCGIFFLAGS`/`SIOCSIFFLAGS` ioctl pair on a scratch datagram
/// socket; nix has no wrapper for these.
pub fn set_link_up(name: &str) -> Result<()> {
    let sock = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| Error::sys("socket(AF_INET, SOCK_DGRAM)", e))?;

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    let bytes = name.as_bytes();
    if bytes.len() >= ifr.ifr_name.len() {
        return Err(Error::Config(ConfigError::Validation(format!(
            "interface name too long: {name}"
        ))));
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    // SAFETY: ifr is a properly zeroed ifreq and the socket fd is valid for
    // the duration of both calls.
    unsafe {
        if libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFFLAGS as _, &mut ifr) < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        ifr.ifr_ifru.ifru_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        if libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFFLAGS as _, &ifr) < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }

    tracing::debug!(interface = name, "link up");
    Ok(())
}

/// List interface names visible in the calling thread's namespace.
pub fn interface_names() -> Result<Vec<String>> {
    let addrs = nix::ifaddrs::getifaddrs().map_err(|e| Error::sys("getifaddrs", e))?;
    let mut names: Vec<String> = addrs.map(|ifa| ifa.interface_name).collect();
    names.sort();
    names.dedup();
    Ok(names)
}
