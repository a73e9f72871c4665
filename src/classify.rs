//! Socket error classification.
//!
//! Every network failure goes through [`is_fatal`] before a retry. A static
//! table maps OS error codes of the networking range to a category and a
//! fatal flag:
//!
//! ```text
//! io::Error ── raw_os_error() ──► table ──► { kind, fatal }
//!                                  │
//!                        unknown ──┴──► transient
//! ```
//!
//! Fatal errors stop the retry loop and move the peer to
//! `ERROR_CONNECTION`. Everything else (including codec and protocol
//! failures) is retried after a short delay.

use std::fmt;
use std::io;

use crate::net::NetError;

/// Broad category of a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Process or descriptor level failure.
    Sys,
    /// Routing, interface or address failure.
    Net,
    /// Connection establishment or teardown.
    Con,
    /// Failure while pushing bytes.
    Send,
    /// Malformed data or unsupported protocol option.
    Data,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Sys => "SYS",
            ErrorKind::Net => "NET",
            ErrorKind::Con => "CON",
            ErrorKind::Send => "SEND",
            ErrorKind::Data => "DATA",
        })
    }
}

/// Operating system family an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    /// POSIX errno values, as exposed by `libc` on the build target.
    Unix,
    /// Winsock `WSAE*` codes.
    Windows,
}

/// One row of the classification table.
#[derive(Debug, Clone, Copy)]
pub struct ErrorEntry {
    /// Family the code belongs to.
    pub os: OsFamily,
    /// Raw OS error code.
    pub code: i32,
    /// Symbolic name, e.g. `ECONNREFUSED`.
    pub name: &'static str,
    /// Category.
    pub kind: ErrorKind,
    /// Whether retrying on the same peer is pointless.
    pub fatal: bool,
    /// Short human-readable description.
    pub description: &'static str,
}

macro_rules! entry {
    ($os:ident, $code:expr, $name:literal, $kind:ident, $fatal:literal, $desc:literal) => {
        ErrorEntry {
            os: OsFamily::$os,
            code: $code,
            name: $name,
            kind: ErrorKind::$kind,
            fatal: $fatal,
            description: $desc,
        }
    };
}

// ============================================================================
// Tables
// ============================================================================

/// POSIX errno table for the networking range.
#[cfg(unix)]
pub static UNIX_ERRORS: &[ErrorEntry] = &[
    entry!(Unix, libc::EINTR, "EINTR", Sys, false, "Interrupted system call"),
    entry!(Unix, libc::EBADF, "EBADF", Sys, true, "Bad file descriptor"),
    entry!(Unix, libc::EACCES, "EACCES", Sys, true, "Permission denied"),
    entry!(Unix, libc::EFAULT, "EFAULT", Sys, true, "Bad address"),
    entry!(Unix, libc::EINVAL, "EINVAL", Sys, false, "Invalid argument"),
    entry!(Unix, libc::EMFILE, "EMFILE", Sys, false, "Too many open files"),
    entry!(Unix, libc::ENOMEM, "ENOMEM", Sys, false, "Out of memory"),
    entry!(Unix, libc::EAGAIN, "EAGAIN", Send, false, "Resource temporarily unavailable"),
    entry!(Unix, libc::EINPROGRESS, "EINPROGRESS", Con, false, "Operation now in progress"),
    entry!(Unix, libc::EALREADY, "EALREADY", Con, false, "Operation already in progress"),
    entry!(Unix, libc::ENOTSOCK, "ENOTSOCK", Sys, true, "Socket operation on non-socket"),
    entry!(Unix, libc::EDESTADDRREQ, "EDESTADDRREQ", Send, true, "Destination address required"),
    entry!(Unix, libc::EMSGSIZE, "EMSGSIZE", Data, false, "Message too long"),
    entry!(Unix, libc::EPROTOTYPE, "EPROTOTYPE", Data, true, "Protocol wrong type for socket"),
    entry!(Unix, libc::ENOPROTOOPT, "ENOPROTOOPT", Data, true, "Protocol not available"),
    entry!(Unix, libc::EPROTONOSUPPORT, "EPROTONOSUPPORT", Data, true, "Protocol not supported"),
    entry!(Unix, libc::EOPNOTSUPP, "EOPNOTSUPP", Data, true, "Operation not supported"),
    entry!(Unix, libc::EAFNOSUPPORT, "EAFNOSUPPORT", Net, true, "Address family not supported"),
    entry!(Unix, libc::EADDRINUSE, "EADDRINUSE", Net, true, "Address already in use"),
    entry!(Unix, libc::EADDRNOTAVAIL, "EADDRNOTAVAIL", Net, true, "Cannot assign requested address"),
    entry!(Unix, libc::ENETDOWN, "ENETDOWN", Net, true, "Network is down"),
    entry!(Unix, libc::ENETUNREACH, "ENETUNREACH", Net, true, "Network is unreachable"),
    entry!(Unix, libc::ENETRESET, "ENETRESET", Net, false, "Network dropped connection on reset"),
    entry!(Unix, libc::ECONNABORTED, "ECONNABORTED", Con, false, "Software caused connection abort"),
    entry!(Unix, libc::ECONNRESET, "ECONNRESET", Con, false, "Connection reset by peer"),
    entry!(Unix, libc::ENOBUFS, "ENOBUFS", Send, false, "No buffer space available"),
    entry!(Unix, libc::EISCONN, "EISCONN", Con, false, "Socket is already connected"),
    entry!(Unix, libc::ENOTCONN, "ENOTCONN", Con, true, "Socket is not connected"),
    entry!(Unix, libc::ESHUTDOWN, "ESHUTDOWN", Send, true, "Cannot send after socket shutdown"),
    entry!(Unix, libc::ETIMEDOUT, "ETIMEDOUT", Con, false, "Connection timed out"),
    entry!(Unix, libc::ECONNREFUSED, "ECONNREFUSED", Con, true, "Connection refused"),
    entry!(Unix, libc::EHOSTDOWN, "EHOSTDOWN", Net, true, "Host is down"),
    entry!(Unix, libc::EHOSTUNREACH, "EHOSTUNREACH", Net, true, "No route to host"),
    entry!(Unix, libc::EPIPE, "EPIPE", Send, true, "Broken pipe"),
];

/// Winsock table, keyed by the numeric `WSAE*` codes.
pub static WINDOWS_ERRORS: &[ErrorEntry] = &[
    entry!(Windows, 10004, "WSAEINTR", Sys, false, "Interrupted function call"),
    entry!(Windows, 10009, "WSAEBADF", Sys, true, "File handle is not valid"),
    entry!(Windows, 10013, "WSAEACCES", Sys, true, "Permission denied"),
    entry!(Windows, 10014, "WSAEFAULT", Sys, true, "Bad address"),
    entry!(Windows, 10022, "WSAEINVAL", Sys, false, "Invalid argument"),
    entry!(Windows, 10024, "WSAEMFILE", Sys, false, "Too many open sockets"),
    entry!(Windows, 10035, "WSAEWOULDBLOCK", Send, false, "Resource temporarily unavailable"),
    entry!(Windows, 10036, "WSAEINPROGRESS", Con, false, "Operation now in progress"),
    entry!(Windows, 10037, "WSAEALREADY", Con, false, "Operation already in progress"),
    entry!(Windows, 10038, "WSAENOTSOCK", Sys, true, "Socket operation on nonsocket"),
    entry!(Windows, 10039, "WSAEDESTADDRREQ", Send, true, "Destination address required"),
    entry!(Windows, 10040, "WSAEMSGSIZE", Data, false, "Message too long"),
    entry!(Windows, 10041, "WSAEPROTOTYPE", Data, true, "Protocol wrong type for socket"),
    entry!(Windows, 10042, "WSAENOPROTOOPT", Data, true, "Bad protocol option"),
    entry!(Windows, 10043, "WSAEPROTONOSUPPORT", Data, true, "Protocol not supported"),
    entry!(Windows, 10044, "WSAESOCKTNOSUPPORT", Data, true, "Socket type not supported"),
    entry!(Windows, 10045, "WSAEOPNOTSUPP", Data, true, "Operation not supported"),
    entry!(Windows, 10046, "WSAEPFNOSUPPORT", Net, true, "Protocol family not supported"),
    entry!(Windows, 10047, "WSAEAFNOSUPPORT", Net, true, "Address family not supported"),
    entry!(Windows, 10048, "WSAEADDRINUSE", Net, true, "Address already in use"),
    entry!(Windows, 10049, "WSAEADDRNOTAVAIL", Net, true, "Cannot assign requested address"),
    entry!(Windows, 10050, "WSAENETDOWN", Net, true, "Network is down"),
    entry!(Windows, 10051, "WSAENETUNREACH", Net, true, "Network is unreachable"),
    entry!(Windows, 10052, "WSAENETRESET", Net, false, "Network dropped connection on reset"),
    entry!(Windows, 10053, "WSAECONNABORTED", Con, false, "Software caused connection abort"),
    entry!(Windows, 10054, "WSAECONNRESET", Con, false, "Connection reset by peer"),
    entry!(Windows, 10055, "WSAENOBUFS", Send, false, "No buffer space available"),
    entry!(Windows, 10056, "WSAEISCONN", Con, false, "Socket is already connected"),
    entry!(Windows, 10057, "WSAENOTCONN", Con, true, "Socket is not connected"),
    entry!(Windows, 10058, "WSAESHUTDOWN", Send, true, "Cannot send after socket shutdown"),
    entry!(Windows, 10060, "WSAETIMEDOUT", Con, false, "Connection timed out"),
    entry!(Windows, 10061, "WSAECONNREFUSED", Con, true, "Connection refused"),
    entry!(Windows, 10064, "WSAEHOSTDOWN", Net, true, "Host is down"),
    entry!(Windows, 10065, "WSAEHOSTUNREACH", Net, true, "No route to host"),
];

/// Table for the platform this crate is built for.
pub fn native_table() -> &'static [ErrorEntry] {
    #[cfg(unix)]
    {
        UNIX_ERRORS
    }
    #[cfg(not(unix))]
    {
        WINDOWS_ERRORS
    }
}

/// Look up a raw OS error code in the native table.
pub fn lookup(code: i32) -> Option<&'static ErrorEntry> {
    native_table().iter().find(|entry| entry.code == code)
}

// ============================================================================
// Classification
// ============================================================================

/// Classification outcome for one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Category of the error.
    pub kind: ErrorKind,
    /// Whether retries should stop.
    pub fatal: bool,
    /// Symbolic OS name, when the error came from a known OS code.
    pub name: Option<&'static str>,
}

/// Classify an I/O error through the native table.
pub fn classify_io(error: &io::Error) -> Classification {
    match error.raw_os_error().and_then(lookup) {
        Some(entry) => Classification {
            kind: entry.kind,
            fatal: entry.fatal,
            name: Some(entry.name),
        },
        None => Classification {
            kind: match error.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Con,
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => ErrorKind::Data,
                _ => ErrorKind::Sys,
            },
            fatal: false,
            name: None,
        },
    }
}

/// Classify any network failure.
pub fn classify(error: &NetError) -> Classification {
    match error {
        NetError::Io(e) => classify_io(e),
        NetError::Timeout => Classification {
            kind: ErrorKind::Con,
            fatal: false,
            name: None,
        },
        NetError::Codec(_) | NetError::Protocol(_) => Classification {
            kind: ErrorKind::Data,
            fatal: false,
            name: None,
        },
        NetError::Lifecycle(_) => Classification {
            kind: ErrorKind::Sys,
            fatal: false,
            name: None,
        },
    }
}

/// Whether `error` forbids further retries on the same peer.
pub fn is_fatal(error: &NetError) -> bool {
    classify(error).fatal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;
    use crate::net::ProtocolError;

    fn os(code: i32) -> NetError {
        NetError::Io(io::Error::from_raw_os_error(code))
    }

    #[cfg(unix)]
    #[test]
    fn test_fatal_unix_errors() {
        for code in [
            libc::ECONNREFUSED,
            libc::EHOSTUNREACH,
            libc::ENETUNREACH,
            libc::EPIPE,
            libc::ENOTCONN,
            libc::EADDRINUSE,
        ] {
            assert!(is_fatal(&os(code)), "errno {code} should be fatal");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_transient_unix_errors() {
        for code in [
            libc::EINTR,
            libc::EAGAIN,
            libc::ENOBUFS,
            libc::ETIMEDOUT,
            libc::ECONNRESET,
        ] {
            assert!(!is_fatal(&os(code)), "errno {code} should be transient");
        }
    }

    #[test]
    fn test_every_native_entry_is_classified() {
        for entry in native_table() {
            let classified = classify(&os(entry.code));
            assert_eq!(classified.fatal, entry.fatal, "{}", entry.name);
            assert_eq!(classified.kind, entry.kind, "{}", entry.name);
            assert_eq!(classified.name, Some(entry.name));
        }
    }

    #[test]
    fn test_tables_have_unique_codes() {
        for table in [native_table(), WINDOWS_ERRORS] {
            let mut codes: Vec<i32> = table.iter().map(|e| e.code).collect();
            codes.sort_unstable();
            let before = codes.len();
            codes.dedup();
            assert_eq!(before, codes.len());
        }
    }

    #[test]
    fn test_windows_table_matches_fatal_policy() {
        let fatal = |name: &str| {
            WINDOWS_ERRORS
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.fatal)
        };
        assert_eq!(fatal("WSAECONNREFUSED"), Some(true));
        assert_eq!(fatal("WSAEHOSTUNREACH"), Some(true));
        assert_eq!(fatal("WSAECONNRESET"), Some(false));
        assert_eq!(fatal("WSAETIMEDOUT"), Some(false));
        assert!(WINDOWS_ERRORS.iter().all(|e| e.os == OsFamily::Windows));
    }

    #[test]
    fn test_unknown_and_non_os_errors_are_transient() {
        assert!(!is_fatal(&os(99_999)));
        assert!(!is_fatal(&NetError::Io(io::Error::other("boom"))));
        assert!(!is_fatal(&NetError::Timeout));
        assert!(!is_fatal(&NetError::Codec(CodecError::EncodeType)));
        assert!(!is_fatal(&NetError::Protocol(ProtocolError::Refused)));
        assert_eq!(
            classify(&NetError::Codec(CodecError::InvalidBlock("x".into()))).kind,
            ErrorKind::Data
        );
    }
}
