use std::io;

/// Sends the graceful termination request to a running diagnostic.
pub trait Terminator: Send + Sync {
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// Delivers SIGTERM. Never escalates to SIGKILL.
#[derive(Debug, Default, Clone, Copy)]
pub struct SigtermTerminator;

#[cfg(unix)]
impl Terminator for SigtermTerminator {
    fn terminate(&self, pid: u32) -> io::Result<()> {
        let pid_t: libc::pid_t = pid
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))?;

        // SAFETY: plain integer arguments, errno is read right after the call.
        let result = unsafe { libc::kill(pid_t, libc::SIGTERM) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(not(unix))]
impl Terminator for SigtermTerminator {
    fn terminate(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "graceful termination is only available on unix",
        ))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records every request and forwards it to SIGTERM so test children never linger.
    /// Requests listed in `fail_on` are still delivered but reported as failures.
    #[derive(Default)]
    pub struct RecordingTerminator {
        requests: Mutex<Vec<u32>>,
        fail_on: Mutex<Vec<usize>>,
    }

    impl RecordingTerminator {
        pub fn new() -> Self {
            Self::default()
        }

        /// Report the `n`th request (zero based) as rejected.
        pub fn failing_request(self, n: usize) -> Self {
            self.fail_on.lock().unwrap().push(n);
            self
        }

        pub fn requests(&self) -> Vec<u32> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Terminator for RecordingTerminator {
        fn terminate(&self, pid: u32) -> io::Result<()> {
            let mut requests = self.requests.lock().unwrap();
            let index = requests.len();
            requests.push(pid);
            SigtermTerminator.terminate(pid)?;
            if self.fail_on.lock().unwrap().contains(&index) {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "termination rejected",
                ));
            }
            Ok(())
        }
    }
}
