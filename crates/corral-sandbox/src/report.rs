//! Post-mortem status block on fd 3.
//!
//! The schema is fixed and line-oriented; downstream graders parse it with
//! `fscanf`-grade tooling, so column widths and the trailing newline matter.
//! Write errors are ignored (the reader may be gone) and fd 3 is closed
//! right away so the reader can proceed before cleanup finishes.

use std::os::fd::RawFd;

use crate::supervisor::{Verdict, WaitInfo};

/// The report goes to fd 3 by convention: `corral ... 3>stat`.
pub const STATUS_FD: RawFd = 3;

/// Render the report block.
pub fn render(verdict: &Verdict, stat: WaitInfo) -> String {
    format!(
        "MEMORY   {}\n\
         CPUTIME  {:.3}\n\
         REALTIME {:.3}\n\
         SIGNALED {}\n\
         EXITCODE {}\n\
         TERMSIG  {}\n\
         EXCEED   {}\n",
        verdict.memory,
        verdict.cpu,
        verdict.real,
        i32::from(stat.signaled),
        stat.exit_code,
        stat.term_signal,
        verdict.exceed,
    )
}

/// Write the report to fd 3 and close it.
pub fn write_status(verdict: &Verdict, stat: WaitInfo) {
    let text = render(verdict, stat);
    let bytes = text.as_bytes();
    let mut written = 0;
    while written < bytes.len() {
        let n = unsafe {
            libc::write(
                STATUS_FD,
                bytes[written..].as_ptr().cast(),
                bytes.len() - written,
            )
        };
        if n <= 0 {
            break;
        }
        written += n as usize;
    }
    unsafe { libc::close(STATUS_FD) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::Exceed;

    #[test]
    fn schema_is_exact() {
        let verdict = Verdict {
            memory: 67108864,
            cpu: 0.1,
            real: 0.75,
            exceed: Exceed::Memory,
        };
        let stat = WaitInfo {
            signaled: true,
            exit_code: 0,
            term_signal: 9,
        };
        assert_eq!(
            render(&verdict, stat),
            "MEMORY   67108864\n\
             CPUTIME  0.100\n\
             REALTIME 0.750\n\
             SIGNALED 1\n\
             EXITCODE 0\n\
             TERMSIG  9\n\
             EXCEED   MEMORY\n"
        );
    }

    #[test]
    fn clean_exit_reports_none() {
        let verdict = Verdict {
            memory: 802816,
            cpu: 0.004,
            real: 0.021,
            exceed: Exceed::None,
        };
        let stat = WaitInfo {
            signaled: false,
            exit_code: 3,
            term_signal: 0,
        };
        let text = render(&verdict, stat);
        assert!(text.contains("EXITCODE 3\n"));
        assert!(text.contains("SIGNALED 0\n"));
        assert!(text.ends_with("EXCEED   none\n"));
    }
}
