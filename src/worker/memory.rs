//! Resident set size of the current process.

#[cfg(target_os = "linux")]
const STATM: &str = "/proc/self/statm";

/// RSS in bytes, `None` where it cannot be determined.
#[cfg(target_os = "linux")]
pub(crate) fn resident_set_size() -> Option<u64> {
    let statm = std::fs::read_to_string(STATM).ok()?;
    // second field: resident pages
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * page_size()?)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn resident_set_size() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn page_size() -> Option<u64> {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    (size > 0).then_some(size as u64)
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn reports_nonzero_rss() {
        let rss = resident_set_size().unwrap();
        assert!(rss > 0);
        assert_eq!(rss % page_size().unwrap(), 0);
    }
}
