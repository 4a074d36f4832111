//! # Process title.
//!
//! Tools such as `ps` and `top` show the kernel's short command name
//! (`/proc/<pid>/comm`). The master uses `Config::name`, a worker
//! `"{name} {type} worker"`.
//!
//! The kernel keeps at most 15 bytes; longer titles are cut at a char
//! boundary. The name belongs to the calling thread, so call this from the
//! main thread (the future driven by `#[tokio::main]`).

/// Longest name the kernel stores, without the trailing nul.
#[cfg(target_os = "linux")]
const MAX_TITLE_LEN: usize = 15;

/// Sets the calling thread's OS name. Failures are logged and ignored.
#[cfg(target_os = "linux")]
pub(crate) fn set_process_title(title: &str) {
    let name = std::ffi::CString::new(truncate(title, MAX_TITLE_LEN).replace('\0', ""));
    let res = match name {
        Ok(name) => nix::sys::prctl::set_name(&name).map_err(std::io::Error::from),
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)),
    };
    match res {
        Ok(()) => tracing::debug!(title, "process title set"),
        Err(e) => tracing::debug!(title, error = %e, "cannot set process title"),
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_process_title(title: &str) {
    tracing::debug!(title, "process title not supported on this platform");
}

#[cfg(target_os = "linux")]
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
