// Host information used for built-in properties and run details

use sysinfo::System;

/// Host name, or "localhost" if it cannot be determined
pub fn hostname() -> String {
    System::host_name()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Number of logical CPUs, at least 1
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Short operating system description, e.g. "Ubuntu 22.04 (linux x86_64)"
pub fn os_description() -> String {
    let arch = std::env::consts::ARCH;
    let os = std::env::consts::OS;
    match System::long_os_version() {
        Some(long) if !long.is_empty() => format!("{} ({} {})", long, os, arch),
        _ => format!("{} {}", os, arch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_info_is_populated() {
        assert!(!hostname().is_empty());
        assert!(cpu_count() >= 1);
        assert!(os_description().contains(std::env::consts::OS));
    }
}
