//! Device list handling.

use crate::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

/// Parses a device list: one name per line, blank lines and `#` comments
/// ignored. Accepts LF and CRLF line endings.
pub fn parse_device_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn read_device_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_device_list(&contents))
}

/// Trims names and drops blanks and duplicates (case-insensitive, first
/// occurrence wins). Fails if nothing is left.
pub fn normalize(devices: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for device in devices {
        let device = device.trim();
        if device.is_empty() || device.starts_with('#') {
            continue;
        }
        if seen.insert(device.to_ascii_lowercase()) {
            out.push(device.to_string());
        } else {
            log::warn!("Device {} listed more than once; checking it once", device);
        }
    }

    if out.is_empty() {
        return Err(Error::ArgumentError("the device list is empty".to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_comments_and_blank_lines_are_dropped() {
        let list = "# servers\nsrv01\n\n  srv02  \n#srv03\n";
        assert_eq!(parse_device_list(list), vec!["srv01", "srv02"]);
    }

    #[test]
    fn test_line_endings_do_not_matter() {
        let unix = "srv01\n# comment\n\nsrv02.contoso.com\n10.0.0.5\n";
        let windows = unix.replace('\n', "\r\n");
        assert_eq!(parse_device_list(unix), parse_device_list(&windows));
        assert_eq!(
            parse_device_list(&windows),
            vec!["srv01", "srv02.contoso.com", "10.0.0.5"]
        );
    }

    #[test]
    fn test_read_device_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "srv01\r\n\r\n# lab\r\nsrv02\r\n").unwrap();
        assert_eq!(read_device_file(file.path()).unwrap(), vec!["srv01", "srv02"]);
    }

    #[test]
    fn test_normalize_dedupes_and_rejects_empty() {
        let devices = vec![" srv01 ".to_string(), "SRV01".to_string(), "srv02".to_string()];
        assert_eq!(normalize(&devices).unwrap(), vec!["srv01", "srv02"]);
        assert!(normalize(&["  ".to_string()]).is_err());
        assert!(normalize(&[]).is_err());
    }
}
