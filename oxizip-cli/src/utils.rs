//! Utility functions for the CLI.

use dialoguer::Password;
use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use oxizip_archive::ZipEntry;
use std::time::{SystemTime, UNIX_EPOCH};

/// Create a progress bar with standard styling.
pub fn create_progress_bar(len: u64, enable: bool) -> ProgressBar {
    if !enable {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("█▓▒░ "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Check if a name matches the filter patterns.
/// - If include patterns are specified, the name must match at least one
/// - If exclude patterns are specified, the name must not match any
pub fn matches_filters(name: &str, include: &[String], exclude: &[String]) -> bool {
    let matches = |pattern: &String| Pattern::new(pattern).is_ok_and(|p| p.matches(name));

    if exclude.iter().any(matches) {
        return false;
    }
    include.is_empty() || include.iter().any(matches)
}

/// Entries that pass the include/exclude filters.
pub fn filter_entries<'a>(
    entries: &'a [ZipEntry],
    include: &[String],
    exclude: &[String],
) -> Vec<&'a ZipEntry> {
    entries
        .iter()
        .filter(|e| matches_filters(e.name(), include, exclude))
        .collect()
}

/// Space saved by compression, in percent.
pub fn savings(size: u64, compressed: u64) -> f64 {
    if size == 0 {
        0.0
    } else {
        (1.0 - compressed as f64 / size as f64) * 100.0
    }
}

/// Seconds since the Unix epoch, or 0 for earlier times.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Method label shown in listings; AES entries show the inner method.
pub fn method_label(entry: &ZipEntry) -> String {
    match entry.aes() {
        Ok(Some(aes)) => format!("{}+AES{}", aes.method.name(), aes.strength.bits()),
        _ if entry.is_encrypted() => format!("{}+ZC", entry.method().name()),
        _ => entry.method().name().to_string(),
    }
}

/// Print entries in a formatted table.
pub fn print_entries(entries: &[&ZipEntry], verbose: bool) {
    if !verbose {
        for entry in entries {
            println!("{}", entry.name());
        }
        return;
    }

    println!(
        "{:>12} {:>12} {:>6} {:>14} {:>8}  Name",
        "Size", "Compressed", "Ratio", "Method", "CRC",
    );
    println!("{}", "-".repeat(72));

    let mut total_size = 0u64;
    let mut total_compressed = 0u64;
    for entry in entries {
        let ratio = if entry.uncompressed_size() > 0 {
            format!("{:.1}%", savings(entry.uncompressed_size(), entry.compressed_size()))
        } else {
            "-".to_string()
        };
        let type_prefix = if entry.is_directory() { "d " } else { "  " };

        println!(
            "{:>12} {:>12} {:>6} {:>14} {:08x}  {}{}",
            entry.uncompressed_size(),
            entry.compressed_size(),
            ratio,
            method_label(entry),
            entry.crc32(),
            type_prefix,
            entry.name()
        );

        total_size += entry.uncompressed_size();
        total_compressed += entry.compressed_size();
    }

    println!("{}", "-".repeat(72));
    println!(
        "{:>12} {:>12} {:>5.1}%                           {} entries",
        total_size,
        total_compressed,
        savings(total_size, total_compressed),
        entries.len()
    );
}

/// The password from the command line, or an interactive prompt.
pub fn resolve_password(
    given: Option<String>,
    confirm: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(password) = given {
        return Ok(password);
    }
    let mut prompt = Password::new().with_prompt("Password");
    if confirm {
        prompt = prompt.with_confirmation("Repeat password", "Passwords do not match");
    }
    Ok(prompt.interact()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_filters() {
        let include = vec!["*.txt".to_string()];
        let exclude = vec!["secret/*".to_string()];
        assert!(matches_filters("notes.txt", &include, &exclude));
        assert!(!matches_filters("image.png", &include, &exclude));
        assert!(!matches_filters("secret/notes.txt", &include, &exclude));
        assert!(matches_filters("anything", &[], &[]));
    }

    #[test]
    fn test_savings() {
        assert_eq!(savings(0, 0), 0.0);
        assert_eq!(savings(100, 25), 75.0);
    }
}
