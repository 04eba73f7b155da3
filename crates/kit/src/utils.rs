//! Size parsing shared by the CLI, the settings file and the console wizard.

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;

const MIB_PER_GIB: u64 = 1024;
const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// Largest disk size accepted anywhere (1 PiB)
pub const MAX_DISK_SIZE_GIB: u64 = 1024 * 1024;

/// Split "20G" into ("20", "G"); the unit part is uppercased.
fn split_size(size_str: &str) -> Result<(&str, String)> {
    let size_str = size_str.trim();
    if size_str.is_empty() {
        return Err(eyre!("Size specification cannot be empty"));
    }
    let pos = size_str
        .rfind(|c: char| c.is_ascii_digit())
        .ok_or_else(|| eyre!("Invalid size format: {}", size_str))?;
    let (num, unit) = size_str.split_at(pos + 1);
    Ok((num, unit.trim().to_ascii_uppercase()))
}

/// Parse a memory string (like "2G", "1024M", "512") to mebibytes
pub fn parse_memory_to_mb(memory_str: &str) -> Result<u64> {
    let (number_part, unit) = split_size(memory_str)?;
    let mb = match unit.as_str() {
        "G" | "GB" | "GIB" => {
            let gb: f64 = number_part
                .parse()
                .context("Invalid number in memory specification")?;
            (gb * MIB_PER_GIB as f64) as u64
        }
        "" | "M" | "MB" | "MIB" => number_part
            .parse()
            .context("Invalid number in memory specification")?,
        "K" | "KB" | "KIB" => {
            let kb: u64 = number_part
                .parse()
                .context("Invalid number in memory specification")?;
            kb / 1024
        }
        other => return Err(eyre!("Unknown memory unit: {}", other)),
    };
    if mb == 0 {
        return Err(eyre!("Memory must be at least 1 MiB: {}", memory_str));
    }
    Ok(mb)
}

/// Parse a disk size (like "20G", "1T", "10240M", or a plain number of GiB)
/// into whole gibibytes, rounding partial gibibytes up.
pub fn parse_disk_size_to_gib(size_str: &str) -> Result<u64> {
    let (number_part, unit) = split_size(size_str)?;
    let number: u64 = number_part
        .parse()
        .with_context(|| format!("Invalid number in size: {}", number_part))?;
    let gib = match unit.as_str() {
        "" | "G" | "GB" | "GIB" => number,
        "T" | "TB" | "TIB" => number
            .checked_mul(1024)
            .ok_or_else(|| eyre!("Disk size is too large: {}", size_str))?,
        "M" | "MB" | "MIB" => number.div_ceil(MIB_PER_GIB),
        other => return Err(eyre!("Unknown size unit: {}", other)),
    };
    if gib == 0 {
        return Err(eyre!("Disk size must be at least 1 GiB: {}", size_str));
    }
    if gib > MAX_DISK_SIZE_GIB {
        return Err(eyre!(
            "Disk size exceeds the {} GiB limit: {}",
            MAX_DISK_SIZE_GIB,
            size_str
        ));
    }
    Ok(gib)
}

/// Convert gibibytes to bytes
pub fn gib_to_bytes(gib: u64) -> Result<u64> {
    gib.checked_mul(BYTES_PER_GIB)
        .ok_or_else(|| eyre!("{} GiB does not fit in a byte count", gib))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory_to_mb("2G").unwrap(), 2048);
        assert_eq!(parse_memory_to_mb("1.5g").unwrap(), 1536);
        assert_eq!(parse_memory_to_mb("1024M").unwrap(), 1024);
        assert_eq!(parse_memory_to_mb("512").unwrap(), 512);
        assert_eq!(parse_memory_to_mb("2097152K").unwrap(), 2048);
        assert_eq!(parse_memory_to_mb(" 4G ").unwrap(), 4096);

        assert!(parse_memory_to_mb("").is_err());
        assert!(parse_memory_to_mb("G").is_err());
        assert!(parse_memory_to_mb("0").is_err());
        assert!(parse_memory_to_mb("12X").is_err());
    }

    #[test]
    fn test_parse_disk_size() {
        assert_eq!(parse_disk_size_to_gib("10").unwrap(), 10);
        assert_eq!(parse_disk_size_to_gib("20G").unwrap(), 20);
        assert_eq!(parse_disk_size_to_gib("1T").unwrap(), 1024);
        assert_eq!(parse_disk_size_to_gib("10240M").unwrap(), 10);
        assert_eq!(parse_disk_size_to_gib("1500M").unwrap(), 2);

        assert!(parse_disk_size_to_gib("0").is_err());
        assert!(parse_disk_size_to_gib("ten").is_err());
        assert!(parse_disk_size_to_gib("5P").is_err());
    }

    #[test]
    fn test_parse_disk_size_upper_bound() {
        assert_eq!(parse_disk_size_to_gib("1024T").unwrap(), MAX_DISK_SIZE_GIB);
        assert!(parse_disk_size_to_gib("1025T").is_err());
        assert!(parse_disk_size_to_gib("17179869184").is_err());
        assert!(parse_disk_size_to_gib("20000000000000000T").is_err());
    }

    #[test]
    fn test_gib_to_bytes() {
        assert_eq!(gib_to_bytes(10).unwrap(), 10_737_418_240);
        assert!(gib_to_bytes(1 << 34).is_err());
    }
}
