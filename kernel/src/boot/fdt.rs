//! Flattened device tree queries
//!
//! Only the boot-relevant subset is read: total memory, the initrd range
//! from `/chosen`, and the command line. Everything else stays with the
//! user-space servers.

use fdt::Fdt;

/// Big-endian magic in the first word of every FDT blob
pub const FDT_MAGIC: u32 = 0xd00d_feed;

/// What the queries extracted
#[derive(Debug, Clone)]
pub struct FdtInfo {
    pub total_ram: u64,
    pub initrd: Option<(u64, usize)>,
    pub cmdline: [u8; 256],
    pub cmdline_len: usize,
}

impl Default for FdtInfo {
    fn default() -> Self {
        Self {
            total_ram: 0,
            initrd: None,
            cmdline: [0; 256],
            cmdline_len: 0,
        }
    }
}

/// True when the blob starts with the FDT magic (stored big-endian).
pub fn is_fdt(bytes: &[u8]) -> bool {
    bytes.len() >= 4
        && u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == FDT_MAGIC
}

/// Decode a `linux,initrd-*` property, which is a 32- or 64-bit
/// big-endian cell depending on the platform.
fn initrd_cell(value: &[u8]) -> Option<u64> {
    match value.len() {
        4 => Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]) as u64),
        8 => Some(u64::from_be_bytes([
            value[0], value[1], value[2], value[3], value[4], value[5], value[6], value[7],
        ])),
        _ => None,
    }
}

/// Run the boot queries against a parsed tree.
pub fn parse(tree: &Fdt) -> FdtInfo {
    let mut info = FdtInfo::default();

    for region in tree.memory().regions() {
        info.total_ram += region.size.unwrap_or(0) as u64;
    }

    if let Some(bootargs) = tree.chosen().bootargs() {
        let bytes = bootargs.as_bytes();
        let length = bytes.len().min(info.cmdline.len());
        info.cmdline[..length].copy_from_slice(&bytes[..length]);
        info.cmdline_len = length;
    }

    if let Some(chosen) = tree.find_node("/chosen") {
        let start = chosen
            .property("linux,initrd-start")
            .and_then(|property| initrd_cell(property.value));
        let end = chosen
            .property("linux,initrd-end")
            .and_then(|property| initrd_cell(property.value));
        if let (Some(start), Some(end)) = (start, end) {
            if end > start {
                info.initrd = Some((start, (end - start) as usize));
            }
        }
    }

    info
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn magic_detection_is_big_endian() {
        assert!(is_fdt(&[0xd0, 0x0d, 0xfe, 0xed, 0, 0]));
        assert!(!is_fdt(&[0xed, 0xfe, 0x0d, 0xd0]));
        assert!(!is_fdt(&[0xd0, 0x0d]));
    }

    #[test]
    fn initrd_cells_decode_both_widths() {
        assert_eq!(initrd_cell(&[0x02, 0x00, 0x00, 0x00]), Some(0x0200_0000));
        assert_eq!(
            initrd_cell(&[0, 0, 0, 0, 0x02, 0x00, 0x00, 0x00]),
            Some(0x0200_0000)
        );
        assert_eq!(initrd_cell(&[1, 2]), None);
    }
}
