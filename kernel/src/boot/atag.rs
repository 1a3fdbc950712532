//! ATAG boot list parsing
//!
//! The legacy Linux boot protocol: a list of `{size_in_words, tag}`
//! headers starting with `CORE` and ending with `NONE`. Only the tags
//! the kernel needs are interpreted: memory, initrd, command line.

/// First tag of every valid list
pub const ATAG_CORE: u32 = 0x5441_0001;
/// Physical memory region
pub const ATAG_MEM: u32 = 0x5441_0002;
/// Initrd location (the modern variant with a physical address)
pub const ATAG_INITRD2: u32 = 0x5442_0005;
/// Kernel command line
pub const ATAG_CMDLINE: u32 = 0x5441_0009;
/// Terminator
pub const ATAG_NONE: u32 = 0;

/// What the walk extracted
#[derive(Debug, Clone)]
pub struct AtagInfo {
    pub total_ram: u64,
    pub initrd: Option<(u64, usize)>,
    pub cmdline: [u8; 256],
    pub cmdline_len: usize,
}

impl Default for AtagInfo {
    fn default() -> Self {
        Self {
            total_ram: 0,
            initrd: None,
            cmdline: [0; 256],
            cmdline_len: 0,
        }
    }
}

/// True when `words` starts with a CORE tag header.
pub fn is_atag_list(words: &[u32]) -> bool {
    words.len() >= 2 && words[1] == ATAG_CORE
}

/// Walk an ATAG list given as a word slice. Malformed lists terminate
/// the walk early and keep whatever was collected so far.
pub fn parse_words(words: &[u32]) -> AtagInfo {
    let mut info = AtagInfo::default();
    let mut index = 0;

    while index + 1 < words.len() {
        let size = words[index] as usize;
        let tag = words[index + 1];
        if tag == ATAG_NONE || size < 2 || index + size > words.len() {
            break;
        }
        let body = &words[index + 2..index + size];
        match tag {
            ATAG_MEM => {
                // {size, start}
                if body.len() >= 2 {
                    info.total_ram += body[0] as u64;
                }
            }
            ATAG_INITRD2 => {
                // {start, size}
                if body.len() >= 2 {
                    info.initrd = Some((body[0] as u64, body[1] as usize));
                }
            }
            ATAG_CMDLINE => {
                let mut length = 0;
                'copy: for word in body {
                    for byte in word.to_le_bytes() {
                        if byte == 0 || length == info.cmdline.len() {
                            break 'copy;
                        }
                        info.cmdline[length] = byte;
                        length += 1;
                    }
                }
                info.cmdline_len = length;
            }
            _ => {}
        }
        index += size;
    }

    info
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn list() -> alloc::vec::Vec<u32> {
        let mut words = alloc::vec![
            5,
            ATAG_CORE,
            0,
            0,
            0, // core body
            4,
            ATAG_MEM,
            0x1000_0000,
            0x0000_0000, // 256 MiB at 0
            4,
            ATAG_INITRD2,
            0x0200_0000,
            0x0010_0000, // initrd
        ];
        // command line "console=ttyAMA0"
        let text = b"console=ttyAMA0\0";
        words.push(2 + text.len() as u32 / 4);
        words.push(ATAG_CMDLINE);
        for chunk in text.chunks(4) {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            words.push(u32::from_le_bytes(bytes));
        }
        words.push(0);
        words.push(ATAG_NONE);
        words
    }

    extern crate alloc;

    #[test]
    fn detects_core_header() {
        assert!(is_atag_list(&list()));
        assert!(!is_atag_list(&[4, ATAG_MEM]));
    }

    #[test]
    fn extracts_memory_initrd_and_cmdline() {
        let info = parse_words(&list());
        assert_eq!(info.total_ram, 0x1000_0000);
        assert_eq!(info.initrd, Some((0x0200_0000, 0x0010_0000)));
        assert_eq!(
            &info.cmdline[..info.cmdline_len],
            b"console=ttyAMA0",
            "command line is NUL-terminated on the wire"
        );
    }

    #[test]
    fn truncated_list_keeps_partial_results() {
        let mut words = list();
        words.truncate(9); // cut inside the initrd tag
        let info = parse_words(&words);
        assert_eq!(info.total_ram, 0x1000_0000);
        assert!(info.initrd.is_none());
    }
}
