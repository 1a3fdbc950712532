//! Initrd unpacking
//!
//! The boot archive is a gzip-compressed USTAR tar. It is inflated into
//! kernel memory and searched for the file named `init`, whose contents
//! become the first user process.

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

/// Tar header block size
const TAR_BLOCK: usize = 512;

/// gzip member magic
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
/// The only compression method gzip ever deployed
const GZIP_DEFLATE: u8 = 8;

const FLAG_EXTRA: u8 = 1 << 2;
const FLAG_NAME: u8 = 1 << 3;
const FLAG_COMMENT: u8 = 1 << 4;
const FLAG_HCRC: u8 = 1 << 1;

/// Strip the gzip framing and return the raw deflate stream.
fn deflate_payload(data: &[u8]) -> KernelResult<&[u8]> {
    if data.len() < 18 || data[0..2] != GZIP_MAGIC {
        return Err(KernelError::InvalidArgument {
            what: "gzip magic",
        });
    }
    if data[2] != GZIP_DEFLATE {
        return Err(KernelError::InvalidArgument {
            what: "gzip compression method",
        });
    }
    let flags = data[3];
    let mut offset = 10;

    if flags & FLAG_EXTRA != 0 {
        if offset + 2 > data.len() {
            return Err(KernelError::InvalidArgument { what: "gzip extra" });
        }
        let extra = u16::from_le_bytes([data[offset], data[offset + 1]]) as usize;
        offset += 2 + extra;
    }
    for flag in [FLAG_NAME, FLAG_COMMENT] {
        if flags & flag != 0 {
            let terminator = data[offset..]
                .iter()
                .position(|byte| *byte == 0)
                .ok_or(KernelError::InvalidArgument {
                    what: "gzip header string",
                })?;
            offset += terminator + 1;
        }
    }
    if flags & FLAG_HCRC != 0 {
        offset += 2;
    }
    if offset + 8 > data.len() {
        return Err(KernelError::InvalidArgument {
            what: "gzip truncated",
        });
    }
    // The last eight bytes are CRC32 and uncompressed length.
    Ok(&data[offset..data.len() - 8])
}

/// Inflate a gzip member.
pub fn decompress(data: &[u8]) -> KernelResult<Vec<u8>> {
    let payload = deflate_payload(data)?;
    miniz_oxide::inflate::decompress_to_vec(payload).map_err(|_| KernelError::IoError {
        operation: "initrd inflate",
    })
}

/// Parse the octal size field of a tar header.
fn octal_field(field: &[u8]) -> usize {
    let mut value = 0;
    for byte in field {
        match byte {
            b'0'..=b'7' => value = value * 8 + (byte - b'0') as usize,
            _ => break,
        }
    }
    value
}

/// Find `wanted` in a USTAR archive and return its contents.
pub fn tar_lookup<'a>(archive: &'a [u8], wanted: &str) -> KernelResult<&'a [u8]> {
    let mut offset = 0;
    while offset + TAR_BLOCK <= archive.len() {
        let header = &archive[offset..offset + TAR_BLOCK];
        if header.iter().all(|byte| *byte == 0) {
            break;
        }
        let name_end = header[..100]
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(100);
        let name = core::str::from_utf8(&header[..name_end]).unwrap_or("");
        let size = octal_field(&header[124..136]);
        let body = offset + TAR_BLOCK;

        // Regular file entries only; "./init" and "init" both count.
        let is_file = matches!(header[156], 0 | b'0');
        if is_file && (name == wanted || name.strip_prefix("./") == Some(wanted)) {
            if body + size > archive.len() {
                return Err(KernelError::InvalidArgument {
                    what: "tar entry truncated",
                });
            }
            return Ok(&archive[body..body + size]);
        }

        offset = body + size.div_ceil(TAR_BLOCK) * TAR_BLOCK;
    }
    Err(KernelError::NotFound {
        resource: "file in initrd",
    })
}

/// Unpack the archive and return the `init` executable.
pub fn extract_init(initrd: &[u8]) -> KernelResult<Vec<u8>> {
    let archive = decompress(initrd)?;
    let init = tar_lookup(&archive, "init")?;
    Ok(init.to_vec())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::vec;

    /// Build a one-file USTAR archive by hand.
    pub(crate) fn tar_with(name: &str, body: &[u8]) -> Vec<u8> {
        let mut archive = vec![0u8; TAR_BLOCK];
        archive[..name.len()].copy_from_slice(name.as_bytes());
        let size = alloc::format!("{:011o}\0", body.len());
        archive[124..124 + size.len()].copy_from_slice(size.as_bytes());
        archive[156] = b'0';
        archive[257..262].copy_from_slice(b"ustar");
        archive.extend_from_slice(body);
        let padding = body.len().div_ceil(TAR_BLOCK) * TAR_BLOCK - body.len();
        archive.extend(core::iter::repeat(0).take(padding));
        archive.extend(core::iter::repeat(0).take(2 * TAR_BLOCK));
        archive
    }

    #[test]
    fn finds_files_by_name() {
        let archive = tar_with("init", b"#!elf");
        assert_eq!(
            tar_lookup(&archive, "init").expect("init entry exists"),
            b"#!elf"
        );
        assert!(tar_lookup(&archive, "missing").is_err());
    }

    #[test]
    fn dot_slash_prefix_matches() {
        let archive = tar_with("./init", b"payload");
        assert_eq!(
            tar_lookup(&archive, "init").expect("./init matches init"),
            b"payload"
        );
    }

    #[test]
    fn octal_sizes_decode() {
        assert_eq!(octal_field(b"00000000017\0"), 0o17);
        assert_eq!(octal_field(b"0000000\0    "), 0);
    }

    #[test]
    fn gzip_framing_is_stripped() {
        // Header with no optional fields; deflate payload "ab"; trailer.
        let mut member = vec![0x1F, 0x8B, 8, 0, 0, 0, 0, 0, 0, 0];
        member.extend_from_slice(&[0x4B, 0x4C, 0x02, 0x00]); // deflate of "ab"
        member.extend_from_slice(&[0; 8]);
        let payload = deflate_payload(&member).expect("well-formed member");
        assert_eq!(payload, &[0x4B, 0x4C, 0x02, 0x00]);

        let mut bad = member.clone();
        bad[2] = 9;
        assert!(deflate_payload(&bad).is_err(), "unknown method rejected");
    }
}
