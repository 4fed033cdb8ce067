//! 描述符块 tag 的变长编解码
//!
//! 对应 spec 中的 "On-disk codec" 部分（lwext4 的 `jbd_write_block_tag` /
//! `jbd_extract_block_tag`）。与 [`super::types`] 中固定大小的
//! `jbd_block_tag` / `jbd_block_tag3` 不同，这里按 flags 组合动态计算
//! tag 长度，因为同一描述符块中不同 tag 的大小可能不同（64BIT / CSUM_V2）。

use super::types::*;

/// 解码后的 tag 信息（与具体 v1/v3 布局无关）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTag {
    /// 块号（原始值；ESCAPE 时按 lwext4 行为报告为 0，见模块文档）
    pub block: u64,
    /// 原始 flags（统一按 u32 存放；v1 的 16 位 flags 零扩展）
    pub flags: u32,
    /// 是否为描述符块中的最后一个 tag
    pub last_tag: bool,
    /// 是否设置了 SAME_UUID（UUID 未内联，沿用 journal UUID）
    pub same_uuid: bool,
    /// 是否设置了 ESCAPE（payload 首字与 magic 冲突，写入前已清零）
    pub escape: bool,
}

/// 计算一个 tag 占用的字节数（不含其后可能跟随的 UUID）
///
/// 对应 spec §4.1：
/// - CSUM_V3 置位 -> 16 字节（tag3）
/// - 否则：12 基础 + 2（CSUM_V2）+ 0/−4（64BIT/非 64BIT）
pub fn tag_bytes(csum_v3: bool, csum_v2: bool, bit64: bool) -> usize {
    if csum_v3 {
        return 16;
    }
    let mut n: isize = 12;
    if !bit64 {
        n -= 4;
    }
    if csum_v2 {
        n += 2;
    }
    n as usize
}

/// 从描述符块 payload 中解码一个 tag
///
/// `buf` 指向 tag 的起始字节；调用方负责保证 `buf.len() >= tag_bytes(..)`，
/// 否则返回 `None`（对应 spec 中 "解码失败" 的终止条件，由调用方
/// [`super::tag_iter::TagIter`] 解释为日志结束）。
pub fn decode_tag(buf: &[u8], csum_v3: bool, csum_v2: bool, bit64: bool) -> Option<DecodedTag> {
    let size = tag_bytes(csum_v3, csum_v2, bit64);
    if buf.len() < size {
        return None;
    }

    if csum_v3 {
        let blocknr = u32::from_be_bytes(buf[0..4].try_into().ok()?);
        let flags = u32::from_be_bytes(buf[4..8].try_into().ok()?);
        let blocknr_high = u32::from_be_bytes(buf[8..12].try_into().ok()?);
        let block = ((blocknr_high as u64) << 32) | blocknr as u64;
        return Some(DecodedTag {
            block,
            flags,
            last_tag: flags & (JBD_FLAG_LAST_TAG as u32) != 0,
            same_uuid: flags & (JBD_FLAG_SAME_UUID as u32) != 0,
            escape: flags & (JBD_FLAG_ESCAPE as u32) != 0,
        });
    }

    // v1 layout: blocknr(4), flags(2) [, blocknr_high(4) if 64bit] [, checksum(2) if csum_v2]
    let blocknr = u32::from_be_bytes(buf[0..4].try_into().ok()?);
    let flags16 = u16::from_be_bytes(buf[4..6].try_into().ok()?);
    let mut off = 6;
    let blocknr_high = if bit64 {
        let v = u32::from_be_bytes(buf[off..off + 4].try_into().ok()?);
        off += 4;
        v
    } else {
        0
    };
    // checksum field (if present) is parsed-but-ignored here; writers never emit it (§9).
    let _ = off;

    let block = ((blocknr_high as u64) << 32) | blocknr as u64;
    let flags = flags16 as u32;
    Some(DecodedTag {
        block,
        flags,
        last_tag: flags16 & JBD_FLAG_LAST_TAG != 0,
        same_uuid: flags16 & JBD_FLAG_SAME_UUID != 0,
        escape: flags16 & JBD_FLAG_ESCAPE != 0,
    })
}

/// 将一个 tag 写入描述符块 payload
///
/// 写入前调用方必须将 `buf[..tag_bytes(..)]` 清零（spec: "writers MUST
/// zero-fill a tag before populating flags"）；本函数只设置用到的字段。
/// 不写入 checksum 字段（CSUM_V2/V3 on write 是已知的未实现项，见 §9）。
///
/// 返回实际写入的字节数（不含紧随其后的 UUID，UUID 由调用方另行写入）。
pub fn encode_tag(
    buf: &mut [u8],
    block: u64,
    flags: u16,
    csum_v3: bool,
    csum_v2: bool,
    bit64: bool,
) -> Option<usize> {
    let size = tag_bytes(csum_v3, csum_v2, bit64);
    if buf.len() < size {
        return None;
    }
    for b in buf[..size].iter_mut() {
        *b = 0;
    }

    if csum_v3 {
        buf[0..4].copy_from_slice(&(block as u32).to_be_bytes());
        buf[4..8].copy_from_slice(&(flags as u32).to_be_bytes());
        buf[8..12].copy_from_slice(&((block >> 32) as u32).to_be_bytes());
        // buf[12..16] checksum left zero
        return Some(size);
    }

    buf[0..4].copy_from_slice(&(block as u32).to_be_bytes());
    buf[4..6].copy_from_slice(&flags.to_be_bytes());
    if bit64 {
        buf[6..10].copy_from_slice(&((block >> 32) as u32).to_be_bytes());
    }
    Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(block: u64, flags: u16, csum_v3: bool, csum_v2: bool, bit64: bool) {
        let size = tag_bytes(csum_v3, csum_v2, bit64);
        let mut buf = [0u8; 32];
        let written = encode_tag(&mut buf, block, flags, csum_v3, csum_v2, bit64).unwrap();
        assert_eq!(written, size);
        let decoded = decode_tag(&buf, csum_v3, csum_v2, bit64).unwrap();
        if bit64 || csum_v3 {
            assert_eq!(decoded.block, block);
        } else {
            // without 64bit support only the low 32 bits round-trip
            assert_eq!(decoded.block, block & 0xFFFF_FFFF);
        }
        assert_eq!(decoded.last_tag, flags & JBD_FLAG_LAST_TAG != 0);
        assert_eq!(decoded.same_uuid, flags & JBD_FLAG_SAME_UUID != 0);
        assert_eq!(decoded.escape, flags & JBD_FLAG_ESCAPE != 0);
    }

    #[test]
    fn tag_sizes() {
        assert_eq!(tag_bytes(false, false, false), 8);
        assert_eq!(tag_bytes(false, true, false), 10);
        assert_eq!(tag_bytes(false, false, true), 12);
        assert_eq!(tag_bytes(false, true, true), 14);
        assert_eq!(tag_bytes(true, false, false), 16);
        assert_eq!(tag_bytes(true, true, true), 16);
    }

    #[test]
    fn roundtrip_all_flag_combinations() {
        for &bit64 in &[false, true] {
            for &csum_v2 in &[false, true] {
                for &csum_v3 in &[false, true] {
                    for &same_uuid in &[false, true] {
                        for &last_tag in &[false, true] {
                            for &escape in &[false, true] {
                                let mut flags: u16 = 0;
                                if same_uuid {
                                    flags |= JBD_FLAG_SAME_UUID;
                                }
                                if last_tag {
                                    flags |= JBD_FLAG_LAST_TAG;
                                }
                                if escape {
                                    flags |= JBD_FLAG_ESCAPE;
                                }
                                roundtrip(1000, flags, csum_v3, csum_v2, bit64);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn big_endian_64bit_invariant() {
        let mut buf = [0u8; 16];
        encode_tag(&mut buf, 0x0123_4567_89AB_CDEF, 0, false, false, true).unwrap();
        // blocknr(4) at offset 0 carries the low 32 bits, blocknr_high(4) at
        // offset 6 (after flags) carries the high 32 bits.
        assert_eq!(&buf[0..4], &[0x89, 0xAB, 0xCD, 0xEF]);
        assert_eq!(&buf[6..10], &[0x01, 0x23, 0x45, 0x67]);
    }
}
