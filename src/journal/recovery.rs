//! 崩溃恢复：三趟扫描（spec §4.6）
//!
//! SCAN 确定日志里最后一个完整提交的事务号；REVOKE 重建撤销索引；
//! RECOVER 把未检查点的日志副本重放回原地，按撤销索引跳过已失效的副本。
//! 三趟都从 `(block = sb.start, trans_id = sb.sequence)` 出发，沿日志环形前进。

use super::host::{JournalHost, FINCOM_RECOVER};
use super::jbd_journal::wrap;
use super::revoke_index::RevokeIndex;
use super::tag_codec::DecodedTag;
use super::tag_iter::TagIter;
use super::types::*;
use super::{JbdFs, JournalError};
use crate::block::BlockDevice;
use crate::error::Result;
use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;

/// 顶层入口：spec §4.6 `recover`
pub fn recover<D: BlockDevice, H: JournalHost<D>>(fs: &mut JbdFs, dev: &mut D, host: &mut H) -> Result<()> {
    if fs.start() == 0 {
        return Ok(());
    }
    log::info!("[recovery::recover] journal needs recovery, starting at block {} sequence {}", fs.start(), fs.sequence());

    let bit64 = fs.has_incompat_feature(JBD_FEATURE_INCOMPAT_64BIT);
    let feature_incompat = u32::from_be(fs.sb().feature_incompat);

    let last_trans_id = scan_pass(fs, dev, host, bit64, feature_incompat)?;
    log::debug!("[recovery::recover] SCAN complete, last committed trans-id {}", last_trans_id);
    let revokes = build_revoke_index(fs, dev, host, bit64, feature_incompat, last_trans_id)?;
    log::debug!("[recovery::recover] REVOKE complete, {} revoke entries", revokes.len());
    replay(fs, dev, host, bit64, feature_incompat, last_trans_id, &revokes)?;

    host.set_features_incompatible(host.features_incompatible() & !FINCOM_RECOVER);
    fs.set_start(0);
    fs.mark_dirty();
    fs.write_sb(dev, host)?;
    host.sb_write(dev)?;
    log::info!("[recovery::recover] RECOVER complete, journal clean");
    Ok(())
}

/// 把环形日志内的块号前进一步，折返进 `[first, maxlen)`；
/// 返回是否因此绕回了 `start_block`（跑完一整圈，调用方应停止本趟扫描）。
fn step(first: u32, maxlen: u32, block: &mut u32, start_block: u32) -> bool {
    *block = wrap(first, maxlen, *block + 1);
    *block == start_block
}

fn read_log_block<D: BlockDevice, H: JournalHost<D>>(
    fs: &JbdFs,
    dev: &mut D,
    host: &mut H,
    block: u32,
) -> Result<Vec<u8>> {
    let lba = fs.log_block_lba(dev, host, block)?;
    let mut raw = vec![0u8; fs.block_size() as usize];
    dev.read_block(lba, &mut raw)?;
    Ok(raw)
}

/// 解析块头；magic 不匹配返回 `None`（spec："magic mismatches -> end of log"，
/// 三趟通用，不是错误）。
fn parse_header(raw: &[u8]) -> Option<jbd_bhdr> {
    if raw.len() < size_of::<jbd_bhdr>() {
        return None;
    }
    let header = unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const jbd_bhdr) };
    if !header.verify_magic() {
        return None;
    }
    Some(header)
}

fn tags_in_descriptor(raw: &[u8], feature_incompat: u32, bit64: bool) -> Vec<DecodedTag> {
    TagIter::new(&raw[size_of::<jbd_bhdr>()..], feature_incompat, bit64)
        .map(|entry| entry.tag)
        .collect()
}

/// 校验一个日志块的 CRC32C（spec §9：读路径校验，容忍全零校验和——
/// 本 crate 在写路径从不产出 CSUM_V2/V3 校验和尾部，即便挂载的日志
/// 启用了对应特性位）。特性位未启用时直接放行。
fn verify_block_csum(fs: &JbdFs, raw: &[u8], header: &jbd_bhdr, feature_incompat: u32) -> bool {
    let csum_v2 = feature_incompat & JBD_FEATURE_INCOMPAT_CSUM_V2 != 0;
    let csum_v3 = feature_incompat & JBD_FEATURE_INCOMPAT_CSUM_V3 != 0;
    if !csum_v2 && !csum_v3 {
        return true;
    }
    let uuid = &fs.sb().uuid;
    match header.get_blocktype() {
        JBD_DESCRIPTOR_BLOCK => super::checksum::verify_descriptor_block(uuid, raw),
        JBD_COMMIT_BLOCK => super::checksum::verify_commit_block(uuid, raw),
        JBD_REVOKE_BLOCK => super::checksum::verify_revoke_block(uuid, raw),
        _ => true,
    }
}

fn decode_revoke_lbas(raw: &[u8], bit64: bool) -> Vec<u64> {
    let header_size = size_of::<jbd_revoke_header>();
    if raw.len() < header_size {
        return Vec::new();
    }
    let header = unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const jbd_revoke_header) };
    let count = (u32::from_be(header.count) as usize).min(raw.len());
    let lba_size = if bit64 { 8 } else { 4 };

    let mut out = Vec::new();
    let mut off = header_size;
    while off + lba_size <= count {
        let lba = if bit64 {
            u64::from_be_bytes(raw[off..off + 8].try_into().unwrap())
        } else {
            u32::from_be_bytes(raw[off..off + 4].try_into().unwrap()) as u64
        };
        out.push(lba);
        off += lba_size;
    }
    out
}

/// SCAN：确定最后一个完整提交的事务号。
///
/// 没有遇到任何 COMMIT 块时返回的 trans-id 与起点相同——调用方的
/// REVOKE/RECOVER 循环以 `trans_id <= last_trans_id` 为界，此时仍会
/// 处理一圈悬空（未提交）的描述符/撤销块，这是对恢复算法描述的字面
/// 实现（DESIGN.md 记录了这个边界情形）。
fn scan_pass<D: BlockDevice, H: JournalHost<D>>(
    fs: &JbdFs,
    dev: &mut D,
    host: &mut H,
    bit64: bool,
    feature_incompat: u32,
) -> Result<u64> {
    let first = fs.first();
    let maxlen = fs.max_len();
    let start_block = fs.start();
    let mut block = start_block;
    let mut trans_id = fs.sequence() as u64;
    let mut seen_commit = false;

    loop {
        let raw = read_log_block(fs, dev, host, block)?;
        let Some(header) = parse_header(&raw) else {
            break;
        };
        if header.get_sequence() as u64 != trans_id {
            break;
        }
        if !verify_block_csum(fs, &raw, &header, feature_incompat) {
            // a bad checksum mid-scan is the same "can't trust the rest of
            // the log" signal as a sequence mismatch during SCAN.
            break;
        }

        match header.get_blocktype() {
            JBD_DESCRIPTOR_BLOCK => {
                let ntags = tags_in_descriptor(&raw, feature_incompat, bit64).len();
                if step(first, maxlen, &mut block, start_block) {
                    break;
                }
                let mut stop = false;
                for _ in 0..ntags {
                    if step(first, maxlen, &mut block, start_block) {
                        stop = true;
                        break;
                    }
                }
                if stop {
                    break;
                }
                continue;
            }
            JBD_COMMIT_BLOCK => {
                trans_id += 1;
                seen_commit = true;
            }
            JBD_REVOKE_BLOCK => {}
            _ => break,
        }
        if step(first, maxlen, &mut block, start_block) {
            break;
        }
    }

    Ok(if seen_commit { trans_id - 1 } else { trans_id })
}

/// REVOKE：重建撤销索引，不重放任何数据。
fn build_revoke_index<D: BlockDevice, H: JournalHost<D>>(
    fs: &JbdFs,
    dev: &mut D,
    host: &mut H,
    bit64: bool,
    feature_incompat: u32,
    last_trans_id: u64,
) -> Result<RevokeIndex> {
    let first = fs.first();
    let maxlen = fs.max_len();
    let start_block = fs.start();
    let mut block = start_block;
    let mut trans_id = fs.sequence() as u64;
    let mut index = RevokeIndex::new();

    while trans_id <= last_trans_id {
        let raw = read_log_block(fs, dev, host, block)?;
        let Some(header) = parse_header(&raw) else {
            break;
        };
        if header.get_sequence() as u64 != trans_id {
            return Err(JournalError::CorruptedLog.into());
        }
        if !verify_block_csum(fs, &raw, &header, feature_incompat) {
            return Err(JournalError::CorruptedLog.into());
        }

        match header.get_blocktype() {
            JBD_DESCRIPTOR_BLOCK => {
                let ntags = tags_in_descriptor(&raw, feature_incompat, bit64).len();
                if step(first, maxlen, &mut block, start_block) {
                    break;
                }
                let mut stop = false;
                for _ in 0..ntags {
                    if step(first, maxlen, &mut block, start_block) {
                        stop = true;
                        break;
                    }
                }
                if stop {
                    break;
                }
                continue;
            }
            JBD_COMMIT_BLOCK => trans_id += 1,
            JBD_REVOKE_BLOCK => {
                for lba in decode_revoke_lbas(&raw, bit64) {
                    index.insert(lba, trans_id);
                }
            }
            _ => break,
        }
        if step(first, maxlen, &mut block, start_block) {
            break;
        }
    }

    Ok(index)
}

/// RECOVER：把未撤销的日志副本写回原地，ESCAPE tag 特殊处理为文件系统
/// 超级块更新（spec §9 已知的、刻意保留的设计偏差——不要"撤销" ESCAPE）。
fn replay<D: BlockDevice, H: JournalHost<D>>(
    fs: &mut JbdFs,
    dev: &mut D,
    host: &mut H,
    bit64: bool,
    feature_incompat: u32,
    last_trans_id: u64,
    revokes: &RevokeIndex,
) -> Result<()> {
    let first = fs.first();
    let maxlen = fs.max_len();
    let start_block = fs.start();
    let mut block = start_block;
    let mut trans_id = fs.sequence() as u64;

    while trans_id <= last_trans_id {
        let raw = read_log_block(fs, dev, host, block)?;
        let Some(header) = parse_header(&raw) else {
            break;
        };
        if header.get_sequence() as u64 != trans_id {
            return Err(JournalError::CorruptedLog.into());
        }
        if !verify_block_csum(fs, &raw, &header, feature_incompat) {
            return Err(JournalError::CorruptedLog.into());
        }

        match header.get_blocktype() {
            JBD_DESCRIPTOR_BLOCK => {
                let tags = tags_in_descriptor(&raw, feature_incompat, bit64);
                if step(first, maxlen, &mut block, start_block) {
                    break;
                }
                let mut stop = false;
                for tag in &tags {
                    replay_one(fs, dev, host, *tag, block, trans_id, revokes)?;
                    if step(first, maxlen, &mut block, start_block) {
                        stop = true;
                        break;
                    }
                }
                if stop {
                    break;
                }
                continue;
            }
            JBD_COMMIT_BLOCK => trans_id += 1,
            JBD_REVOKE_BLOCK => {}
            _ => break,
        }
        if step(first, maxlen, &mut block, start_block) {
            break;
        }
    }

    Ok(())
}

fn replay_one<D: BlockDevice, H: JournalHost<D>>(
    fs: &JbdFs,
    dev: &mut D,
    host: &mut H,
    tag: DecodedTag,
    data_block: u32,
    trans_id: u64,
    revokes: &RevokeIndex,
) -> Result<()> {
    if tag.escape {
        // known deviation from Linux JBD (spec §9): treat as a superblock
        // update rather than undoing the zeroed magic word.
        let raw = read_log_block(fs, dev, host, data_block)?;
        return host.write_raw_superblock_preserving(dev, &raw);
    }
    if !revokes.should_apply(tag.block, trans_id) {
        return Ok(());
    }
    let raw = read_log_block(fs, dev, host, data_block)?;
    dev.write_block(tag.block, &raw)
}
