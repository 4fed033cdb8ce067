//! 事务提交：spec §4.7 `commit_trans`
//!
//! 把一个 [`JbdTrans`] 序列化为描述符块 + 数据块 + 撤销块 + 提交块，
//! 依次追加到日志头（[`JbdJournal::alloc_block`]），然后把事务挂到
//! checkpoint 队列上，为其每个原地块装配写完成回调
//! （[`super::checkpoint::install_end_write_callback`]）。

use super::checkpoint::{install_end_write_callback, retire_checkpointed_head};
use super::host::JournalHost;
use super::jbd_trans::JbdTrans;
use super::tag_codec::{encode_tag, tag_bytes};
use super::types::*;
use super::{JbdFs, JbdJournal, JournalError};
use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::Result;
use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;

/// 描述符/日志块的 tag 布局参数（由已挂载的 journal 超级块特性位决定）
#[derive(Debug, Clone, Copy)]
struct TagLayout {
    csum_v2: bool,
    csum_v3: bool,
    bit64: bool,
}

impl TagLayout {
    fn from_fs(fs: &JbdFs) -> Self {
        Self {
            csum_v2: fs.has_incompat_feature(JBD_FEATURE_INCOMPAT_CSUM_V2),
            csum_v3: fs.has_incompat_feature(JBD_FEATURE_INCOMPAT_CSUM_V3),
            bit64: fs.has_incompat_feature(JBD_FEATURE_INCOMPAT_64BIT),
        }
    }

    fn tag_size(&self) -> usize {
        tag_bytes(self.csum_v3, self.csum_v2, self.bit64)
    }

    fn reserved_tail(&self) -> usize {
        if self.csum_v2 || self.csum_v3 {
            size_of::<jbd_block_tail>()
        } else {
            0
        }
    }
}

/// 一个正在累积 tag 的描述符块
struct DescriptorBuilder {
    jblock: u32,
    buf: Vec<u8>,
    offset: usize,
    capacity: usize,
    last_tag: Option<(usize, u64, u16)>, // (offset, block, flags) of the most recently written tag
}

impl DescriptorBuilder {
    fn open(jblock: u32, block_size: usize, layout: &TagLayout, sequence: u64) -> Self {
        let mut buf = vec![0u8; block_size];
        let header = jbd_bhdr::new(JBD_DESCRIPTOR_BLOCK, sequence as u32);
        buf[..size_of::<jbd_bhdr>()].copy_from_slice(header_bytes(&header));
        Self {
            jblock,
            buf,
            offset: size_of::<jbd_bhdr>(),
            capacity: block_size - layout.reserved_tail(),
            last_tag: None,
        }
    }

    /// 尝试写入一个 tag（+ UUID，若 `same_uuid` 为 false）。空间不足时返回 `false`，
    /// 调用方需要先 [`Self::finalize`] 当前描述符，再开一个新的重试。
    fn try_write_tag(
        &mut self,
        layout: &TagLayout,
        uuid: &[u8; UUID_SIZE],
        block: u64,
        same_uuid: bool,
    ) -> bool {
        let mut flags: u16 = 0;
        if same_uuid {
            flags |= JBD_FLAG_SAME_UUID;
        }
        let needed = layout.tag_size() + if same_uuid { 0 } else { UUID_SIZE };
        if self.offset + needed > self.capacity {
            return false;
        }
        let tag_size = encode_tag(
            &mut self.buf[self.offset..],
            block,
            flags,
            layout.csum_v3,
            layout.csum_v2,
            layout.bit64,
        )
        .expect("capacity already checked above");
        let tag_off = self.offset;
        self.offset += tag_size;
        if !same_uuid {
            self.buf[self.offset..self.offset + UUID_SIZE].copy_from_slice(uuid);
            self.offset += UUID_SIZE;
        }
        self.last_tag = Some((tag_off, block, flags));
        true
    }

    /// 标记最后一个 tag 为 ESCAPE（payload 首字与 magic 冲突，已被清零）
    fn mark_last_tag_escaped(&mut self, layout: &TagLayout) {
        if let Some((off, block, flags)) = self.last_tag {
            let flags = flags | JBD_FLAG_ESCAPE;
            encode_tag(
                &mut self.buf[off..],
                block,
                flags,
                layout.csum_v3,
                layout.csum_v2,
                layout.bit64,
            );
            self.last_tag = Some((off, block, flags));
        }
    }

    /// 回填最后一个 tag 的 LAST_TAG 标志并把整块写回设备
    fn finalize<D: BlockDevice, H: JournalHost<D>>(
        mut self,
        layout: &TagLayout,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
    ) -> Result<()> {
        if let Some((off, block, flags)) = self.last_tag {
            encode_tag(
                &mut self.buf[off..],
                block,
                flags | JBD_FLAG_LAST_TAG,
                layout.csum_v3,
                layout.csum_v2,
                layout.bit64,
            );
        }
        write_log_block(fs, dev, host, self.jblock, &self.buf)
    }
}

fn header_bytes(header: &jbd_bhdr) -> &[u8] {
    // SAFETY: jbd_bhdr is `repr(C, packed)` of plain integers; reinterpreting
    // it as its own byte representation is the same trick `types.rs` uses
    // throughout for on-disk (de)serialization.
    unsafe {
        core::slice::from_raw_parts(header as *const jbd_bhdr as *const u8, size_of::<jbd_bhdr>())
    }
}

fn header_bytes_revoke(header: &jbd_revoke_header) -> &[u8] {
    unsafe {
        core::slice::from_raw_parts(
            header as *const jbd_revoke_header as *const u8,
            size_of::<jbd_revoke_header>(),
        )
    }
}

fn write_log_block<D: BlockDevice, H: JournalHost<D>>(
    fs: &mut JbdFs,
    dev: &mut D,
    host: &mut H,
    jblock: u32,
    data: &[u8],
) -> Result<()> {
    let lba = fs.log_block_lba(dev, host, jblock)?;
    dev.write_block(lba, data)
}

/// 原地 LBA + 分配到的 journal 数据块号，记录一次已成功完成的 tag+data 写入
struct CommittedBuf {
    fs_lba: u64,
    jbd_lba: u32,
}

/// 提交一个事务：spec §4.7 `commit_trans`
pub fn commit_trans<D: BlockDevice, H: JournalHost<D>>(
    journal: &mut JbdJournal,
    fs: &mut JbdFs,
    dev: &mut D,
    host: &mut H,
    cache: &mut BlockCache,
    mut trans: JbdTrans,
) -> Result<()> {
    trans.trans_id = journal.current_alloc_trans_id();
    log::debug!(
        "[commit::commit_trans] starting commit of trans {} ({} dirty buffers, {} revokes)",
        trans.trans_id,
        trans.buffers.len(),
        trans.revokes.len()
    );
    let saved_cursor = journal.save_cursor();
    let layout = TagLayout::from_fs(fs);
    let uuid = fs.sb().uuid;
    let block_size = journal.block_size() as usize;
    let max_blocks = journal.config.max_transaction_blocks;

    let mut blocks_used: u32 = 0;
    let mut first_jblock: Option<u32> = None;
    let mut committed: Vec<CommittedBuf> = Vec::with_capacity(trans.buffers.len());

    macro_rules! charge {
        () => {{
            blocks_used += 1;
            if blocks_used > max_blocks {
                let err = Result::<()>::Err(JournalError::DescriptorOverflow.into());
                return finish_with_rollback(journal, &committed, &trans, saved_cursor, err);
            }
        }};
    }

    // ---- prepare: descriptor + data blocks ----
    let mut desc: Option<DescriptorBuilder> = None;
    let mut first_tag_in_desc = true;

    for i in 0..trans.buffers.len() {
        let lba = trans.buffers[i].fs_lba();
        if !cache.test_dirty(lba) {
            // already reached disk by other means; nothing left to journal.
            continue;
        }

        loop {
            if desc.is_none() {
                let jblock = match journal.alloc_block(fs, dev, host, cache) {
                    Ok(b) => b,
                    Err(e) => {
                        return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e))
                    }
                };
                charge!();
                first_jblock.get_or_insert(jblock);
                desc = Some(DescriptorBuilder::open(jblock, block_size, &layout, trans.trans_id));
                first_tag_in_desc = true;
            }
            let builder = desc.as_mut().unwrap();
            let same_uuid = !first_tag_in_desc;
            if builder.try_write_tag(&layout, &uuid, lba, same_uuid) {
                first_tag_in_desc = false;
                break;
            }
            // out of room in this descriptor: finalize it and open a fresh one.
            let finished = desc.take().unwrap();
            if let Err(e) = finished.finalize(&layout, fs, dev, host) {
                return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e));
            }
        }

        let data_jblock = match journal.alloc_block(fs, dev, host, cache) {
            Ok(b) => b,
            Err(e) => return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e)),
        };
        charge!();

        let mut payload = match cache.get(dev, lba) {
            Ok(b) => b.data.clone(),
            Err(e) => return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e)),
        };
        if payload.len() >= 4 && payload[0..4] == JBD_MAGIC_NUMBER.to_be_bytes() {
            // ESCAPE: the in-place block's first word collides with the JBD
            // magic; zero it before copying so a scan of the log can't
            // mistake this data block for another block header.
            payload[0..4].fill(0);
            desc.as_mut().unwrap().mark_last_tag_escaped(&layout);
        }
        if let Err(e) = write_log_block(fs, dev, host, data_jblock, &payload) {
            return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e));
        }

        journal
            .shared
            .borrow_mut()
            .block_index
            .claim(lba, trans.trans_id);
        committed.push(CommittedBuf {
            fs_lba: lba,
            jbd_lba: data_jblock,
        });
    }
    if let Some(builder) = desc.take() {
        if let Err(e) = builder.finalize(&layout, fs, dev, host) {
            return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e));
        }
    }

    // ---- prepare_revoke: revoke blocks ----
    if !trans.revokes.is_empty() {
        let lba_size = if layout.bit64 { 8usize } else { 4usize };
        let header_size = size_of::<jbd_revoke_header>();
        let capacity = block_size - header_size - layout.reserved_tail();

        let mut iter = trans.revokes.iter().copied().peekable();
        while iter.peek().is_some() {
            let jblock = match journal.alloc_block(fs, dev, host, cache) {
                Ok(b) => b,
                Err(e) => {
                    return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e))
                }
            };
            charge!();
            first_jblock.get_or_insert(jblock);

            let mut buf = vec![0u8; block_size];
            let mut used = header_size;
            while used + lba_size <= header_size + capacity {
                let Some(lba) = iter.next() else { break };
                if layout.bit64 {
                    buf[used..used + 8].copy_from_slice(&lba.to_be_bytes());
                } else {
                    buf[used..used + 4].copy_from_slice(&(lba as u32).to_be_bytes());
                }
                used += lba_size;
            }
            let header = jbd_revoke_header {
                header: jbd_bhdr::new(JBD_REVOKE_BLOCK, trans.trans_id as u32),
                count: (used as u32).to_be(),
            };
            buf[..header_size].copy_from_slice(header_bytes_revoke(&header));
            if let Err(e) = write_log_block(fs, dev, host, jblock, &buf) {
                return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e));
            }
        }
    }

    if committed.is_empty() && trans.revokes.is_empty() {
        // nothing was ever allocated on this path; free the transaction.
        return Ok(());
    }

    // ---- commit block ----
    let commit_jblock = match journal.alloc_block(fs, dev, host, cache) {
        Ok(b) => b,
        Err(e) => return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e)),
    };
    charge!();
    first_jblock.get_or_insert(commit_jblock);
    let mut commit_buf = vec![0u8; block_size];
    let header = jbd_bhdr::new(JBD_COMMIT_BLOCK, trans.trans_id as u32);
    commit_buf[..size_of::<jbd_bhdr>()].copy_from_slice(header_bytes(&header));
    if let Err(e) = write_log_block(fs, dev, host, commit_jblock, &commit_buf) {
        return finish_with_rollback(journal, &committed, &trans, saved_cursor, Err(e));
    }

    journal.bump_alloc_trans_id();
    log::debug!(
        "[commit::commit_trans] trans {} committed: {} data blocks, {} revoke entries",
        trans.trans_id,
        committed.len(),
        trans.revokes.len()
    );

    trans.start_iblock = first_jblock.expect("at least the commit block was allocated");
    trans.alloc_blocks = blocks_used;
    trans.data_cnt = committed.len() as u32;
    trans.written_cnt = 0;
    trans.buffers.clear();

    let lbas: Vec<u64> = committed.iter().map(|c| c.fs_lba).collect();
    let trans_id = trans.trans_id;
    let start_iblock = trans.start_iblock;
    let has_data = !lbas.is_empty();

    {
        let mut shared = journal.shared.borrow_mut();
        let was_empty = shared.cp_queue.is_empty();
        shared.cp_queue.push_back(trans);
        if has_data && was_empty {
            shared.start = start_iblock;
            shared.head_trans_id = trans_id;
            shared.pending_sb_persist = true;
        }
        retire_checkpointed_head(&mut shared);
    }
    for lba in lbas {
        install_end_write_callback(&journal.shared, cache, lba, trans_id);
    }

    journal.run_pending_sb_persist(fs, dev, host)?;
    Ok(())
}

/// spec §7 commit 失败回滚：释放本次提交中已 claim 的块记录，回退日志游标。
/// `result` 的 `Err` 原样返回——这个帮助函数只负责把回滚动作和"向上传播
/// 错误"绑在一处，避免每个出错分支各写一份回滚代码。
fn finish_with_rollback(
    journal: &mut JbdJournal,
    committed: &[CommittedBuf],
    trans: &JbdTrans,
    saved_cursor: u32,
    result: Result<()>,
) -> Result<()> {
    debug_assert!(result.is_err());
    log::warn!(
        "[commit::finish_with_rollback] aborting trans {}, releasing {} claimed block-records",
        trans.trans_id,
        committed.len()
    );
    let mut shared = journal.shared.borrow_mut();
    for c in committed {
        shared.block_index.release(c.fs_lba, trans.trans_id);
    }
    drop(shared);
    journal.restore_cursor(saved_cursor);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::journal::host::test_support::FakeHost;
    use crate::journal::jbd_buf::JbdBuf;
    use crate::journal::jbd_fs::test_support::from_sb;

    fn setup(maxlen: u32) -> (MemBlockDevice, FakeHost, JbdFs, JbdJournal) {
        let dev = MemBlockDevice::new(maxlen as u64 + 32, 1024);
        let host = FakeHost::new(10);
        let mut sb = jbd_sb::default();
        sb.blocksize = 1024u32.to_be();
        sb.maxlen = maxlen.to_be();
        sb.first = 1u32.to_be();
        sb.sequence = 1u32.to_be();
        sb.start = 0;
        let fs = from_sb(sb);
        let journal = JbdJournal::start(&fs);
        (dev, host, fs, journal)
    }

    #[test]
    fn commit_single_block_reaches_checkpoint_queue() {
        let (mut dev, mut host, mut fs, mut journal) = setup(64);
        let mut cache = BlockCache::new();
        cache.get(&mut dev, 1000).unwrap();
        cache.set_dirty(1000);

        let mut trans = journal.new_trans();
        trans.add_buffer(JbdBuf::new(1000, 0, 0));

        journal
            .submit_trans(trans, &mut fs, &mut dev, &mut host, &mut cache)
            .unwrap();

        assert_eq!(journal.checkpoint_queue_len(), 1);
    }

    #[test]
    fn commit_writes_descriptor_block_to_log() {
        let (mut dev, mut host, mut fs, mut journal) = setup(64);
        let mut cache = BlockCache::new();
        cache.get(&mut dev, 2000).unwrap();
        cache.set_dirty(2000);

        let mut trans = journal.new_trans();
        trans.add_buffer(JbdBuf::new(2000, 0, 0));
        journal
            .submit_trans(trans, &mut fs, &mut dev, &mut host, &mut cache)
            .unwrap();

        // descriptor block is the first block allocated after the sb (first() == 1)
        let desc_lba = host.inode_dblk_idx(&mut dev, 1, false).unwrap();
        let mut raw = vec![0u8; 1024];
        dev.read_block(desc_lba, &mut raw).unwrap();
        let header = unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const jbd_bhdr) };
        assert_eq!(u32::from_be(header.magic), JBD_MAGIC_NUMBER);
        assert_eq!(u32::from_be(header.blocktype), JBD_DESCRIPTOR_BLOCK);
    }

    #[test]
    fn pure_revoke_commit_advances_start_immediately() {
        let (mut dev, mut host, mut fs, mut journal) = setup(64);
        let mut cache = BlockCache::new();

        let mut trans = journal.new_trans();
        journal.revoke_block(&mut trans, 5000);
        journal
            .submit_trans(trans, &mut fs, &mut dev, &mut host, &mut cache)
            .unwrap();

        // pure-revoke trans retires immediately: queue drains back to empty
        assert_eq!(journal.checkpoint_queue_len(), 0);
    }

    #[test]
    fn get_access_flushes_cross_trans_buffer_and_transfers_ownership() {
        let (mut dev, mut host, mut fs, mut journal) = setup(64);
        let mut cache = BlockCache::new();

        let mut t1 = journal.new_trans();
        journal
            .set_block_dirty(&mut t1, &mut fs, &mut dev, &mut host, &mut cache, 1000)
            .unwrap();
        journal
            .submit_trans(t1, &mut fs, &mut dev, &mut host, &mut cache)
            .unwrap();
        assert_eq!(journal.checkpoint_queue_len(), 1);
        assert!(cache.test_dirty(1000));
        assert!(cache.has_callback(1000));

        // T2 touches the same in-place block: set_block_dirty calls
        // get_access first, which must flush T1's journaled copy in place
        // before T2 is allowed to claim the block (spec §8 scenario F).
        let mut t2 = journal.new_trans();
        journal
            .set_block_dirty(&mut t2, &mut fs, &mut dev, &mut host, &mut cache, 1000)
            .unwrap();

        // T1's buffer reached its in-place home and was checkpointed away.
        assert_eq!(journal.checkpoint_queue_len(), 0);
        assert_eq!(t2.data_cnt, 1);
        // The cache buffer is dirty again, now under T2.
        assert!(cache.test_dirty(1000));

        journal
            .submit_trans(t2, &mut fs, &mut dev, &mut host, &mut cache)
            .unwrap();
        assert_eq!(journal.checkpoint_queue_len(), 1);

        let owner = journal.shared.borrow().block_index.get(1000).unwrap().trans_id;
        assert_eq!(owner, 2);
    }

    #[test]
    fn skips_buffer_whose_dirty_bit_was_already_cleared() {
        let (mut dev, mut host, mut fs, mut journal) = setup(64);
        let mut cache = BlockCache::new();
        cache.get(&mut dev, 3000).unwrap();
        // not marked dirty: content already reached disk by other means

        let mut trans = journal.new_trans();
        trans.add_buffer(JbdBuf::new(3000, 0, 0));
        journal
            .submit_trans(trans, &mut fs, &mut dev, &mut host, &mut cache)
            .unwrap();

        // nothing to checkpoint: the only buffer was skipped
        assert_eq!(journal.checkpoint_queue_len(), 0);
    }
}
