//! 块记录索引（实时，贯穿整个 journal 生命周期）
//!
//! 对应 spec §4.4 与 lwext4 的 `jbd_block_rec` 红黑树
//! (`jbd_journal::block_rec_root`)。

use alloc::collections::BTreeMap;

/// 一条块记录：记录某个原地块（in-place LBA）当前被哪个事务持有，
/// 以及其日志副本是否还未写回原地（`has_buf`）。
#[derive(Debug, Clone, Copy)]
pub struct BlockRec {
    /// 原地块地址
    pub lba: u64,
    /// 当前持有该块的事务 ID
    pub trans_id: u64,
    /// 是否仍有未写回原地的日志副本（对应 lwext4 `block_rec->buf != NULL`）
    pub has_buf: bool,
}

impl BlockRec {
    fn new(lba: u64, trans_id: u64) -> Self {
        Self {
            lba,
            trans_id,
            has_buf: true,
        }
    }
}

/// 块记录索引：LBA -> BlockRec
///
/// 不变式：任意时刻每个 LBA 至多一条记录（spec 不变式 #6）。
#[derive(Debug, Default)]
pub struct BlockIndex {
    map: BTreeMap<u64, BlockRec>,
}

impl BlockIndex {
    /// 新建空索引
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// 查询某个 LBA 的记录
    pub fn get(&self, lba: u64) -> Option<&BlockRec> {
        self.map.get(&lba)
    }

    /// `set_block_dirty(T, B)` 的索引部分：
    /// - 若记录不存在，新建一条属于 T 的记录。
    /// - 若记录存在但其日志副本已写回原地（`has_buf == false`），
    ///   所有权转移给 T。
    /// - 若记录存在且仍有未写回的副本，调用方必须先完成跨事务 flush
    ///   （见 [`super::jbd_journal::JbdJournal::get_access`]，
    ///   `set_block_dirty` 在调用本函数前已经先调用过它），本函数
    ///   只负责记录层面的状态转移，假定该 flush 已发生。
    ///
    /// 返回 `true` 表示这是一条新记录（对应首次分配 `jbd_buf` 的情形）。
    pub fn claim(&mut self, lba: u64, trans_id: u64) -> bool {
        use alloc::collections::btree_map::Entry;
        match self.map.entry(lba) {
            Entry::Vacant(e) => {
                e.insert(BlockRec::new(lba, trans_id));
                true
            }
            Entry::Occupied(mut e) => {
                let rec = e.get_mut();
                rec.trans_id = trans_id;
                rec.has_buf = true;
                false
            }
        }
    }

    /// 在 `jbd_buf` 的原地写完成后调用：清空该记录的 buffer 指针；
    /// 如果记录此时仍归属于 `trans_id`（没有被后续事务抢占），释放记录。
    pub fn complete_write(&mut self, lba: u64, trans_id: u64) {
        use alloc::collections::btree_map::Entry;
        if let Entry::Occupied(mut e) = self.map.entry(lba) {
            let rec = e.get_mut();
            if rec.trans_id == trans_id {
                e.remove();
            } else {
                // a later trans reclaimed the record; only this trans's
                // buffer pointer is gone, the record itself survives.
                rec.has_buf = rec.trans_id != trans_id && rec.has_buf;
            }
        }
    }

    /// 在一次提交失败（abort）时释放本次提交claim的记录
    ///
    /// 与 [`Self::complete_write`] 不同：无论 `has_buf` 是什么状态，只要记录
    /// 仍归属 `trans_id`（没有被另一个事务抢占），就直接移除——被中止的事务
    /// 永远不会有 `jbd_buf` 写完成来触发 `complete_write`（spec §7 commit
    /// 失败 rollback："block-records freed"）。
    pub fn release(&mut self, lba: u64, trans_id: u64) {
        use alloc::collections::btree_map::Entry;
        if let Entry::Occupied(e) = self.map.entry(lba) {
            if e.get().trans_id == trans_id {
                e.remove();
            }
        }
    }

    /// 记录数量（用于校验"至多一条记录"之类的不变式）
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_new_and_existing() {
        let mut idx = BlockIndex::new();
        assert!(idx.claim(1000, 1));
        assert!(!idx.claim(1000, 1)); // same trans re-dirtying
        let rec = idx.get(1000).unwrap();
        assert_eq!(rec.trans_id, 1);
    }

    #[test]
    fn complete_write_frees_record_when_owner_matches() {
        let mut idx = BlockIndex::new();
        idx.claim(1000, 1);
        idx.complete_write(1000, 1);
        assert!(idx.get(1000).is_none());
    }

    #[test]
    fn complete_write_preserves_record_reclaimed_by_later_trans() {
        let mut idx = BlockIndex::new();
        idx.claim(1000, 1);
        // trans 2 re-dirties the same block before trans 1's write completes
        idx.claim(1000, 2);
        idx.complete_write(1000, 1);
        // record still present, now owned by trans 2
        let rec = idx.get(1000).unwrap();
        assert_eq!(rec.trans_id, 2);
    }

    #[test]
    fn at_most_one_record_per_lba() {
        let mut idx = BlockIndex::new();
        idx.claim(1000, 1);
        idx.claim(1000, 2);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn release_frees_record_owned_by_aborting_trans() {
        let mut idx = BlockIndex::new();
        idx.claim(1000, 1);
        idx.release(1000, 1);
        assert!(idx.get(1000).is_none());
    }

    #[test]
    fn release_is_noop_if_reclaimed_by_another_trans() {
        let mut idx = BlockIndex::new();
        idx.claim(1000, 1);
        idx.claim(1000, 2);
        idx.release(1000, 1);
        assert_eq!(idx.get(1000).unwrap().trans_id, 2);
    }
}
