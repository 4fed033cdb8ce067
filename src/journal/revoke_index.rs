//! Revoke 索引（仅用于 replay）
//!
//! 对应 spec §4.3 与 lwext4 的 revoke 红黑树。

use alloc::collections::BTreeMap;

/// 按块号排序的撤销索引：block -> 撤销该块的最高事务号
///
/// 插入策略："latest wins"：REVOKE 扫描期间事务号单调不减，所以后写入的
/// 值总是覆盖旧值即可得到"最新"的撤销事务号。
#[derive(Debug, Default)]
pub struct RevokeIndex {
    map: BTreeMap<u64, u64>,
}

impl RevokeIndex {
    /// 新建一个空的撤销索引
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// 记录 `block` 在 `trans_id` 被撤销（覆盖已有记录）
    pub fn insert(&mut self, block: u64, trans_id: u64) {
        self.map
            .entry(block)
            .and_modify(|existing| *existing = trans_id)
            .or_insert(trans_id);
    }

    /// 判断 trans T 对块 B 的日志副本是否应当在 RECOVER 中被应用
    ///
    /// 规则（spec §4.3）：没有撤销记录，或者 `trans_id >= 撤销事务号`。
    pub fn should_apply(&self, block: u64, trans_id: u64) -> bool {
        match self.map.get(&block) {
            None => true,
            Some(&revoked_at) => trans_id >= revoked_at,
        }
    }

    /// 撤销记录条数
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_wins() {
        let mut idx = RevokeIndex::new();
        idx.insert(1000, 3);
        idx.insert(1000, 8);
        assert!(!idx.should_apply(1000, 7));
        assert!(idx.should_apply(1000, 8));
        assert!(idx.should_apply(1000, 9));
    }

    #[test]
    fn unrevoked_block_always_applies() {
        let idx = RevokeIndex::new();
        assert!(idx.should_apply(42, 0));
    }

    #[test]
    fn revoke_precedence_scenario() {
        // trans 7 writes B; trans 8 revokes B; trans 9 writes B again.
        let mut idx = RevokeIndex::new();
        idx.insert(1000, 8);
        assert!(!idx.should_apply(1000, 7));
        assert!(idx.should_apply(1000, 9));
    }
}
