//! JBD 事务
//!
//! 对应 lwext4 的 `struct jbd_trans`；spec §3 数据模型、§4.7 状态机。

use super::jbd_buf::JbdBuf;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;

/// 事务状态机（spec §4.7）
///
/// ```text
/// New -- submit --> Queued -- commit_one --> Committed --(written==data)--> Checkpointed
///                                    \-- prepare/commit fails --> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransState {
    /// 刚创建，尚未提交
    New,
    /// 已提交到 `trans_queue`，等待 `commit_one`
    Queued,
    /// 已写入日志（descriptor/data/revoke/commit 块已落盘）
    Committed,
    /// 原地写全部完成，事务已释放（仅作为终态标记，实际结构随后被移除）
    Checkpointed,
    /// prepare/commit 失败，所有缓冲区已回滚
    Aborted,
}

/// JBD 事务
///
/// 一组要原子提交的块修改。生命周期：`new_trans` -> 提交完成或中止。
#[derive(Debug)]
pub struct JbdTrans {
    /// 事务 ID（提交时赋值为 journal 的 `alloc_trans_id`）
    pub trans_id: u64,
    /// 该事务在日志中的起始块号
    pub start_iblock: u32,
    /// 实际分配的日志块数（descriptor + data + revoke + commit）
    pub alloc_blocks: u32,
    /// 数据块数量（参与原地写回的块数）
    pub data_cnt: u32,
    /// 已完成原地写回的块数
    pub written_cnt: u32,
    /// 事务状态
    pub state: TransState,
    /// 错误码（非零表示 commit/prepare 失败）
    pub error: i32,
    /// 本事务修改的块（按加入顺序，用于 prepare 阶段写描述符+数据块）
    pub buffers: Vec<JbdBuf>,
    /// 本事务请求撤销的块（有序去重，用于写 revoke 块）
    pub revokes: BTreeSet<u64>,
}

impl JbdTrans {
    /// 创建一个新事务
    pub fn new(trans_id: u64, start_iblock: u32) -> Self {
        Self {
            trans_id,
            start_iblock,
            alloc_blocks: 0,
            data_cnt: 0,
            written_cnt: 0,
            state: TransState::New,
            error: 0,
            buffers: Vec::new(),
            revokes: BTreeSet::new(),
        }
    }

    /// 事务是否只包含撤销记录、没有数据块（spec §4.7 "pure-revoke trans"）
    pub fn is_pure_revoke(&self) -> bool {
        self.buffers.is_empty() && !self.revokes.is_empty()
    }

    /// 事务是否为空（既无数据块也无撤销记录）
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.revokes.is_empty()
    }

    /// 登记一个被修改的块（§4.7 `set_block_dirty`）
    pub fn add_buffer(&mut self, buf: JbdBuf) {
        self.buffers.push(buf);
        self.data_cnt += 1;
    }

    /// 登记一个撤销请求（§4.7 `revoke_block`）。返回是否为新记录。
    pub fn add_revoke(&mut self, lba: u64) -> bool {
        self.revokes.insert(lba)
    }

    /// 查询本事务是否已对某块发起撤销
    pub fn is_revoked(&self, lba: u64) -> bool {
        self.revokes.contains(&lba)
    }

    /// 完成一个块的原地写回，递增 `written_cnt`
    pub fn mark_block_written(&mut self) {
        self.written_cnt += 1;
    }

    /// 是否所有数据块都已原地写回完成
    pub fn is_checkpoint_complete(&self) -> bool {
        self.written_cnt >= self.data_cnt
    }

    /// 标记事务进入错误状态
    pub fn set_error(&mut self, error: i32) {
        self.error = error;
        self.state = TransState::Aborted;
    }

    pub fn has_error(&self) -> bool {
        self.error != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transaction_defaults() {
        let trans = JbdTrans::new(1, 100);
        assert_eq!(trans.trans_id, 1);
        assert_eq!(trans.start_iblock, 100);
        assert_eq!(trans.data_cnt, 0);
        assert_eq!(trans.state, TransState::New);
        assert!(trans.is_empty());
    }

    #[test]
    fn pure_revoke_detection() {
        let mut trans = JbdTrans::new(1, 100);
        assert!(!trans.is_pure_revoke());
        trans.add_revoke(500);
        assert!(trans.is_pure_revoke());
        trans.add_buffer(JbdBuf::new(1000, 10, 1));
        assert!(!trans.is_pure_revoke());
    }

    #[test]
    fn dedup_revokes() {
        let mut trans = JbdTrans::new(1, 100);
        assert!(trans.add_revoke(500));
        assert!(!trans.add_revoke(500));
        assert_eq!(trans.revokes.len(), 1);
    }

    #[test]
    fn checkpoint_completion() {
        let mut trans = JbdTrans::new(1, 100);
        trans.add_buffer(JbdBuf::new(1000, 10, 1));
        trans.add_buffer(JbdBuf::new(2000, 11, 1));
        assert!(!trans.is_checkpoint_complete());
        trans.mark_block_written();
        assert!(!trans.is_checkpoint_complete());
        trans.mark_block_written();
        assert!(trans.is_checkpoint_complete());
    }
}
