//! Journal 检查点管理
//!
//! 实现 spec §4.7 "End-of-write callback"：当某个原地块的日志副本被
//! [`crate::cache::BlockCache::flush_buf`] 写回之后，同步（同一调用栈内）
//! 把这个事实反映到 [`super::jbd_journal::JournalShared`]，并在一个事务的
//! 全部数据块都写回完成后把它从 checkpoint 队列头部摘除、推进
//! `start`/`sequence` 游标。
//!
//! 这里不做轮询、不维护后台工作队列——lwext4 的 `jbd_journal_do_checkpoint`
//! 是个主动遍历队列、逐块触发写回的过程；这个 crate 把"触发写回"交还给
//! 缓存的正常使用方（无论是 journal 自己的跨事务冲突处理，还是外部调用者
//! 对缓存的常规驱逐），这里只负责写回完成时的记账。

use super::jbd_journal::JournalShared;
use crate::cache::BlockCache;
use crate::error::Result;
use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

/// 在缓存的某个原地块上装配写完成回调
///
/// 回调只捕获 `shared` 的一个克隆和 `(lba, trans_id)`，不借用
/// `JbdJournal`/`JbdFs`/设备——这些在回调触发时往往已经不在同一个
/// 调用帧里了。
pub(crate) fn install_end_write_callback(
    shared: &Rc<RefCell<JournalShared>>,
    cache: &mut BlockCache,
    lba: u64,
    trans_id: u64,
) {
    let shared = Rc::clone(shared);
    cache.install_callback(
        lba,
        Box::new(move |result| end_write_callback(&shared, lba, trans_id, result)),
    );
}

/// spec §4.7 "End-of-write callback" 的主体
///
/// 写回失败时不清理任何记账状态：块记录继续把该 LBA 标记为仍有未写回的
/// 日志副本，事务也继续留在 checkpoint 队列里，等待下一次写回尝试。
fn end_write_callback(shared: &Rc<RefCell<JournalShared>>, lba: u64, trans_id: u64, result: Result<()>) {
    if let Err(ref e) = result {
        log::warn!("[checkpoint::end_write_callback] write-back of lba {} (trans {}) failed: {}", lba, trans_id, e);
        return;
    }
    let mut shared = shared.borrow_mut();
    shared.block_index.complete_write(lba, trans_id);
    for trans in shared.cp_queue.iter_mut() {
        if trans.trans_id == trans_id {
            trans.mark_block_written();
            break;
        }
    }
    retire_checkpointed_head(&mut shared);
}

/// 把 checkpoint 队列头部所有"数据块已全部写回"的事务依次摘除，
/// 每摘除一个就把 `start`/`head_trans_id` 推进到下一个存活事务
/// （队列为空则清零），并置位 `pending_sb_persist`。
///
/// 纯撤销事务（没有数据块）在刚被推入队列、尚未有任何缓冲区写回时
/// 就已经满足"全部写回"，因此提交后应立刻调用本函数一次
/// （spec 的"pure-revoke commit advances start"场景）。
pub(crate) fn retire_checkpointed_head(shared: &mut JournalShared) {
    let mut advanced = false;
    while let Some(front) = shared.cp_queue.front() {
        if !front.is_checkpoint_complete() {
            break;
        }
        shared.cp_queue.pop_front();
        advanced = true;
    }
    if !advanced {
        return;
    }
    match shared.cp_queue.front() {
        Some(next) => {
            shared.start = next.start_iblock;
            shared.head_trans_id = next.trans_id;
        }
        None => {
            shared.start = 0;
            shared.head_trans_id = 0;
        }
    }
    shared.pending_sb_persist = true;
    log::debug!("[checkpoint::retire_checkpointed_head] advanced start to block {} (trans {})", shared.start, shared.head_trans_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::block_index::BlockIndex;
    use crate::journal::jbd_trans::JbdTrans;
    use alloc::collections::VecDeque;

    fn shared_with(trans: JbdTrans) -> Rc<RefCell<JournalShared>> {
        let mut cp_queue = VecDeque::new();
        let start = trans.start_iblock;
        let head = trans.trans_id;
        cp_queue.push_back(trans);
        Rc::new(RefCell::new(JournalShared {
            cp_queue,
            block_index: BlockIndex::new(),
            start,
            head_trans_id: head,
            pending_sb_persist: false,
        }))
    }

    #[test]
    fn pure_revoke_trans_retires_immediately() {
        let mut trans = JbdTrans::new(1, 10);
        trans.add_revoke(500);
        let shared = shared_with(trans);
        retire_checkpointed_head(&mut shared.borrow_mut());
        let s = shared.borrow();
        assert!(s.cp_queue.is_empty());
        assert_eq!(s.start, 0);
        assert!(s.pending_sb_persist);
    }

    #[test]
    fn trans_retires_only_after_all_buffers_written() {
        use crate::journal::jbd_buf::JbdBuf;

        let mut trans = JbdTrans::new(1, 10);
        trans.add_buffer(JbdBuf::new(1000, 11, 1));
        trans.add_buffer(JbdBuf::new(2000, 12, 1));
        let shared = shared_with(trans);

        end_write_callback(&shared, 1000, 1, Ok(()));
        assert_eq!(shared.borrow().cp_queue.len(), 1);
        assert!(!shared.borrow().pending_sb_persist);

        end_write_callback(&shared, 2000, 1, Ok(()));
        assert!(shared.borrow().cp_queue.is_empty());
        assert!(shared.borrow().pending_sb_persist);
    }

    #[test]
    fn failed_write_does_not_retire() {
        use crate::journal::jbd_buf::JbdBuf;
        use crate::error::{Error, ErrorKind};

        let mut trans = JbdTrans::new(1, 10);
        trans.add_buffer(JbdBuf::new(1000, 11, 1));
        let shared = shared_with(trans);

        end_write_callback(&shared, 1000, 1, Err(Error::new(ErrorKind::Io, "disk error")));
        assert_eq!(shared.borrow().cp_queue.len(), 1);
        assert!(!shared.borrow().pending_sb_persist);
    }
}
