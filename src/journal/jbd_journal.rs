//! JBD Journal 管理器
//!
//! 对应 lwext4 的 `struct jbd_journal`；维护所有活跃事务和全局块状态。
//!
//! # 跨事务状态与回调
//!
//! 提交完成后，journal 在缓存里为每个原地块装配一个写完成回调
//! ([`super::checkpoint`])，在写回完成时（与调用方同一调用栈内，没有
//! 延迟工作队列）把该块从 checkpoint 队列和块记录索引里摘除。这些状态
//! （`cp_queue`、块记录索引、`start`/`trans_id`）因此必须能被回调闭包
//! 捕获，而闭包是 `'static` 的、不能借用 `&mut JbdJournal`——于是它们被
//! 抽到 [`JournalShared`]，由 `Rc<RefCell<_>>` 持有；回调只捕获这个 `Rc`
//! 的克隆和 `(trans_id, lba)`。
//!
//! 唯一一件回调自己做不到的事：把更新后的 `start`/`sequence` 落盘到
//! journal 超级块——这需要 `&mut D`，闭包捕获不到。回调因此只置位
//! `pending_sb_persist`，驱动回调触发的调用（`set_block_dirty` 里的跨事务
//! flush、[`JbdJournal::flush_all_trans`]、[`super::commit::commit_trans`]）
//! 在返回前检查这个标志并完成落盘——仍在同一调用栈内，只是 Rust 的所有权
//! 规则要求在这里拆成两步。

use super::block_index::BlockIndex;
use super::host::{JournalHost, FINCOM_RECOVER};
use super::jbd_buf::JbdBuf;
use super::jbd_fs::JbdFs;
use super::jbd_trans::{JbdTrans, TransState};
use super::types::jbd_sb;
use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::Result;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;

/// journal 的可调参数，来自已挂载的 journal 超级块
///
/// spec 没有给 journal 定义显式的配置结构，但 `jbd_sb` 本身携带了这个
/// 限制：单个事务允许占用的最大日志块数。超出时 commit 必须中止
/// （[`super::JournalError::DescriptorOverflow`]），而不是无限制地继续
/// 分配日志空间。
#[derive(Debug, Clone, Copy)]
pub struct JournalConfig {
    /// 单个事务允许占用的最大日志块数（含描述符/数据/撤销/提交块）
    pub max_transaction_blocks: u32,
}

impl JournalConfig {
    /// 从已挂载的 journal 超级块读取配置
    pub fn from_sb(sb: &jbd_sb) -> Self {
        let max_transaction = u32::from_be(sb.max_transaction);
        Self {
            // 0 表示超级块未设置限制；退化为"整个日志"作为上限。
            max_transaction_blocks: if max_transaction == 0 {
                u32::from_be(sb.maxlen).max(1)
            } else {
                max_transaction
            },
        }
    }
}

/// 环形日志的块号折返（spec 设计笔记 §9："reference `wrap` macro subtracts
/// `(maxlen − first)`"）：日志占用 `[first, maxlen)` 这段区间，`block`
/// 超出 `maxlen` 时折回该区间内的对应位置。
pub(crate) fn wrap(first: u32, maxlen: u32, block: u32) -> u32 {
    if block >= maxlen {
        block - (maxlen - first)
    } else {
        block
    }
}

/// 跨事务、必须被写完成回调看到的 journal 状态
///
/// 对应 lwext4 `struct jbd_journal` 里 `cp_queue` / `block_rec_root` 两棵
/// 数据结构的角色，外加运行时需要的 `start`/`trans_id` 持久化游标。
#[derive(Debug)]
pub(crate) struct JournalShared {
    pub(crate) cp_queue: VecDeque<JbdTrans>,
    pub(crate) block_index: BlockIndex,
    /// 最早存活事务在日志中的起始块号；`cp_queue` 为空时为 0
    pub(crate) start: u32,
    /// 最早存活事务的序列号；`cp_queue` 为空时无意义
    pub(crate) head_trans_id: u64,
    /// 自从上次落盘以来，`start`/`head_trans_id` 是否发生了变化
    pub(crate) pending_sb_persist: bool,
}

/// JBD Journal（日志管理器）
///
/// 维护日志区域边界、下一个可分配的日志块、尚未提交的事务队列，以及
/// 通过 [`JournalShared`] 共享给写完成回调的跨事务状态。
#[derive(Debug)]
pub struct JbdJournal {
    first: u32,
    maxlen: u32,
    block_size: u32,
    /// 下一个要分配给新事务的序列号
    alloc_trans_id: u64,
    /// 下一个空闲日志块的相对偏移（0 代表超级块自身所在块，从不分配）
    cursor: u32,
    /// 已提交但仍需要这张表的事务在这里排队（本 crate 里 commit 是同步的，
    /// 这个队列通常只是一个暂存点）
    trans_queue: VecDeque<JbdTrans>,
    pub(crate) shared: Rc<RefCell<JournalShared>>,
    pub(crate) config: JournalConfig,
}

impl JbdJournal {
    /// 启动 journal：从已挂载/已恢复的 [`JbdFs`] 读取边界和初始游标
    pub fn start(fs: &JbdFs) -> Self {
        let start = fs.start();
        let sequence = fs.sequence() as u64;
        Self {
            first: fs.first(),
            maxlen: fs.max_len(),
            block_size: fs.block_size(),
            alloc_trans_id: if sequence == 0 { 1 } else { sequence },
            cursor: start,
            trans_queue: VecDeque::new(),
            shared: Rc::new(RefCell::new(JournalShared {
                cp_queue: VecDeque::new(),
                block_index: BlockIndex::new(),
                start,
                head_trans_id: sequence,
                pending_sb_persist: false,
            })),
            config: JournalConfig::from_sb(fs.sb()),
        }
    }

    /// `journal_start`：首次挂载一个全新的、尚未写过任何事务的 journal。
    ///
    /// 在文件系统超级块上置位 `FINCOM_RECOVER` 并持久化——挂载后若立刻
    /// 崩溃，下次挂载会对一个空日志跑一趟（空操作的）恢复——然后初始化
    /// journal 超级块的 `start`/`sequence` 并落盘。
    ///
    /// 与 [`Self::start`] 的区别：`start` 是读取 `fs` 当前状态的轻量构造器
    /// （用于恢复完成后或日志非空时的挂载），`journal_stop` 的逆操作只需
    /// 要它；`journal_start` 才是会修改磁盘状态的完整首次挂载操作。
    pub fn journal_start<D: BlockDevice, H: JournalHost<D>>(
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
    ) -> Result<Self> {
        host.set_features_incompatible(host.features_incompatible() | FINCOM_RECOVER);
        host.sb_write(dev)?;

        let first = fs.first();
        fs.set_start(first);
        fs.set_sequence(1);
        fs.mark_dirty();
        fs.write_sb(dev, host)?;
        log::info!("[jbd_journal::journal_start] journal started, first block {}", first);

        Ok(Self::start(fs))
    }

    /// `journal_stop`：卸载前清空日志。驱动所有未完成 checkpoint 的事务
    /// 写回原地（[`Self::flush_all_trans`]），清除 `FINCOM_RECOVER`，并把
    /// journal 超级块的 `start`/`sequence` 清零。
    pub fn journal_stop<D: BlockDevice, H: JournalHost<D>>(
        &mut self,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
        cache: &mut BlockCache,
    ) -> Result<()> {
        self.flush_all_trans(fs, dev, host, cache)?;

        host.set_features_incompatible(host.features_incompatible() & !FINCOM_RECOVER);
        host.sb_write(dev)?;

        fs.set_start(0);
        fs.set_sequence(0);
        fs.mark_dirty();
        fs.write_sb(dev, host)?;
        Ok(())
    }

    /// journal 块大小
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 日志区域的第一个块（journal 超级块自身所在块）
    pub fn first(&self) -> u32 {
        self.first
    }

    /// 日志区域的总块数
    pub fn max_len(&self) -> u32 {
        self.maxlen
    }

    /// checkpoint 队列里的事务数
    pub fn checkpoint_queue_len(&self) -> usize {
        self.shared.borrow().cp_queue.len()
    }

    /// 创建一个新事务；`trans_id`/`start_iblock` 在提交时才分配
    pub fn new_trans(&self) -> JbdTrans {
        JbdTrans::new(0, 0)
    }

    /// 分配日志内下一个相对块号（环形，跳过块 0，即超级块自身）
    pub(crate) fn alloc_log_block(&mut self) -> u32 {
        if self.cursor == 0 {
            self.cursor = self.first;
        }
        let blk = self.cursor;
        self.cursor = if self.cursor + 1 >= self.maxlen {
            self.first
        } else {
            self.cursor + 1
        };
        blk
    }

    /// `alloc_block`（spec §4.7 "Log allocation"）：分配下一个日志块，
    /// 若分配会追上最早存活事务的 `start`（日志写满），先同步驱动
    /// [`Self::flush_all_trans`] 腾出空间——日志永不溢出，调用方在
    /// checkpoint flush 完成之前只是被阻塞在这里。
    pub(crate) fn alloc_block<D: BlockDevice, H: JournalHost<D>>(
        &mut self,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
        cache: &mut BlockCache,
    ) -> Result<u32> {
        let would_collide = {
            let shared = self.shared.borrow();
            !shared.cp_queue.is_empty() && self.free_blocks() <= 1
        };
        if would_collide {
            self.flush_all_trans(fs, dev, host, cache)?;
        }
        Ok(self.alloc_log_block())
    }

    /// 下一个待分配的事务号，但不消费它（`commit_trans` 用它给事务赋值，
    /// 真正的递增发生在提交成功之后，见 [`Self::bump_alloc_trans_id`]）
    pub(crate) fn current_alloc_trans_id(&self) -> u64 {
        self.alloc_trans_id
    }

    /// 提交成功后递增下一个待分配的事务号（spec §4.7 commit 步骤 5）
    pub(crate) fn bump_alloc_trans_id(&mut self) {
        self.alloc_trans_id += 1;
    }

    /// 保存当前日志游标，供 commit 失败时回滚（spec §7："rewinds journal.last"）
    pub(crate) fn save_cursor(&self) -> u32 {
        self.cursor
    }

    /// 回滚日志游标到 `save_cursor` 返回的值
    pub(crate) fn restore_cursor(&mut self, cursor: u32) {
        self.cursor = cursor;
    }

    /// `get_access(T, B)`（spec §4.4）：确保可以安全地在事务 `T` 下修改块
    /// `B`。若 `B` 当前仍被另一个尚未写回原地的事务持有，先同步 flush 该块
    /// ——日志副本写回原地、记录被释放——这样两个未提交事务就不会同时持有
    /// 同一块的不同修改。已经在 `T` 自己的缓冲列表里的块直接放行。
    pub fn get_access<D: BlockDevice, H: JournalHost<D>>(
        &mut self,
        trans: &JbdTrans,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
        cache: &mut BlockCache,
        lba: u64,
    ) -> Result<()> {
        if trans.buffers.iter().any(|b| b.fs_lba() == lba) {
            return Ok(());
        }

        let conflict = {
            let shared = self.shared.borrow();
            shared
                .block_index
                .get(lba)
                .map(|rec| rec.has_buf)
                .unwrap_or(false)
        };
        if conflict {
            cache.flush_buf(dev, lba)?;
            self.run_pending_sb_persist(fs, dev, host)?;
        }
        Ok(())
    }

    /// 登记一个块将在 `trans` 内被修改（spec §4.4 `set_block_dirty`）
    ///
    /// 调用 [`Self::get_access`] 换取安全写入权限，再把块加入 `trans` 的
    /// 缓冲列表。
    pub fn set_block_dirty<D: BlockDevice, H: JournalHost<D>>(
        &mut self,
        trans: &mut JbdTrans,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
        cache: &mut BlockCache,
        lba: u64,
    ) -> Result<()> {
        self.get_access(trans, fs, dev, host, cache, lba)?;
        if trans.buffers.iter().any(|b| b.fs_lba() == lba) {
            return Ok(());
        }

        // trans_id is not yet known (assigned at commit); the block index is
        // keyed by ownership at commit time, so claim happens there. Here we
        // only need to make sure the in-place buffer is loaded and record the
        // buffer on the transaction; final ownership claim happens in
        // `commit::commit_trans` once `trans.trans_id` is real.
        cache.get(dev, lba)?;
        cache.set_dirty(lba);
        trans.add_buffer(JbdBuf::new(lba, 0, 0));
        Ok(())
    }

    /// 登记一个撤销请求（spec §4.4 `revoke_block`）
    pub fn revoke_block(&self, trans: &mut JbdTrans, lba: u64) {
        trans.add_revoke(lba);
    }

    /// `try_revoke_block(T, B)`（spec §4.4）：调用方即将释放块 `B`，
    /// 若它此刻仍被另一个事务持有且其日志副本尚未写回原地，先把它 flush
    /// 掉（避免失效的旧内容被原地写回），再把撤销记录追加到 `T` 的撤销表。
    pub fn try_revoke_block<D: BlockDevice, H: JournalHost<D>>(
        &mut self,
        trans: &mut JbdTrans,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
        cache: &mut BlockCache,
        lba: u64,
    ) -> Result<()> {
        let owned_elsewhere_with_buf = {
            let shared = self.shared.borrow();
            shared
                .block_index
                .get(lba)
                .map(|rec| rec.has_buf)
                .unwrap_or(false)
        };
        if owned_elsewhere_with_buf {
            cache.flush_buf(dev, lba)?;
            self.run_pending_sb_persist(fs, dev, host)?;
        }
        trans.add_revoke(lba);
        Ok(())
    }

    /// 提交一个事务：写入日志并登记到 checkpoint 队列
    pub fn submit_trans<D: BlockDevice, H: JournalHost<D>>(
        &mut self,
        mut trans: JbdTrans,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
        cache: &mut BlockCache,
    ) -> Result<()> {
        if trans.is_empty() {
            return Ok(());
        }
        trans.state = TransState::Queued;
        super::commit::commit_trans(self, fs, dev, host, cache, trans)
    }

    /// 还有多少日志块空闲（用于决定是否需要先腾出空间再分配）
    pub fn free_blocks(&self) -> u32 {
        let shared = self.shared.borrow();
        if shared.cp_queue.is_empty() {
            return self.maxlen.saturating_sub(self.first);
        }
        let oldest = shared.start.max(self.first);
        if self.cursor <= oldest {
            oldest - self.cursor
        } else {
            (self.maxlen - self.cursor) + (oldest - self.first)
        }
    }

    /// 是否有足够空间分配 `n` 个日志块
    pub fn has_space(&self, n: u32) -> bool {
        self.free_blocks() >= n
    }

    /// 驱动所有已提交但未完成 checkpoint 的事务写回原地，直到队列清空
    ///
    /// 用于 `journal_stop`（卸载前必须清空日志）以及分配空间不足时。
    pub fn flush_all_trans<D: BlockDevice, H: JournalHost<D>>(
        &mut self,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
        cache: &mut BlockCache,
    ) -> Result<()> {
        loop {
            let next_lba = {
                let shared = self.shared.borrow();
                let Some(trans) = shared.cp_queue.front() else {
                    break;
                };
                trans
                    .buffers
                    .iter()
                    .find(|b| cache.has_callback(b.fs_lba()))
                    .map(|b| b.fs_lba())
            };
            match next_lba {
                Some(lba) => {
                    cache.flush_buf(dev, lba)?;
                    self.run_pending_sb_persist(fs, dev, host)?;
                }
                None => break,
            }
        }
        Ok(())
    }

    /// 若自上次落盘以来 `start`/`sequence` 发生了变化，把它们持久化到
    /// journal 超级块（spec §5 的"同一调用栈内完成持久化"设计）
    pub(crate) fn run_pending_sb_persist<D: BlockDevice, H: JournalHost<D>>(
        &mut self,
        fs: &mut JbdFs,
        dev: &mut D,
        host: &mut H,
    ) -> Result<()> {
        let (pending, start, sequence) = {
            let shared = self.shared.borrow();
            (shared.pending_sb_persist, shared.start, shared.head_trans_id)
        };
        if !pending {
            return Ok(());
        }
        fs.set_start(start);
        fs.set_sequence(sequence as u32);
        fs.mark_dirty();
        fs.write_sb(dev, host)?;
        self.shared.borrow_mut().pending_sb_persist = false;
        Ok(())
    }
}
