//! JBD 日志子系统
//!
//! 提供 ext2/3/4 兼容的 JBD（jbd2）日志子系统：写前日志（write-ahead
//! logging）、事务生命周期管理和崩溃恢复。文件系统本身（inode、extent、
//! 目录项等）被视为外部协作者，见 [`host::JournalHost`]。
//!
//! # 架构概述
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │            Filesystem (external collaborator)             │
//! │          implements host::JournalHost<D>                  │
//! └───────────────────────┬──────────────────────────────────┘
//!                         │ set_block_dirty / revoke_block / submit_trans
//!                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      JbdJournal                            │
//! │   trans_queue, JournalShared (cp_queue, block_index)       │
//! └───────┬──────────────────────┬─────────────────┬─────────┘
//!         │                      │                  │
//!         ▼                      ▼                  ▼
//!   commit::commit_trans   checkpoint::*        recovery::recover
//!   (descriptor/data/      (end-of-write         (scan/revoke/
//!    revoke/commit blocks)  callback, retire)      replay passes)
//!                         │
//!                         ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │         BlockCache (in-place buffers) / BlockDevice        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # 核心组件
//!
//! - [`types`] - JBD2 磁盘格式定义
//! - [`JbdFs`] - Journal 文件系统实例，管理 journal inode 和超级块
//! - [`JbdJournal`] - Journal 管理器，维护所有活跃事务和跨事务状态
//! - [`JbdTrans`] - 单个事务，跟踪修改的块和撤销请求
//! - [`JbdBuf`] - 描述事务中一个被修改块的日志副本位置
//! - [`host::JournalHost`] - 外部文件系统契约
//! - [`recovery::recover`] - 崩溃恢复三趟扫描

pub mod types;

mod block_index;
mod checkpoint;
mod checksum;
mod commit;
pub mod host;
mod jbd_buf;
mod jbd_fs;
mod jbd_journal;
mod jbd_trans;
mod recovery;
mod revoke_index;
mod tag_codec;
mod tag_iter;

pub use host::JournalHost;
pub use jbd_buf::JbdBuf;
pub use jbd_fs::JbdFs;
pub use jbd_journal::JbdJournal;
pub use jbd_trans::{JbdTrans, TransState};
pub use types::*;

/// Journal 运行期错误
#[derive(Debug)]
pub enum JournalError {
    /// Journal inode 不存在
    NoJournalInode,
    /// Journal 超级块无效
    InvalidSuperblock,
    /// Journal 功能不支持
    UnsupportedFeature(u32),
    /// 恢复失败
    RecoveryFailed,
    /// 空间不足
    NoSpace,
    /// IO 错误
    IoError,
    /// 日志内容自相矛盾，无法编解码（例如 tag/revoke 记录越界）
    CorruptedLog,
    /// 单个事务需要的日志块数超过了 `max_transaction` 限制
    DescriptorOverflow,
}

impl core::fmt::Display for JournalError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            JournalError::NoJournalInode => write!(f, "Journal inode not found"),
            JournalError::InvalidSuperblock => write!(f, "Invalid journal superblock"),
            JournalError::UnsupportedFeature(feat) => {
                write!(f, "Unsupported journal feature: 0x{:08x}", feat)
            }
            JournalError::RecoveryFailed => write!(f, "Journal recovery failed"),
            JournalError::NoSpace => write!(f, "Journal has no space"),
            JournalError::IoError => write!(f, "Journal I/O error"),
            JournalError::CorruptedLog => write!(f, "Journal log content is inconsistent"),
            JournalError::DescriptorOverflow => {
                write!(f, "Transaction exceeds max_transaction descriptor limit")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_module_compiles() {
        assert_eq!(JBD_MAGIC_NUMBER, 0xC03B3998);
    }
}
