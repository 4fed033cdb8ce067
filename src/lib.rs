//! jbd_core: JBD-compatible journaling subsystem for ext2/3/4-style filesystems
//!
//! 这是一个纯 Rust 实现的 JBD（jbd2）日志子系统，旨在提供：
//! - **零 unsafe 代码**（除必要的结构体定义）
//! - **Rust 惯用风格**的 API
//! - **完整的类型安全**
//! - **可选的 C API 兼容层**
//!
//! 日志子系统把封装它的文件系统（inode/extent/目录/超级块逻辑）视为外部
//! 协作者，只依赖两个窄接口：[`block::BlockDevice`]（裸设备 I/O）和
//! [`journal::JournalHost`]（spec §6 "Filesystem (consumed)" 的契约）。
//!
//! # 示例
//!
//! ```rust,ignore
//! use jbd_core::{block::MemBlockDevice, journal::{JbdFs, JournalHost}, Result};
//!
//! fn main() -> Result<()> {
//!     let mut dev = MemBlockDevice::new(64, 1024);
//!     // 具体文件系统实现 JournalHost 后即可挂载日志
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象和 I/O 操作
//! - [`cache`] - 最小化块缓存（journal 接管原地块的窄接口）
//! - [`journal`] - JBD 日志子系统：本 crate 的核心
//! - [`crc`] - CRC32C 校验和计算（私有，供 journal::checksum 使用）

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 块缓存
pub mod cache;

/// Journal (JBD2) 系统
pub mod journal;

/// CRC32C 校验和计算
pub(crate) mod crc;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::BlockDevice;

// Cache
pub use cache::{BlockCache, CacheBuffer, CacheFlags};

// Journal
pub use journal::{JbdFs, JbdJournal, JbdTrans, JbdBuf, JournalError, JournalHost};
