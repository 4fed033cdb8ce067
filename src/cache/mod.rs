//! 块缓存模块
//!
//! journal 把文件系统的缓冲区缓存视为外部协作者（spec §6 "Buffer cache
//! (consumed)"），只依赖这里的窄接口：每个缓存块的 DIRTY/FLUSH 标志，以及
//! "装配一个写完成回调" 的能力。这不是一个通用的、带驱逐策略的块缓存——那属于
//! 封装文件系统的职责，超出本 crate 范围（spec §1）。这里只保留 journal
//! 接管某个原地块时需要的那一小片状态。
//!
//! 设计笔记 §9 "Buffer-cache callbacks" 建议用一个带标签的能力替代
//! 函数指针 + 不透明参数：这里用 `Box<dyn FnOnce(Result<()>)>` 表示"journal
//! 对这个块装配了回调"，用 `Option` 表示"未装配"，调用方（journal）据此
//! 识别自己的回调，无需裸函数指针比较。

use crate::block::BlockDevice;
use crate::error::Result;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    /// 缓存块状态标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u8 {
        /// 缓冲区包含尚未写回设备的修改
        const DIRTY = 0b01;
        /// 写回必须立即直写（journal 对自己写的所有日志块都设置此标志）
        const FLUSH = 0b10;
    }
}

/// 写完成回调：在 [`BlockCache::flush_buf`] 把脏数据写回设备之后，
/// 在同一调用栈内同步执行（spec §5："callbacks re-enter the journal on
/// the same call stack"，不存在延迟工作队列）。
pub type EndWriteCallback = Box<dyn FnOnce(Result<()>)>;

/// 单个缓存块
pub struct CacheBuffer {
    /// 块数据
    pub data: Vec<u8>,
    flags: CacheFlags,
    callback: Option<EndWriteCallback>,
}

impl CacheBuffer {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            flags: CacheFlags::empty(),
            callback: None,
        }
    }

    /// 是否为脏块
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(CacheFlags::DIRTY)
    }

    /// 是否已装配 journal 写完成回调
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

/// 最小化的缓冲区缓存：LBA -> [`CacheBuffer`]
///
/// 不做驱逐、不做引用计数——journal 只用它来：读取/修改一个原地块、
/// 标记其脏、在其上装配"写完成后通知 journal"的回调、以及在需要时
/// 立即把它刷新到设备（驱动 spec §4.7 的"End-of-write callback"）。
#[derive(Default)]
pub struct BlockCache {
    buffers: BTreeMap<u64, CacheBuffer>,
}

impl BlockCache {
    /// 新建一个空缓存
    pub fn new() -> Self {
        Self {
            buffers: BTreeMap::new(),
        }
    }

    /// 取得某个 LBA 的缓冲区，若不存在则从设备读入
    pub fn get<D: BlockDevice>(&mut self, dev: &mut D, lba: u64) -> Result<&mut CacheBuffer> {
        if !self.buffers.contains_key(&lba) {
            let bs = dev.block_size() as usize;
            let mut data = vec![0u8; bs];
            dev.read_bytes(lba * bs as u64, &mut data)?;
            self.buffers.insert(lba, CacheBuffer::new(data));
        }
        Ok(self.buffers.get_mut(&lba).unwrap())
    }

    /// 取得某个 LBA 的缓冲区，不读取设备内容（用于即将被整体覆写的块）
    pub fn get_noread<D: BlockDevice>(&mut self, dev: &mut D, lba: u64) -> &mut CacheBuffer {
        let bs = dev.block_size() as usize;
        self.buffers
            .entry(lba)
            .or_insert_with(|| CacheBuffer::new(vec![0u8; bs]))
    }

    /// 标记某个 LBA 为脏
    pub fn set_dirty(&mut self, lba: u64) {
        if let Some(buf) = self.buffers.get_mut(&lba) {
            buf.flags.insert(CacheFlags::DIRTY);
        }
    }

    /// 清除某个 LBA 的脏标志（不写回设备）
    pub fn clear_dirty(&mut self, lba: u64) {
        if let Some(buf) = self.buffers.get_mut(&lba) {
            buf.flags.remove(CacheFlags::DIRTY);
        }
    }

    /// 查询某个 LBA 是否为脏
    pub fn test_dirty(&self, lba: u64) -> bool {
        self.buffers.get(&lba).map(|b| b.is_dirty()).unwrap_or(false)
    }

    /// 查询某个 LBA 是否已装配写完成回调（journal 用它判断"是否已经接管"）
    pub fn has_callback(&self, lba: u64) -> bool {
        self.buffers.get(&lba).map(|b| b.has_callback()).unwrap_or(false)
    }

    /// 在某个 LBA 上装配写完成回调，并设置直写标志
    ///
    /// 对应 spec §6 "exactly one callback per buffer"：调用方负责保证
    /// 同一时刻只有一个事务的回调装配在同一个 LBA 上（journal 的
    /// `get_access` 通过提前 flush 来源事务来维持这个不变式）。
    pub fn install_callback(&mut self, lba: u64, cb: EndWriteCallback) {
        if let Some(buf) = self.buffers.get_mut(&lba) {
            buf.callback = Some(cb);
            buf.flags.insert(CacheFlags::FLUSH);
        }
    }

    /// 把某个 LBA 的脏数据写回设备；若装配了回调，在写回完成后同步调用它
    /// 并清除回调（spec §4.7 "End-of-write callback" 的触发点）。
    pub fn flush_buf<D: BlockDevice>(&mut self, dev: &mut D, lba: u64) -> Result<()> {
        let (data, was_dirty, cb) = match self.buffers.get_mut(&lba) {
            Some(buf) => {
                let was_dirty = buf.is_dirty();
                let cb = buf.callback.take();
                buf.flags.remove(CacheFlags::DIRTY | CacheFlags::FLUSH);
                (buf.data.clone(), was_dirty, cb)
            }
            None => return Ok(()),
        };

        let result = if was_dirty {
            dev.write_bytes(lba * data.len() as u64, &data)
        } else {
            Ok(())
        };

        if let Some(cb) = cb {
            cb(result.clone());
        }
        result
    }
}
