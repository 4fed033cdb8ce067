//! 块设备抽象
//!
//! journal 把裸设备 I/O 视为外部协作者（spec §6 "Block device (consumed)"），
//! 只依赖这里的窄接口：按字节偏移读写。日志自身的块（descriptor/data/
//! revoke/commit）和文件系统超级块都通过这个接口直接访问，不经过
//! [`crate::cache`]——那一层只用于日志要"接管"的文件系统原地块。

use crate::error::{Error, ErrorKind, Result};
use alloc::vec::Vec;

/// 块设备契约
///
/// 具体实现（真实磁盘、内存盘、测试桩）只需要提供按字节寻址的读写。
pub trait BlockDevice {
    /// 设备的逻辑块大小（字节）
    fn block_size(&self) -> u32;

    /// 从 `offset` 开始读取 `buf.len()` 字节
    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// 从 `offset` 开始写入 `buf`
    fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// 读取一个完整的逻辑块（`lba * block_size()` 处的 `block_size()` 字节）
    fn read_block(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let bs = self.block_size() as u64;
        self.read_bytes(lba * bs, buf)
    }

    /// 写入一个完整的逻辑块
    fn write_block(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        let bs = self.block_size() as u64;
        self.write_bytes(lba * bs, buf)
    }
}

/// 内存块设备，测试专用
///
/// 对应 spec §6 的"块设备"契约最小实现：固定大小、全零初始化的字节数组。
#[cfg(any(test, feature = "test-support"))]
pub struct MemBlockDevice {
    block_size: u32,
    data: Vec<u8>,
}

#[cfg(any(test, feature = "test-support"))]
impl MemBlockDevice {
    /// 创建一个 `num_blocks * block_size` 字节的内存盘
    pub fn new(num_blocks: u64, block_size: u32) -> Self {
        Self {
            block_size,
            data: alloc::vec![0u8; (num_blocks * block_size as u64) as usize],
        }
    }

    /// 读取底层字节（测试断言用）
    pub fn raw(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(any(test, feature = "test-support"))]
impl BlockDevice for MemBlockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "read out of range"))?;
        if end > self.data.len() {
            return Err(Error::new(ErrorKind::InvalidInput, "read beyond device end"));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_bytes(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "write out of range"))?;
        if end > self.data.len() {
            return Err(Error::new(ErrorKind::InvalidInput, "write beyond device end"));
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }
}
