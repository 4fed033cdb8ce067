//! 文件系统契约（spec §6 "Filesystem (consumed)"）
//!
//! journal 模块把容器文件系统的 inode/extent/superblock 逻辑视为外部协作者
//! （超出本 crate 范围），只依赖这里定义的窄接口。任何具体文件系统实现
//! （本 crate 的 `Ext4FileSystem`，或测试用的桩实现）实现该 trait 即可
//! 驱动 journal。这与 [`crate::block::BlockDevice`] 把裸设备 I/O 抽象出去
//! 是同一种处理方式。

use crate::block::BlockDevice;
use crate::error::Result;

/// ext4 "needs recovery" 标志位（`EXT4_FEATURE_INCOMPAT_RECOVER`）
pub const FINCOM_RECOVER: u32 = 0x0000_0004;

/// 超级块在设备上的固定字节偏移（第一个块组的第 1024 字节处）
pub const EXT4_SUPERBLOCK_OFFSET: u64 = 1024;

/// journal 依赖的文件系统契约
pub trait JournalHost<D: BlockDevice> {
    /// journal inode 号（来自文件系统超级块的 `journal_inum`）
    fn journal_inode_number(&self) -> u32;

    /// 不兼容特性位图
    fn features_incompatible(&self) -> u32;

    /// 设置不兼容特性位图（用于置位/清除 `FINCOM_RECOVER`）
    fn set_features_incompatible(&mut self, value: u32);

    /// 挂载计数（ESCAPE/superblock 恢复时需要原样保留）
    fn mount_count(&self) -> u32;

    /// 文件系统状态字段（同样需要在 superblock 恢复时原样保留）
    fn state(&self) -> u16;

    /// 将当前超级块状态写回设备
    fn sb_write(&mut self, dev: &mut D) -> Result<()>;

    /// 将 journal inode 的逻辑块号映射为物理块号
    ///
    /// `create = true` 时允许为间接块/extent 树分配新块（journal 正常挂载
    /// 后只做只读映射，故通常传 `false`）。
    fn inode_dblk_idx(&mut self, dev: &mut D, iblock: u32, create: bool) -> Result<u64>;

    /// 把一份日志里找回的、包含文件系统超级块的整块数据写回设备，
    /// 但保留当前的 `state`/`mount_count` 字段（spec §4.6 ESCAPE 恢复细节）。
    ///
    /// `raw` 是该逻辑块的完整内容（多大由具体文件系统决定，journal 不关心
    /// 超级块在块内的具体偏移/布局——由实现者自己从中取出需要的部分）。
    fn write_raw_superblock_preserving(&mut self, dev: &mut D, raw: &[u8]) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::block::MemBlockDevice;

    /// 最小化的 [`JournalHost`] 测试桩：把超级块保存在内存里，
    /// journal inode 的逻辑块按顺序映射到设备上紧随 journal 超级块之后
    /// 的物理块（`journal_start_lba + iblock`）。
    pub struct FakeHost {
        pub journal_inum: u32,
        pub journal_start_lba: u64,
        pub feature_incompatible: u32,
        pub mount_count: u32,
        pub state: u16,
        pub raw_sb: alloc::vec::Vec<u8>,
    }

    impl FakeHost {
        pub fn new(journal_start_lba: u64) -> Self {
            Self {
                journal_inum: 8,
                journal_start_lba,
                feature_incompatible: 0,
                mount_count: 1,
                state: 1,
                raw_sb: alloc::vec![0u8; 1024],
            }
        }
    }

    impl JournalHost<MemBlockDevice> for FakeHost {
        fn journal_inode_number(&self) -> u32 {
            self.journal_inum
        }

        fn features_incompatible(&self) -> u32 {
            self.feature_incompatible
        }

        fn set_features_incompatible(&mut self, value: u32) {
            self.feature_incompatible = value;
        }

        fn mount_count(&self) -> u32 {
            self.mount_count
        }

        fn state(&self) -> u16 {
            self.state
        }

        fn sb_write(&mut self, dev: &mut MemBlockDevice) -> Result<()> {
            dev.write_bytes(EXT4_SUPERBLOCK_OFFSET, &self.raw_sb)
        }

        fn inode_dblk_idx(&mut self, _dev: &mut MemBlockDevice, iblock: u32, _create: bool) -> Result<u64> {
            Ok(self.journal_start_lba + iblock as u64)
        }

        fn write_raw_superblock_preserving(
            &mut self,
            dev: &mut MemBlockDevice,
            raw: &[u8],
        ) -> Result<()> {
            self.raw_sb.clear();
            self.raw_sb.extend_from_slice(raw);
            dev.write_bytes(EXT4_SUPERBLOCK_OFFSET, &self.raw_sb)?;
            Ok(())
        }
    }
}
