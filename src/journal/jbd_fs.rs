//! Journal 文件系统实例
//!
//! 对应 lwext4 的 `struct jbd_fs`；管理 journal inode 本身（通过
//! [`super::host::JournalHost`] 这个窄契约访问宿主文件系统），持有 journal
//! 超级块并提供块号映射。

use super::host::{JournalHost, FINCOM_RECOVER};
use super::types::*;
use super::JournalError;
use crate::block::BlockDevice;
use crate::error::Result;
use alloc::vec;

/// Journal 文件系统实例
///
/// 持有 journal inode 号和已解析的 journal 超级块。不持有设备/宿主的
/// 引用——每个需要设备 I/O 的方法都接受 `&mut D` / `&mut H`，沿用
/// [`crate::block::BlockDevice`] 既有的风格。
pub struct JbdFs {
    inode: u32,
    sb: jbd_sb,
    dirty: bool,
}

impl JbdFs {
    /// 挂载 journal：读取 journal inode 的第 0 块，解析并校验超级块
    pub fn get<D: BlockDevice, H: JournalHost<D>>(dev: &mut D, host: &mut H) -> Result<Self> {
        let inode = host.journal_inode_number();
        if inode == 0 {
            return Err(JournalError::NoJournalInode.into());
        }

        let block_size = dev.block_size() as usize;
        let lba = host.inode_dblk_idx(dev, 0, false)?;
        let mut raw = vec![0u8; block_size];
        dev.read_block(lba, &mut raw)?;

        if raw.len() < JBD_SUPERBLOCK_SIZE {
            return Err(JournalError::InvalidSuperblock.into());
        }
        let sb = unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const jbd_sb) };
        if !sb.is_valid() {
            return Err(JournalError::InvalidSuperblock.into());
        }
        if !super::checksum::verify_superblock_csum(&sb) {
            // A nonzero, mismatching checksum is corruption. A zero one is
            // tolerated (spec §9: this crate never emits CSUM_V2/V3
            // trailers on write, so a clean shutdown by this crate always
            // leaves the field zero even when the feature bit is set).
            return Err(JournalError::InvalidSuperblock.into());
        }

        let incompat = u32::from_be(sb.feature_incompat);
        let unknown = incompat & !JBD_KNOWN_INCOMPAT_FEATURES;
        if unknown != 0 {
            return Err(JournalError::UnsupportedFeature(unknown).into());
        }

        Ok(Self {
            inode,
            sb,
            dirty: false,
        })
    }

    /// 卸载 journal：若超级块有未落盘的修改，写回
    pub fn put<D: BlockDevice, H: JournalHost<D>>(&mut self, dev: &mut D, host: &mut H) -> Result<()> {
        if self.dirty {
            self.write_sb(dev, host)?;
        }
        Ok(())
    }

    /// 将 journal 相对块号（0 为超级块自身所在块）映射为设备 LBA
    pub fn log_block_lba<D: BlockDevice, H: JournalHost<D>>(
        &self,
        dev: &mut D,
        host: &mut H,
        rel: u32,
    ) -> Result<u64> {
        host.inode_dblk_idx(dev, rel, false)
    }

    /// 把当前超级块状态写回 journal inode 的第 0 块
    pub fn write_sb<D: BlockDevice, H: JournalHost<D>>(&mut self, dev: &mut D, host: &mut H) -> Result<()> {
        let block_size = dev.block_size() as usize;
        let lba = host.inode_dblk_idx(dev, 0, false)?;
        let mut raw = vec![0u8; block_size];
        let sb_bytes = unsafe {
            core::slice::from_raw_parts(&self.sb as *const jbd_sb as *const u8, JBD_SUPERBLOCK_SIZE)
        };
        raw[..JBD_SUPERBLOCK_SIZE].copy_from_slice(sb_bytes);
        dev.write_block(lba, &raw)?;
        self.dirty = false;
        Ok(())
    }

    /// 执行崩溃恢复（三趟扫描/撤销/重放，见 [`super::recovery::recover`]）
    pub fn recover<D: BlockDevice, H: JournalHost<D>>(&mut self, dev: &mut D, host: &mut H) -> Result<()> {
        if host.features_incompatible() & FINCOM_RECOVER == 0 {
            return Ok(());
        }
        super::recovery::recover(self, dev, host)
    }

    /// journal inode 号
    pub fn inode(&self) -> u32 {
        self.inode
    }

    /// 只读访问底层超级块
    pub fn sb(&self) -> &jbd_sb {
        &self.sb
    }

    /// 可写访问底层超级块（调用方负责在修改后调用 [`Self::mark_dirty`]）
    pub fn sb_mut(&mut self) -> &mut jbd_sb {
        &mut self.sb
    }

    /// 标记超级块需要落盘
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// 是否有未落盘的超级块修改
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// journal 设备块大小
    pub fn block_size(&self) -> u32 {
        u32::from_be(self.sb.blocksize)
    }

    /// journal 总块数
    pub fn max_len(&self) -> u32 {
        u32::from_be(self.sb.maxlen)
    }

    /// 日志信息起始块号
    pub fn first(&self) -> u32 {
        u32::from_be(self.sb.first)
    }

    /// 当前最早存活事务在日志中的起始块号（0 = 无存活事务）
    pub fn start(&self) -> u32 {
        u32::from_be(self.sb.start)
    }

    /// 设置日志起始块号
    pub fn set_start(&mut self, start: u32) {
        self.sb.start = start.to_be();
    }

    /// 当前最早存活事务的序列号
    pub fn sequence(&self) -> u32 {
        u32::from_be(self.sb.sequence)
    }

    /// 设置序列号
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sb.sequence = sequence.to_be();
    }

    /// 是否具有某个 compat 特性
    pub fn has_compat_feature(&self, feature: u32) -> bool {
        self.sb.has_compat_feature(feature)
    }

    /// 是否具有某个 incompat 特性
    pub fn has_incompat_feature(&self, feature: u32) -> bool {
        self.sb.has_incompat_feature(feature)
    }

    /// 是否具有某个 ro_compat 特性
    pub fn has_ro_compat_feature(&self, feature: u32) -> bool {
        self.sb.has_ro_compat_feature(feature)
    }
}

/// 测试专用构造函数：跳过 [`JbdFs::get`] 的设备 I/O，直接从一个已填好的
/// 超级块构造实例。供 [`super::jbd_journal`] 的单元测试复用。
#[cfg(test)]
pub(crate) mod test_support {
    use super::jbd_sb;
    use super::JbdFs;

    pub(crate) fn from_sb(sb: jbd_sb) -> JbdFs {
        JbdFs {
            inode: 8,
            sb,
            dirty: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDevice, MemBlockDevice};
    use crate::journal::host::test_support::FakeHost;

    fn make_valid_sb() -> jbd_sb {
        let mut sb = jbd_sb::default();
        sb.header.blocktype = JBD_SUPERBLOCK_V2.to_be();
        sb.blocksize = 1024u32.to_be();
        sb.maxlen = 64u32.to_be();
        sb.first = 1u32.to_be();
        sb.sequence = 1u32.to_be();
        sb.start = 0;
        sb
    }

    #[test]
    fn get_parses_valid_superblock() {
        let mut dev = MemBlockDevice::new(128, 1024);
        let mut host = FakeHost::new(10);
        let sb = make_valid_sb();
        let sb_bytes = unsafe {
            core::slice::from_raw_parts(&sb as *const jbd_sb as *const u8, JBD_SUPERBLOCK_SIZE)
        };
        dev.write_bytes(10 * 1024, sb_bytes).unwrap();

        let fs = JbdFs::get(&mut dev, &mut host).unwrap();
        assert_eq!(fs.max_len(), 64);
        assert_eq!(fs.first(), 1);
        assert!(!fs.is_dirty());
    }

    #[test]
    fn get_rejects_nonzero_mismatching_superblock_checksum() {
        let mut dev = MemBlockDevice::new(128, 1024);
        let mut host = FakeHost::new(10);
        let mut sb = make_valid_sb();
        sb.feature_incompat = JBD_FEATURE_INCOMPAT_CSUM_V3.to_be();
        // Nonzero but wrong for this superblock's contents.
        sb.checksum = 0xdead_beefu32.to_be();
        let sb_bytes = unsafe {
            core::slice::from_raw_parts(&sb as *const jbd_sb as *const u8, JBD_SUPERBLOCK_SIZE)
        };
        dev.write_bytes(10 * 1024, sb_bytes).unwrap();

        assert!(JbdFs::get(&mut dev, &mut host).is_err());
    }

    #[test]
    fn get_tolerates_zero_checksum_even_with_csum_feature_set() {
        let mut dev = MemBlockDevice::new(128, 1024);
        let mut host = FakeHost::new(10);
        let mut sb = make_valid_sb();
        // This crate never emits CSUM_V2/V3 trailers (spec §9); a mounted
        // journal with the feature bit set but a zero checksum field must
        // still mount.
        sb.feature_incompat = JBD_FEATURE_INCOMPAT_CSUM_V3.to_be();
        sb.checksum = 0;
        let sb_bytes = unsafe {
            core::slice::from_raw_parts(&sb as *const jbd_sb as *const u8, JBD_SUPERBLOCK_SIZE)
        };
        dev.write_bytes(10 * 1024, sb_bytes).unwrap();

        assert!(JbdFs::get(&mut dev, &mut host).is_ok());
    }

    #[test]
    fn get_rejects_bad_magic() {
        let mut dev = MemBlockDevice::new(128, 1024);
        let mut host = FakeHost::new(10);
        // block is all-zero, magic will not verify
        assert!(JbdFs::get(&mut dev, &mut host).is_err());
    }

    #[test]
    fn write_sb_roundtrips() {
        let mut dev = MemBlockDevice::new(128, 1024);
        let mut host = FakeHost::new(10);
        let sb = make_valid_sb();
        let sb_bytes = unsafe {
            core::slice::from_raw_parts(&sb as *const jbd_sb as *const u8, JBD_SUPERBLOCK_SIZE)
        };
        dev.write_bytes(10 * 1024, sb_bytes).unwrap();

        let mut fs = JbdFs::get(&mut dev, &mut host).unwrap();
        fs.set_start(5);
        fs.mark_dirty();
        fs.write_sb(&mut dev, &mut host).unwrap();
        assert!(!fs.is_dirty());

        let fs2 = JbdFs::get(&mut dev, &mut host).unwrap();
        assert_eq!(fs2.start(), 5);
    }
}
