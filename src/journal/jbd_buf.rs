//! Journal 缓冲区描述符
//!
//! 对应 lwext4 的 `struct jbd_buf`；spec 数据模型中的 `jbd_buf` 实体。
//!
//! Rust 实现说明：C 版本持有指向 `ext4_block`/`jbd_trans`/`jbd_block_rec`
//! 的裸指针。这里改为持有 `trans_id` 和两个 LBA（原地块地址、journal 内
//! 日志块地址）；真正的缓存数据访问在需要时通过 `BlockDev::bcache` 按
//! LBA 重新查找，避免在 Rust 的借用规则下长期持有 `Block` 句柄。
#[derive(Debug, Clone, Copy)]
pub struct JbdBuf {
    /// 原地块地址（文件系统视角的 LBA，即该缓冲区最终要写回的位置）
    fs_lba: u64,
    /// 该块在 journal 日志内的块号（描述符 tag 之后紧跟的数据块）
    jbd_lba: u32,
    /// 所属事务 ID
    trans_id: u64,
}

impl JbdBuf {
    /// 创建一个新的 journal 缓冲区描述符
    pub fn new(fs_lba: u64, jbd_lba: u32, trans_id: u64) -> Self {
        Self {
            fs_lba,
            jbd_lba,
            trans_id,
        }
    }

    /// 原地块地址
    pub fn fs_lba(&self) -> u64 {
        self.fs_lba
    }

    /// journal 内日志块号
    pub fn jbd_lba(&self) -> u32 {
        self.jbd_lba
    }

    /// 设置 journal 内日志块号（commit 的 prepare 阶段惰性分配描述符槽位后回填）
    pub fn set_jbd_lba(&mut self, jbd_lba: u32) {
        self.jbd_lba = jbd_lba;
    }

    /// 所属事务 ID
    pub fn trans_id(&self) -> u64 {
        self.trans_id
    }
}
