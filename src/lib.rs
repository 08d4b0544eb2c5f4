//! KK Rigging - KK 导出 PMX 模型的物理绑定引擎
//!
//! 对第三方导出工具生成的、无标注的骨骼树进行：
//! - 骨骼链发现与分类（头发、饰品、布料）
//! - 同名合并链的拆分
//! - 刚体/关节合成（胶囊体朝向、碰撞组、锚定）
//! - 事后修复（链解缠、无权重物理清理）
//!
//! 模块划分：
//! - `pmx`: PMX 文档模型与二进制读写
//! - `skeleton`: 骨骼图工具（祖先表/后代表）
//! - `physics`: 几何、碰撞组、刚体合成、身体碰撞体
//! - `rigging`: 链分类、多根合并、解缠、清理与总流程

pub mod physics;
pub mod pmx;
pub mod rigging;
pub mod skeleton;

#[cfg(test)]
pub(crate) mod test_util;

pub use physics::{CollisionGroup, RigConfig};
pub use pmx::PmxModel;
pub use rigging::{run, RigContext, RigMode};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PMX parse error: {0}")]
    PmxParse(String),

    #[error("PMX write error: {0}")]
    PmxWrite(String),

    /// 文档本身已损坏（索引越界等），必须中止整个流程
    #[error("Corrupt document: {0}")]
    CorruptDocument(String),
}

pub type Result<T> = std::result::Result<T, RigError>;
