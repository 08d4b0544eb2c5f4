//! 绑定流程
//!
//! 根收集 → 链分类 → 刚体合成 → 解缠 → 清理。所有入口共享同一个
//! [`RigContext`]，其中的清理登记表记录本次运行中生成了物理的链。

pub mod accessory;
pub mod classify;
pub mod cleanup;
pub mod detangle;
pub mod materials;
pub mod roots;

use std::collections::{BTreeMap, BTreeSet};

pub use accessory::{rig_hair_joints, rig_other_stuff};
pub use classify::{classify, snap_chain_end, ChainFamily, Classification, Quirk, QuirkEffect, QUIRKS};
pub use cleanup::{cleanup_free_bodies, weighted_bones};
pub use detangle::{find_split_points, rig_rough_detangle, split_rigid_chain};
pub use materials::{reweight_bones, split_merged_materials, BoneMapping};
pub use roots::{collect_accessory_roots, RootScope, SlotRoots};

use crate::physics::{adjust_body_physics, transform_skirt, RigConfig};
use crate::pmx::PmxModel;
use crate::Result;

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RigMode {
    /// 身体碰撞体、裙子、材质拆分、头发、饰品、解缠、清理
    #[default]
    Full,
    /// 只绑定头发
    HairOnly,
}

// ============================================================================
// 清理登记表
// ============================================================================

/// 一条已生成物理的链
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredChain {
    /// 刚体命名前缀（`{name}:{bone}`）
    pub name: String,
    pub bones: Vec<usize>,
    /// 整棵子树合成的单链，清理时需要在固定刚体处重新分段
    pub flat: bool,
}

/// 槽位前缀 → 链列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupRegistry {
    entries: BTreeMap<String, Vec<RegisteredChain>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, prefix: &str, chain: RegisteredChain) {
        self.entries.entry(prefix.to_string()).or_default().push(chain);
    }

    pub fn get(&self, prefix: &str) -> Option<&[RegisteredChain]> {
        self.entries.get(prefix).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RegisteredChain])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// 删除指定链；前缀下没有剩余链时一并删除前缀
    pub fn forget(&mut self, prefix: &str, chain: &str) {
        if let Some(chains) = self.entries.get_mut(prefix) {
            chains.retain(|c| c.name != chain);
            if chains.is_empty() {
                self.entries.remove(prefix);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 登记的链总数
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

// ============================================================================
// 上下文
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RigContext {
    pub config: RigConfig,
    pub registry: CleanupRegistry,
    /// 含有多个根的槽位名
    pub multi_root_slots: BTreeSet<String>,
}

impl RigContext {
    pub fn new(config: RigConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }
}

/// 对文档执行完整的绑定流程
///
/// 只有文档损坏（索引越界）时返回错误；找不到锚点等情况只记录日志。
pub fn run(model: &mut PmxModel, mode: RigMode, ctx: &mut RigContext, out_log: &mut Vec<String>) -> Result<()> {
    log::info!(
        "[Rig] 开始: 骨骼 {}, 刚体 {}, 关节 {}",
        model.bones.len(),
        model.rigid_bodies.len(),
        model.joints.len()
    );

    if mode == RigMode::HairOnly {
        let chains = rig_hair_joints(model, ctx);
        out_log.push(format!("Rigged {} hair chains", chains));
        return Ok(());
    }

    let colliders = adjust_body_physics(model);
    let skirt = transform_skirt(model);
    let reweighted = split_merged_materials(model, ctx)?;
    let hair = rig_hair_joints(model, ctx);
    let other = rig_other_stuff(model, ctx);
    let splits = rig_rough_detangle(model, None, &ctx.config)?;
    let removed = cleanup_free_bodies(model, ctx, out_log)?;

    out_log.push(format!(
        "Body colliders {}, skirt bodies {}, reweighted slots {}, hair chains {}, other chains {}, splits {}, removed bodies {}",
        colliders, skirt, reweighted, hair, other, splits, removed
    ));
    log::info!(
        "[Rig] 完成: 刚体 {}, 关节 {}",
        model.rigid_bodies.len(),
        model.joints.len()
    );
    Ok(())
}
