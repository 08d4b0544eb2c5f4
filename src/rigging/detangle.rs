//! 刚体链解缠
//!
//! 回退路径会把整棵子树合成为一条链，链中的骨骼未必父子相邻。
//! 这里找出链中「下一根骨骼不是当前骨骼的子骨骼」或命名序号断开的位置，
//! 在该处把链拆开：当前刚体折叠为零尺寸终端，下一刚体改为静态，
//! 跨越断点的关节重新连接到真实父骨骼的刚体上，找不到则删除。

use std::collections::{BTreeMap, BTreeSet};

use glam::Vec3;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::physics::{remove_joints, RigConfig};
use crate::pmx::{BoneTail, PmxModel, RigidBodyMode, RigidBodyShape};
use crate::{RigError, Result};

/// 带序号的命名族：`stem`（以及可选的 `side`）相同且 `num` 递增才算同一条链
static NUMBERED_NAMES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(?P<stem>left|right)(?P<num>\d+)$",
        r"^joint(?P<stem>\d+)[-_](?P<num>\d+)$",
        r"^(?P<stem>joint)(?P<num>\d+)$",
        r"^(?P<stem>.*kami\D*)(?P<num>\d+)$",
        r"^(?P<stem>.*?)(?P<num>\d+)(?P<side>_[LR])$",
        r"^(?P<stem>.*[RL])(?P<num>\d+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("numbered name pattern"))
    .collect()
});

static BASE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_base_[FSB]$").expect("base pattern"));

fn numbered_key(caps: &Captures) -> Option<(String, u32)> {
    let mut stem = caps.name("stem")?.as_str().to_string();
    if let Some(side) = caps.name("side") {
        stem.push_str(side.as_str());
    }
    let num = caps.name("num")?.as_str().parse().ok()?;
    Some((stem, num))
}

/// 两个名称属于同一命名族但序号断开
fn naming_breaks(current: &str, next: &str) -> bool {
    for re in NUMBERED_NAMES.iter() {
        let (Some(a), Some(b)) = (re.captures(current), re.captures(next)) else {
            continue;
        };
        let (Some((stem_a, num_a)), Some((stem_b, num_b))) = (numbered_key(&a), numbered_key(&b)) else {
            return false;
        };
        return stem_a != stem_b || num_b <= num_a;
    }
    false
}

// ============================================================================
// 断点检测
// ============================================================================

/// 找出需要在其后拆开的刚体位置
///
/// 位置 `i` 表示在 `rigids[i]` 与 `rigids[i + 1]` 之间拆开。
pub fn find_split_points(model: &PmxModel, rigids: &[usize]) -> Vec<usize> {
    let mut out = Vec::new();
    for (i, pair) in rigids.windows(2).enumerate() {
        let (Some(current), Some(next)) = (model.rigid_bodies.get(pair[0]), model.rigid_bodies.get(pair[1])) else {
            continue;
        };
        let (Some(bone_i), Some(bone_n)) = (
            current.bone().and_then(|b| model.bones.get(b).map(|bone| (b, bone))),
            next.bone().and_then(|b| model.bones.get(b).map(|bone| (b, bone))),
        ) else {
            continue;
        };

        // 已经拆过
        if current.is_collapsed() && next.is_static() {
            continue;
        }

        let detached = bone_n.1.parent_id() != Some(bone_i.0) && !current.is_collapsed();
        let renamed = naming_breaks(&bone_i.1.local_name, &bone_n.1.local_name);
        let terminal = bone_n.1.local_name.ends_with("_end") || BASE_SUFFIX.is_match(&bone_n.1.local_name);

        if detached || renamed || terminal {
            out.push(i);
        }
    }
    out
}

// ============================================================================
// 拆分
// ============================================================================

/// 在给定位置拆开刚体链
pub fn split_rigid_chain(model: &mut PmxModel, rigids: &[usize], splits: &[usize], cfg: &RigConfig) -> Result<()> {
    let body_count = model.rigid_bodies.len();
    if let Some(&bad) = rigids.iter().find(|&&r| r >= body_count) {
        return Err(RigError::CorruptDocument(format!(
            "rigid body {} out of range ({})",
            bad, body_count
        )));
    }

    let mut dropped = BTreeSet::new();
    for &i in splits {
        let (Some(&ri), Some(&rn)) = (rigids.get(i), rigids.get(i + 1)) else {
            continue;
        };

        if let Some(bone) = model.rigid_bodies[ri].bone().filter(|&b| b < model.bones.len()) {
            let body = &mut model.rigid_bodies[ri];
            body.shape = RigidBodyShape::Sphere;
            body.size = Vec3::ZERO;
            body.position = model.bones[bone].position;
            body.rotation = Vec3::ZERO;
            model.bones[bone].set_tail(BoneTail::Offset(cfg.tail_offset));
        }
        model.rigid_bodies[rn].mode = RigidBodyMode::Static;

        // 下一刚体骨骼的真实父级，优先在本链内查找
        let parent_body = model.rigid_bodies[rn]
            .bone()
            .and_then(|b| model.bones.get(b))
            .and_then(|b| b.parent_id())
            .and_then(|p| {
                rigids
                    .iter()
                    .copied()
                    .find(|&r| model.rigid_bodies[r].bone() == Some(p))
                    .or_else(|| model.rigid_of_bone(p))
            })
            .filter(|&p| p != rn);

        for (j, joint) in model.joints.iter_mut().enumerate() {
            let spans = (joint.rigid_a == ri as i32 && joint.rigid_b == rn as i32)
                || (joint.rigid_a == rn as i32 && joint.rigid_b == ri as i32);
            if !spans {
                continue;
            }
            match parent_body {
                Some(p) => {
                    joint.rigid_a = p as i32;
                    joint.rigid_b = rn as i32;
                }
                None => {
                    dropped.insert(j);
                }
            }
        }
    }

    if !dropped.is_empty() {
        log::debug!("[Detangle] 删除 {} 个无法重连的关节", dropped.len());
        remove_joints(model, &dropped);
    }
    Ok(())
}

// ============================================================================
// 入口
// ============================================================================

/// 对刚体链执行粗略解缠
///
/// `candidates` 为空时扫描所有 `ca_slot…:…` 刚体，按 `:` 前的前缀分组。
/// 返回拆分次数。
pub fn rig_rough_detangle(model: &mut PmxModel, candidates: Option<&[usize]>, cfg: &RigConfig) -> Result<usize> {
    let groups: Vec<Vec<usize>> = match candidates {
        Some(list) => vec![list.to_vec()],
        None => {
            let mut by_prefix: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for (i, body) in model.rigid_bodies.iter().enumerate() {
                if !body.local_name.starts_with(&cfg.slot_prefix) {
                    continue;
                }
                if let Some((prefix, _)) = body.local_name.split_once(':') {
                    by_prefix.entry(prefix).or_default().push(i);
                }
            }
            by_prefix.into_values().collect()
        }
    };

    let mut total = 0;
    for group in groups.iter().filter(|g| g.len() > 1) {
        let splits = find_split_points(model, group);
        if splits.is_empty() {
            continue;
        }
        log::debug!("[Detangle] {} 处拆分: {:?}", splits.len(), splits);
        split_rigid_chain(model, group, &splits, cfg)?;
        total += splits.len();
    }
    if total > 0 {
        log::info!("[Detangle] 共拆分 {} 处", total);
    }
    Ok(total)
}
