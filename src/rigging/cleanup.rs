//! 无权重物理清理
//!
//! 一条链上没有任何骨骼带顶点权重时，它的刚体只会空转，删除这些刚体
//! 以及引用它们的关节。删除通过 [`remove_rigid_bodies`] 完成，幸存关节与
//! 冲量变形的索引同步重映射。

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::{RegisteredChain, RigContext};
use crate::physics::remove_rigid_bodies;
use crate::pmx::PmxModel;
use crate::{RigError, Result};

/// 带权重（> 0）的全部骨骼
pub fn weighted_bones(model: &PmxModel) -> Result<HashSet<usize>> {
    let bone_count = model.bones.len();
    let mut out = HashSet::new();
    for (v, vertex) in model.vertices.iter().enumerate() {
        for bone in vertex.weight.weighted_bones() {
            let index = usize::try_from(bone)
                .ok()
                .filter(|&b| b < bone_count)
                .ok_or_else(|| {
                    RigError::CorruptDocument(format!(
                        "vertex {} weights bone {} (bone count {})",
                        v, bone, bone_count
                    ))
                })?;
            out.insert(index);
        }
    }
    Ok(out)
}

/// 登记表为空时，从 `{slot}…:{bone}` 刚体名称重建（整组视为扁平链）
fn entries_from_names(model: &PmxModel, slot_prefix: &str) -> BTreeMap<String, Vec<RegisteredChain>> {
    let mut out: BTreeMap<String, Vec<RegisteredChain>> = BTreeMap::new();
    for body in &model.rigid_bodies {
        if !body.local_name.starts_with(slot_prefix) {
            continue;
        }
        let (Some((prefix, _)), Some(bone)) = (body.local_name.split_once(':'), body.bone()) else {
            continue;
        };
        let chains = out.entry(prefix.to_string()).or_default();
        match chains.first_mut() {
            Some(chain) => chain.bones.push(bone),
            None => chains.push(RegisteredChain {
                name: prefix.to_string(),
                bones: vec![bone],
                flat: true,
            }),
        }
    }
    out
}

/// 在固定刚体处把扁平链重新分段
///
/// 连续的固定刚体属于同一段（链首的两个固定点）。
fn segments(model: &PmxModel, chain: &RegisteredChain) -> Vec<Vec<usize>> {
    if !chain.flat {
        return vec![chain.bones.clone()];
    }
    let prefix = format!("{}:", chain.name);
    let is_static = |bone: usize| {
        model
            .rigid_bodies
            .iter()
            .find(|r| r.bone() == Some(bone) && r.local_name.starts_with(&prefix))
            .is_some_and(|r| r.is_static())
    };

    let mut out: Vec<Vec<usize>> = Vec::new();
    let mut previous_static = false;
    for &bone in &chain.bones {
        let fixed = is_static(bone);
        if out.is_empty() || (fixed && !previous_static) {
            out.push(Vec::new());
        }
        if let Some(last) = out.last_mut() {
            last.push(bone);
        }
        previous_static = fixed;
    }
    out
}

/// 删除没有任何带权重骨骼的链上的刚体
///
/// 每条被删除的链向 `out_log` 追加一行说明。返回删除的刚体数。
pub fn cleanup_free_bodies(model: &mut PmxModel, ctx: &mut RigContext, out_log: &mut Vec<String>) -> Result<usize> {
    let weighted = weighted_bones(model)?;
    let entries: BTreeMap<String, Vec<RegisteredChain>> = if ctx.registry.is_empty() {
        entries_from_names(model, &ctx.config.slot_prefix)
    } else {
        ctx.registry
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    };

    let mut doomed: BTreeSet<usize> = BTreeSet::new();
    let mut forgotten: Vec<(String, String)> = Vec::new();
    for (prefix, chains) in &entries {
        for chain in chains {
            let mut all_removed = true;
            for segment in segments(model, chain) {
                if segment.iter().any(|b| weighted.contains(b)) {
                    all_removed = false;
                    continue;
                }
                let bones: HashSet<usize> = segment.iter().copied().collect();
                let bodies: Vec<usize> = (0..model.rigid_bodies.len())
                    .filter(|&i| model.rigid_bodies[i].bone().is_some_and(|b| bones.contains(&b)))
                    .collect();
                if bodies.is_empty() {
                    continue;
                }
                let names: Vec<&str> = segment
                    .iter()
                    .filter_map(|&b| model.bones.get(b))
                    .map(|b| b.local_name.as_str())
                    .collect();
                out_log.push(format!(
                    "{}: removed {} rigid bodies of unweighted chain [{}]",
                    chain.name,
                    bodies.len(),
                    names.join(", ")
                ));
                doomed.extend(bodies);
            }
            if all_removed {
                forgotten.push((prefix.clone(), chain.name.clone()));
            }
        }
    }

    for (prefix, chain) in &forgotten {
        ctx.registry.forget(prefix, chain);
    }
    if doomed.is_empty() {
        return Ok(0);
    }

    let joints_before = model.joints.len();
    remove_rigid_bodies(model, &doomed)?;
    log::info!(
        "[Cleanup] 删除刚体 {}, 关节 {}",
        doomed.len(),
        joints_before - model.joints.len()
    );
    Ok(doomed.len())
}
