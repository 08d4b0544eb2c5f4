//! 同名合并链的材质拆分
//!
//! 导出工具会让多个饰品槽位使用同名骨骼，按名称解析权重时所有槽位的
//! 顶点都绑到第一组骨骼上。这里把 `[:AccId:] NN` 材质的顶点权重
//! 重新指向 `ca_slotNN` 自己的那组骨骼。

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use super::RigContext;
use crate::pmx::PmxModel;
use crate::skeleton::{children_map, parent_map};
use crate::{RigError, Result};

static ACC_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[:AccId:\] (\d+)").expect("acc id pattern"));

/// 碰撞体骨架的首个骨骼（清理前存在）
const COLLIDER_ROOT: &str = "KK_Colliders_cf_j_root";
/// 清理后仍然存在的腰部骨骼
const WAIST_BONE: &str = "cf_s_waist01";
/// 父级为此索引的骨骼不参与重新挂接
const BODY_ROOT_INDEX: usize = 2;

/// 旧骨骼 → 新骨骼
#[derive(Debug, Clone, Copy)]
pub enum BoneMapping<'a> {
    /// `src[i]` → `dst[min(i, dst.len() - 1)]`
    Lists { src: &'a [usize], dst: &'a [usize] },
    Map(&'a BTreeMap<usize, usize>),
}

impl BoneMapping<'_> {
    /// (映射表, 需要检查的源骨骼)
    fn resolve(&self) -> (HashMap<usize, usize>, Vec<usize>) {
        match *self {
            BoneMapping::Lists { src, dst } => {
                let Some(last) = dst.len().checked_sub(1) else {
                    return (HashMap::new(), Vec::new());
                };
                let map = src
                    .iter()
                    .enumerate()
                    .map(|(i, &s)| (s, dst[i.min(last)]))
                    .collect();
                let check = src.iter().copied().take(dst.len()).collect();
                (map, check)
            }
            BoneMapping::Map(map) => (
                map.iter().map(|(&k, &v)| (k, v)).collect(),
                map.keys().copied().collect(),
            ),
        }
    }
}

/// 材质注释中的槽位号
fn acc_id(comment: &str) -> Option<u32> {
    ACC_ID.captures(comment)?.get(1)?.as_str().parse().ok()
}

/// `ca_slotNN` → NN
fn slot_number(name: &str, prefix: &str) -> Option<u32> {
    let digits: String = name
        .strip_prefix(prefix)?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// 把槽位材质的顶点权重从源骨骼改到目标骨骼
///
/// `require_all` 为真时材质必须用到全部源骨骼，否则至少一个。
/// 找不到材质或检查不通过时返回 `Ok(false)`（之前的材质可能已被修改）。
pub fn reweight_bones(model: &mut PmxModel, mapping: BoneMapping, slot: u32, require_all: bool) -> Result<bool> {
    let (map, check) = mapping.resolve();
    if map.is_empty() {
        return Ok(false);
    }

    let materials: Vec<usize> = (0..model.materials.len())
        .filter(|&i| acc_id(&model.materials[i].comment) == Some(slot))
        .collect();
    if materials.is_empty() {
        log::debug!("[Material] 槽位 {} 没有对应材质", slot);
        return Ok(false);
    }

    for material in materials {
        let vertices = model.faces_vertices(model.material_faces(material));
        if let Some(&bad) = vertices.iter().find(|&&v| v >= model.vertices.len()) {
            return Err(RigError::CorruptDocument(format!(
                "material {} references vertex {} (vertex count {})",
                material,
                bad,
                model.vertices.len()
            )));
        }
        let bones = model.vertices_bones(&vertices);
        let used = |b: &usize| bones.contains(&(*b as i32));
        let matched = if require_all {
            check.iter().all(used)
        } else {
            check.iter().any(used)
        };
        if !matched {
            return Ok(false);
        }

        for &v in &vertices {
            for bone in model.vertices[v].weight.bones_mut() {
                let Ok(old) = usize::try_from(*bone) else {
                    continue;
                };
                if let Some(&new) = map.get(&old) {
                    *bone = new as i32;
                }
            }
        }
    }
    Ok(true)
}

/// 重新挂接末尾重复骨骼的父级
///
/// 末尾追加的饰品骨骼可能以同名骨骼的第一份为父级，改为挂到
/// 该父级之后的下一个同名骨骼上。
fn reparent_trailing_duplicates(model: &mut PmxModel, slots: &[usize]) {
    let bone_count = model.bones.len();
    let mut last = match model.find_bone(COLLIDER_ROOT) {
        Some(i) => i,
        None => match model.find_bone(WAIST_BONE) {
            Some(waist) => {
                let trailing: Vec<usize> = slots.iter().copied().filter(|&s| s > waist).collect();
                let members = trailing
                    .last()
                    .and_then(|&s| children_map(&model.bones, &[s], true, None).pop())
                    .map(|list| list.members)
                    .unwrap_or_default();
                match members.as_slice() {
                    [.., before, end] if end + 1 == bone_count => *before,
                    [.., end] => *end,
                    [] => waist,
                }
            }
            None => bone_count.saturating_sub(2),
        },
    };
    last += 1;

    let mut tabu: HashMap<String, Vec<usize>> = HashMap::new();
    for idx in last..bone_count {
        let Some(parent) = model.bones[idx].parent_id() else {
            continue;
        };
        if parent >= last || parent == BODY_ROOT_INDEX {
            continue;
        }
        let name = model.bones[idx].local_name.clone();
        let Some(seen) = tabu.get_mut(&name) else {
            tabu.insert(name, vec![parent]);
            continue;
        };
        let (root, pid) = (seen[0], seen[seen.len() - 1]);
        if root != parent {
            continue;
        }
        let pname = &model.bones[pid].local_name;
        let Some(next) = (pid + 1..bone_count).find(|&i| &model.bones[i].local_name == pname) else {
            continue;
        };
        model.bones[idx].parent = next as i32;
        seen.push(next);
        log::debug!("[Material] {} 改挂到 {}", model.bones[idx].local_name, next);
    }
}

/// 拆分同名骨骼造成的材质合并，返回重新分配了权重的槽位数
pub fn split_merged_materials(model: &mut PmxModel, ctx: &RigContext) -> Result<usize> {
    let cfg = &ctx.config;
    let all: Vec<usize> = (0..model.bones.len()).collect();
    let parents = parent_map(&model.bones, &all);
    let slots: Vec<usize> = all
        .iter()
        .copied()
        .filter(|&i| model.bones[i].local_name.starts_with(&cfg.slot_prefix))
        .collect();

    // 槽位名 → [槽位, 后代...]
    let mut slot_map: Vec<(String, Vec<usize>)> = Vec::with_capacity(slots.len());
    let mut clusters: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for &slot in &slots {
        let children: Vec<usize> = parents
            .iter()
            .filter(|(_, chain)| chain.contains(&slot))
            .map(|(&b, _)| b)
            .collect();
        let slot_name = model.bones[slot].local_name.clone();
        let joined = children
            .iter()
            .map(|&c| model.bones[c].local_name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        clusters.entry(joined).or_default().push(slot_name.clone());
        let mut members = vec![slot];
        members.extend(children);
        slot_map.push((slot_name, members));
    }

    if cfg.debug_log {
        for (names, slots) in &clusters {
            let short: String = names.chars().take(50).collect();
            log::info!("[Material] {:50}({:3}): {:?}", short, names.chars().count(), slots);
        }
    }

    reparent_trailing_duplicates(model, &slots);

    // 名称 → 第一个同名骨骼
    let mut first_of: HashMap<&str, usize> = HashMap::new();
    for (i, bone) in model.bones.iter().enumerate() {
        first_of.entry(bone.local_name.as_str()).or_insert(i);
    }
    let plans: Vec<(String, BTreeMap<usize, usize>)> = slot_map
        .iter()
        .map(|(name, members)| {
            let idx_map = members
                .iter()
                .filter_map(|&b| {
                    let first = first_of[model.bones[b].local_name.as_str()];
                    (first != b).then_some((first, b))
                })
                .collect();
            (name.clone(), idx_map)
        })
        .collect();

    let mut reweighted = 0;
    for (name, idx_map) in plans.iter().filter(|(_, m)| !m.is_empty()) {
        let Some(slot) = slot_number(name, &cfg.slot_prefix) else {
            log::warn!("[Material] 无法解析槽位号: {}", name);
            continue;
        };
        if reweight_bones(model, BoneMapping::Map(idx_map), slot, false)? {
            reweighted += 1;
        }
    }
    if reweighted > 0 {
        log::info!("[Material] 拆分了 {} 个槽位的合并材质", reweighted);
    }
    Ok(reweighted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmx::{Material, Vertex, WeightDeform};
    use crate::test_util::SkeletonBuilder;
    use glam::Vec3;

    /// 两个槽位，骨骼同名；两份材质都绑在第一组骨骼上
    fn merged() -> (PmxModel, [usize; 2], [usize; 2]) {
        let mut s = SkeletonBuilder::new();
        let all = s.bone("全ての親", None, Vec3::ZERO);
        let slot_a = s.bone("ca_slot01", Some(all), Vec3::ZERO);
        let a = s.chain(&["ribbon", "ribbon_tip"], slot_a, Vec3::ZERO, Vec3::NEG_Y);
        let slot_b = s.bone("ca_slot02", Some(all), Vec3::ZERO);
        let b = s.chain(&["ribbon", "ribbon_tip"], slot_b, Vec3::X, Vec3::NEG_Y);
        let mut model = s.into_model();

        for _ in 0..2 {
            for &bone in &a {
                model.vertices.push(Vertex::new(Vec3::ZERO, WeightDeform::Bdef1 { bone: bone as i32 }));
            }
            model.vertices.push(Vertex::new(
                Vec3::ZERO,
                WeightDeform::Bdef2 {
                    bones: [a[0] as i32, a[1] as i32],
                    weight: 0.5,
                },
            ));
        }
        model.faces = vec![[0, 1, 2], [3, 4, 5]];
        for (i, slot) in [1, 2].iter().enumerate() {
            let mut m = Material::new(format!("acc{}", i));
            m.comment = format!("[:AccId:] {:02}", slot);
            m.surface_count = 3;
            model.materials.push(m);
        }
        (model, [a[0], a[1]], [b[0], b[1]])
    }

    #[test]
    fn test_acc_id_and_slot_number() {
        assert_eq!(acc_id("foo [:AccId:] 07 bar"), Some(7));
        assert_eq!(acc_id("nothing"), None);
        assert_eq!(slot_number("ca_slot12", "ca_slot"), Some(12));
        assert_eq!(slot_number("ca_slotX", "ca_slot"), None);
    }

    #[test]
    fn test_reweight_lists() {
        let (mut model, a, b) = merged();
        let ok = reweight_bones(&mut model, BoneMapping::Lists { src: &a, dst: &b }, 2, true).unwrap();
        assert!(ok);
        assert_eq!(model.vertices[3].weight.bones(), &[b[0] as i32]);
        assert_eq!(model.vertices[5].weight.bones(), &[b[0] as i32, b[1] as i32]);
        // 槽位 1 的顶点不变
        assert_eq!(model.vertices[0].weight.bones(), &[a[0] as i32]);
    }

    #[test]
    fn test_reweight_missing_material() {
        let (mut model, a, b) = merged();
        let ok = reweight_bones(&mut model, BoneMapping::Lists { src: &a, dst: &b }, 9, false).unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_reweight_requires_all() {
        let (mut model, a, b) = merged();
        let src = [a[0], a[1], 0];
        let dst = [b[0], b[1], 0];
        // 材质没有用到骨骼 0
        assert!(!reweight_bones(&mut model, BoneMapping::Lists { src: &src, dst: &dst }, 2, true).unwrap());
        assert!(reweight_bones(&mut model, BoneMapping::Lists { src: &src, dst: &dst }, 2, false).unwrap());
    }

    #[test]
    fn test_reweight_corrupt_face() {
        let (mut model, a, b) = merged();
        model.faces[1] = [3, 4, 99];
        let result = reweight_bones(&mut model, BoneMapping::Lists { src: &a, dst: &b }, 2, false);
        assert!(matches!(result, Err(RigError::CorruptDocument(_))));
    }

    #[test]
    fn test_split_merged_materials() {
        let (mut model, a, b) = merged();
        let ctx = RigContext::default();
        assert_eq!(split_merged_materials(&mut model, &ctx).unwrap(), 1);
        assert_eq!(model.vertices[0].weight.bones(), &[a[0] as i32]);
        assert_eq!(model.vertices[4].weight.bones(), &[b[1] as i32]);
    }

    #[test]
    fn test_reparent_trailing_duplicates() {
        let mut s = SkeletonBuilder::new();
        let all = s.bone("全ての親", None, Vec3::ZERO);
        s.bone("センター", Some(all), Vec3::ZERO);
        s.bone("グルーブ", Some(all), Vec3::ZERO);
        let first = s.bone("ring", Some(all), Vec3::ZERO);
        let second = s.bone("ring", Some(all), Vec3::ZERO);
        s.bone(COLLIDER_ROOT, Some(all), Vec3::ZERO);
        // 末尾的两个 bell 都挂在第一个 ring 上
        let a = s.bone("bell", Some(first), Vec3::ZERO);
        let b = s.bone("bell", Some(first), Vec3::ZERO);
        let mut model = s.into_model();

        reparent_trailing_duplicates(&mut model, &[]);
        assert_eq!(model.bones[a].parent_id(), Some(first));
        assert_eq!(model.bones[b].parent_id(), Some(second));
    }
}
