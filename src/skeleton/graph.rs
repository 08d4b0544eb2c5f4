//! 骨骼层次图工具
//!
//! 祖先表、后代表与位移表。父索引可能为负、越界甚至成环（导出工具的产物），
//! 所有遍历遇到已访问的骨骼即停止。

use std::collections::{BTreeMap, HashSet};

use glam::Vec3;

use crate::pmx::Bone;

/// 从某骨骼向上（不含自身）的祖先迭代器
pub struct Ancestors<'a> {
    bones: &'a [Bone],
    current: Option<usize>,
    seen: HashSet<usize>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.current?;
        let parent = self
            .bones
            .get(current)
            .and_then(|b| b.parent_id())
            .filter(|&p| p < self.bones.len() && self.seen.insert(p));
        self.current = parent;
        parent
    }
}

pub fn ancestors(bones: &[Bone], bone: usize) -> Ancestors<'_> {
    Ancestors {
        bones,
        current: Some(bone),
        seen: HashSet::from([bone]),
    }
}

/// 每个骨骼在 `subset` 内的祖先，按根 → 直接父级排序
///
/// 父链再也不进入 `subset` 的骨骼得到空列表（视为局部根）。
pub fn parent_map(bones: &[Bone], subset: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let members: HashSet<usize> = subset.iter().copied().collect();
    let mut out = BTreeMap::new();
    for &bone in subset {
        if bone >= bones.len() {
            continue;
        }
        let mut chain: Vec<usize> = ancestors(bones, bone)
            .filter(|p| members.contains(p))
            .collect();
        chain.reverse();
        out.insert(bone, chain);
    }
    out
}

/// 直接子骨骼表（按索引顺序）
pub fn children_cache(bones: &[Bone]) -> Vec<Vec<usize>> {
    let mut cache = vec![Vec::new(); bones.len()];
    for (i, bone) in bones.iter().enumerate() {
        if let Some(p) = bone.parent_id().filter(|&p| p < bones.len() && p != i) {
            cache[p].push(i);
        }
    }
    cache
}

/// 先序遍历的全部后代（不含自身）
pub fn descendants(cache: &[Vec<usize>], root: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    seen.insert(root);
    let mut stack: Vec<usize> = cache
        .get(root)
        .map_or(Vec::new(), |c| c.iter().rev().copied().collect());
    while let Some(bone) = stack.pop() {
        if !seen.insert(bone) {
            continue;
        }
        out.push(bone);
        if let Some(children) = cache.get(bone) {
            stack.extend(children.iter().rev().copied());
        }
    }
    out
}

/// 单个根骨骼的后代列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildList {
    pub root: usize,
    pub name: String,
    pub members: Vec<usize>,
}

/// 为每个根生成后代列表
///
/// `subset` 为 None 时在整个骨架上查找后代（链成员由真实父子关系决定）；
/// 否则只保留 `subset` 中的骨骼。
pub fn children_map(
    bones: &[Bone],
    roots: &[usize],
    include_self: bool,
    subset: Option<&[usize]>,
) -> Vec<ChildList> {
    let cache = children_cache(bones);
    let filter: Option<HashSet<usize>> = subset.map(|s| s.iter().copied().collect());
    roots
        .iter()
        .filter(|&&r| r < bones.len())
        .map(|&root| {
            let mut members = Vec::new();
            if include_self {
                members.push(root);
            }
            members.extend(
                descendants(&cache, root)
                    .into_iter()
                    .filter(|b| filter.as_ref().map_or(true, |f| f.contains(b))),
            );
            ChildList {
                root,
                name: bones[root].local_name.clone(),
                members,
            }
        })
        .collect()
}

/// 两个骨架间每根骨骼的位置差
///
/// `relative` 为真时减去祖先已累计的位移。
pub fn delta_map(
    target: &[Bone],
    source: &[Bone],
    parents: &BTreeMap<usize, Vec<usize>>,
    relative: bool,
) -> BTreeMap<usize, Vec3> {
    let mut out: BTreeMap<usize, Vec3> = BTreeMap::new();
    for (&bone, chain) in parents {
        let (Some(t), Some(s)) = (target.get(bone), source.get(bone)) else {
            continue;
        };
        let mut delta = t.position - s.position;
        if relative {
            for p in chain {
                delta -= out.get(p).copied().unwrap_or(Vec3::ZERO);
            }
        }
        out.insert(bone, delta);
    }
    out
}

/// 包含该骨骼的槽位骨骼（自身或最近的祖先）
pub fn slot_of(bones: &[Bone], bone: usize, slot_prefix: &str) -> Option<usize> {
    if bones.get(bone)?.local_name.starts_with(slot_prefix) {
        return Some(bone);
    }
    ancestors(bones, bone).find(|&a| bones[a].local_name.starts_with(slot_prefix))
}
