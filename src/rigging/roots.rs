//! 饰品根骨骼收集
//!
//! 每个 `N_move*` 骨骼是一个饰品根，归属于包含它的 `ca_slot` 槽位。
//! 同一槽位下有多个根时（导出工具合并了同名饰品），每个根使用
//! `{slot}-{k}` 前缀，且各自的子树不包含嵌套在其中的其它根。

use std::collections::HashSet;

use crate::physics::RigConfig;
use crate::pmx::PmxModel;
use crate::skeleton::{children_cache, slot_of};

/// 一个根骨骼及其作用范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootScope {
    pub root: usize,
    /// 链命名前缀
    pub prefix: String,
    /// 根的后代（先序，不含根和嵌套根）
    pub subtree: Vec<usize>,
    pub multi_root: bool,
}

/// 一个槽位下的全部根
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRoots {
    pub slot: usize,
    pub slot_name: String,
    pub roots: Vec<RootScope>,
}

impl SlotRoots {
    pub fn is_multi_root(&self) -> bool {
        self.roots.len() > 1
    }
}

/// 按槽位收集全部饰品根（槽位与根均按骨骼索引排序）
pub fn collect_accessory_roots(model: &PmxModel, cfg: &RigConfig) -> Vec<SlotRoots> {
    let bones = &model.bones;
    let roots: Vec<usize> = (0..bones.len())
        .filter(|&i| bones[i].local_name.starts_with(&cfg.root_prefix))
        .collect();
    let root_set: HashSet<usize> = roots.iter().copied().collect();
    let cache = children_cache(bones);

    let mut slots: Vec<SlotRoots> = Vec::new();
    for &root in &roots {
        let Some(slot) = slot_of(bones, root, &cfg.slot_prefix) else {
            log::warn!(
                "[Roots] {} 不在任何 {} 下，跳过",
                bones[root].local_name,
                cfg.slot_prefix
            );
            continue;
        };
        let scope = RootScope {
            root,
            prefix: String::new(),
            subtree: pruned_descendants(&cache, root, &root_set),
            multi_root: false,
        };
        match slots.iter_mut().find(|s| s.slot == slot) {
            Some(entry) => entry.roots.push(scope),
            None => slots.push(SlotRoots {
                slot,
                slot_name: bones[slot].local_name.clone(),
                roots: vec![scope],
            }),
        }
    }

    slots.sort_by_key(|s| s.slot);
    for entry in &mut slots {
        let multi = entry.is_multi_root();
        for (k, scope) in entry.roots.iter_mut().enumerate() {
            scope.multi_root = multi;
            scope.prefix = if multi {
                format!("{}-{}", entry.slot_name, k)
            } else {
                entry.slot_name.clone()
            };
        }
        if multi {
            log::debug!(
                "[Roots] {} 合并了 {} 个根",
                entry.slot_name,
                entry.roots.len()
            );
        }
    }
    slots
}

/// 先序后代，遇到其它根时不再深入
fn pruned_descendants(cache: &[Vec<usize>], root: usize, roots: &HashSet<usize>) -> Vec<usize> {
    let mut out = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut stack: Vec<usize> = cache.get(root).map(|c| c.iter().rev().copied().collect()).unwrap_or_default();
    while let Some(bone) = stack.pop() {
        if roots.contains(&bone) || !seen.insert(bone) {
            continue;
        }
        out.push(bone);
        if let Some(children) = cache.get(bone) {
            stack.extend(children.iter().rev().copied());
        }
    }
    out
}
