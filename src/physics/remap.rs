//! 稳定删除与索引重映射
//!
//! 所有刚体/关节删除都经过这里：先按谓词删除，得到旧索引 → 新索引表，
//! 再用同一张表改写所有外部引用（关节两端、冲量 Morph）。

use std::collections::BTreeSet;

use crate::pmx::{MorphOffsets, PmxModel};
use crate::{Result, RigError};

/// 旧索引 → 新索引（被删除的为 None）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRemap {
    map: Vec<Option<usize>>,
}

impl IndexRemap {
    pub fn identity(len: usize) -> Self {
        Self {
            map: (0..len).map(Some).collect(),
        }
    }

    #[inline]
    pub fn get(&self, old: usize) -> Option<usize> {
        self.map.get(old).copied().flatten()
    }

    /// 改写文件中的有符号索引；负数保持为 -1，被删除返回 None
    pub fn remap_i32(&self, old: i32) -> Option<i32> {
        if old < 0 {
            return Some(-1);
        }
        self.get(old as usize).map(|i| i as i32)
    }

    /// 原长度
    #[inline]
    pub fn old_len(&self) -> usize {
        self.map.len()
    }

    pub fn removed(&self) -> usize {
        self.map.iter().filter(|m| m.is_none()).count()
    }

    pub fn is_identity(&self) -> bool {
        self.removed() == 0
    }
}

/// 按谓词删除元素，保持剩余元素的相对顺序
pub trait StableIndexSet<T> {
    fn remove_where<F>(&mut self, pred: F) -> IndexRemap
    where
        F: FnMut(usize, &T) -> bool;
}

impl<T> StableIndexSet<T> for Vec<T> {
    fn remove_where<F>(&mut self, mut pred: F) -> IndexRemap
    where
        F: FnMut(usize, &T) -> bool,
    {
        let mut map = Vec::with_capacity(self.len());
        let mut next = 0usize;
        for (i, item) in self.iter().enumerate() {
            if pred(i, item) {
                map.push(None);
            } else {
                map.push(Some(next));
                next += 1;
            }
        }
        let mut idx = 0usize;
        self.retain(|_| {
            let keep = map[idx].is_some();
            idx += 1;
            keep
        });
        IndexRemap { map }
    }
}

/// 删除关节
pub fn remove_joints(model: &mut PmxModel, joints: &BTreeSet<usize>) -> IndexRemap {
    model.joints.remove_where(|i, _| joints.contains(&i))
}

/// 删除刚体，连带删除引用它们的关节，并重映射剩余引用
///
/// 剩余关节引用了不存在的刚体说明文档已损坏。
pub fn remove_rigid_bodies(model: &mut PmxModel, bodies: &BTreeSet<usize>) -> Result<IndexRemap> {
    if bodies.is_empty() {
        return Ok(IndexRemap::identity(model.rigid_bodies.len()));
    }
    let body_count = model.rigid_bodies.len();
    let remap = model.rigid_bodies.remove_where(|i, _| bodies.contains(&i));

    let is_removed = |idx: i32| idx >= 0 && bodies.contains(&(idx as usize));
    model
        .joints
        .remove_where(|_, j| is_removed(j.rigid_a) || is_removed(j.rigid_b));

    for joint in &mut model.joints {
        for end in [&mut joint.rigid_a, &mut joint.rigid_b] {
            if *end >= body_count as i32 {
                return Err(RigError::CorruptDocument(format!(
                    "joint '{}' references rigid body {} of {}",
                    joint.local_name, end, body_count
                )));
            }
            *end = remap.remap_i32(*end).unwrap_or(-1);
        }
    }

    for morph in &mut model.morphs {
        if let MorphOffsets::Impulse(items) = &mut morph.offsets {
            items.retain(|o| !is_removed(o.rigid_body));
            for item in items.iter_mut() {
                item.rigid_body = remap.remap_i32(item.rigid_body).unwrap_or(-1);
            }
        }
    }

    Ok(remap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmx::{ImpulseOffset, Joint, Morph, RigidBody};
    use glam::Vec3;

    #[test]
    fn test_remove_where_map() {
        let mut v = vec!['a', 'b', 'c', 'd', 'e'];
        let remap = v.remove_where(|i, _| i == 1 || i == 3);
        assert_eq!(v, vec!['a', 'c', 'e']);
        assert_eq!(remap.get(0), Some(0));
        assert_eq!(remap.get(1), None);
        assert_eq!(remap.get(2), Some(1));
        assert_eq!(remap.get(4), Some(2));
        assert_eq!(remap.removed(), 2);
        assert_eq!(remap.remap_i32(-1), Some(-1));
    }

    fn chain_model() -> PmxModel {
        let mut model = PmxModel::new();
        for name in ["a", "b", "c", "d"] {
            model.add_rigid_body(RigidBody::new(name));
        }
        for (a, b) in [(0, 1), (1, 2), (2, 3), (0, 3)] {
            let mut j = Joint::new(format!("{}-{}", a, b));
            j.rigid_a = a;
            j.rigid_b = b;
            model.add_joint(j);
        }
        model.morphs.push(Morph {
            local_name: "kick".into(),
            universal_name: "kick".into(),
            panel: 4,
            offsets: MorphOffsets::Impulse(vec![
                ImpulseOffset {
                    rigid_body: 1,
                    local: false,
                    velocity: Vec3::Y,
                    torque: Vec3::ZERO,
                },
                ImpulseOffset {
                    rigid_body: 3,
                    local: true,
                    velocity: Vec3::X,
                    torque: Vec3::ZERO,
                },
            ]),
        });
        model
    }

    #[test]
    fn test_remove_bodies_keeps_identity() {
        let mut model = chain_model();
        let before: Vec<(String, String)> = model
            .joints
            .iter()
            .filter(|j| j.rigid_a != 1 && j.rigid_b != 1)
            .map(|j| {
                (
                    model.rigid_bodies[j.rigid_a as usize].local_name.clone(),
                    model.rigid_bodies[j.rigid_b as usize].local_name.clone(),
                )
            })
            .collect();

        let removed: BTreeSet<usize> = [1].into_iter().collect();
        remove_rigid_bodies(&mut model, &removed).unwrap();

        assert_eq!(model.rigid_bodies.len(), 3);
        let after: Vec<(String, String)> = model
            .joints
            .iter()
            .map(|j| {
                (
                    model.rigid_bodies[j.rigid_a as usize].local_name.clone(),
                    model.rigid_bodies[j.rigid_b as usize].local_name.clone(),
                )
            })
            .collect();
        assert_eq!(before, after);

        let MorphOffsets::Impulse(items) = &model.morphs[0].offsets else {
            panic!("impulse morph lost");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(model.rigid_bodies[items[0].rigid_body as usize].local_name, "d");
    }

    #[test]
    fn test_dangling_joint_is_corrupt() {
        let mut model = chain_model();
        model.joints[0].rigid_b = 99;
        let removed: BTreeSet<usize> = [2].into_iter().collect();
        let err = remove_rigid_bodies(&mut model, &removed).unwrap_err();
        assert!(matches!(err, RigError::CorruptDocument(_)));
    }

    #[test]
    fn test_remove_joints() {
        let mut model = chain_model();
        let removed: BTreeSet<usize> = [0, 2].into_iter().collect();
        let remap = remove_joints(&mut model, &removed);
        assert_eq!(model.joints.len(), 2);
        assert_eq!(model.joints[0].local_name, "1-2");
        assert_eq!(remap.get(3), Some(1));
    }
}
