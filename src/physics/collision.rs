//! 碰撞组分配
//!
//! 组号 1-16 对应 PMX 中的 0-15。掩码第 i 位置 1 表示与第 i 组碰撞，
//! 默认只排除自身所在组。

use crate::pmx::RigidBody;

/// 具名碰撞组（数值为 1 起的位号，外部工具依赖这些数值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CollisionGroup {
    Body = 1,
    Arms = 2,
    DefaultHair = 3,
    Skirt = 4,
    ChestAcc = 5,
    ChestMassA = 6,
    Wing = 7,
    Tail = 8,
    ChestMassB = 9,
    Waist = 10,
    BodyAcc = 11,
    /// 默认饰品组：忽略所有更低的组
    Accessory = 16,
}

impl CollisionGroup {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Body,
            2 => Self::Arms,
            3 => Self::DefaultHair,
            4 => Self::Skirt,
            5 => Self::ChestAcc,
            6 => Self::ChestMassA,
            7 => Self::Wing,
            8 => Self::Tail,
            9 => Self::ChestMassB,
            10 => Self::Waist,
            11 => Self::BodyAcc,
            16 => Self::Accessory,
            _ => return None,
        })
    }

    #[inline]
    pub fn number(self) -> u8 {
        self as u8
    }

    /// 该组需要额外忽略的组
    fn exemptions(self) -> &'static [CollisionGroup] {
        use CollisionGroup::*;
        match self {
            Tail => &[Skirt, Waist],
            Waist | Skirt => &[Tail],
            ChestAcc => &[ChestMassA, ChestMassB],
            ChestMassA | ChestMassB => {
                &[Body, DefaultHair, ChestAcc, BodyAcc, ChestMassA, ChestMassB]
            }
            _ => &[],
        }
    }
}

#[inline]
fn bit(group: u8) -> u16 {
    1u16 << (group - 1)
}

/// 组号 → (PMX 组, 掩码)
///
/// 16 组的掩码为 `2^15 - 1`，超出 1-16 的组号返回 `(0, 0)`。
pub fn collision_group(group: u8) -> (u8, u16) {
    match group {
        16 => (15, 0x7FFF),
        1..=15 => (group - 1, 0xFFFF - bit(group)),
        _ => (0, 0),
    }
}

/// 同时排除所有列出的组
pub fn merge_collision_groups(groups: &[u8]) -> u16 {
    let excluded = groups
        .iter()
        .filter(|g| (1..=16).contains(*g))
        .fold(0u16, |acc, &g| acc | bit(g));
    0xFFFF - excluded
}

/// 为一组刚体写入组与掩码，并应用已知冲突组的互相豁免
pub fn adjust_collision_groups(group: u8, bodies: &mut [RigidBody]) {
    let (pmx_group, mut mask) = collision_group(group);
    if let Some(named) = CollisionGroup::from_u8(group) {
        let exempt = named.exemptions();
        if !exempt.is_empty() {
            let mut list: Vec<u8> = vec![group];
            list.extend(exempt.iter().map(|g| g.number()));
            mask = merge_collision_groups(&list);
        }
    }
    for body in bodies {
        body.group = pmx_group;
        body.collision_mask = mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_exclusion_for_every_group() {
        for g in 1..=16u8 {
            let (group, mask) = collision_group(g);
            assert_eq!(group, g - 1);
            if g == 16 {
                assert_eq!(mask, (1u16 << 15) - 1);
            } else {
                assert_eq!(mask & (1 << (g - 1)), 0);
                assert_eq!(mask | (1 << (g - 1)), 0xFFFF);
            }
        }
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(collision_group(0), (0, 0));
        assert_eq!(collision_group(17), (0, 0));
    }

    #[test]
    fn test_merge() {
        let mask = merge_collision_groups(&[CollisionGroup::Tail.number(), CollisionGroup::Skirt.number()]);
        assert_eq!(mask, 0xFFFF - (1 << 7) - (1 << 3));
        assert_eq!(merge_collision_groups(&[]), 0xFFFF);
    }

    #[test]
    fn test_adjust_policy() {
        let mut bodies = vec![RigidBody::new("a"), RigidBody::new("b")];
        adjust_collision_groups(CollisionGroup::Tail.number(), &mut bodies);
        for body in &bodies {
            assert_eq!(body.group, 7);
            assert_eq!(body.collision_mask & (1 << 7), 0);
            assert_eq!(body.collision_mask & (1 << 3), 0);
            assert_eq!(body.collision_mask & (1 << 9), 0);
            assert_ne!(body.collision_mask & 1, 0);
        }

        adjust_collision_groups(CollisionGroup::ChestMassA.number(), &mut bodies);
        let mask = bodies[0].collision_mask;
        for g in [1u8, 3, 5, 6, 9, 11] {
            assert_eq!(mask & (1 << (g - 1)), 0, "group {}", g);
        }
        assert_ne!(mask & (1 << 1), 0);

        adjust_collision_groups(CollisionGroup::DefaultHair.number(), &mut bodies);
        assert_eq!(bodies[1].collision_mask, 0xFFFF - 4);

        adjust_collision_groups(CollisionGroup::Accessory.number(), &mut bodies);
        assert_eq!(bodies[0].group, 15);
        assert_eq!(bodies[0].collision_mask, 0x7FFF);
    }
}
