//! 刚体/关节合成
//!
//! 对一条有序骨骼链生成胶囊/球刚体和弹簧关节，方式与编辑器的
//! 「创建刚体/连接关节」一致，再加上锚定和稳定化处理。

use std::collections::HashMap;

use glam::Vec3;

use super::collision::{adjust_collision_groups, collision_group};
use super::config::RigConfig;
use super::geometry::{degrees, matrix_to_euler_zxy, pose_matrix_bone, tail_vector};
use crate::pmx::{BoneTail, Joint, PmxModel, RigidBody, RigidBodyMode, RigidBodyShape};

/// 一次链合成的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBuild {
    /// 新刚体（按链顺序）
    pub bodies: Vec<usize>,
    pub joints: Vec<usize>,
    /// 父骨骼不在链内的关节，需要由调用方锚定
    pub head_joint: Option<usize>,
}

/// `patch_bone_array` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedChain {
    /// `{name}_r`
    pub root_body: usize,
    pub bodies: Vec<usize>,
    pub joints: Vec<usize>,
}

/// 将链上骨骼的尾端依次指向下一根骨骼
///
/// `last_as_offset` 为真时，最后一根骨骼改为显式偏移尾端。
pub fn bind_bones(model: &mut PmxModel, chain: &[usize], last_as_offset: bool, offset: Vec3) {
    for pair in chain.windows(2) {
        if let Some(bone) = model.bones.get_mut(pair[0]) {
            bone.set_tail(BoneTail::Link(pair[1] as i32));
        }
    }
    if last_as_offset {
        if let Some(bone) = chain.last().and_then(|&b| model.bones.get_mut(b)) {
            bone.set_tail(BoneTail::Offset(offset));
        }
    }
}

/// 每根骨骼一个刚体：有尾端方向的为胶囊，否则为球
///
/// `radius <= 0` 时胶囊半径取骨骼长度的比例。返回新刚体索引。
#[allow(clippy::too_many_arguments)]
pub fn add_base_body(
    model: &mut PmxModel,
    chain: &[usize],
    mode: RigidBodyMode,
    radius: f32,
    visible_only: bool,
    name: &str,
    group: u8,
    cfg: &RigConfig,
) -> Vec<usize> {
    let (pmx_group, mask) = collision_group(group);
    let mut created = Vec::with_capacity(chain.len());

    for &idx in chain {
        let Some(bone) = model.bones.get(idx) else {
            continue;
        };
        if visible_only && !bone.is_visible() {
            continue;
        }
        let position = bone.position;
        let has_direction = match bone.tail {
            BoneTail::Link(_) => bone.tail_link().is_some_and(|t| chain.contains(&t)),
            BoneTail::Offset(offset) => offset != Vec3::ZERO,
        };

        let mut body = RigidBody::new(format!("{}:{}", name, bone.local_name));
        if has_direction {
            let vector = tail_vector(model, idx);
            let length = vector.length();
            let r = if radius > 0.0 { radius } else { length * cfg.capsule_radius_ratio };
            body.shape = RigidBodyShape::Capsule;
            body.size = Vec3::new(r, length, 0.0);
            body.position = position + 0.5 * vector;
            body.rotation = degrees(matrix_to_euler_zxy(&pose_matrix_bone(model, idx, true)));
        } else {
            let r = if radius > 0.0 { radius } else { cfg.sphere_radius };
            body.shape = RigidBodyShape::Sphere;
            body.size = Vec3::new(r, 0.0, 0.0);
            body.position = position;
        }
        body.bone_index = idx as i32;
        body.mode = mode;
        body.move_attenuation = cfg.chain_move_damping;
        body.rotation_attenuation = cfg.chain_rotation_damping;
        body.group = pmx_group;
        body.collision_mask = mask;
        created.push(model.add_rigid_body(body));
    }
    created
}

/// 刚体链 + 关节
///
/// 首个刚体为静态。每根可见骨骼一个关节（关节数不超过刚体数），
/// 父骨骼在链内的关节连接 父刚体 → 子刚体。
#[allow(clippy::too_many_arguments)]
pub fn add_body_chain_with_joints(
    model: &mut PmxModel,
    chain: &[usize],
    mode: RigidBodyMode,
    radius: f32,
    visible_only: bool,
    name: &str,
    group: u8,
    cfg: &RigConfig,
) -> Option<ChainBuild> {
    let bodies = add_base_body(model, chain, mode, radius, visible_only, name, group, cfg);
    if bodies.is_empty() {
        return None;
    }

    // 只在本次新建的刚体中查找，避免命中同一骨骼上已有的刚体
    let body_of: HashMap<usize, usize> = bodies
        .iter()
        .filter_map(|&b| model.rigid_bodies[b].bone().map(|bone| (bone, b)))
        .collect();

    let first = chain
        .first()
        .and_then(|b| body_of.get(b))
        .copied()
        .unwrap_or(bodies[0]);
    model.rigid_bodies[first].mode = RigidBodyMode::Static;

    let mut joints = Vec::new();
    let mut head_joint = None;
    let mut prev_body: Option<usize> = None;
    for &idx in chain {
        if joints.len() >= bodies.len() {
            break;
        }
        let Some(bone) = model.bones.get(idx) else {
            continue;
        };
        if visible_only && !bone.is_visible() {
            continue;
        }
        let Some(&body) = body_of.get(&idx) else {
            continue;
        };
        let parent = bone.parent_id().filter(|p| chain.contains(p));

        let mut joint = Joint::new(format!("{}:{}", name, bone.local_name));
        joint.position = bone.position;
        joint.rotation_min = -cfg.joint_rotation_limit;
        joint.rotation_max = cfg.joint_rotation_limit;
        joint.rotation_spring = cfg.joint_rotation_spring;

        match parent {
            Some(p) => {
                // 父骨骼不可见时无刚体可连
                let Some(&parent_body) = body_of.get(&p) else {
                    continue;
                };
                joint.rigid_a = parent_body as i32;
                joint.rigid_b = body as i32;
                joint.rotation = model.rigid_bodies[body].rotation;
                joints.push(model.add_joint(joint));
            }
            None => {
                joint.rigid_b = body as i32;
                match prev_body {
                    // 链中途断开的骨骼先连到前一个刚体，由解缠重新连接
                    Some(prev) => {
                        joint.rigid_a = prev as i32;
                        joint.rotation = model.rigid_bodies[body].rotation;
                        joints.push(model.add_joint(joint));
                    }
                    None => {
                        let j = model.add_joint(joint);
                        head_joint.get_or_insert(j);
                        joints.push(j);
                    }
                }
            }
        }
        prev_body = Some(body);
    }

    Some(ChainBuild {
        bodies,
        joints,
        head_joint,
    })
}

/// 为骨骼链生成锚定的刚体链
///
/// `anchor` 为外部锚定刚体（如头部），为空时链首关节连接到 `{name}_r`。
/// 已存在 `{name}_r` 时不做任何事。
pub fn patch_bone_array(
    model: &mut PmxModel,
    anchor: Option<usize>,
    chain: &[usize],
    name: &str,
    group: u8,
    bind_last_as_tail: bool,
    cfg: &RigConfig,
) -> Option<PatchedChain> {
    let &first_bone = chain.first()?;
    let root_name = format!("{}_r", name);
    if model.find_rigid(&root_name).is_some() {
        log::debug!("[Synth] {} 已存在，跳过", root_name);
        return None;
    }

    bind_bones(model, chain, bind_last_as_tail, cfg.tail_offset);

    let (pmx_group, mask) = collision_group(group);
    let mut root = RigidBody::new(root_name);
    root.bone_index = first_bone as i32;
    root.shape = RigidBodyShape::Sphere;
    root.size = Vec3::ZERO;
    root.position = model.bones[first_bone].position;
    root.group = pmx_group;
    root.collision_mask = mask;
    root.mode = RigidBodyMode::Static;
    root.move_attenuation = cfg.anchor_damping;
    root.rotation_attenuation = cfg.anchor_damping;
    let root_body = model.add_rigid_body(root);

    let Some(build) = add_body_chain_with_joints(
        model,
        chain,
        RigidBodyMode::Dynamic,
        0.0,
        true,
        name,
        group,
        cfg,
    ) else {
        // 没有可见骨骼，移除孤立的锚定刚体
        model.rigid_bodies.pop();
        log::debug!("[Synth] {} 没有可用骨骼", name);
        return None;
    };

    if let Some(j) = build.head_joint {
        let joint = &mut model.joints[j];
        joint.rigid_a = anchor.unwrap_or(root_body) as i32;
        joint.lock();
    }

    let bodies = &build.bodies;
    {
        let body = &mut model.rigid_bodies[bodies[0]];
        body.move_attenuation = cfg.first_move_damping;
        body.rotation_attenuation = cfg.first_rotation_damping;
    }
    if bodies.len() > 1 {
        // MMD 需要两个固定点，否则链在加载时会塌落
        model.rigid_bodies[bodies[1]].mode = RigidBodyMode::Static;
        let before_last = model.rigid_bodies[bodies[bodies.len() - 2]].rotation;
        let last = &mut model.rigid_bodies[bodies[bodies.len() - 1]];
        last.rotation = before_last;
        last.size.x = cfg.last_body_radius;
        for &b in bodies {
            let body = &mut model.rigid_bodies[b];
            body.size.y = (body.size.y - 2.0 * body.size.x).max(0.0);
        }
    }

    adjust_collision_groups(group, &mut model.rigid_bodies[bodies[0]..]);

    if cfg.debug_log {
        log::info!(
            "[Synth] {}: 刚体 {}, 关节 {}",
            name,
            build.bodies.len(),
            build.joints.len()
        );
    }

    Some(PatchedChain {
        root_body,
        bodies: build.bodies,
        joints: build.joints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::geometry::{euler_zxy_to_direction, radians};
    use crate::pmx::BoneFlags;
    use crate::test_util::SkeletonBuilder;

    fn vertical_chain(n: usize) -> (PmxModel, Vec<usize>) {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("root", None, Vec3::ZERO);
        let names: Vec<String> = (1..=n).map(|i| format!("hair_{:02}", i)).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let chain = s.chain(&refs, root, Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        (s.into_model(), chain)
    }

    #[test]
    fn test_bind_bones() {
        let (mut model, chain) = vertical_chain(3);
        bind_bones(&mut model, &chain, true, Vec3::new(0.0, 0.0, -0.1));
        assert_eq!(model.bones[chain[0]].tail, BoneTail::Link(chain[1] as i32));
        assert!(model.bones[chain[0]].flags.contains(BoneFlags::TAIL_IS_BONE));
        assert_eq!(model.bones[chain[2]].tail, BoneTail::Offset(Vec3::new(0.0, 0.0, -0.1)));
    }

    #[test]
    fn test_base_body_shapes() {
        let (mut model, chain) = vertical_chain(3);
        bind_bones(&mut model, &chain, false, Vec3::ZERO);
        let cfg = RigConfig::default();
        let bodies = add_base_body(&mut model, &chain, RigidBodyMode::Dynamic, 0.0, true, "t", 3, &cfg);
        assert_eq!(bodies.len(), 3);
        let capsule = &model.rigid_bodies[bodies[0]];
        assert_eq!(capsule.shape, RigidBodyShape::Capsule);
        assert!((capsule.size.y - 1.0).abs() < 1e-6);
        assert!((capsule.size.x - 0.2).abs() < 1e-6);
        assert!((capsule.position.y - 10.5).abs() < 1e-6);
        assert_eq!(capsule.local_name, "t:hair_01");
        assert_eq!(capsule.group, 2);
        // 最后一根没有尾端
        let sphere = &model.rigid_bodies[bodies[2]];
        assert_eq!(sphere.shape, RigidBodyShape::Sphere);
        assert!((sphere.size.x - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_patch_bone_array_anchored() {
        let (mut model, chain) = vertical_chain(4);
        let head = model.add_rigid_body(RigidBody::new("head"));
        let cfg = RigConfig::default();
        let patched = patch_bone_array(&mut model, Some(head), &chain, "ca_slot01_0", 3, true, &cfg)
            .expect("chain should be rigged");

        assert_eq!(patched.bodies.len(), 4);
        assert_eq!(patched.joints.len(), 4);
        assert_eq!(model.rigid_bodies.len(), 6);
        assert_eq!(model.rigid_bodies[patched.root_body].local_name, "ca_slot01_0_r");

        let modes: Vec<_> = patched.bodies.iter().map(|&b| model.rigid_bodies[b].mode).collect();
        assert_eq!(
            modes,
            vec![
                RigidBodyMode::Static,
                RigidBodyMode::Static,
                RigidBodyMode::Dynamic,
                RigidBodyMode::Dynamic
            ]
        );

        let head_joint = &model.joints[patched.joints[0]];
        assert_eq!(head_joint.rigid_a, head as i32);
        assert_eq!(head_joint.rigid_b, patched.bodies[0] as i32);
        assert_eq!(head_joint.rotation_max, Vec3::ZERO);

        let j = &model.joints[patched.joints[2]];
        assert_eq!(j.rigid_a, patched.bodies[1] as i32);
        assert_eq!(j.rigid_b, patched.bodies[2] as i32);
        assert_eq!(j.rotation_max, Vec3::new(10.0, 5.0, 10.0));
        assert_eq!(j.rotation_min, Vec3::new(-10.0, -5.0, -10.0));
        assert_eq!(j.rotation_spring, Vec3::new(500.0, 100.0, 20.0));

        let first = &model.rigid_bodies[patched.bodies[0]];
        assert!((first.move_attenuation - 0.999).abs() < 1e-6);
        let last = &model.rigid_bodies[patched.bodies[3]];
        assert!((last.size.x - 0.1).abs() < 1e-6);
        assert_eq!(last.rotation, model.rigid_bodies[patched.bodies[2]].rotation);
        // 高度扣除 2 * 半径
        let second = &model.rigid_bodies[patched.bodies[1]];
        assert!((second.size.y - 0.6).abs() < 1e-5);
        for &b in &patched.bodies {
            assert_eq!(model.rigid_bodies[b].collision_mask, 0xFFFF - 4);
        }
    }

    #[test]
    fn test_capsules_point_along_chain() {
        let (mut model, chain) = vertical_chain(4);
        let cfg = RigConfig::default();
        let patched = patch_bone_array(&mut model, None, &chain, "up", 16, true, &cfg).unwrap();
        for &b in &patched.bodies[..3] {
            let dir = euler_zxy_to_direction(radians(model.rigid_bodies[b].rotation));
            assert!((dir - Vec3::Y).length() < 1e-4);
        }
        // 无外部锚定时连接到 _r
        let head_joint = &model.joints[patched.joints[0]];
        assert_eq!(head_joint.rigid_a, patched.root_body as i32);
        let root = &model.rigid_bodies[patched.root_body];
        assert_eq!(root.group, 15);
        assert_eq!(root.collision_mask, 0x7FFF);
        assert_eq!(root.size, Vec3::ZERO);
    }

    #[test]
    fn test_chain_skips_missing_bone() {
        let (mut model, chain) = vertical_chain(3);
        let cfg = RigConfig::default();
        let with_gap = [chain[0], 999, chain[1], chain[2]];
        let build = add_body_chain_with_joints(
            &mut model,
            &with_gap,
            RigidBodyMode::Dynamic,
            0.0,
            true,
            "gap",
            16,
            &cfg,
        )
        .unwrap();
        assert_eq!(build.bodies.len(), 3);
        assert_eq!(build.joints.len(), 3);
        assert!(build.head_joint.is_some());
    }

    #[test]
    fn test_idempotent() {
        let (mut model, chain) = vertical_chain(3);
        let cfg = RigConfig::default();
        assert!(patch_bone_array(&mut model, None, &chain, "x", 16, true, &cfg).is_some());
        let bodies = model.rigid_bodies.len();
        let joints = model.joints.len();
        assert!(patch_bone_array(&mut model, None, &chain, "x", 16, true, &cfg).is_none());
        assert_eq!(model.rigid_bodies.len(), bodies);
        assert_eq!(model.joints.len(), joints);
    }

    #[test]
    fn test_invisible_chain_removes_anchor() {
        let (mut model, chain) = vertical_chain(3);
        for &b in &chain {
            model.bones[b].flags.remove(BoneFlags::VISIBLE);
        }
        let cfg = RigConfig::default();
        assert!(patch_bone_array(&mut model, None, &chain, "ghost", 16, true, &cfg).is_none());
        assert!(model.rigid_bodies.is_empty());
        assert!(model.joints.is_empty());
    }
}
