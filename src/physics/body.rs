//! 身体碰撞体与裙子刚体调整
//!
//! 以 KK 参考骨骼的位置构建躯干/肩/颈的盒形碰撞体，供头发链碰撞使用。
//! 任一参考骨骼缺失时跳过对应碰撞体。

use glam::Vec3;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::pmx::{PmxModel, RigidBody, RigidBodyShape};

/// 除第 1 组（身体）外全部碰撞
const BODY_COLLIDER_MASK: u16 = 0xFFFE;
/// 默认臀宽（左足/右足 X 距离）
const DEFAULT_HIP_WIDTH: f32 = 1.769_346_1;

static SKIRT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^cf_j_sk_(\d+)_(\d+)(\[side\])?").expect("skirt pattern"));

fn bone_pos(model: &PmxModel, name: &str) -> Option<Vec3> {
    model.find_bone(name).map(|i| model.bones[i].position)
}

fn box_collider(model: &PmxModel, name: &str, bone: &str, position: Vec3, size: Vec3) -> RigidBody {
    let mut body = RigidBody::new(name);
    body.bone_index = model.find_bone(bone).map_or(0, |b| b as i32);
    body.shape = RigidBodyShape::Box;
    body.position = position;
    body.size = size.abs();
    body.collision_mask = BODY_COLLIDER_MASK;
    body.move_attenuation = 0.9999;
    body.rotation_attenuation = 0.9999;
    body
}

/// 调整身体物理：臀部碰撞体，以及头发用的躯干/肩/颈碰撞体
///
/// 返回新增或修改的刚体数量。
pub fn adjust_body_physics(model: &mut PmxModel) -> usize {
    let mut touched = 0;
    if adjust_butt(model).is_some() {
        touched += 1;
    }

    if model.find_rigid("RB_upperbody").is_some() {
        return touched;
    }
    let Some(colliders) = hair_colliders(model) else {
        log::warn!("[Body] 缺少参考骨骼，跳过躯干碰撞体");
        return touched;
    };
    for body in colliders {
        log::debug!("[Body] 添加 {}", body.local_name);
        model.add_rigid_body(body);
        touched += 1;
    }
    touched
}

fn adjust_butt(model: &mut PmxModel) -> Option<()> {
    let x = bone_pos(model, "cf_j_waist02")?.x;
    let y = bone_pos(model, "cf_d_thigh01_L")?.y;
    let z = bone_pos(model, "cf_s_siri_L")?.z;
    let left = bone_pos(model, "左足")?.x;
    let right = bone_pos(model, "右足")?.x;
    let width = (right - left).abs() / DEFAULT_HIP_WIDTH;

    let rigid = model.find_rigid("下半身")?;
    let body = &mut model.rigid_bodies[rigid];
    body.position = Vec3::new(x, y, z);
    body.size.x = 0.85 * width;
    body.collision_mask = BODY_COLLIDER_MASK;
    body.move_attenuation = 0.999;
    body.rotation_attenuation = 0.999;
    body.repulsion = 0.0;
    body.friction = 0.5;
    Some(())
}

fn hair_colliders(model: &PmxModel) -> Option<Vec<RigidBody>> {
    let shoulder_l = bone_pos(model, "cf_d_shoulder_L")?;
    let shoulder_r = bone_pos(model, "cf_d_shoulder_R")?;
    let nip_r = bone_pos(model, "cf_s_bnip01_R")?;

    // 躯干
    let max = Vec3::new(
        bone_pos(model, "cf_s_shoulder02_L")?.x,
        match bone_pos(model, "cf_j_spinesk_01") {
            Some(tie) => tie.y,
            None => (shoulder_r.y + nip_r.y) / 2.0,
        },
        bone_pos(model, "cf_d_sk_03_00")?.z,
    );
    let min = Vec3::new(
        bone_pos(model, "cf_s_shoulder02_R")?.x,
        bone_pos(model, "下半身")?.y,
        nip_r.z,
    );
    let torso = box_collider(
        model,
        "RB_upperbody",
        "上半身2",
        Vec3::new(0.0, (max.y + min.y) / 2.0, 0.0),
        (max - min) / 2.0,
    );
    let box_y = max.y;

    // 左肩
    let max = Vec3::new(
        bone_pos(model, "cf_d_arm01_L")?.x,
        shoulder_l.y + (shoulder_l.y - box_y),
        bone_pos(model, "cf_s_elbo_L")?.z,
    );
    let min = Vec3::new(shoulder_l.x, box_y, bone_pos(model, "cf_s_elboback_L")?.z);
    let left = box_collider(
        model,
        "RB_shoulder_L",
        "左肩",
        Vec3::new((max.x + min.x) / 2.0, shoulder_l.y, shoulder_l.z),
        Vec3::new((max.x - min.x) / 2.0, (max.y - min.y) / 1.5, (max.z - min.z) / 1.5),
    );
    let neck_min_x = min.x;

    // 右肩
    let max = Vec3::new(
        bone_pos(model, "cf_d_arm01_R")?.x,
        shoulder_r.y + (shoulder_r.y - box_y),
        bone_pos(model, "cf_s_elbo_R")?.z,
    );
    let min = Vec3::new(shoulder_r.x, box_y, bone_pos(model, "cf_s_elboback_R")?.z);
    let right = box_collider(
        model,
        "RB_shoulder_R",
        "右肩",
        Vec3::new((max.x + min.x) / 2.0, shoulder_r.y, shoulder_r.z),
        Vec3::new((max.x - min.x) / 2.0, (max.y - min.y) / 1.5, (max.z - min.z) / 1.5),
    );
    let neck_max_x = min.x;

    // 颈部（Z 与下沿沿用右肩）
    let max = Vec3::new(
        bone_pos(model, "cf_J_CheekLow_s_R").map_or(neck_max_x, |p| p.x),
        bone_pos(model, "頭")?.y,
        max.z,
    );
    let min = Vec3::new(
        bone_pos(model, "cf_J_CheekLow_s_L").map_or(neck_min_x, |p| p.x),
        min.y,
        min.z,
    );
    let neck = box_collider(
        model,
        "RB_neck",
        "首",
        (max + min) / 2.0,
        Vec3::new((max.x - min.x) / 2.0, (max.y - min.y) / 2.0, (max.z - min.z) / 1.5),
    );

    Some(vec![torso, left, right, neck])
}

/// 裙子刚体压平为矩形，侧向关节获得更大的 X 移动范围
///
/// 裙子分 8 条，每条 6 段（`cf_j_sk_MM_SS`）。返回修改的刚体与关节数。
pub fn transform_skirt(model: &mut PmxModel) -> usize {
    let mut touched = 0;
    for body in &mut model.rigid_bodies {
        let Some(caps) = SKIRT_NAME.captures(&body.local_name) else {
            continue;
        };
        let (Ok(main), Ok(sub)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        if sub == 5 {
            continue;
        }
        body.shape = RigidBodyShape::Box;
        body.size.x = if main == 0 || main == 4 { 0.7 } else { 0.6 };
        body.size.z = 0.02;
        touched += 1;
    }

    for j in 0..model.joints.len() {
        let name = model.joints[j].local_name.clone();
        let Some(caps) = SKIRT_NAME.captures(&name) else {
            continue;
        };
        let (Ok(main), Ok(sub)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        if caps.get(3).is_none() || sub == 0 {
            continue;
        }

        // 侧向关节移到刚体边缘
        if sub != 5 {
            let anchor = usize::try_from(model.joints[j].rigid_a)
                .ok()
                .and_then(|r| model.rigid_bodies.get(r))
                .map(|r| (r.position, r.size));
            if let Some((pos, size)) = anchor {
                let joint = &mut model.joints[j];
                joint.position.y = pos.y + size.y / 2.0;
                joint.position.z = pos.z + size.z / 2.0;
            }
        }

        let corner = matches!(main, 1 | 2 | 5 | 6);
        let range = match (sub, corner) {
            (1, true) => Some((-5.0, 5.0)),
            (2, true) => Some((-10.0, 10.0)),
            (3, true) => Some((-15.0, 15.0)),
            (4, true) => Some((-20.0, 20.0)),
            (4, false) => Some((-10.0, 10.0)),
            (5, _) => Some((1.0, 0.0)),
            _ => None,
        };
        if let Some((min, max)) = range {
            let joint = &mut model.joints[j];
            joint.position_min.x = min;
            joint.position_max.x = max;
        }
        touched += 1;
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmx::Joint;
    use crate::test_util::SkeletonBuilder;

    #[test]
    fn test_butt_collider() {
        let mut s = SkeletonBuilder::new();
        s.bone("cf_j_waist02", None, Vec3::new(0.1, 9.0, 0.0));
        s.bone("cf_d_thigh01_L", None, Vec3::new(0.8, 8.5, 0.0));
        s.bone("cf_s_siri_L", None, Vec3::new(0.5, 8.0, 0.7));
        s.bone("左足", None, Vec3::new(0.884_673, 8.0, 0.0));
        s.bone("右足", None, Vec3::new(-0.884_673, 8.0, 0.0));
        let mut model = s.into_model();
        model.add_rigid_body(RigidBody::new("下半身"));

        assert_eq!(adjust_body_physics(&mut model), 1);
        let body = &model.rigid_bodies[0];
        assert!((body.position - Vec3::new(0.1, 8.5, 0.7)).length() < 1e-5);
        assert!((body.size.x - 0.85).abs() < 1e-4);
        assert_eq!(body.collision_mask, 0xFFFE);
    }

    #[test]
    fn test_missing_bones_are_skipped() {
        let mut model = SkeletonBuilder::new().into_model();
        assert_eq!(adjust_body_physics(&mut model), 0);
        assert!(model.rigid_bodies.is_empty());
    }

    #[test]
    fn test_hair_colliders() {
        let mut s = SkeletonBuilder::new();
        for (name, pos) in [
            ("cf_d_shoulder_L", Vec3::new(1.0, 13.0, 0.0)),
            ("cf_d_shoulder_R", Vec3::new(-1.0, 13.0, 0.0)),
            ("cf_s_bnip01_R", Vec3::new(-0.6, 11.0, -1.0)),
            ("cf_s_shoulder02_L", Vec3::new(1.5, 12.5, 0.0)),
            ("cf_s_shoulder02_R", Vec3::new(-1.5, 12.5, 0.0)),
            ("cf_d_sk_03_00", Vec3::new(0.0, 9.0, 1.0)),
            ("下半身", Vec3::new(0.0, 9.5, 0.0)),
            ("上半身2", Vec3::new(0.0, 11.0, 0.0)),
            ("cf_d_arm01_L", Vec3::new(2.0, 12.8, 0.0)),
            ("cf_s_elbo_L", Vec3::new(3.0, 11.0, 0.3)),
            ("cf_s_elboback_L", Vec3::new(3.0, 11.0, -0.3)),
            ("cf_d_arm01_R", Vec3::new(-2.0, 12.8, 0.0)),
            ("cf_s_elbo_R", Vec3::new(-3.0, 11.0, 0.3)),
            ("cf_s_elboback_R", Vec3::new(-3.0, 11.0, -0.3)),
            ("頭", Vec3::new(0.0, 14.5, 0.0)),
        ] {
            s.bone(name, None, pos);
        }
        let mut model = s.into_model();
        assert_eq!(adjust_body_physics(&mut model), 4);
        let torso = &model.rigid_bodies[model.find_rigid("RB_upperbody").unwrap()];
        assert_eq!(torso.shape, RigidBodyShape::Box);
        assert!((torso.size.x - 1.5).abs() < 1e-5);
        assert!(torso.size.min_element() >= 0.0);
        assert!(model.find_rigid("RB_neck").is_some());

        // 再次运行不重复添加
        let count = model.rigid_bodies.len();
        adjust_body_physics(&mut model);
        assert_eq!(model.rigid_bodies.len(), count);
    }

    #[test]
    fn test_transform_skirt() {
        let mut model = PmxModel::new();
        let mut front = RigidBody::new("cf_j_sk_00_01");
        front.size = Vec3::new(0.3, 1.0, 0.3);
        front.position = Vec3::new(0.0, 8.0, 1.0);
        model.add_rigid_body(front);
        model.add_rigid_body(RigidBody::new("cf_j_sk_01_05"));
        model.add_rigid_body(RigidBody::new("cf_j_sk_02_03"));

        let mut side = Joint::new("cf_j_sk_01_04[side]");
        side.rigid_a = 0;
        model.add_joint(side);
        model.add_joint(Joint::new("cf_j_sk_03_05[side]"));
        model.add_joint(Joint::new("cf_j_sk_03_02[side]"));
        model.add_joint(Joint::new("cf_j_sk_03_02"));

        transform_skirt(&mut model);

        assert_eq!(model.rigid_bodies[0].shape, RigidBodyShape::Box);
        assert!((model.rigid_bodies[0].size.x - 0.7).abs() < 1e-6);
        assert!((model.rigid_bodies[0].size.z - 0.02).abs() < 1e-6);
        assert_eq!(model.rigid_bodies[1].shape, RigidBodyShape::Sphere);
        assert!((model.rigid_bodies[2].size.x - 0.6).abs() < 1e-6);

        let corner = &model.joints[0];
        assert_eq!(corner.position_min.x, -20.0);
        assert!((corner.position.y - 8.5).abs() < 1e-6);
        assert_eq!(model.joints[1].position_min.x, 1.0);
        assert_eq!(model.joints[2].position_max.x, 0.0);
        assert_eq!(model.joints[3].position_max.x, 0.0);
    }
}
