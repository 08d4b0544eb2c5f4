//! 姿态矩阵与 ZXY 欧拉角
//!
//! 矩阵按 DirectX 行主序语义理解：`M1` 行为左方向，`M2` 行为骨骼前进方向，
//! `M3` 行为上方向，`M4` 行为位置。glam 的列即这里的行，
//! 因此 `M_rc == m.col(r - 1)[c - 1]`。

use glam::{Mat4, Quat, Vec3};
use std::f32::consts::{FRAC_PI_2, PI};

use crate::pmx::{BoneTail, PmxModel};

/// 骨骼尾端方向（未归一化）：链接骨骼位置差，或显式偏移
pub fn tail_vector(model: &PmxModel, bone: usize) -> Vec3 {
    let Some(b) = model.bones.get(bone) else {
        return Vec3::ZERO;
    };
    match b.tail {
        BoneTail::Offset(offset) => offset,
        BoneTail::Link(_) => match b.tail_link().and_then(|t| model.bones.get(t)) {
            Some(target) => target.position - b.position,
            None => Vec3::ZERO,
        },
    }
}

/// 由骨骼方向构建姿态矩阵
///
/// `up_y` 为真时，朝下的方向会被翻转，使左右对称的链得到一致的旋转。
pub fn pose_matrix_bone(model: &PmxModel, bone: usize, up_y: bool) -> Mat4 {
    let position = model.bones.get(bone).map_or(Vec3::ZERO, |b| b.position);
    let mut forward = tail_vector(model, bone).try_normalize().unwrap_or(Vec3::Y);
    if up_y && forward.y < 0.0 {
        forward = -forward;
    }
    // 前进方向与 Z 平行时叉积退化
    let left = forward.cross(Vec3::Z).try_normalize().unwrap_or(Vec3::X);
    let up = left.cross(forward).try_normalize().unwrap_or(Vec3::Z);

    Mat4::from_cols(
        left.extend(0.0),
        forward.extend(0.0),
        up.extend(0.0),
        position.extend(1.0),
    )
}

#[inline]
fn m(mat: &Mat4, row: usize, col: usize) -> f32 {
    mat.col(row - 1)[col - 1]
}

/// 姿态矩阵 → ZXY 欧拉角（弧度）
pub fn matrix_to_euler_zxy(mat: &Mat4) -> Vec3 {
    let mut euler = Vec3::ZERO;
    euler.x = -m(mat, 3, 2).clamp(-1.0, 1.0).asin();
    if (euler.x.abs() - FRAC_PI_2).abs() < f32::EPSILON {
        // 万向锁
        euler.y = (-m(mat, 1, 3)).atan2(m(mat, 1, 1));
    } else {
        euler.y = m(mat, 3, 1).atan2(m(mat, 3, 3));
        euler.z = (m(mat, 1, 2) / euler.x.cos()).clamp(-1.0, 1.0).asin();
        if m(mat, 2, 2) < 0.0 {
            euler.z = PI - euler.z;
        }
    }
    euler
}

/// ZXY 欧拉角（弧度）作用于本地 +Y 后的方向
pub fn euler_zxy_to_direction(rotation: Vec3) -> Vec3 {
    let q = Quat::from_rotation_y(rotation.y)
        * Quat::from_rotation_x(rotation.x)
        * Quat::from_rotation_z(rotation.z);
    q * Vec3::Y
}

#[inline]
pub fn degrees(v: Vec3) -> Vec3 {
    v * (180.0 / PI)
}

#[inline]
pub fn radians(v: Vec3) -> Vec3 {
    v * (PI / 180.0)
}
