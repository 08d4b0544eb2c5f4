//! 绑定配置
//!
//! 所有参数扁平化，默认值即编辑器自动生成刚体时使用的数值。
//! 配置随 `RigContext` 传递，不使用全局状态。

use glam::Vec3;

/// 关节旋转限制（度），正负对称
pub const JOINT_ROTATION_LIMIT: Vec3 = Vec3::new(10.0, 5.0, 10.0);

/// 关节旋转弹簧
pub const JOINT_ROTATION_SPRING: Vec3 = Vec3::new(500.0, 100.0, 20.0);

/// 绑定配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct RigConfig {
    // ========== 链刚体阻尼 ==========
    /// 链上刚体的移动阻尼，默认 0.9
    pub chain_move_damping: f32,
    /// 链上刚体的旋转阻尼，默认 0.99
    pub chain_rotation_damping: f32,
    /// 链首刚体的移动阻尼，默认 0.999
    pub first_move_damping: f32,
    /// 链首刚体的旋转阻尼，默认 0.99
    pub first_rotation_damping: f32,
    /// 锚定刚体 `{name}_r` 的阻尼，默认 1.0
    pub anchor_damping: f32,

    // ========== 形状 ==========
    /// 胶囊半径 = 骨骼长度 * 该比例，默认 0.2
    pub capsule_radius_ratio: f32,
    /// 没有尾端方向时使用的球半径，默认 0.2
    pub sphere_radius: f32,
    /// 链末端刚体的半径，默认 0.1
    pub last_body_radius: f32,
    /// 链末骨骼改写为偏移尾端时使用的偏移
    pub tail_offset: Vec3,

    // ========== 关节 ==========
    /// 旋转限制（度），默认 (10, 5, 10)
    pub joint_rotation_limit: Vec3,
    /// 旋转弹簧，默认 (500, 100, 20)
    pub joint_rotation_spring: Vec3,

    // ========== 碰撞组 ==========
    /// 头发链使用的碰撞组，默认 3
    pub hair_group: u8,
    /// 其他饰品链使用的碰撞组，默认 16
    pub accessory_group: u8,

    // ========== 命名约定 ==========
    /// 饰品根骨骼前缀
    pub root_prefix: String,
    /// 槽位骨骼前缀
    pub slot_prefix: String,
    /// 头部锚定骨骼（导出工具的拼写）
    pub head_bone: String,
    /// 头部锚定刚体
    pub head_body: String,
    /// 区分头发与其他饰品的参考高度骨骼
    pub height_reference_bone: String,

    // ========== 调试 ==========
    /// 是否输出详细日志，默认 false
    pub debug_log: bool,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            chain_move_damping: 0.9,
            chain_rotation_damping: 0.99,
            first_move_damping: 0.999,
            first_rotation_damping: 0.99,
            anchor_damping: 1.0,

            capsule_radius_ratio: 0.2,
            sphere_radius: 0.2,
            last_body_radius: 0.1,
            tail_offset: Vec3::new(0.0, 0.0, -0.1),

            joint_rotation_limit: JOINT_ROTATION_LIMIT,
            joint_rotation_spring: JOINT_ROTATION_SPRING,

            hair_group: 3,
            accessory_group: 16,

            root_prefix: "N_move".to_string(),
            slot_prefix: "ca_slot".to_string(),
            head_bone: "a_n_headflont".to_string(),
            head_body: "a_n_headfront".to_string(),
            height_reference_bone: "胸親".to_string(),

            debug_log: false,
        }
    }
}

impl RigConfig {
    /// 详细日志配置
    pub fn verbose() -> Self {
        Self {
            debug_log: true,
            ..Self::default()
        }
    }
}
