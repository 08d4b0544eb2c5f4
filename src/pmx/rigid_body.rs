//! PMX 刚体

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyShape {
    Sphere = 0,
    Box = 1,
    Capsule = 2,
}

impl RigidBodyShape {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Sphere),
            1 => Some(Self::Box),
            2 => Some(Self::Capsule),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyMode {
    /// 跟随骨骼
    Static = 0,
    /// 完全由物理驱动
    Dynamic = 1,
    /// 物理驱动，位置跟随骨骼
    DynamicWithBonePosition = 2,
}

impl RigidBodyMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Static),
            1 => Some(Self::Dynamic),
            2 => Some(Self::DynamicWithBonePosition),
            _ => None,
        }
    }
}

/// PMX 刚体
///
/// `rotation` 在内存中以角度保存，读写时与文件中的弧度互转。
/// `collision_mask` 第 i 位置 1 表示与第 i 组发生碰撞。
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    pub local_name: String,
    pub universal_name: String,
    pub bone_index: i32,
    /// 碰撞组 (0-15)
    pub group: u8,
    pub collision_mask: u16,
    pub shape: RigidBodyShape,
    pub size: Vec3,
    pub position: Vec3,
    pub rotation: Vec3,
    pub mass: f32,
    pub move_attenuation: f32,
    pub rotation_attenuation: f32,
    pub repulsion: f32,
    pub friction: f32,
    pub mode: RigidBodyMode,
}

impl RigidBody {
    /// 以编辑器默认值创建刚体
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            universal_name: name.clone(),
            local_name: name,
            bone_index: 0,
            group: 0,
            collision_mask: 0xFFFF,
            shape: RigidBodyShape::Sphere,
            size: Vec3::splat(2.0),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            mass: 1.0,
            move_attenuation: 0.5,
            rotation_attenuation: 0.5,
            repulsion: 0.0,
            friction: 0.5,
            mode: RigidBodyMode::Static,
        }
    }

    /// 关联的骨骼索引（-1 表示无）
    #[inline]
    pub fn bone(&self) -> Option<usize> {
        usize::try_from(self.bone_index).ok()
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.mode == RigidBodyMode::Static
    }

    /// 是否已被解缠折叠为零尺寸球体
    #[inline]
    pub fn is_collapsed(&self) -> bool {
        self.shape == RigidBodyShape::Sphere && self.size == Vec3::ZERO
    }
}
