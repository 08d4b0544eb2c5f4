//! PMX 关节

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointType {
    Spring6DOF = 0,
    SixDof = 1,
    P2p = 2,
    ConeTwist = 3,
    Slider = 4,
    Hinge = 5,
}

impl JointType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Spring6DOF),
            1 => Some(Self::SixDof),
            2 => Some(Self::P2p),
            3 => Some(Self::ConeTwist),
            4 => Some(Self::Slider),
            5 => Some(Self::Hinge),
            _ => None,
        }
    }
}

/// PMX 关节（角度单位：度）
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub local_name: String,
    pub universal_name: String,
    pub kind: JointType,
    pub rigid_a: i32,
    pub rigid_b: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub position_min: Vec3,
    pub position_max: Vec3,
    pub rotation_min: Vec3,
    pub rotation_max: Vec3,
    pub position_spring: Vec3,
    pub rotation_spring: Vec3,
}

impl Joint {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            universal_name: name.clone(),
            local_name: name,
            kind: JointType::Spring6DOF,
            rigid_a: 0,
            rigid_b: 0,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            position_min: Vec3::ZERO,
            position_max: Vec3::ZERO,
            rotation_min: Vec3::ZERO,
            rotation_max: Vec3::ZERO,
            position_spring: Vec3::ZERO,
            rotation_spring: Vec3::ZERO,
        }
    }

    /// 是否引用了指定刚体
    #[inline]
    pub fn references(&self, rigid: usize) -> bool {
        let rigid = rigid as i32;
        self.rigid_a == rigid || self.rigid_b == rigid
    }

    /// 锁死全部移动与旋转范围（刚性连接）
    pub fn lock(&mut self) {
        self.position_min = Vec3::ZERO;
        self.position_max = Vec3::ZERO;
        self.rotation_min = Vec3::ZERO;
        self.rotation_max = Vec3::ZERO;
    }
}
