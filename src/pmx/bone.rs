//! PMX 骨骼

use bitflags::bitflags;
use glam::Vec3;

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// PMX 骨骼标志位（与文件中的 u16 一致）
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u16 {
        /// 尾端使用骨骼索引（否则为偏移）
        const TAIL_IS_BONE = 1 << 0;
        const ROTATABLE = 1 << 1;
        const MOVABLE = 1 << 2;
        const VISIBLE = 1 << 3;
        const ENABLED = 1 << 4;
        const IK = 1 << 5;
        const APPEND_LOCAL = 1 << 7;
        const APPEND_ROTATE = 1 << 8;
        const APPEND_TRANSLATE = 1 << 9;
        const FIXED_AXIS = 1 << 10;
        const LOCAL_AXIS = 1 << 11;
        const DEFORM_AFTER_PHYSICS = 1 << 12;
        const EXTERNAL_PARENT = 1 << 13;
    }
}

/// 骨骼尾端：指向另一根骨骼，或显式偏移
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoneTail {
    Link(i32),
    Offset(Vec3),
}

impl BoneTail {
    #[inline]
    pub fn is_link(&self) -> bool {
        matches!(self, BoneTail::Link(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IkLink {
    pub bone: i32,
    /// 角度限制（弧度）
    pub limits: Option<(Vec3, Vec3)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IkConfig {
    pub target: i32,
    pub iterations: i32,
    pub limit_angle: f32,
    pub links: Vec<IkLink>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AppendConfig {
    pub parent: i32,
    pub rate: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalAxis {
    pub x: Vec3,
    pub z: Vec3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub local_name: String,
    pub universal_name: String,
    pub position: Vec3,
    /// 父骨骼索引 (-1 表示根骨骼)
    pub parent: i32,
    pub transform_level: i32,
    pub flags: BoneFlags,
    pub tail: BoneTail,
    pub append: Option<AppendConfig>,
    pub fixed_axis: Option<Vec3>,
    pub local_axis: Option<LocalAxis>,
    pub external_parent: Option<i32>,
    pub ik: Option<IkConfig>,
}

impl Bone {
    pub fn new(name: impl Into<String>, position: Vec3, parent: i32) -> Self {
        let name = name.into();
        Self {
            universal_name: name.clone(),
            local_name: name,
            position,
            parent,
            transform_level: 0,
            flags: BoneFlags::ROTATABLE | BoneFlags::VISIBLE | BoneFlags::ENABLED,
            tail: BoneTail::Offset(Vec3::ZERO),
            append: None,
            fixed_axis: None,
            local_axis: None,
            external_parent: None,
            ik: None,
        }
    }

    /// 父骨骼索引
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        usize::try_from(self.parent).ok()
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.flags.contains(BoneFlags::VISIBLE)
    }

    /// 尾端链接的骨骼
    #[inline]
    pub fn tail_link(&self) -> Option<usize> {
        match self.tail {
            BoneTail::Link(idx) => usize::try_from(idx).ok(),
            BoneTail::Offset(_) => None,
        }
    }

    pub fn set_tail(&mut self, tail: BoneTail) {
        self.tail = tail;
        self.flags.set(BoneFlags::TAIL_IS_BONE, tail.is_link());
    }
}
