//! PMX Morph

use glam::{Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexOffset {
    pub vertex: i32,
    pub offset: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneOffset {
    pub bone: i32,
    pub translation: Vec3,
    /// 四元数 (x, y, z, w)
    pub rotation: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvOffset {
    pub vertex: i32,
    pub offset: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialOffset {
    /// -1 表示全部材质
    pub material: i32,
    /// 0 = 乘算, 1 = 加算
    pub operation: u8,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_strength: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_tint: Vec4,
    pub environment_tint: Vec4,
    pub toon_tint: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupOffset {
    pub morph: i32,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpulseOffset {
    pub rigid_body: i32,
    pub local: bool,
    pub velocity: Vec3,
    pub torque: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MorphOffsets {
    Group(Vec<GroupOffset>),
    Vertex(Vec<VertexOffset>),
    Bone(Vec<BoneOffset>),
    /// 通道 0 为基础 UV，1~4 为追加 UV
    Uv(u8, Vec<UvOffset>),
    Material(Vec<MaterialOffset>),
    Flip(Vec<GroupOffset>),
    Impulse(Vec<ImpulseOffset>),
}

impl MorphOffsets {
    pub fn type_id(&self) -> u8 {
        match self {
            MorphOffsets::Group(_) => 0,
            MorphOffsets::Vertex(_) => 1,
            MorphOffsets::Bone(_) => 2,
            MorphOffsets::Uv(channel, _) => 3 + *channel,
            MorphOffsets::Material(_) => 8,
            MorphOffsets::Flip(_) => 9,
            MorphOffsets::Impulse(_) => 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Morph {
    pub local_name: String,
    pub universal_name: String,
    pub panel: u8,
    pub offsets: MorphOffsets,
}
