//! PMX 材质

use bitflags::bitflags;
use glam::{Vec3, Vec4};

bitflags! {
    /// 材质绘制标志
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DrawFlags: u8 {
        const DOUBLE_SIDED = 1 << 0;
        const GROUND_SHADOW = 1 << 1;
        const CAST_SELF_SHADOW = 1 << 2;
        const RECEIVE_SELF_SHADOW = 1 << 3;
        const EDGE = 1 << 4;
        const VERTEX_COLOR = 1 << 5;
        const POINT = 1 << 6;
        const LINE = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toon {
    /// 独立 Toon 纹理索引
    Texture(i32),
    /// 共享 toon01~toon10
    Shared(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub local_name: String,
    pub universal_name: String,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_strength: f32,
    pub ambient: Vec3,
    pub draw_flags: DrawFlags,
    pub edge_color: Vec4,
    pub edge_scale: f32,
    pub texture_index: i32,
    pub sphere_texture_index: i32,
    pub sphere_mode: u8,
    pub toon: Toon,
    /// 备注（KK 导出时写入 `[:AccId:] NN`）
    pub comment: String,
    /// 顶点索引数（面数 * 3）
    pub surface_count: i32,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            universal_name: name.clone(),
            local_name: name,
            diffuse: Vec4::ONE,
            specular: Vec3::ZERO,
            specular_strength: 5.0,
            ambient: Vec3::splat(0.5),
            draw_flags: DrawFlags::empty(),
            edge_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            edge_scale: 1.0,
            texture_index: -1,
            sphere_texture_index: -1,
            sphere_mode: 0,
            toon: Toon::Shared(0),
            comment: String::new(),
            surface_count: 0,
        }
    }
}
