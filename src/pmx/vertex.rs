//! PMX 顶点与权重

use glam::{Vec2, Vec3, Vec4};

/// 顶点变形方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightDeform {
    Bdef1 {
        bone: i32,
    },
    Bdef2 {
        bones: [i32; 2],
        weight: f32,
    },
    Bdef4 {
        bones: [i32; 4],
        weights: [f32; 4],
    },
    Sdef {
        bones: [i32; 2],
        weight: f32,
        c: Vec3,
        r0: Vec3,
        r1: Vec3,
    },
    Qdef {
        bones: [i32; 4],
        weights: [f32; 4],
    },
}

impl WeightDeform {
    /// 文件中的类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            WeightDeform::Bdef1 { .. } => 0,
            WeightDeform::Bdef2 { .. } => 1,
            WeightDeform::Bdef4 { .. } => 2,
            WeightDeform::Sdef { .. } => 3,
            WeightDeform::Qdef { .. } => 4,
        }
    }

    /// 全部骨骼槽位（含权重为 0 的）
    pub fn bones(&self) -> &[i32] {
        match self {
            WeightDeform::Bdef1 { bone } => std::slice::from_ref(bone),
            WeightDeform::Bdef2 { bones, .. } | WeightDeform::Sdef { bones, .. } => bones,
            WeightDeform::Bdef4 { bones, .. } | WeightDeform::Qdef { bones, .. } => bones,
        }
    }

    pub fn bones_mut(&mut self) -> &mut [i32] {
        match self {
            WeightDeform::Bdef1 { bone } => std::slice::from_mut(bone),
            WeightDeform::Bdef2 { bones, .. } | WeightDeform::Sdef { bones, .. } => bones,
            WeightDeform::Bdef4 { bones, .. } | WeightDeform::Qdef { bones, .. } => bones,
        }
    }

    /// 实际带权重的骨骼（权重 > 0）
    pub fn weighted_bones(&self) -> Vec<i32> {
        match *self {
            WeightDeform::Bdef1 { bone } => vec![bone],
            WeightDeform::Bdef2 { bones, weight } | WeightDeform::Sdef { bones, weight, .. } => {
                let mut out = Vec::with_capacity(2);
                if weight > 0.0 {
                    out.push(bones[0]);
                }
                if weight < 1.0 {
                    out.push(bones[1]);
                }
                out
            }
            WeightDeform::Bdef4 { bones, weights } | WeightDeform::Qdef { bones, weights } => bones
                .iter()
                .zip(weights.iter())
                .filter(|(_, w)| **w > 0.0)
                .map(|(b, _)| *b)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub additional_uvs: Vec<Vec4>,
    pub weight: WeightDeform,
    pub edge_scale: f32,
}

impl Vertex {
    pub fn new(position: Vec3, weight: WeightDeform) -> Self {
        Self {
            position,
            normal: Vec3::Y,
            uv: Vec2::ZERO,
            additional_uvs: Vec::new(),
            weight,
            edge_scale: 1.0,
        }
    }
}
