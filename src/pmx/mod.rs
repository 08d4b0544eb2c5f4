//! PMX 文档模型
//!
//! 内存中的 PMX 文档，外加按名称查找、刚体/关节追加以及材质几何查询。
//! 二进制读写见 `reader` / `writer`。

mod bone;
mod display_frame;
mod joint;
mod material;
mod morph;
mod reader;
mod rigid_body;
mod vertex;
mod writer;

pub use bone::{AppendConfig, Bone, BoneFlags, BoneTail, IkConfig, IkLink, LocalAxis};
pub use display_frame::{DisplayFrame, DisplayFrameElement};
pub use joint::{Joint, JointType};
pub use material::{DrawFlags, Material, Toon};
pub use morph::{
    BoneOffset, GroupOffset, ImpulseOffset, MaterialOffset, Morph, MorphOffsets, UvOffset,
    VertexOffset,
};
pub use rigid_body::{RigidBody, RigidBodyMode, RigidBodyShape};
pub use vertex::{Vertex, WeightDeform};

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

use crate::Result;

/// 文本编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf16Le = 0,
    Utf8 = 1,
}

/// 头部全局设置（索引宽度在写出时重新计算）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub text_encoding: TextEncoding,
    pub additional_uv: u8,
    pub vertex_index_size: u8,
    pub texture_index_size: u8,
    pub material_index_size: u8,
    pub bone_index_size: u8,
    pub morph_index_size: u8,
    pub rigid_index_size: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            text_encoding: TextEncoding::Utf16Le,
            additional_uv: 0,
            vertex_index_size: 4,
            texture_index_size: 4,
            material_index_size: 4,
            bone_index_size: 4,
            morph_index_size: 4,
            rigid_index_size: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: f32,
    pub settings: Settings,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: 2.0,
            settings: Settings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelInfo {
    pub local_name: String,
    pub universal_name: String,
    pub local_comment: String,
    pub universal_comment: String,
}

/// 内存中的 PMX 文档
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PmxModel {
    pub header: Header,
    pub info: ModelInfo,
    pub vertices: Vec<Vertex>,
    /// 三角面（顶点索引）
    pub faces: Vec<[u32; 3]>,
    pub textures: Vec<String>,
    pub materials: Vec<Material>,
    pub bones: Vec<Bone>,
    pub morphs: Vec<Morph>,
    pub display_frames: Vec<DisplayFrame>,
    pub rigid_bodies: Vec<RigidBody>,
    pub joints: Vec<Joint>,
}

impl PmxModel {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // 读写
    // ========================================================================

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let model = Self::read(&mut BufReader::new(file))?;
        log::info!(
            "[PMX] 读取 {}: 骨骼 {}, 材质 {}, 刚体 {}, 关节 {}",
            path.display(),
            model.bones.len(),
            model.materials.len(),
            model.rigid_bodies.len(),
            model.joints.len()
        );
        Ok(model)
    }

    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        reader::read_model(read)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path)?);
        self.write(&mut out)?;
        out.flush()?;
        log::info!("[PMX] 写出 {}", path.display());
        Ok(())
    }

    pub fn write<W: Write>(&self, write: &mut W) -> Result<()> {
        writer::write_model(self, write)
    }

    // ========================================================================
    // 查找（找不到返回 None）
    // ========================================================================

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.local_name == name)
    }

    /// 第一个名称以 `prefix` 开头的骨骼
    pub fn find_bone_prefix(&self, prefix: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.local_name.starts_with(prefix))
    }

    pub fn find_rigid(&self, name: &str) -> Option<usize> {
        self.rigid_bodies.iter().position(|r| r.local_name == name)
    }

    /// 全部名称以 `prefix` 开头的刚体
    pub fn find_rigids_prefix(&self, prefix: &str) -> Vec<usize> {
        self.rigid_bodies
            .iter()
            .enumerate()
            .filter(|(_, r)| r.local_name.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn find_material(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.local_name == name)
    }

    /// 追踪指定骨骼的第一个刚体
    pub fn rigid_of_bone(&self, bone: usize) -> Option<usize> {
        self.rigid_bodies.iter().position(|r| r.bone() == Some(bone))
    }

    // ========================================================================
    // 追加
    // ========================================================================

    pub fn add_rigid_body(&mut self, body: RigidBody) -> usize {
        self.rigid_bodies.push(body);
        self.rigid_bodies.len() - 1
    }

    pub fn add_joint(&mut self, joint: Joint) -> usize {
        self.joints.push(joint);
        self.joints.len() - 1
    }

    // ========================================================================
    // 材质几何
    // ========================================================================

    /// 材质占用的面范围
    pub fn material_faces(&self, material: usize) -> Range<usize> {
        let start: usize = self
            .materials
            .iter()
            .take(material)
            .map(|m| m.surface_count.max(0) as usize / 3)
            .sum();
        let count = self
            .materials
            .get(material)
            .map_or(0, |m| m.surface_count.max(0) as usize / 3);
        let end = (start + count).min(self.faces.len());
        start.min(end)..end
    }

    /// 面引用的全部顶点
    pub fn faces_vertices(&self, faces: Range<usize>) -> BTreeSet<usize> {
        self.faces[faces]
            .iter()
            .flat_map(|f| f.iter().map(|&v| v as usize))
            .collect()
    }

    /// 顶点实际带权重的全部骨骼
    pub fn vertices_bones(&self, vertices: &BTreeSet<usize>) -> BTreeSet<i32> {
        vertices
            .iter()
            .filter_map(|&v| self.vertices.get(v))
            .flat_map(|v| v.weight.weighted_bones())
            .collect()
    }
}
