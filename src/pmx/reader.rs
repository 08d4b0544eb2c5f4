//! PMX 二进制读取

use byteorder::{ReadBytesExt, LE};
use glam::{Vec2, Vec3, Vec4};
use std::io::{ErrorKind, Read};

use super::{
    AppendConfig, Bone, BoneFlags, BoneOffset, BoneTail, DisplayFrame, DisplayFrameElement,
    DrawFlags, GroupOffset, Header, IkConfig, IkLink, ImpulseOffset, Joint, JointType, LocalAxis,
    Material, MaterialOffset, ModelInfo, Morph, MorphOffsets, PmxModel, RigidBody, RigidBodyMode,
    RigidBodyShape, Settings, TextEncoding, Toon, UvOffset, Vertex, VertexOffset, WeightDeform,
};
use crate::{Result, RigError};

/// 按文件中的数量预分配的上限，实际数据不足时由读取失败兜底
const PREALLOC_LIMIT: usize = 1 << 16;

fn parse_err(msg: impl Into<String>) -> RigError {
    RigError::PmxParse(msg.into())
}

#[inline]
fn capacity(count: usize) -> usize {
    count.min(PREALLOC_LIMIT)
}

/// 基础读取辅助
pub(crate) trait ReadHelpers: Read {
    fn read_vec2(&mut self) -> Result<Vec2> {
        Ok(Vec2::new(self.read_f32::<LE>()?, self.read_f32::<LE>()?))
    }

    fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(
            self.read_f32::<LE>()?,
            self.read_f32::<LE>()?,
            self.read_f32::<LE>()?,
        ))
    }

    fn read_vec4(&mut self) -> Result<Vec4> {
        Ok(Vec4::new(
            self.read_f32::<LE>()?,
            self.read_f32::<LE>()?,
            self.read_f32::<LE>()?,
            self.read_f32::<LE>()?,
        ))
    }

    fn read_text(&mut self, encoding: TextEncoding) -> Result<String> {
        let len = self.read_i32::<LE>()?;
        if len < 0 {
            return Err(parse_err(format!("negative text length {}", len)));
        }
        let len = len as usize;
        let mut buf = Vec::with_capacity(capacity(len));
        Read::take(&mut *self, len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(parse_err(format!("text length {} exceeds remaining {} bytes", len, buf.len())));
        }
        let codec = match encoding {
            TextEncoding::Utf16Le => encoding_rs::UTF_16LE,
            TextEncoding::Utf8 => encoding_rs::UTF_8,
        };
        let (text, had_errors) = codec.decode_without_bom_handling(&buf);
        if had_errors {
            log::warn!("[PMX] 文本含无效字符，已替换: {}", text);
        }
        Ok(text.into_owned())
    }

    /// 有符号索引（骨骼/纹理/材质/Morph/刚体）
    fn read_index(&mut self, size: u8) -> Result<i32> {
        Ok(match size {
            1 => self.read_i8()? as i32,
            2 => self.read_i16::<LE>()? as i32,
            4 => self.read_i32::<LE>()?,
            _ => return Err(parse_err(format!("invalid index size {}", size))),
        })
    }

    /// 无符号顶点索引
    fn read_vertex_index(&mut self, size: u8) -> Result<u32> {
        Ok(match size {
            1 => self.read_u8()? as u32,
            2 => self.read_u16::<LE>()? as u32,
            4 => self.read_u32::<LE>()?,
            _ => return Err(parse_err(format!("invalid vertex index size {}", size))),
        })
    }

    fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32::<LE>()?;
        usize::try_from(count).map_err(|_| parse_err(format!("negative count {}", count)))
    }
}

impl<R: Read + ?Sized> ReadHelpers for R {}

/// 按固定顺序读取整个文档
///
/// 数据提前结束视为解析错误而不是 IO 错误。
pub(crate) fn read_model<R: Read>(read: &mut R) -> Result<PmxModel> {
    read_sections(read).map_err(|e| match e {
        RigError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
            parse_err(format!("truncated document: {}", io))
        }
        other => other,
    })
}

fn read_sections<R: Read>(read: &mut R) -> Result<PmxModel> {
    let header = read_header(read)?;
    let s = header.settings;
    let enc = s.text_encoding;

    let info = ModelInfo {
        local_name: read.read_text(enc)?,
        universal_name: read.read_text(enc)?,
        local_comment: read.read_text(enc)?,
        universal_comment: read.read_text(enc)?,
    };

    let count = read.read_count()?;
    let mut vertices = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        vertices.push(read_vertex(read, &s)?);
    }

    let count = read.read_count()?;
    if count % 3 != 0 {
        return Err(parse_err(format!("face index count {} not divisible by 3", count)));
    }
    let mut faces = Vec::with_capacity(capacity(count / 3));
    for _ in 0..count / 3 {
        faces.push([
            read.read_vertex_index(s.vertex_index_size)?,
            read.read_vertex_index(s.vertex_index_size)?,
            read.read_vertex_index(s.vertex_index_size)?,
        ]);
    }

    let count = read.read_count()?;
    let mut textures = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        textures.push(read.read_text(enc)?);
    }

    let count = read.read_count()?;
    let mut materials = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        materials.push(read_material(read, &s)?);
    }

    let count = read.read_count()?;
    let mut bones = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        bones.push(read_bone(read, &s)?);
    }

    let count = read.read_count()?;
    let mut morphs = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        morphs.push(read_morph(read, &s)?);
    }

    let count = read.read_count()?;
    let mut display_frames = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        display_frames.push(read_display_frame(read, &s)?);
    }

    let count = read.read_count()?;
    let mut rigid_bodies = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        rigid_bodies.push(read_rigid_body(read, &s)?);
    }

    let count = read.read_count()?;
    let mut joints = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        joints.push(read_joint(read, &s)?);
    }

    if header.version > 2.0 {
        let soft_bodies = read.read_i32::<LE>().unwrap_or(0);
        if soft_bodies > 0 {
            return Err(parse_err("PMX 2.1 soft bodies are not supported"));
        }
    }

    Ok(PmxModel {
        header,
        info,
        vertices,
        faces,
        textures,
        materials,
        bones,
        morphs,
        display_frames,
        rigid_bodies,
        joints,
    })
}

fn read_header<R: Read>(read: &mut R) -> Result<Header> {
    let mut magic = [0u8; 4];
    read.read_exact(&mut magic)?;
    if &magic != b"PMX " {
        return Err(parse_err("not a PMX file"));
    }
    let version = read.read_f32::<LE>()?;
    let globals_count = read.read_u8()?;
    if globals_count < 8 {
        return Err(parse_err(format!("header has {} globals, need 8", globals_count)));
    }
    let mut globals = vec![0u8; globals_count as usize];
    read.read_exact(&mut globals)?;

    let text_encoding = match globals[0] {
        0 => TextEncoding::Utf16Le,
        1 => TextEncoding::Utf8,
        other => return Err(parse_err(format!("invalid text encoding {}", other))),
    };
    if globals[1] > 4 {
        return Err(parse_err(format!("invalid additional uv count {}", globals[1])));
    }

    Ok(Header {
        version,
        settings: Settings {
            text_encoding,
            additional_uv: globals[1],
            vertex_index_size: globals[2],
            texture_index_size: globals[3],
            material_index_size: globals[4],
            bone_index_size: globals[5],
            morph_index_size: globals[6],
            rigid_index_size: globals[7],
        },
    })
}

fn read_vertex<R: Read>(read: &mut R, s: &Settings) -> Result<Vertex> {
    let position = read.read_vec3()?;
    let normal = read.read_vec3()?;
    let uv = read.read_vec2()?;
    let mut additional_uvs = Vec::with_capacity(s.additional_uv as usize);
    for _ in 0..s.additional_uv {
        additional_uvs.push(read.read_vec4()?);
    }

    let bs = s.bone_index_size;
    let weight = match read.read_u8()? {
        0 => WeightDeform::Bdef1 {
            bone: read.read_index(bs)?,
        },
        1 => WeightDeform::Bdef2 {
            bones: [read.read_index(bs)?, read.read_index(bs)?],
            weight: read.read_f32::<LE>()?,
        },
        kind @ (2 | 4) => {
            let bones = [
                read.read_index(bs)?,
                read.read_index(bs)?,
                read.read_index(bs)?,
                read.read_index(bs)?,
            ];
            let weights = [
                read.read_f32::<LE>()?,
                read.read_f32::<LE>()?,
                read.read_f32::<LE>()?,
                read.read_f32::<LE>()?,
            ];
            if kind == 2 {
                WeightDeform::Bdef4 { bones, weights }
            } else {
                WeightDeform::Qdef { bones, weights }
            }
        }
        3 => WeightDeform::Sdef {
            bones: [read.read_index(bs)?, read.read_index(bs)?],
            weight: read.read_f32::<LE>()?,
            c: read.read_vec3()?,
            r0: read.read_vec3()?,
            r1: read.read_vec3()?,
        },
        other => return Err(parse_err(format!("invalid weight deform type {}", other))),
    };
    let edge_scale = read.read_f32::<LE>()?;

    Ok(Vertex {
        position,
        normal,
        uv,
        additional_uvs,
        weight,
        edge_scale,
    })
}

fn read_material<R: Read>(read: &mut R, s: &Settings) -> Result<Material> {
    let enc = s.text_encoding;
    let local_name = read.read_text(enc)?;
    let universal_name = read.read_text(enc)?;
    let diffuse = read.read_vec4()?;
    let specular = read.read_vec3()?;
    let specular_strength = read.read_f32::<LE>()?;
    let ambient = read.read_vec3()?;
    let draw_flags = DrawFlags::from_bits_retain(read.read_u8()?);
    let edge_color = read.read_vec4()?;
    let edge_scale = read.read_f32::<LE>()?;
    let texture_index = read.read_index(s.texture_index_size)?;
    let sphere_texture_index = read.read_index(s.texture_index_size)?;
    let sphere_mode = read.read_u8()?;
    let toon = match read.read_u8()? {
        0 => Toon::Texture(read.read_index(s.texture_index_size)?),
        1 => Toon::Shared(read.read_u8()?),
        other => return Err(parse_err(format!("invalid toon flag {}", other))),
    };
    let comment = read.read_text(enc)?;
    let surface_count = read.read_i32::<LE>()?;

    Ok(Material {
        local_name,
        universal_name,
        diffuse,
        specular,
        specular_strength,
        ambient,
        draw_flags,
        edge_color,
        edge_scale,
        texture_index,
        sphere_texture_index,
        sphere_mode,
        toon,
        comment,
        surface_count,
    })
}

fn read_bone<R: Read>(read: &mut R, s: &Settings) -> Result<Bone> {
    let enc = s.text_encoding;
    let bs = s.bone_index_size;
    let local_name = read.read_text(enc)?;
    let universal_name = read.read_text(enc)?;
    let position = read.read_vec3()?;
    let parent = read.read_index(bs)?;
    let transform_level = read.read_i32::<LE>()?;
    let flags = BoneFlags::from_bits_retain(read.read_u16::<LE>()?);

    let tail = if flags.contains(BoneFlags::TAIL_IS_BONE) {
        BoneTail::Link(read.read_index(bs)?)
    } else {
        BoneTail::Offset(read.read_vec3()?)
    };

    let append = if flags.intersects(BoneFlags::APPEND_ROTATE | BoneFlags::APPEND_TRANSLATE) {
        Some(AppendConfig {
            parent: read.read_index(bs)?,
            rate: read.read_f32::<LE>()?,
        })
    } else {
        None
    };

    let fixed_axis = if flags.contains(BoneFlags::FIXED_AXIS) {
        Some(read.read_vec3()?)
    } else {
        None
    };

    let local_axis = if flags.contains(BoneFlags::LOCAL_AXIS) {
        Some(LocalAxis {
            x: read.read_vec3()?,
            z: read.read_vec3()?,
        })
    } else {
        None
    };

    let external_parent = if flags.contains(BoneFlags::EXTERNAL_PARENT) {
        Some(read.read_i32::<LE>()?)
    } else {
        None
    };

    let ik = if flags.contains(BoneFlags::IK) {
        let target = read.read_index(bs)?;
        let iterations = read.read_i32::<LE>()?;
        let limit_angle = read.read_f32::<LE>()?;
        let count = read.read_count()?;
        let mut links = Vec::with_capacity(capacity(count));
        for _ in 0..count {
            let bone = read.read_index(bs)?;
            let limits = if read.read_u8()? != 0 {
                Some((read.read_vec3()?, read.read_vec3()?))
            } else {
                None
            };
            links.push(IkLink { bone, limits });
        }
        Some(IkConfig {
            target,
            iterations,
            limit_angle,
            links,
        })
    } else {
        None
    };

    Ok(Bone {
        local_name,
        universal_name,
        position,
        parent,
        transform_level,
        flags,
        tail,
        append,
        fixed_axis,
        local_axis,
        external_parent,
        ik,
    })
}

fn read_morph<R: Read>(read: &mut R, s: &Settings) -> Result<Morph> {
    let enc = s.text_encoding;
    let local_name = read.read_text(enc)?;
    let universal_name = read.read_text(enc)?;
    let panel = read.read_u8()?;
    let kind = read.read_u8()?;
    let count = read.read_count()?;

    let offsets = match kind {
        0 | 9 => {
            let mut items = Vec::with_capacity(capacity(count));
            for _ in 0..count {
                items.push(GroupOffset {
                    morph: read.read_index(s.morph_index_size)?,
                    weight: read.read_f32::<LE>()?,
                });
            }
            if kind == 0 {
                MorphOffsets::Group(items)
            } else {
                MorphOffsets::Flip(items)
            }
        }
        1 => {
            let mut items = Vec::with_capacity(capacity(count));
            for _ in 0..count {
                items.push(VertexOffset {
                    vertex: read.read_vertex_index(s.vertex_index_size)? as i32,
                    offset: read.read_vec3()?,
                });
            }
            MorphOffsets::Vertex(items)
        }
        2 => {
            let mut items = Vec::with_capacity(capacity(count));
            for _ in 0..count {
                items.push(BoneOffset {
                    bone: read.read_index(s.bone_index_size)?,
                    translation: read.read_vec3()?,
                    rotation: read.read_vec4()?,
                });
            }
            MorphOffsets::Bone(items)
        }
        3..=7 => {
            let mut items = Vec::with_capacity(capacity(count));
            for _ in 0..count {
                items.push(UvOffset {
                    vertex: read.read_vertex_index(s.vertex_index_size)? as i32,
                    offset: read.read_vec4()?,
                });
            }
            MorphOffsets::Uv(kind - 3, items)
        }
        8 => {
            let mut items = Vec::with_capacity(capacity(count));
            for _ in 0..count {
                items.push(MaterialOffset {
                    material: read.read_index(s.material_index_size)?,
                    operation: read.read_u8()?,
                    diffuse: read.read_vec4()?,
                    specular: read.read_vec3()?,
                    specular_strength: read.read_f32::<LE>()?,
                    ambient: read.read_vec3()?,
                    edge_color: read.read_vec4()?,
                    edge_size: read.read_f32::<LE>()?,
                    texture_tint: read.read_vec4()?,
                    environment_tint: read.read_vec4()?,
                    toon_tint: read.read_vec4()?,
                });
            }
            MorphOffsets::Material(items)
        }
        10 => {
            let mut items = Vec::with_capacity(capacity(count));
            for _ in 0..count {
                items.push(ImpulseOffset {
                    rigid_body: read.read_index(s.rigid_index_size)?,
                    local: read.read_u8()? != 0,
                    velocity: read.read_vec3()?,
                    torque: read.read_vec3()?,
                });
            }
            MorphOffsets::Impulse(items)
        }
        other => return Err(parse_err(format!("invalid morph type {}", other))),
    };

    Ok(Morph {
        local_name,
        universal_name,
        panel,
        offsets,
    })
}

fn read_display_frame<R: Read>(read: &mut R, s: &Settings) -> Result<DisplayFrame> {
    let enc = s.text_encoding;
    let local_name = read.read_text(enc)?;
    let universal_name = read.read_text(enc)?;
    let special_flag = read.read_u8()?;
    let count = read.read_count()?;
    let mut elements = Vec::with_capacity(capacity(count));
    for _ in 0..count {
        elements.push(match read.read_u8()? {
            0 => DisplayFrameElement::Bone(read.read_index(s.bone_index_size)?),
            1 => DisplayFrameElement::Morph(read.read_index(s.morph_index_size)?),
            other => return Err(parse_err(format!("invalid display frame element {}", other))),
        });
    }
    Ok(DisplayFrame {
        local_name,
        universal_name,
        special_flag,
        elements,
    })
}

fn read_rigid_body<R: Read>(read: &mut R, s: &Settings) -> Result<RigidBody> {
    let enc = s.text_encoding;
    let local_name = read.read_text(enc)?;
    let universal_name = read.read_text(enc)?;
    let bone_index = read.read_index(s.bone_index_size)?;
    let group = read.read_u8()?;
    let collision_mask = read.read_u16::<LE>()?;
    let shape = RigidBodyShape::from_u8(read.read_u8()?)
        .ok_or_else(|| parse_err("invalid rigid body shape"))?;
    let size = read.read_vec3()?;
    let position = read.read_vec3()?;
    let rotation = read.read_vec3()?;
    let mass = read.read_f32::<LE>()?;
    let move_attenuation = read.read_f32::<LE>()?;
    let rotation_attenuation = read.read_f32::<LE>()?;
    let repulsion = read.read_f32::<LE>()?;
    let friction = read.read_f32::<LE>()?;
    let mode = RigidBodyMode::from_u8(read.read_u8()?)
        .ok_or_else(|| parse_err("invalid rigid body mode"))?;

    Ok(RigidBody {
        local_name,
        universal_name,
        bone_index,
        group,
        collision_mask,
        shape,
        size,
        position,
        rotation: degrees(rotation),
        mass,
        move_attenuation,
        rotation_attenuation,
        repulsion,
        friction,
        mode,
    })
}

fn read_joint<R: Read>(read: &mut R, s: &Settings) -> Result<Joint> {
    let enc = s.text_encoding;
    let local_name = read.read_text(enc)?;
    let universal_name = read.read_text(enc)?;
    let kind =
        JointType::from_u8(read.read_u8()?).ok_or_else(|| parse_err("invalid joint type"))?;
    let rigid_a = read.read_index(s.rigid_index_size)?;
    let rigid_b = read.read_index(s.rigid_index_size)?;
    let position = read.read_vec3()?;
    let rotation = read.read_vec3()?;
    let position_min = read.read_vec3()?;
    let position_max = read.read_vec3()?;
    let rotation_min = read.read_vec3()?;
    let rotation_max = read.read_vec3()?;
    let position_spring = read.read_vec3()?;
    let rotation_spring = read.read_vec3()?;

    Ok(Joint {
        local_name,
        universal_name,
        kind,
        rigid_a,
        rigid_b,
        position,
        rotation: degrees(rotation),
        position_min,
        position_max,
        rotation_min: degrees(rotation_min),
        rotation_max: degrees(rotation_max),
        position_spring,
        rotation_spring,
    })
}

#[inline]
fn degrees(v: Vec3) -> Vec3 {
    v * (180.0 / std::f32::consts::PI)
}
