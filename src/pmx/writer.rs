//! PMX 二进制写出

use byteorder::{WriteBytesExt, LE};
use glam::{Vec2, Vec3, Vec4};
use std::io::Write;

use super::{
    Bone, BoneFlags, BoneTail, DisplayFrameElement, Joint, Material, Morph, MorphOffsets,
    PmxModel, RigidBody, Settings, TextEncoding, Toon, Vertex, WeightDeform,
};
use crate::{Result, RigError};

pub(crate) trait WriteHelpers: Write {
    fn write_vec2(&mut self, v: Vec2) -> Result<()> {
        self.write_f32::<LE>(v.x)?;
        self.write_f32::<LE>(v.y)?;
        Ok(())
    }

    fn write_vec3(&mut self, v: Vec3) -> Result<()> {
        self.write_f32::<LE>(v.x)?;
        self.write_f32::<LE>(v.y)?;
        self.write_f32::<LE>(v.z)?;
        Ok(())
    }

    fn write_vec4(&mut self, v: Vec4) -> Result<()> {
        self.write_f32::<LE>(v.x)?;
        self.write_f32::<LE>(v.y)?;
        self.write_f32::<LE>(v.z)?;
        self.write_f32::<LE>(v.w)?;
        Ok(())
    }

    fn write_text(&mut self, text: &str, encoding: TextEncoding) -> Result<()> {
        let bytes: Vec<u8> = match encoding {
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
        };
        self.write_count(bytes.len())?;
        self.write_all(&bytes)?;
        Ok(())
    }

    fn write_index(&mut self, index: i32, size: u8) -> Result<()> {
        match size {
            1 => self.write_i8(narrow(index, i8::MIN as i32, i8::MAX as i32)? as i8)?,
            2 => self.write_i16::<LE>(narrow(index, i16::MIN as i32, i16::MAX as i32)? as i16)?,
            _ => self.write_i32::<LE>(index)?,
        }
        Ok(())
    }

    fn write_vertex_index(&mut self, index: u32, size: u8) -> Result<()> {
        match size {
            1 => self.write_u8(
                u8::try_from(index).map_err(|_| RigError::PmxWrite(format!("vertex index {}", index)))?,
            )?,
            2 => self.write_u16::<LE>(
                u16::try_from(index).map_err(|_| RigError::PmxWrite(format!("vertex index {}", index)))?,
            )?,
            _ => self.write_u32::<LE>(index)?,
        }
        Ok(())
    }

    fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count)
            .map_err(|_| RigError::PmxWrite(format!("count {} exceeds i32", count)))?;
        self.write_i32::<LE>(count)?;
        Ok(())
    }
}

impl<W: Write + ?Sized> WriteHelpers for W {}

fn narrow(index: i32, min: i32, max: i32) -> Result<i32> {
    if index < min || index > max {
        return Err(RigError::PmxWrite(format!("index {} does not fit the index size", index)));
    }
    Ok(index)
}

/// 有符号索引所需宽度（-1 保留为空引用）
fn signed_index_size(count: usize) -> u8 {
    if count <= i8::MAX as usize {
        1
    } else if count <= i16::MAX as usize {
        2
    } else {
        4
    }
}

fn vertex_index_size(count: usize) -> u8 {
    if count <= u8::MAX as usize {
        1
    } else if count <= u16::MAX as usize {
        2
    } else {
        4
    }
}

/// 根据当前数量重新计算头部设置
fn settings_for(model: &PmxModel) -> Settings {
    let additional_uv = model
        .vertices
        .iter()
        .map(|v| v.additional_uvs.len())
        .max()
        .unwrap_or(0)
        .min(4) as u8;
    Settings {
        text_encoding: model.header.settings.text_encoding,
        additional_uv,
        vertex_index_size: vertex_index_size(model.vertices.len()),
        texture_index_size: signed_index_size(model.textures.len()),
        material_index_size: signed_index_size(model.materials.len()),
        bone_index_size: signed_index_size(model.bones.len()),
        morph_index_size: signed_index_size(model.morphs.len()),
        rigid_index_size: signed_index_size(model.rigid_bodies.len()),
    }
}

pub(crate) fn write_model<W: Write>(model: &PmxModel, write: &mut W) -> Result<()> {
    let s = settings_for(model);
    let enc = s.text_encoding;
    let version = if model.header.version > 2.0 { 2.1 } else { 2.0 };

    write.write_all(b"PMX ")?;
    write.write_f32::<LE>(version)?;
    write.write_u8(8)?;
    write.write_all(&[
        enc as u8,
        s.additional_uv,
        s.vertex_index_size,
        s.texture_index_size,
        s.material_index_size,
        s.bone_index_size,
        s.morph_index_size,
        s.rigid_index_size,
    ])?;

    write.write_text(&model.info.local_name, enc)?;
    write.write_text(&model.info.universal_name, enc)?;
    write.write_text(&model.info.local_comment, enc)?;
    write.write_text(&model.info.universal_comment, enc)?;

    write.write_count(model.vertices.len())?;
    for vertex in &model.vertices {
        write_vertex(write, vertex, &s)?;
    }

    write.write_count(model.faces.len() * 3)?;
    for face in &model.faces {
        for &v in face {
            write.write_vertex_index(v, s.vertex_index_size)?;
        }
    }

    write.write_count(model.textures.len())?;
    for texture in &model.textures {
        write.write_text(texture, enc)?;
    }

    write.write_count(model.materials.len())?;
    for material in &model.materials {
        write_material(write, material, &s)?;
    }

    write.write_count(model.bones.len())?;
    for bone in &model.bones {
        write_bone(write, bone, &s)?;
    }

    write.write_count(model.morphs.len())?;
    for morph in &model.morphs {
        write_morph(write, morph, &s)?;
    }

    write.write_count(model.display_frames.len())?;
    for frame in &model.display_frames {
        write.write_text(&frame.local_name, enc)?;
        write.write_text(&frame.universal_name, enc)?;
        write.write_u8(frame.special_flag)?;
        write.write_count(frame.elements.len())?;
        for element in &frame.elements {
            match *element {
                DisplayFrameElement::Bone(idx) => {
                    write.write_u8(0)?;
                    write.write_index(idx, s.bone_index_size)?;
                }
                DisplayFrameElement::Morph(idx) => {
                    write.write_u8(1)?;
                    write.write_index(idx, s.morph_index_size)?;
                }
            }
        }
    }

    write.write_count(model.rigid_bodies.len())?;
    for body in &model.rigid_bodies {
        write_rigid_body(write, body, &s)?;
    }

    write.write_count(model.joints.len())?;
    for joint in &model.joints {
        write_joint(write, joint, &s)?;
    }

    if version > 2.0 {
        write.write_i32::<LE>(0)?;
    }
    Ok(())
}

fn write_vertex<W: Write>(write: &mut W, vertex: &Vertex, s: &Settings) -> Result<()> {
    write.write_vec3(vertex.position)?;
    write.write_vec3(vertex.normal)?;
    write.write_vec2(vertex.uv)?;
    for i in 0..s.additional_uv as usize {
        write.write_vec4(vertex.additional_uvs.get(i).copied().unwrap_or(Vec4::ZERO))?;
    }

    let bs = s.bone_index_size;
    write.write_u8(vertex.weight.type_id())?;
    match vertex.weight {
        WeightDeform::Bdef1 { bone } => write.write_index(bone, bs)?,
        WeightDeform::Bdef2 { bones, weight } => {
            write.write_index(bones[0], bs)?;
            write.write_index(bones[1], bs)?;
            write.write_f32::<LE>(weight)?;
        }
        WeightDeform::Bdef4 { bones, weights } | WeightDeform::Qdef { bones, weights } => {
            for b in bones {
                write.write_index(b, bs)?;
            }
            for w in weights {
                write.write_f32::<LE>(w)?;
            }
        }
        WeightDeform::Sdef {
            bones,
            weight,
            c,
            r0,
            r1,
        } => {
            write.write_index(bones[0], bs)?;
            write.write_index(bones[1], bs)?;
            write.write_f32::<LE>(weight)?;
            write.write_vec3(c)?;
            write.write_vec3(r0)?;
            write.write_vec3(r1)?;
        }
    }
    write.write_f32::<LE>(vertex.edge_scale)?;
    Ok(())
}

fn write_material<W: Write>(write: &mut W, m: &Material, s: &Settings) -> Result<()> {
    let enc = s.text_encoding;
    write.write_text(&m.local_name, enc)?;
    write.write_text(&m.universal_name, enc)?;
    write.write_vec4(m.diffuse)?;
    write.write_vec3(m.specular)?;
    write.write_f32::<LE>(m.specular_strength)?;
    write.write_vec3(m.ambient)?;
    write.write_u8(m.draw_flags.bits())?;
    write.write_vec4(m.edge_color)?;
    write.write_f32::<LE>(m.edge_scale)?;
    write.write_index(m.texture_index, s.texture_index_size)?;
    write.write_index(m.sphere_texture_index, s.texture_index_size)?;
    write.write_u8(m.sphere_mode)?;
    match m.toon {
        Toon::Texture(idx) => {
            write.write_u8(0)?;
            write.write_index(idx, s.texture_index_size)?;
        }
        Toon::Shared(idx) => {
            write.write_u8(1)?;
            write.write_u8(idx)?;
        }
    }
    write.write_text(&m.comment, enc)?;
    write.write_i32::<LE>(m.surface_count)?;
    Ok(())
}

fn write_bone<W: Write>(write: &mut W, bone: &Bone, s: &Settings) -> Result<()> {
    let enc = s.text_encoding;
    let bs = s.bone_index_size;

    // 标志位以实际携带的数据为准
    let mut flags = bone.flags;
    flags.set(BoneFlags::TAIL_IS_BONE, bone.tail.is_link());
    flags.set(BoneFlags::FIXED_AXIS, bone.fixed_axis.is_some());
    flags.set(BoneFlags::LOCAL_AXIS, bone.local_axis.is_some());
    flags.set(BoneFlags::EXTERNAL_PARENT, bone.external_parent.is_some());
    flags.set(BoneFlags::IK, bone.ik.is_some());
    if bone.append.is_none() {
        flags.remove(BoneFlags::APPEND_ROTATE | BoneFlags::APPEND_TRANSLATE);
    } else if !flags.intersects(BoneFlags::APPEND_ROTATE | BoneFlags::APPEND_TRANSLATE) {
        flags.insert(BoneFlags::APPEND_ROTATE);
    }

    write.write_text(&bone.local_name, enc)?;
    write.write_text(&bone.universal_name, enc)?;
    write.write_vec3(bone.position)?;
    write.write_index(bone.parent, bs)?;
    write.write_i32::<LE>(bone.transform_level)?;
    write.write_u16::<LE>(flags.bits())?;

    match bone.tail {
        BoneTail::Link(idx) => write.write_index(idx, bs)?,
        BoneTail::Offset(offset) => write.write_vec3(offset)?,
    }
    if let Some(append) = bone.append {
        write.write_index(append.parent, bs)?;
        write.write_f32::<LE>(append.rate)?;
    }
    if let Some(axis) = bone.fixed_axis {
        write.write_vec3(axis)?;
    }
    if let Some(axis) = bone.local_axis {
        write.write_vec3(axis.x)?;
        write.write_vec3(axis.z)?;
    }
    if let Some(key) = bone.external_parent {
        write.write_i32::<LE>(key)?;
    }
    if let Some(ik) = &bone.ik {
        write.write_index(ik.target, bs)?;
        write.write_i32::<LE>(ik.iterations)?;
        write.write_f32::<LE>(ik.limit_angle)?;
        write.write_count(ik.links.len())?;
        for link in &ik.links {
            write.write_index(link.bone, bs)?;
            match link.limits {
                Some((min, max)) => {
                    write.write_u8(1)?;
                    write.write_vec3(min)?;
                    write.write_vec3(max)?;
                }
                None => write.write_u8(0)?,
            }
        }
    }
    Ok(())
}

fn write_morph<W: Write>(write: &mut W, morph: &Morph, s: &Settings) -> Result<()> {
    let enc = s.text_encoding;
    write.write_text(&morph.local_name, enc)?;
    write.write_text(&morph.universal_name, enc)?;
    write.write_u8(morph.panel)?;
    write.write_u8(morph.offsets.type_id())?;

    match &morph.offsets {
        MorphOffsets::Group(items) | MorphOffsets::Flip(items) => {
            write.write_count(items.len())?;
            for item in items {
                write.write_index(item.morph, s.morph_index_size)?;
                write.write_f32::<LE>(item.weight)?;
            }
        }
        MorphOffsets::Vertex(items) => {
            write.write_count(items.len())?;
            for item in items {
                write.write_vertex_index(item.vertex.max(0) as u32, s.vertex_index_size)?;
                write.write_vec3(item.offset)?;
            }
        }
        MorphOffsets::Bone(items) => {
            write.write_count(items.len())?;
            for item in items {
                write.write_index(item.bone, s.bone_index_size)?;
                write.write_vec3(item.translation)?;
                write.write_vec4(item.rotation)?;
            }
        }
        MorphOffsets::Uv(_, items) => {
            write.write_count(items.len())?;
            for item in items {
                write.write_vertex_index(item.vertex.max(0) as u32, s.vertex_index_size)?;
                write.write_vec4(item.offset)?;
            }
        }
        MorphOffsets::Material(items) => {
            write.write_count(items.len())?;
            for item in items {
                write.write_index(item.material, s.material_index_size)?;
                write.write_u8(item.operation)?;
                write.write_vec4(item.diffuse)?;
                write.write_vec3(item.specular)?;
                write.write_f32::<LE>(item.specular_strength)?;
                write.write_vec3(item.ambient)?;
                write.write_vec4(item.edge_color)?;
                write.write_f32::<LE>(item.edge_size)?;
                write.write_vec4(item.texture_tint)?;
                write.write_vec4(item.environment_tint)?;
                write.write_vec4(item.toon_tint)?;
            }
        }
        MorphOffsets::Impulse(items) => {
            write.write_count(items.len())?;
            for item in items {
                write.write_index(item.rigid_body, s.rigid_index_size)?;
                write.write_u8(item.local as u8)?;
                write.write_vec3(item.velocity)?;
                write.write_vec3(item.torque)?;
            }
        }
    }
    Ok(())
}

fn write_rigid_body<W: Write>(write: &mut W, body: &RigidBody, s: &Settings) -> Result<()> {
    let enc = s.text_encoding;
    write.write_text(&body.local_name, enc)?;
    write.write_text(&body.universal_name, enc)?;
    write.write_index(body.bone_index, s.bone_index_size)?;
    write.write_u8(body.group)?;
    write.write_u16::<LE>(body.collision_mask)?;
    write.write_u8(body.shape as u8)?;
    write.write_vec3(body.size)?;
    write.write_vec3(body.position)?;
    write.write_vec3(radians(body.rotation))?;
    write.write_f32::<LE>(body.mass)?;
    write.write_f32::<LE>(body.move_attenuation)?;
    write.write_f32::<LE>(body.rotation_attenuation)?;
    write.write_f32::<LE>(body.repulsion)?;
    write.write_f32::<LE>(body.friction)?;
    write.write_u8(body.mode as u8)?;
    Ok(())
}

fn write_joint<W: Write>(write: &mut W, joint: &Joint, s: &Settings) -> Result<()> {
    let enc = s.text_encoding;
    write.write_text(&joint.local_name, enc)?;
    write.write_text(&joint.universal_name, enc)?;
    write.write_u8(joint.kind as u8)?;
    write.write_index(joint.rigid_a, s.rigid_index_size)?;
    write.write_index(joint.rigid_b, s.rigid_index_size)?;
    write.write_vec3(joint.position)?;
    write.write_vec3(radians(joint.rotation))?;
    write.write_vec3(joint.position_min)?;
    write.write_vec3(joint.position_max)?;
    write.write_vec3(radians(joint.rotation_min))?;
    write.write_vec3(radians(joint.rotation_max))?;
    write.write_vec3(joint.position_spring)?;
    write.write_vec3(joint.rotation_spring)?;
    Ok(())
}

#[inline]
fn radians(v: Vec3) -> Vec3 {
    v * (std::f32::consts::PI / 180.0)
}
