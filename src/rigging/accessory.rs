//! 头发与饰品的物理绑定
//!
//! 以 `胸親` 的高度为界：高于（或等于）它的根视为头发，锚定到头部刚体；
//! 低于它的根视为其它饰品，各自使用独立的 `_r` 锚点。

use glam::Vec3;

use super::classify::{classify, snap_chain_end, ChainFamily};
use super::roots::collect_accessory_roots;
use super::{RegisteredChain, RigContext};
use crate::physics::{patch_bone_array, RigConfig};
use crate::pmx::{PmxModel, RigidBody, RigidBodyMode, RigidBodyShape};

/// 根骨骼所在的高度带
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Hair,
    Other,
}

impl Band {
    fn contains(self, y: f32, limit: f32) -> bool {
        match self {
            Band::Hair => y >= limit,
            Band::Other => y < limit,
        }
    }
}

/// 头发与饰品的分界高度
fn height_limit(model: &PmxModel, cfg: &RigConfig) -> f32 {
    model
        .find_bone(&cfg.height_reference_bone)
        .map_or(0.0, |b| model.bones[b].position.y)
}

/// 复用或创建头部锚定刚体
fn ensure_head_body(model: &mut PmxModel, cfg: &RigConfig, head: usize) -> usize {
    if let Some(existing) = model.find_rigid(&cfg.head_body) {
        return existing;
    }
    let mut body = RigidBody::new(cfg.head_body.clone());
    body.bone_index = head as i32;
    body.shape = RigidBodyShape::Sphere;
    body.size = Vec3::ONE;
    body.position = model.bones[head].position;
    body.mode = RigidBodyMode::Static;
    body.move_attenuation = cfg.anchor_damping;
    body.rotation_attenuation = cfg.anchor_damping;
    model.add_rigid_body(body)
}

/// 绑定头发链（组 3，锚定头部）
///
/// 没有头部骨骼时什么都不做。返回生成了物理的链数。
pub fn rig_hair_joints(model: &mut PmxModel, ctx: &mut RigContext) -> usize {
    let Some(head) = model.find_bone(&ctx.config.head_bone) else {
        log::info!("[Hair] 没有 {}，跳过头发", ctx.config.head_bone);
        return 0;
    };
    let head_body = ensure_head_body(model, &ctx.config, head);
    let group = ctx.config.hair_group;
    rig_band(model, ctx, Band::Hair, Some(head_body), group)
}

/// 绑定其它饰品（组 16，无外部锚点）
pub fn rig_other_stuff(model: &mut PmxModel, ctx: &mut RigContext) -> usize {
    let group = ctx.config.accessory_group;
    rig_band(model, ctx, Band::Other, None, group)
}

fn rig_band(model: &mut PmxModel, ctx: &mut RigContext, band: Band, anchor: Option<usize>, group: u8) -> usize {
    let limit = height_limit(model, &ctx.config);
    let slots = collect_accessory_roots(model, &ctx.config);
    if slots.is_empty() {
        log::info!("[Rig] 没有可绑定的 {} 根", ctx.config.root_prefix);
        return 0;
    }

    let mut rigged = 0;
    for slot in &slots {
        for scope in &slot.roots {
            if !band.contains(model.bones[scope.root].position.y, limit) {
                continue;
            }
            let Some(found) = classify(model, &scope.subtree) else {
                log::debug!("[Rig] {} 跳过", scope.prefix);
                continue;
            };
            if found.chains.is_empty() {
                log::warn!("[Rig] {}: {:?} 没有可用的链", scope.prefix, found.family);
                continue;
            }

            let flat = found.family == ChainFamily::Fallback;
            for (i, chain) in found.chains.iter().enumerate() {
                snap_chain_end(model, chain);
                let name = if flat {
                    scope.prefix.clone()
                } else {
                    format!("{}_{}", scope.prefix, i)
                };
                if patch_bone_array(model, anchor, chain, &name, group, true, &ctx.config).is_none() {
                    continue;
                }
                ctx.registry.record(
                    &scope.prefix,
                    RegisteredChain {
                        name,
                        bones: chain.clone(),
                        flat,
                    },
                );
                rigged += 1;
            }
            if scope.multi_root {
                ctx.multi_root_slots.insert(slot.slot_name.clone());
            }
        }
    }

    if ctx.config.debug_log {
        log::info!("[Rig] {:?}: {} 条链", band, rigged);
    }
    rigged
}
