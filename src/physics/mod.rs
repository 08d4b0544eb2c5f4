//! 物理合成
//!
//! 几何（姿态矩阵/欧拉角）、碰撞组、刚体链合成、身体碰撞体，
//! 以及所有刚体/关节删除共用的索引重映射。

pub mod body;
pub mod collision;
pub mod config;
pub mod geometry;
pub mod remap;
pub mod synth;

pub use body::{adjust_body_physics, transform_skirt};
pub use collision::{adjust_collision_groups, collision_group, merge_collision_groups, CollisionGroup};
pub use config::{RigConfig, JOINT_ROTATION_LIMIT, JOINT_ROTATION_SPRING};
pub use geometry::{euler_zxy_to_direction, matrix_to_euler_zxy, pose_matrix_bone};
pub use remap::{remove_joints, remove_rigid_bodies, IndexRemap, StableIndexSet};
pub use synth::{
    add_base_body, add_body_chain_with_joints, bind_bones, patch_bone_array, ChainBuild,
    PatchedChain,
};
