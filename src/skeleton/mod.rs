//! 骨骼系统
//!
//! 只做只读的层次查询：祖先、后代、槽位归属。
//! 骨骼数据本身保存在 `pmx::PmxModel::bones`。

mod graph;

pub use graph::{
    ancestors, children_cache, children_map, delta_map, descendants,
    parent_map, slot_of, Ancestors, ChildList,
};
