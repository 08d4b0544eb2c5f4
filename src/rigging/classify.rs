//! 骨骼链分类
//!
//! 给定一个饰品根骨骼的子树，按固定优先级尝试各命名族，第一个命中的族
//! 决定如何把子树切分成链。每个族的检测与提取都可单独调用。
//!
//! 具名族得到的链沿「第一个子骨骼」下降，分叉处其余子骨骼各自开启新链，
//! 因此链之间互不重叠，且链内每根骨骼的父级都是前一根。

use std::collections::{HashSet, VecDeque};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::pmx::PmxModel;
use crate::skeleton::children_cache;

/// 命名族（按检测优先级排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    /// CM3D2 导出：`Bone_Face` 下的 `Hair_F` / `Hair_R` / `_yure_hair_*`
    Cm3d2,
    /// `AS01_N_kami` → 第一个子骨骼 → 其子骨骼
    As01,
    /// `AS00_N_kami` → 第一个非装饰子骨骼 → 其子骨骼
    As00,
    /// 插件或手工绑定：`joint*` 的父级，或字面名为 `root` 的骨骼
    GenericJoint,
    /// `cf_N_J_` 子树已经带有刚体，不再处理
    PreRigged,
    /// 常见发顶骨骼
    HairTop,
    /// 整个子树（去除渲染骨骼）作为一条链
    Fallback,
}

pub const FAMILY_ORDER: [ChainFamily; 7] = [
    ChainFamily::Cm3d2,
    ChainFamily::As01,
    ChainFamily::As00,
    ChainFamily::GenericJoint,
    ChainFamily::PreRigged,
    ChainFamily::HairTop,
    ChainFamily::Fallback,
];

const HAIR_TOP_NAMES: [&str; 5] = [
    "cf_J_hairF_top",
    "cf_J_hairB_top",
    "acs_j_top",
    "j_acs_1",
    "acs_j_usamimi_00",
];

/// 渲染用骨骼前缀（不参与物理）
const RENDER_PREFIX: &str = "o_";

// ============================================================================
// 已知导出缺陷
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuirkEffect {
    /// 该分支不参与选择
    SkipBranch,
    /// 多下降一层
    DescendOnce,
    /// 整个根不生成物理
    SkipRoot,
    /// 不作为链首
    ExcludeHead,
}

/// 针对特定导出资源的窄范围修正，不做推广
#[derive(Debug, Clone, Copy)]
pub struct Quirk {
    /// None 表示所有族
    pub family: Option<ChainFamily>,
    pub pattern: &'static str,
    pub effect: QuirkEffect,
    pub note: &'static str,
}

pub const QUIRKS: &[Quirk] = &[
    Quirk {
        family: Some(ChainFamily::As00),
        pattern: r"_O_",
        effect: QuirkEffect::SkipBranch,
        note: "AS00 装饰分支（纯渲染）",
    },
    Quirk {
        family: Some(ChainFamily::As00),
        pattern: r"(kami00$|kami[SB]top)",
        effect: QuirkEffect::DescendOnce,
        note: "AS00 部分导出多一层分组骨骼",
    },
    Quirk {
        family: Some(ChainFamily::GenericJoint),
        pattern: r"^joints$",
        effect: QuirkEffect::SkipRoot,
        note: "yure_hair 的 joints 容器全是无用骨骼",
    },
    Quirk {
        family: Some(ChainFamily::Fallback),
        pattern: r"^All_Root",
        effect: QuirkEffect::SkipRoot,
        note: "非物理的占位根",
    },
    Quirk {
        family: None,
        pattern: r"_gyu",
        effect: QuirkEffect::ExcludeHead,
        note: "挤压辅助骨骼不能作为链首",
    },
];

static QUIRK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    QUIRKS
        .iter()
        .map(|q| Regex::new(q.pattern).expect("quirk pattern"))
        .collect()
});

static END_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(end|en)$").expect("end pattern"));

/// 名称是否命中某族的某种修正
fn has_quirk(family: ChainFamily, effect: QuirkEffect, name: &str) -> bool {
    QUIRKS.iter().zip(QUIRK_PATTERNS.iter()).any(|(q, re)| {
        q.effect == effect && q.family.map_or(true, |f| f == family) && re.is_match(name)
    })
}

// ============================================================================
// 分类结果
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub family: ChainFamily,
    /// 每条链按骨骼顺序排列
    pub chains: Vec<Vec<usize>>,
}

/// 子树上的查询上下文
struct Scope<'a> {
    model: &'a PmxModel,
    bones: &'a [usize],
    members: HashSet<usize>,
    cache: Vec<Vec<usize>>,
}

impl<'a> Scope<'a> {
    fn new(model: &'a PmxModel, bones: &'a [usize]) -> Self {
        Self {
            model,
            bones,
            members: bones.iter().copied().collect(),
            cache: children_cache(&model.bones),
        }
    }

    fn name(&self, bone: usize) -> &str {
        &self.model.bones[bone].local_name
    }

    fn find(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.bones.iter().copied().find(|&b| pred(self.name(b)))
    }

    /// 子树内的直接子骨骼
    fn children(&self, bone: usize) -> Vec<usize> {
        self.cache
            .get(bone)
            .map(|c| c.iter().copied().filter(|k| self.members.contains(k)).collect())
            .unwrap_or_default()
    }

    fn is_render(&self, bone: usize) -> bool {
        self.name(bone).starts_with(RENDER_PREFIX)
    }

    /// 从链首出发沿第一个子骨骼下降，分叉处的其余子骨骼排队成为新链首
    fn strands(&self, family: ChainFamily, heads: &[usize]) -> Vec<Vec<usize>> {
        let usable_head =
            |b: &usize| !self.is_render(*b) && !has_quirk(family, QuirkEffect::ExcludeHead, self.name(*b));
        let mut queue: VecDeque<usize> = heads.iter().copied().filter(usable_head).collect();
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut out = Vec::new();

        while let Some(head) = queue.pop_front() {
            if !claimed.insert(head) {
                continue;
            }
            let mut chain = vec![head];
            let mut current = head;
            loop {
                let kids: Vec<usize> = self
                    .children(current)
                    .into_iter()
                    .filter(|k| !self.is_render(*k) && !claimed.contains(k))
                    .collect();
                let Some((&next, rest)) = kids.split_first() else {
                    break;
                };
                queue.extend(rest.iter().copied().filter(usable_head));
                claimed.insert(next);
                chain.push(next);
                current = next;
            }
            out.push(chain);
        }
        out
    }
}

impl ChainFamily {
    /// 在子树中寻找该族的锚点骨骼
    pub fn detect(self, model: &PmxModel, subtree: &[usize]) -> Option<usize> {
        let scope = Scope::new(model, subtree);
        self.detect_in(&scope)
    }

    /// 按该族规则切分链
    ///
    /// 返回 None 表示整个根应当跳过；返回空列表表示族命中但没有可用的链。
    pub fn extract(self, model: &PmxModel, anchor: usize, subtree: &[usize]) -> Option<Vec<Vec<usize>>> {
        let scope = Scope::new(model, subtree);
        self.extract_in(&scope, anchor)
    }

    fn detect_in(self, scope: &Scope) -> Option<usize> {
        match self {
            ChainFamily::Cm3d2 => scope.find(|n| n == "Bone_Face"),
            ChainFamily::As01 => scope.find(|n| n.starts_with("AS01_N_kami")),
            ChainFamily::As00 => scope.find(|n| n.starts_with("AS00_N_kami")),
            ChainFamily::GenericJoint => scope
                .find(|n| n.starts_with("joint"))
                .or_else(|| scope.find(|n| n == "root")),
            ChainFamily::PreRigged => {
                let anchor = scope.find(|n| n.starts_with("cf_N_J_"))?;
                let rigged = scope
                    .model
                    .rigid_bodies
                    .iter()
                    .any(|r| r.bone().is_some_and(|b| scope.members.contains(&b)));
                rigged.then_some(anchor)
            }
            ChainFamily::HairTop => scope.find(|n| HAIR_TOP_NAMES.iter().any(|&t| t == n)),
            ChainFamily::Fallback => scope.bones.first().copied(),
        }
    }

    fn extract_in(self, scope: &Scope, anchor: usize) -> Option<Vec<Vec<usize>>> {
        match self {
            ChainFamily::Cm3d2 => {
                let is_yure = |b: usize| scope.name(b).contains("_yure_hair_");
                let anchors: Vec<usize> = scope
                    .bones
                    .iter()
                    .copied()
                    .filter(|&b| {
                        let name = scope.name(b);
                        if name == "Hair_F" || name == "Hair_R" {
                            return true;
                        }
                        // 只取顶层的 _yure_hair_
                        is_yure(b)
                            && !scope.model.bones[b]
                                .parent_id()
                                .is_some_and(|p| scope.members.contains(&p) && is_yure(p))
                    })
                    .collect();
                let heads: Vec<usize> = anchors.iter().flat_map(|&a| scope.children(a)).collect();
                Some(scope.strands(self, &heads))
            }
            ChainFamily::As01 => {
                let Some(&first) = scope.children(anchor).first() else {
                    return Some(Vec::new());
                };
                Some(scope.strands(self, &scope.children(first)))
            }
            ChainFamily::As00 => {
                let Some(group) = scope
                    .children(anchor)
                    .into_iter()
                    .find(|&c| !has_quirk(self, QuirkEffect::SkipBranch, scope.name(c)))
                else {
                    return Some(Vec::new());
                };
                let mut heads = scope.children(group);
                if let Some(&first) = heads.first() {
                    if has_quirk(self, QuirkEffect::DescendOnce, scope.name(first)) {
                        heads = scope.children(first);
                    }
                }
                Some(scope.strands(self, &heads))
            }
            ChainFamily::GenericJoint => {
                let name = scope.name(anchor);
                if has_quirk(self, QuirkEffect::SkipRoot, name) {
                    return None;
                }
                let heads = scope.model.bones[anchor]
                    .parent_id()
                    .map(|p| scope.children(p))
                    .unwrap_or_default();
                Some(scope.strands(self, &heads))
            }
            ChainFamily::PreRigged => None,
            ChainFamily::HairTop => Some(scope.strands(self, &scope.children(anchor))),
            ChainFamily::Fallback => {
                if has_quirk(self, QuirkEffect::SkipRoot, scope.name(anchor)) {
                    return None;
                }
                let chain: Vec<usize> = scope
                    .bones
                    .iter()
                    .copied()
                    .filter(|&b| !scope.is_render(b))
                    .collect();
                if chain.len() < 2 {
                    return None;
                }
                Some(vec![chain])
            }
        }
    }
}

/// 按优先级分类一个根骨骼的子树（不含根本身，先序）
///
/// None 表示该根不生成物理。
pub fn classify(model: &PmxModel, subtree: &[usize]) -> Option<Classification> {
    let scope = Scope::new(model, subtree);
    for family in FAMILY_ORDER {
        if let Some(anchor) = family.detect_in(&scope) {
            let chains = family.extract_in(&scope, anchor)?;
            return Some(Classification { family, chains });
        }
    }
    None
}

/// 链末骨骼名以 `_end` / `_en` 结尾时，将其高度对齐到父骨骼
pub fn snap_chain_end(model: &mut PmxModel, chain: &[usize]) -> bool {
    let Some(&last) = chain.last() else {
        return false;
    };
    if !END_SUFFIX.is_match(&model.bones[last].local_name) {
        return false;
    }
    let Some(parent_y) = model.bones[last]
        .parent_id()
        .and_then(|p| model.bones.get(p))
        .map(|p| p.position.y)
    else {
        return false;
    };
    model.bones[last].position.y = parent_y;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmx::RigidBody;
    use crate::skeleton::descendants;
    use crate::test_util::SkeletonBuilder;
    use glam::Vec3;

    fn subtree(model: &PmxModel, root: usize) -> Vec<usize> {
        descendants(&children_cache(&model.bones), root)
    }

    /// 链不重叠、属于子树、且父子相邻
    fn assert_partition(model: &PmxModel, sub: &[usize], chains: &[Vec<usize>]) {
        let mut seen = HashSet::new();
        for chain in chains {
            for (i, &b) in chain.iter().enumerate() {
                assert!(sub.contains(&b), "bone {} outside subtree", b);
                assert!(seen.insert(b), "bone {} in two chains", b);
                if i > 0 {
                    assert_eq!(model.bones[b].parent_id(), Some(chain[i - 1]));
                }
            }
        }
    }

    #[test]
    fn test_hair_top_single_strand() {
        let (mut s, head, _) = SkeletonBuilder::kk_base();
        let root = s.bone("N_move", Some(head), Vec3::new(0.0, 16.0, 0.0));
        let top = s.bone("cf_J_hairF_top", Some(root), Vec3::new(0.0, 16.0, 0.0));
        let chain = s.chain(
            &["hair_01", "hair_02", "hair_03", "hair_04"],
            top,
            Vec3::new(0.0, 16.0, -1.0),
            Vec3::new(0.0, -1.0, 0.0),
        );
        let model = s.into_model();
        let sub = subtree(&model, root);

        let result = classify(&model, &sub).unwrap();
        assert_eq!(result.family, ChainFamily::HairTop);
        assert_eq!(result.chains, vec![chain]);
        assert_partition(&model, &sub, &result.chains);
    }

    #[test]
    fn test_branches_become_strands() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let top = s.bone("acs_j_top", Some(root), Vec3::ZERO);
        let a = s.chain(&["a1", "a2"], top, Vec3::Y, Vec3::Y);
        let branch = s.chain(&["b1", "b2"], a[0], Vec3::X, Vec3::Y);
        let o = s.bone("o_mesh", Some(a[1]), Vec3::ZERO);
        let model = s.into_model();
        let sub = subtree(&model, root);

        let result = classify(&model, &sub).unwrap();
        assert_eq!(result.chains, vec![a, branch]);
        assert!(!result.chains.iter().flatten().any(|&b| b == o));
        assert_partition(&model, &sub, &result.chains);
    }

    #[test]
    fn test_generic_joint() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let r = s.bone("root", Some(root), Vec3::ZERO);
        let j1 = s.chain(&["joint1-1", "joint1-2", "joint1-3"], r, Vec3::X, Vec3::NEG_Y);
        let j2 = s.chain(&["joint2-1", "joint2-2"], r, Vec3::NEG_X, Vec3::NEG_Y);
        let model = s.into_model();
        let sub = subtree(&model, root);

        assert_eq!(ChainFamily::GenericJoint.detect(&model, &sub), Some(j1[0]));
        let result = classify(&model, &sub).unwrap();
        assert_eq!(result.family, ChainFamily::GenericJoint);
        assert_eq!(result.chains, vec![j1, j2]);
    }

    #[test]
    fn test_literal_root_without_joints() {
        let mut s = SkeletonBuilder::new();
        let n = s.bone("N_move", None, Vec3::ZERO);
        let r = s.bone("root", Some(n), Vec3::ZERO);
        let c = s.chain(&["ribbon_a", "ribbon_b"], r, Vec3::X, Vec3::NEG_Y);
        let model = s.into_model();
        let result = classify(&model, &subtree(&model, n)).unwrap();
        assert_eq!(result.family, ChainFamily::GenericJoint);
        // 取 root 父级的子骨骼，root 本身成为链首
        let mut expected = vec![r];
        expected.extend(c);
        assert_eq!(result.chains, vec![expected]);
    }

    #[test]
    fn test_joints_container_is_skipped() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let j = s.bone("joints", Some(root), Vec3::ZERO);
        s.chain(&["joint1", "joint2"], j, Vec3::X, Vec3::Y);
        let model = s.into_model();
        assert!(classify(&model, &subtree(&model, root)).is_none());
    }

    #[test]
    fn test_as01() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let n = s.bone("AS01_N_kamiB.001", Some(root), Vec3::ZERO);
        let j = s.bone("AS01_J_kamiB", Some(n), Vec3::ZERO);
        let a = s.chain(&["AS01_J_kamiB_01", "AS01_J_kamiB_02", "AS01_J_kamiB_02_end"], j, Vec3::X, Vec3::NEG_Y);
        let b = s.chain(&["AS01_J_kamiRB_01", "AS01_J_kamiRB_02"], j, Vec3::NEG_X, Vec3::NEG_Y);
        let model = s.into_model();

        let result = classify(&model, &subtree(&model, root)).unwrap();
        assert_eq!(result.family, ChainFamily::As01);
        assert_eq!(result.chains, vec![a, b]);
    }

    #[test]
    fn test_as00_skips_ornament_and_descends() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let n = s.bone("AS00_N_kamiF", Some(root), Vec3::ZERO);
        let ornament = s.bone("AS00_O_kamiF", Some(n), Vec3::ZERO);
        s.bone("AS00_O_kamiF_01", Some(ornament), Vec3::ZERO);
        let group = s.bone("AS00_J_kamiF", Some(n), Vec3::ZERO);
        let extra = s.bone("AS00_J_kamiStop", Some(group), Vec3::ZERO);
        let a = s.chain(&["AS00_J_kamiS_01", "AS00_J_kamiS_02"], extra, Vec3::X, Vec3::NEG_Y);
        let model = s.into_model();

        let result = classify(&model, &subtree(&model, root)).unwrap();
        assert_eq!(result.family, ChainFamily::As00);
        assert_eq!(result.chains, vec![a]);
    }

    #[test]
    fn test_cm3d2() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let face = s.bone("Bone_Face", Some(root), Vec3::ZERO);
        let front = s.bone("Hair_F", Some(face), Vec3::ZERO);
        let f = s.chain(&["hair_f_1", "hair_f_2"], front, Vec3::Z, Vec3::NEG_Y);
        let yure = s.bone("side_yure_hair_L", Some(face), Vec3::X);
        let y = s.chain(&["side_yure_hair_L1", "side_yure_hair_L2"], yure, Vec3::X, Vec3::NEG_Y);
        let model = s.into_model();

        let result = classify(&model, &subtree(&model, root)).unwrap();
        assert_eq!(result.family, ChainFamily::Cm3d2);
        assert_eq!(result.chains, vec![f, y]);
    }

    #[test]
    fn test_pre_rigged_is_left_alone() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let n = s.bone("cf_N_J_hairF", Some(root), Vec3::ZERO);
        let top = s.bone("cf_J_hairF_top", Some(n), Vec3::ZERO);
        let c = s.chain(&["cf_J_hairF_01", "cf_J_hairF_02"], top, Vec3::X, Vec3::NEG_Y);
        let mut model = s.into_model();
        let sub = subtree(&model, root);

        // 没有刚体时按发顶处理
        assert_eq!(classify(&model, &sub).unwrap().family, ChainFamily::HairTop);

        let mut body = RigidBody::new("cf_J_hairF_01");
        body.bone_index = c[0] as i32;
        model.add_rigid_body(body);
        assert!(classify(&model, &sub).is_none());
    }

    #[test]
    fn test_fallback_strips_render_bones() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let c = s.chain(&["bn_a", "bn_b", "bn_c", "bn_d"], root, Vec3::Y, Vec3::NEG_Y);
        s.bone("o_body_a", Some(c[1]), Vec3::ZERO);
        s.bone("o_body_b", Some(c[3]), Vec3::ZERO);
        let model = s.into_model();

        let result = classify(&model, &subtree(&model, root)).unwrap();
        assert_eq!(result.family, ChainFamily::Fallback);
        assert_eq!(result.chains, vec![c]);
    }

    #[test]
    fn test_all_root_is_skipped() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        s.bone("All_Root", Some(root), Vec3::ZERO);
        let model = s.into_model();
        assert!(classify(&model, &subtree(&model, root)).is_none());
        assert!(classify(&model, &[]).is_none());
    }

    #[test]
    fn test_gyu_is_never_a_head() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let top = s.bone("j_acs_1", Some(root), Vec3::ZERO);
        s.bone("acs_gyu", Some(top), Vec3::ZERO);
        let a = s.chain(&["acs_a1", "acs_a2"], top, Vec3::X, Vec3::NEG_Y);
        let model = s.into_model();
        let result = classify(&model, &subtree(&model, root)).unwrap();
        assert_eq!(result.chains, vec![a]);
    }

    #[test]
    fn test_snap_chain_end() {
        let mut s = SkeletonBuilder::new();
        let root = s.bone("N_move", None, Vec3::ZERO);
        let c = s.chain(&["k_01", "k_02", "k_02_end"], root, Vec3::ZERO, Vec3::Y);
        let mut model = s.into_model();
        model.bones[c[2]].position.y = 50.0;
        assert!(snap_chain_end(&mut model, &c));
        assert!((model.bones[c[2]].position.y - model.bones[c[1]].position.y).abs() < 1e-6);
        assert!(!snap_chain_end(&mut model, &c[..2]));
    }
}
