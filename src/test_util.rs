//! 测试用骨架构建器

use glam::Vec3;

use crate::pmx::{Bone, PmxModel, Vertex, WeightDeform};

pub(crate) struct SkeletonBuilder {
    model: PmxModel,
}

impl SkeletonBuilder {
    pub fn new() -> Self {
        Self {
            model: PmxModel::new(),
        }
    }

    /// 带头部锚点与胸部参考骨骼的 KK 基础骨架
    ///
    /// 返回 (构建器, 头部骨骼, 上半身骨骼)。头部在 y=15，胸親在 y=12。
    pub fn kk_base() -> (Self, usize, usize) {
        let mut s = Self::new();
        let all = s.bone("全ての親", None, Vec3::ZERO);
        let upper = s.bone("上半身", Some(all), Vec3::new(0.0, 10.0, 0.0));
        s.bone("胸親", Some(upper), Vec3::new(0.0, 12.0, 0.0));
        let head = s.bone("a_n_headflont", Some(upper), Vec3::new(0.0, 15.0, -0.5));
        (s, head, upper)
    }

    pub fn bone(&mut self, name: &str, parent: Option<usize>, position: Vec3) -> usize {
        let parent = parent.map_or(-1, |p| p as i32);
        self.model.bones.push(Bone::new(name, position, parent));
        self.model.bones.len() - 1
    }

    /// 一条直线骨骼链，每根骨骼的父级为前一根
    pub fn chain(&mut self, names: &[&str], parent: usize, start: Vec3, step: Vec3) -> Vec<usize> {
        let mut out = Vec::with_capacity(names.len());
        let mut prev = parent;
        let mut pos = start;
        for name in names {
            prev = self.bone(name, Some(prev), pos);
            out.push(prev);
            pos += step;
        }
        out
    }

    /// 为每根骨骼添加一个 BDEF1 顶点
    pub fn weight(&mut self, bones: &[usize]) {
        for &b in bones {
            let pos = self.model.bones[b].position;
            self.model
                .vertices
                .push(Vertex::new(pos, WeightDeform::Bdef1 { bone: b as i32 }));
        }
    }

    pub fn into_model(self) -> PmxModel {
        self.model
    }
}
