use nalgebra::{Point2, Vector2};
use parry2d::bounding_volume::Aabb;
use wasm_bindgen::prelude::wasm_bindgen;

use super::util::SharedPoints;
use crate::tree::SparseQuadTree as TreeInner;

#[wasm_bindgen]
pub struct SparseQuadTree {
    points: SharedPoints,
    tree: TreeInner<SharedPoints>,
}

#[wasm_bindgen]
impl SparseQuadTree {
    pub fn new(
        max_objects: usize,
        max_depth: i32,
        objects_per_node: u32,
        half_x: f32,
        half_y: f32,
    ) -> Self {
        let points = SharedPoints::new(max_objects);
        let tree = TreeInner::new(
            max_objects,
            max_depth,
            objects_per_node,
            Vector2::new(half_x, half_y),
            points.clone(),
        );
        Self { points, tree }
    }

    /// 添加一个点，返回其id
    pub fn add(&mut self, x: f32, y: f32) -> u32 {
        let id = self.points.0.borrow().len() as u32;
        self.points.0.borrow_mut().push(Point2::new(x, y));
        self.tree.insert(id, Point2::new(x, y));
        id
    }

    /// 查询指定范围内的对象id
    pub fn query(&self, min: &[f32], max: &[f32]) -> Vec<u32> {
        let aabb = Aabb::new(Point2::new(min[0], min[1]), Point2::new(max[0], max[1]));
        let mut result = Vec::new();
        self.tree.query(&mut result, &aabb);
        result
    }

    /// 对象数量
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// 指定定位码的节点包围盒[min_x, min_y, max_x, max_y]，调试绘制用
    pub fn cell_bounds(&self, code: u32) -> Vec<f32> {
        let aabb = self.tree.cell_bounds(code);
        vec![aabb.mins.x, aabb.mins.y, aabb.maxs.x, aabb.maxs.y]
    }

    /// 清空位置数组与树，用于每帧重建
    pub fn clear(&mut self) {
        self.points.0.borrow_mut().clear();
        self.tree.clear();
    }
}
