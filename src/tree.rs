//! 稀疏四叉树
//! 节点由位打包的定位码隐式寻址，不存父子指针，占用表与内容表按需物化节点，
//! 空区域不占任何内存，适合分布不均的点集。
//! 要求插入点时的id，应该是可以用在外部位置数组索引上的。
//! 用法是每帧重建：一帧内先insert完全部对象再query，下一帧clear后重来。

use ahash::AHashMap;
use nalgebra::*;
use parry2d::{bounding_volume::Aabb, math::Real};

use crate::quad_helper::*;

/// 未指定时每节点的默认对象容量
const DEFAULT_OBJECTS_PER_NODE: u32 = 4;

/// 点源：按对象id索引的外部位置数组的只读视图。
/// 细分时树通过它重读对象的当前位置；树的生命周期内，
/// 每个已插入的id都必须能在点源上寻址。树不会通过点源写入。
pub trait PointSource {
    /// 获取指定对象id的位置
    fn position(&self, id: u32) -> Point2<Real>;
}

impl<'a> PointSource for &'a [Point2<Real>] {
    #[inline]
    fn position(&self, id: u32) -> Point2<Real> {
        self[id as usize]
    }
}

impl PointSource for Vec<Point2<Real>> {
    #[inline]
    fn position(&self, id: u32) -> Point2<Real> {
        self[id as usize]
    }
}

/// 节点的占用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// 叶节点，直接持有指定数量的对象
    Leaf(u32),
    /// 已细分的内部节点，对象都在其4个子节点下，内容表中无条目
    Internal,
}

///
/// 稀疏四叉树结构体
///
/// 三个并行结构：占用表(定位码→叶计数或内部标记)、内容表(定位码→对象id列表)、
/// 每层半尺寸表。前两者随插入增长，clear时清空；半尺寸表构造时算好后不变。
/// 析构时三个结构一并释放，不提供单独的dispose。
///
pub struct SparseQuadTree<P: PointSource> {
    cells: AHashMap<u32, CellState>,  // 占用表，不在表中即为空区域
    objects: AHashMap<u32, Vec<u32>>, // 内容表，只有叶节点有条目
    half_sizes: Vec<Vector2<Real>>,   // 每层节点的半尺寸
    points: P,                        // 外部位置数组的只读视图
    max_depth: i32,                   // 最大深度
    objects_per_node: u32,            // 叶节点细分前的对象容量
    len: usize,                       // 已插入的对象总数
}

impl<P: PointSource> SparseQuadTree<P> {
    ///构建树
    ///
    /// 需传入最大对象数(预留哈希容量)、最大深度、每节点容量、根包围盒半尺寸与点源。
    /// 深度超过[`MAX_ALLOWED_DEPTH`]时记一条警告并截断；容量传0时取默认值。
    pub fn new(
        max_objects: usize,
        max_depth: i32,
        objects_per_node: u32,
        root_half_extent: Vector2<Real>,
        points: P,
    ) -> Self {
        let max_depth = if max_depth > MAX_ALLOWED_DEPTH {
            log::warn!(
                "SparseQuadTree: 最大深度 {} 超过上限 {}，已截断",
                max_depth,
                MAX_ALLOWED_DEPTH
            );
            MAX_ALLOWED_DEPTH
        } else {
            max_depth
        };
        let objects_per_node = if objects_per_node == 0 {
            DEFAULT_OBJECTS_PER_NODE
        } else {
            objects_per_node
        };
        SparseQuadTree {
            cells: AHashMap::with_capacity(max_objects),
            objects: AHashMap::with_capacity(max_objects / objects_per_node as usize),
            half_sizes: half_sizes(&root_half_extent, max_depth),
            points,
            max_depth,
            objects_per_node,
            len: 0,
        }
    }

    /// 插入一个对象，放进其路径上第一个有空位的节点(或到达最大深度的节点)
    pub fn insert(&mut self, id: u32, position: Point2<Real>) {
        let mut code = 0;
        let mut depth = -1;
        for _ in 0..=self.max_depth {
            let quadrant = quadrant_of(code, depth, &position, &self.half_sizes);
            code = child_code(code, quadrant);
            depth += 1;
            let state = *self.cells.entry(code).or_insert(CellState::Leaf(0));
            match state {
                // 已满且未到底：细分本节点，继续往下一层放
                CellState::Leaf(count)
                    if count >= self.objects_per_node && depth != self.max_depth =>
                {
                    self.subdivide(code, depth, count);
                }
                CellState::Internal => (),
                CellState::Leaf(count) => {
                    self.cells.insert(code, CellState::Leaf(count + 1));
                    self.objects.entry(code).or_default().push(id);
                    self.len += 1;
                    return;
                }
            }
        }
    }

    // 单层下放：取出本节点的对象列表，标记为内部节点，
    // 按各对象的当前位置重新归入对应子节点。
    // 不走insert，这些对象已知属于本节点，只需定一层象限。
    fn subdivide(&mut self, code: u32, depth: i32, count: u32) {
        // 从内容表移走的列表本身就是细分的暂存区，长度受count约束
        let list = match self.objects.remove(&code) {
            Some(list) => list,
            None => panic!("invalid state"),
        };
        debug_assert_eq!(list.len(), count as usize);
        self.cells.insert(code, CellState::Internal);
        for id in list {
            let position = self.points.position(id);
            let quadrant = quadrant_of(code, depth, &position, &self.half_sizes);
            let child = child_code(code, quadrant);
            self.objects.entry(child).or_default().push(id);
            match self.cells.entry(child).or_insert(CellState::Leaf(0)) {
                CellState::Leaf(count) => *count += 1,
                // 叶节点之下不可能已有细分的子节点
                CellState::Internal => panic!("invalid state"),
            }
        }
    }

    /// 范围查询：叶节点区域与查询盒相交的全部对象id追加到result
    pub fn query(&self, result: &mut Vec<u32>, aabb: &Aabb) {
        self.query_cell(result, aabb, 0, -2);
    }

    fn query_cell(&self, result: &mut Vec<u32>, aabb: &Aabb, code: u32, depth: i32) {
        let depth = depth + 1;
        if depth > self.max_depth {
            return;
        }
        let center = cell_center(code, depth, &self.half_sizes);
        let mask = overlap_mask(&center, aabb);
        // 遮罩恰好2位时查询盒只落在一个角象限里，递归完第一个细分子节点即可停
        let corner = mask.count_ones() == 2;
        for quadrant in 0..4 {
            if QUAD_MASKS[quadrant as usize] & mask != QUAD_MASKS[quadrant as usize] {
                continue;
            }
            let child = child_code(code, quadrant);
            match self.cells.get(&child) {
                Some(CellState::Internal) => {
                    self.query_cell(result, aabb, child, depth);
                    if corner {
                        break;
                    }
                }
                Some(CellState::Leaf(_)) => {
                    if let Some(list) = self.objects.get(&child) {
                        result.extend_from_slice(list);
                    }
                }
                None => (),
            }
        }
    }

    /// 追加树内全部对象id，等价于用根包围盒query，但不做几何测试
    pub fn query_all(&self, result: &mut Vec<u32>) {
        self.collect_cell(result, 0, -2);
    }

    // 不做几何测试，把指定子树下的全部对象id追加到result
    fn collect_cell(&self, result: &mut Vec<u32>, code: u32, depth: i32) {
        let depth = depth + 1;
        if depth > self.max_depth {
            return;
        }
        for quadrant in 0..4 {
            let child = child_code(code, quadrant);
            match self.cells.get(&child) {
                Some(CellState::Internal) => self.collect_cell(result, child, depth),
                Some(CellState::Leaf(_)) => {
                    if let Some(list) = self.objects.get(&child) {
                        result.extend_from_slice(list);
                    }
                }
                None => (),
            }
        }
    }

    /// 重建指定定位码的节点包围盒，深度由码的标记位恢复，调试绘制用
    pub fn cell_bounds(&self, code: u32) -> Aabb {
        let depth = depth_of(code);
        if depth < 0 {
            // 根码0：整个根包围盒
            return Aabb::from_half_extents(Point2::origin(), self.half_sizes[0] * 2.0);
        }
        cell_bounds(code, depth, &self.half_sizes)
    }

    /// 获得对象数量
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 清空占用表与内容表(半尺寸表保留)，哈希表的桶存储不释放，用于每帧重建
    pub fn clear(&mut self) {
        self.cells.clear();
        self.objects.clear();
        self.len = 0;
    }
}

#[test]
fn test_insert_query() {
    let points = vec![
        Point2::new(10.0, 10.0),
        Point2::new(12.0, 12.0),
        Point2::new(-10.0, -10.0),
    ];
    let mut tree = SparseQuadTree::new(16, 4, 2, Vector2::new(100.0, 100.0), points.as_slice());
    for (i, p) in points.iter().enumerate() {
        tree.insert(i as u32, *p);
    }
    assert_eq!(tree.len(), 3);

    // 中心(11,11)、尺寸(4,4)的查询盒：命中前两个，排除第三个
    let aabb = Aabb::from_half_extents(Point2::new(11.0, 11.0), Vector2::new(2.0, 2.0));
    let mut result = Vec::new();
    tree.query(&mut result, &aabb);
    result.sort_unstable();
    assert_eq!(result, [0, 1]);

    // 紧包一个点的盒总能查到它
    let aabb = Aabb::from_half_extents(Point2::new(-10.0, -10.0), Vector2::new(0.5, 0.5));
    let mut result = Vec::new();
    tree.query(&mut result, &aabb);
    assert_eq!(result, [2]);

    // 不与任何占用区域相交的盒
    let aabb = Aabb::from_half_extents(Point2::new(80.0, -80.0), Vector2::new(1.0, 1.0));
    let mut result = Vec::new();
    tree.query(&mut result, &aabb);
    assert!(result.is_empty());
}

#[test]
fn test_subdivide() {
    // 容量2，同一象限聚3个点，父节点细分后都还能查到
    let points = vec![
        Point2::new(10.0, 10.0),
        Point2::new(40.0, 40.0),
        Point2::new(30.0, 10.0),
    ];
    let mut tree = SparseQuadTree::new(16, 4, 2, Vector2::new(100.0, 100.0), points.as_slice());
    for (i, p) in points.iter().enumerate() {
        tree.insert(i as u32, *p);
    }

    // 右上子节点已变成内部节点，不再直接持有内容
    let corner = child_code(0, 3);
    assert_eq!(tree.cells.get(&corner), Some(&CellState::Internal));
    assert!(tree.objects.get(&corner).is_none());

    // 覆盖整个右上象限的盒，3个点全部命中
    let aabb = Aabb::from_half_extents(Point2::new(50.0, 50.0), Vector2::new(50.0, 50.0));
    let mut result = Vec::new();
    tree.query(&mut result, &aabb);
    result.sort_unstable();
    assert_eq!(result, [0, 1, 2]);
}

#[test]
fn test_max_depth() {
    // 容量2，8个完全重合的点：不会无限细分，最深的叶一起收下
    let points = vec![Point2::new(33.0, -57.0); 8];
    let mut tree = SparseQuadTree::new(16, 3, 2, Vector2::new(100.0, 100.0), points.as_slice());
    for i in 0..points.len() {
        tree.insert(i as u32, points[i]);
    }
    assert_eq!(tree.len(), 8);

    // 最深处有一个装下全部8个对象的叶节点
    let deepest = tree
        .cells
        .iter()
        .find_map(|(code, state)| match state {
            CellState::Leaf(8) => Some(*code),
            _ => None,
        })
        .unwrap();
    assert_eq!(depth_of(deepest), 3);
    assert_eq!(tree.objects[&deepest].len(), 8);

    // 紧包该点的查询盒拿到全部8个
    let aabb = Aabb::from_half_extents(Point2::new(33.0, -57.0), Vector2::new(0.25, 0.25));
    let mut result = Vec::new();
    tree.query(&mut result, &aabb);
    assert_eq!(result.len(), 8);
}

#[test]
fn test_clear() {
    let points = vec![
        Point2::new(1.0, 2.0),
        Point2::new(-3.0, 4.0),
        Point2::new(5.0, -6.0),
    ];
    let mut tree = SparseQuadTree::new(8, 4, 2, Vector2::new(10.0, 10.0), points.as_slice());
    for (i, p) in points.iter().enumerate() {
        tree.insert(i as u32, *p);
    }
    tree.clear();
    assert!(tree.is_empty());

    // 清空后任何查询都为空
    let root = Aabb::from_half_extents(Point2::origin(), Vector2::new(10.0, 10.0));
    let mut result = Vec::new();
    tree.query(&mut result, &root);
    assert!(result.is_empty());

    // 清空后可以直接重建
    tree.insert(0, points[0]);
    tree.query(&mut result, &root);
    assert_eq!(result, [0]);
}

#[test]
fn test_query_random() {
    use pcg_rand::Pcg32;
    use rand::{Rng, SeedableRng};

    let max_size: f32 = 1000.0;
    let mut rng = Pcg32::seed_from_u64(1111);
    let mut points = Vec::new();
    for _ in 0..1000 {
        points.push(Point2::new(
            rng.gen_range(-max_size..max_size),
            rng.gen_range(-max_size..max_size),
        ));
    }
    let mut tree = SparseQuadTree::new(
        1024,
        6,
        8,
        Vector2::new(max_size, max_size),
        points.as_slice(),
    );
    for (i, p) in points.iter().enumerate() {
        tree.insert(i as u32, *p);
    }

    // 根包围盒查询：每个id恰好出现一次
    let root = Aabb::from_half_extents(Point2::origin(), Vector2::new(max_size, max_size));
    let mut result = Vec::new();
    tree.query(&mut result, &root);
    result.sort_unstable();
    assert_eq!(result, (0u32..1000).collect::<Vec<u32>>());

    // query_all与根包围盒查询一致
    let mut all = Vec::new();
    tree.query_all(&mut all);
    all.sort_unstable();
    assert_eq!(all, result);

    // 紧包任一点的盒必含其id
    for _ in 0..100 {
        let id = rng.gen_range(0..1000u32);
        let aabb = Aabb::from_half_extents(points[id as usize], Vector2::new(0.01, 0.01));
        let mut result = Vec::new();
        tree.query(&mut result, &aabb);
        assert!(result.contains(&id));
    }

    // 随机盒查询与逐叶强相交的暴力结果一致，顺带验证角象限剪枝
    for _ in 0..100 {
        let center = Point2::new(
            rng.gen_range(-max_size..max_size),
            rng.gen_range(-max_size..max_size),
        );
        let half = Vector2::new(rng.gen_range(1.0..300.0f32), rng.gen_range(1.0..300.0f32));
        let aabb = Aabb::from_half_extents(center, half);

        let mut result = Vec::new();
        tree.query(&mut result, &aabb);
        result.sort_unstable();

        let mut expect = Vec::new();
        for (code, list) in tree.objects.iter() {
            if intersects(&aabb, &tree.cell_bounds(*code)) {
                expect.extend_from_slice(list);
            }
        }
        expect.sort_unstable();
        assert_eq!(result, expect);
    }
}
