//! 定位码(location code)相关接口
//! 每层占3位：低2位为象限，第3位恒为1，作为深度标记位。
//! 象限编码：0左下 1右下 2左上 3右上。根节点的定位码为0，深度记为-1。

use nalgebra::*;
use parry2d::{bounding_volume::Aabb, math::Real};

/// 定位码支持的最大配置深度
pub const MAX_ALLOWED_DEPTH: i32 = 12;

/// 每个象限要求的溢出遮罩位：左下=左|下，右下=右|下，左上=左|上，右上=右|上
pub const QUAD_MASKS: [u32; 4] = [0b0101, 0b0110, 0b1001, 0b1010];

/// 每层的深度标记位，深度d的标记位在第3d+2位上
pub const DEPTH_MASKS: [u32; 10] = [
    4,
    32,
    256,
    2048,
    16384,
    131072,
    1048576,
    8388608,
    67108864,
    536870912,
];

/// 预计算每层节点的半尺寸表，表长max_depth+2
/// 深度d的节点半尺寸为 root_half / 2^(d+1)
pub fn half_sizes(root_half: &Vector2<Real>, max_depth: i32) -> Vec<Vector2<Real>> {
    let len = (max_depth + 2) as usize;
    let mut table = Vec::with_capacity(len);
    for d in 0..len {
        let pow = Real::powi(2.0, d as i32 + 1);
        table.push(Vector2::new(root_half.x / pow, root_half.y / pow));
    }
    table
}

/// 由父码和象限生成子码
#[inline]
pub fn child_code(parent: u32, quadrant: u32) -> u32 {
    (quadrant | 4) | (parent << 3)
}

/// 由最高的深度标记位恢复定位码的深度，根码(无标记位)返回-1
#[inline]
pub fn depth_of(code: u32) -> i32 {
    for d in (0..DEPTH_MASKS.len()).rev() {
        if code & DEPTH_MASKS[d] != 0 {
            return d as i32;
        }
    }
    -1
}

/// 从根走到指定深度，按每层象限位逐轴累加±半尺寸，重建节点中心
pub fn cell_center(code: u32, depth: i32, half_sizes: &[Vector2<Real>]) -> Point2<Real> {
    let mut center = Point2::origin();
    for i in (0..=depth).rev() {
        // 深度超过10的3位组已在32位预算之外，移位量按环绕处理，与定位码的溢出行为一致
        let local = code.wrapping_shr((i * 3) as u32);
        let h = &half_sizes[(depth - i) as usize];
        center.x += if local & 1 == 0 { -h.x } else { h.x };
        center.y += if local & 2 == 0 { -h.y } else { h.y };
    }
    center
}

/// 重建指定定位码与深度的节点包围盒(中心+半尺寸)，深度必须≥0
#[inline]
pub fn cell_bounds(code: u32, depth: i32, half_sizes: &[Vector2<Real>]) -> Aabb {
    let center = cell_center(code, depth, half_sizes);
    Aabb::from_half_extents(center, half_sizes[depth as usize])
}

/// 判断点落在指定节点的哪个象限，无分支：取point-center每轴的符号位
/// 结果与直接比较一致，点恰好落在中心线上时归入较大的一侧
#[inline]
pub fn quadrant_of(code: u32, depth: i32, point: &Point2<Real>, half_sizes: &[Vector2<Real>]) -> u32 {
    let center = cell_center(code, depth, half_sizes);
    let x = (point.x - center.x).to_bits() >> 31 ^ 1;
    let y = (point.y - center.y).to_bits() >> 31 ^ 1;
    x | y << 1
}

/// 查询盒相对节点中心的四侧溢出遮罩：1左 2右 4下 8上
#[inline]
pub fn overlap_mask(center: &Point2<Real>, aabb: &Aabb) -> u32 {
    let mut mask = 0;
    if aabb.mins.x < center.x {
        mask |= 1;
    }
    if aabb.maxs.x > center.x {
        mask |= 2;
    }
    if aabb.mins.y < center.y {
        mask |= 4;
    }
    if aabb.maxs.y > center.y {
        mask |= 8;
    }
    mask
}

/// aabb查询函数的范本，判断两个aabb是否严格相交，与溢出遮罩的判定口径一致
/// 应用方为了功能和性能，应该实现自己需要的查询函数，比如点查询、圆查询...
#[inline]
pub fn intersects(a: &Aabb, b: &Aabb) -> bool {
    a.mins.x < b.maxs.x && a.maxs.x > b.mins.x && a.mins.y < b.maxs.y && a.maxs.y > b.mins.y
}

#[test]
fn test_codes() {
    // 根的子码只有低3位
    assert_eq!(child_code(0, 0), 0b100);
    assert_eq!(child_code(0, 3), 0b111);
    // 两层：父码左移3位，或上象限|标记位
    let c = child_code(child_code(0, 1), 2);
    assert_eq!(c, 0b101_110);
    assert_eq!(depth_of(c), 1);
    assert_eq!(depth_of(0b100), 0);
    assert_eq!(depth_of(0), -1);
    for (d, m) in DEPTH_MASKS.iter().enumerate() {
        assert_eq!(*m, 0b100 << (3 * d));
    }
}

#[test]
fn test_cell_center() {
    let table = half_sizes(&Vector2::new(100.0, 100.0), 4);
    assert_eq!(table.len(), 6);
    assert_eq!(table[0], Vector2::new(50.0, 50.0));
    // 根中心为原点
    assert_eq!(cell_center(0, -1, &table), Point2::origin());
    // 右上子节点中心(50,50)，其左下子节点中心(25,25)
    let c1 = child_code(0, 3);
    assert_eq!(cell_center(c1, 0, &table), Point2::new(50.0, 50.0));
    let c2 = child_code(c1, 0);
    assert_eq!(cell_center(c2, 1, &table), Point2::new(25.0, 25.0));
    let b = cell_bounds(c2, 1, &table);
    assert_eq!(b.mins, Point2::new(0.0, 0.0));
    assert_eq!(b.maxs, Point2::new(50.0, 50.0));
}

#[test]
fn test_quadrant() {
    use pcg_rand::Pcg32;
    use rand::{Rng, SeedableRng};

    let table = half_sizes(&Vector2::new(128.0, 128.0), 6);
    assert_eq!(quadrant_of(0, -1, &Point2::new(-1.0, -1.0), &table), 0);
    assert_eq!(quadrant_of(0, -1, &Point2::new(1.0, -1.0), &table), 1);
    assert_eq!(quadrant_of(0, -1, &Point2::new(-1.0, 1.0), &table), 2);
    assert_eq!(quadrant_of(0, -1, &Point2::new(1.0, 1.0), &table), 3);

    // 符号位判定与直接比较一致
    let mut rng = Pcg32::seed_from_u64(7);
    for _ in 0..1000 {
        let p = Point2::new(
            rng.gen_range(-128.0..128.0f32),
            rng.gen_range(-128.0..128.0f32),
        );
        let code = child_code(0, quadrant_of(0, -1, &p, &table));
        let center = cell_center(code, 0, &table);
        let direct = (p.x > center.x) as u32 | (((p.y > center.y) as u32) << 1);
        assert_eq!(quadrant_of(code, 0, &p, &table), direct);
    }
}

#[test]
fn test_overlap_mask() {
    let center = Point2::new(0.0, 0.0);
    // 整个落在右上
    let aabb = Aabb::new(Point2::new(1.0, 2.0), Point2::new(3.0, 4.0));
    assert_eq!(overlap_mask(&center, &aabb), 0b1010);
    // 横跨中心
    let aabb = Aabb::new(Point2::new(-1.0, -1.0), Point2::new(1.0, 1.0));
    assert_eq!(overlap_mask(&center, &aabb), 0b1111);
    // 整个落在左下
    let aabb = Aabb::new(Point2::new(-3.0, -3.0), Point2::new(-1.0, -1.0));
    assert_eq!(overlap_mask(&center, &aabb), 0b0101);

    // 遮罩恰好2位时至多只有一个象限满足其要求位，这是查询剪枝的前提
    // 0b0011/0b1100两种组合要求零尺寸的盒恰好压在中心线上，排除在外
    for mask in 0u32..16 {
        let matched = QUAD_MASKS.iter().filter(|m| mask & **m == **m).count();
        if mask.count_ones() == 2 && mask != 0b0011 && mask != 0b1100 {
            assert_eq!(matched, 1);
        }
    }
}
