//! 高性能的稀疏四叉树
//! 采用位打包的定位码寻址节点：每层3位，低2位为象限，第3位为深度标记位。
//! 节点经由哈希表按需物化，无父子指针，空区域不占内存。
//! 要求插入点时的id，应该是可以用在外部位置数组索引上的。

pub mod quad_helper;
pub mod tree;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use quad_helper::*;
pub use tree::*;
