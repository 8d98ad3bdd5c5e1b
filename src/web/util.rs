use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::Point2;
use parry2d::math::Real;

use crate::tree::PointSource;

/// js侧与树共享的位置数组
#[derive(Clone)]
pub struct SharedPoints(pub Rc<RefCell<Vec<Point2<Real>>>>);

impl SharedPoints {
    pub fn new(capacity: usize) -> Self {
        SharedPoints(Rc::new(RefCell::new(Vec::with_capacity(capacity))))
    }
}

impl PointSource for SharedPoints {
    fn position(&self, id: u32) -> Point2<Real> {
        self.0.borrow()[id as usize]
    }
}
