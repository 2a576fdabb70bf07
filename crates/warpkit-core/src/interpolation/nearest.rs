//! Nearest-neighbour lookup.

use crate::geometry::Vector3;
use crate::grid::GridScalar;

pub(super) fn sample<T: GridScalar>(dims: [usize; 3], data: &[T], index: &Vector3) -> Vector3 {
    let i = nearest_index(index.x, dims[0]);
    let j = nearest_index(index.y, dims[1]);
    let k = nearest_index(index.z, dims[2]);
    super::vector_at(dims, data, i, j, k)
}

fn nearest_index(u: f64, n: usize) -> usize {
    let r = u.round();
    if r <= 0.0 {
        0
    } else if r >= (n - 1) as f64 {
        n - 1
    } else {
        r as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_index_clamps() {
        assert_eq!(nearest_index(-3.2, 5), 0);
        assert_eq!(nearest_index(0.49, 5), 0);
        assert_eq!(nearest_index(0.51, 5), 1);
        assert_eq!(nearest_index(7.9, 5), 4);
    }
}
