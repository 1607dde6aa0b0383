//! Greedy rectangle merging over one face layer

use crate::voxel::MaterialId;

/// Merged rectangle in layer coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quad {
    pub u: usize,
    pub v: usize,
    pub width: usize,
    pub height: usize,
    pub material: MaterialId,
}

impl Quad {
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Merge the exposed faces of a `size_u` x `size_v` layer into rectangles.
///
/// `mask[v * size_u + u]` holds the material of the exposed face at (u, v).
/// `visited` must be cleared by the caller. Rectangles are grown along u
/// first, then along v, scanning rows in ascending v and u, so the output
/// order depends only on the mask.
pub fn merge_layer(
    mask: &[Option<MaterialId>],
    visited: &mut [bool],
    size_u: usize,
    size_v: usize,
    out: &mut Vec<Quad>,
) {
    out.clear();

    for v in 0..size_v {
        for u in 0..size_u {
            let idx = v * size_u + u;
            if visited[idx] {
                continue;
            }
            let Some(material) = mask[idx] else {
                continue;
            };

            let mut width = 1;
            while u + width < size_u {
                let next = v * size_u + u + width;
                if visited[next] || mask[next] != Some(material) {
                    break;
                }
                width += 1;
            }

            let mut height = 1;
            'grow: while v + height < size_v {
                for du in 0..width {
                    let check = (v + height) * size_u + u + du;
                    if visited[check] || mask[check] != Some(material) {
                        break 'grow;
                    }
                }
                height += 1;
            }

            for dv in 0..height {
                for du in 0..width {
                    visited[(v + dv) * size_u + u + du] = true;
                }
            }

            out.push(Quad { u, v, width, height, material });
        }
    }
}
