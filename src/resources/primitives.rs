//! Built-in meshes: the unit cube, screen quads and a test grid.

use glam::Vec3;

use crate::resources::mesh::Mesh;
use crate::resources::shader::VertexAttr;

fn mesh_from_arrays(
    name: &str,
    positions: &[f32],
    normals: &[f32],
    texcoords: &[f32],
    indices: &[u16],
) -> Mesh {
    let mut mesh = Mesh::new(name);
    let nr_vx = positions.len() / 3;
    mesh.attr_dup(VertexAttr::Position, bytemuck::cast_slice(positions), 12, nr_vx)
        .expect("position array");
    if !normals.is_empty() {
        mesh.attr_dup(VertexAttr::Normal, bytemuck::cast_slice(normals), 12, nr_vx)
            .expect("normal array");
    }
    if !texcoords.is_empty() {
        mesh.attr_dup(VertexAttr::TexCoord, bytemuck::cast_slice(texcoords), 8, nr_vx)
            .expect("texcoord array");
    }
    mesh.set_indices(indices.to_vec());
    mesh
}

/// Unit cube centered at the origin, four vertices per face.
#[must_use]
pub fn cube_mesh() -> Mesh {
    #[rustfmt::skip]
    const POS: [f32; 72] = [
        // +Z
        -0.5, -0.5,  0.5,   0.5, -0.5,  0.5,   0.5,  0.5,  0.5,  -0.5,  0.5,  0.5,
        // -Z
         0.5, -0.5, -0.5,  -0.5, -0.5, -0.5,  -0.5,  0.5, -0.5,   0.5,  0.5, -0.5,
        // +X
         0.5, -0.5,  0.5,   0.5, -0.5, -0.5,   0.5,  0.5, -0.5,   0.5,  0.5,  0.5,
        // -X
        -0.5, -0.5, -0.5,  -0.5, -0.5,  0.5,  -0.5,  0.5,  0.5,  -0.5,  0.5, -0.5,
        // +Y
        -0.5,  0.5,  0.5,   0.5,  0.5,  0.5,   0.5,  0.5, -0.5,  -0.5,  0.5, -0.5,
        // -Y
        -0.5, -0.5, -0.5,   0.5, -0.5, -0.5,   0.5, -0.5,  0.5,  -0.5, -0.5,  0.5,
    ];
    #[rustfmt::skip]
    const NORM: [f32; 72] = [
         0.0,  0.0,  1.0,   0.0,  0.0,  1.0,   0.0,  0.0,  1.0,   0.0,  0.0,  1.0,
         0.0,  0.0, -1.0,   0.0,  0.0, -1.0,   0.0,  0.0, -1.0,   0.0,  0.0, -1.0,
         1.0,  0.0,  0.0,   1.0,  0.0,  0.0,   1.0,  0.0,  0.0,   1.0,  0.0,  0.0,
        -1.0,  0.0,  0.0,  -1.0,  0.0,  0.0,  -1.0,  0.0,  0.0,  -1.0,  0.0,  0.0,
         0.0,  1.0,  0.0,   0.0,  1.0,  0.0,   0.0,  1.0,  0.0,   0.0,  1.0,  0.0,
         0.0, -1.0,  0.0,   0.0, -1.0,  0.0,   0.0, -1.0,  0.0,   0.0, -1.0,  0.0,
    ];
    #[rustfmt::skip]
    const TEX: [f32; 48] = [
        0.0, 1.0,  1.0, 1.0,  1.0, 0.0,  0.0, 0.0,
        0.0, 1.0,  1.0, 1.0,  1.0, 0.0,  0.0, 0.0,
        0.0, 1.0,  1.0, 1.0,  1.0, 0.0,  0.0, 0.0,
        0.0, 1.0,  1.0, 1.0,  1.0, 0.0,  0.0, 0.0,
        0.0, 1.0,  1.0, 1.0,  1.0, 0.0,  0.0, 0.0,
        0.0, 1.0,  1.0, 1.0,  1.0, 0.0,  0.0, 0.0,
    ];
    let mut indices = Vec::with_capacity(36);
    for face in 0..6u16 {
        let base = face * 4;
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh_from_arrays("cube", &POS, &NORM, &TEX, &indices)
}

/// A quad in the XY plane at `z`, spanning `w` x `h` from `(x, y)`.
#[must_use]
pub fn quad_mesh(x: f32, y: f32, z: f32, w: f32, h: f32) -> Mesh {
    let pos = [
        x, y, z,
        x + w, y, z,
        x + w, y + h, z,
        x, y + h, z,
    ];
    let tex = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
    mesh_from_arrays("quad", &pos, &[], &tex, &[0, 1, 2, 0, 2, 3])
}

/// Fullscreen quad in clip space; the postprocessing passes draw this.
#[must_use]
pub fn fullscreen_quad_mesh() -> Mesh {
    quad_mesh(-1.0, -1.0, 0.0, 2.0, 2.0)
}

/// An `n` x `n` tessellated plane of extent `size`, for LOD and culling
/// tests that need dense geometry.
#[must_use]
pub fn grid_mesh(n: u32, size: f32) -> Mesh {
    let verts = n + 1;
    let mut pos = Vec::with_capacity((verts * verts * 3) as usize);
    let mut tex = Vec::with_capacity((verts * verts * 2) as usize);
    for row in 0..verts {
        for col in 0..verts {
            let u = col as f32 / n as f32;
            let v = row as f32 / n as f32;
            let p = Vec3::new((u - 0.5) * size, 0.0, (v - 0.5) * size);
            pos.extend_from_slice(&[p.x, p.y, p.z]);
            tex.extend_from_slice(&[u, v]);
        }
    }
    let mut idx = Vec::with_capacity((n * n * 6) as usize);
    for row in 0..n {
        for col in 0..n {
            let a = (row * verts + col) as u16;
            let b = a + 1;
            let c = a + verts as u16;
            let d = c + 1;
            idx.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    mesh_from_arrays("grid", &pos, &[], &tex, &idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_invariants() {
        let cube = cube_mesh();
        assert_eq!(cube.nr_vx(), 24);
        assert_eq!(cube.nr_idx(), 36);
        assert!(cube.validate().is_ok());
    }

    #[test]
    fn test_grid_counts() {
        let grid = grid_mesh(4, 2.0);
        assert_eq!(grid.nr_vx(), 25);
        assert_eq!(grid.nr_faces(), 32);
        assert!(grid.validate().is_ok());
    }
}
