//! Mesh data: per-attribute arrays, the index array, bounds and LODs.
//!
//! Attribute payloads are raw byte arrays with an element stride, so asset
//! data lands here without converting through typed vectors. Invariants the
//! rest of the engine relies on: the index count is a multiple of 3, every
//! index addresses a valid vertex, and all vertex attributes have the same
//! element count. [`Mesh::validate`] checks all three.

use glam::{Mat4, Vec3};

use crate::errors::{GlintError, Result};
use crate::resources::shader::VertexAttr;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Average edge length of the box.
    #[must_use]
    pub fn avg_edge(&self) -> f32 {
        let size = self.size();
        (size.x + size.y + size.z) / 3.0
    }

    #[must_use]
    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    #[must_use]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn extend(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// The box covering the 8 transformed corners.
    #[must_use]
    pub fn transform(&self, mx: &Mat4) -> Aabb {
        let mut out = Aabb::EMPTY;
        for corner in self.corners() {
            out.extend(mx.transform_point3(corner));
        }
        out
    }
}

/// One attribute array.
#[derive(Debug, Clone, Default)]
pub struct MeshAttrData {
    data: Vec<u8>,
    stride: usize,
    nr: usize,
}

impl MeshAttrData {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[must_use]
    pub fn nr(&self) -> usize {
        self.nr
    }

    fn element(&self, i: usize) -> &[u8] {
        &self.data[i * self.stride..(i + 1) * self.stride]
    }
}

const NR_ATTRS: usize = 6;

/// Interleaved vertex data produced by [`Mesh::flatten`].
#[derive(Debug, Clone)]
pub struct FlatVertices {
    pub data: Vec<u8>,
    pub stride: usize,
    /// Byte offset of each requested attribute within one vertex.
    pub offsets: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    name: String,
    attrs: [Option<MeshAttrData>; NR_ATTRS],
    idx: Vec<u16>,
    aabb: Aabb,
}

impl Mesh {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn slot(&self, attr: VertexAttr) -> &Option<MeshAttrData> {
        &self.attrs[attr.location() as usize]
    }

    fn slot_mut(&mut self, attr: VertexAttr) -> &mut Option<MeshAttrData> {
        &mut self.attrs[attr.location() as usize]
    }

    #[must_use]
    pub fn attr(&self, attr: VertexAttr) -> Option<&MeshAttrData> {
        self.slot(attr).as_ref()
    }

    #[must_use]
    pub fn has_attr(&self, attr: VertexAttr) -> bool {
        self.slot(attr).is_some()
    }

    /// Allocates a zeroed attribute array.
    pub fn attr_alloc(&mut self, attr: VertexAttr, stride: usize, nr: usize) -> Result<()> {
        if stride == 0 {
            return Err(GlintError::InvalidArguments("attribute stride"));
        }
        *self.slot_mut(attr) = Some(MeshAttrData {
            data: vec![0; stride * nr],
            stride,
            nr,
        });
        Ok(())
    }

    /// Copies caller data into a new attribute array.
    pub fn attr_dup(&mut self, attr: VertexAttr, data: &[u8], stride: usize, nr: usize) -> Result<()> {
        if stride == 0 || data.len() < stride * nr {
            return Err(GlintError::InvalidArguments("attribute data"));
        }
        *self.slot_mut(attr) = Some(MeshAttrData {
            data: data[..stride * nr].to_vec(),
            stride,
            nr,
        });
        if attr == VertexAttr::Position {
            self.aabb_calc();
        }
        Ok(())
    }

    /// Takes ownership of a caller-allocated attribute array.
    pub fn attr_add(&mut self, attr: VertexAttr, data: Vec<u8>, stride: usize, nr: usize) -> Result<()> {
        if stride == 0 || data.len() < stride * nr {
            return Err(GlintError::InvalidArguments("attribute data"));
        }
        *self.slot_mut(attr) = Some(MeshAttrData { data, stride, nr });
        if attr == VertexAttr::Position {
            self.aabb_calc();
        }
        Ok(())
    }

    /// Grows or shrinks an attribute array; a new tail is zeroed.
    pub fn attr_resize(&mut self, attr: VertexAttr, new_nr: usize) -> Result<()> {
        let slot = self
            .slot_mut(attr)
            .as_mut()
            .ok_or(GlintError::NotFound("attribute".into()))?;
        slot.data.resize(slot.stride * new_nr, 0);
        slot.nr = new_nr;
        Ok(())
    }

    pub fn set_indices(&mut self, idx: Vec<u16>) {
        self.idx = idx;
    }

    #[must_use]
    pub fn indices(&self) -> &[u16] {
        &self.idx
    }

    #[must_use]
    pub fn nr_idx(&self) -> usize {
        self.idx.len()
    }

    #[must_use]
    pub fn nr_vx(&self) -> usize {
        self.attr(VertexAttr::Position).map_or(0, MeshAttrData::nr)
    }

    #[must_use]
    pub fn nr_faces(&self) -> usize {
        self.idx.len() / 3
    }

    #[must_use]
    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    /// Iterates positions as `Vec3`, honoring the attribute stride.
    fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.attr(VertexAttr::Position).into_iter().flat_map(|pos| {
            (0..pos.nr()).map(move |i| {
                let bytes = pos.element(i);
                let xyz: &[f32] = bytemuck::cast_slice(&bytes[..12]);
                Vec3::new(xyz[0], xyz[1], xyz[2])
            })
        })
    }

    /// Recomputes the bounding box from positions. O(nr_vx).
    pub fn aabb_calc(&mut self) {
        let mut aabb = Aabb::EMPTY;
        for p in self.positions() {
            aabb.extend(p);
        }
        self.aabb = aabb;
    }

    /// Checks the structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.idx.len() % 3 != 0 {
            return Err(GlintError::InvalidFormat("index count not a multiple of 3"));
        }
        let nr_vx = self.nr_vx();
        if self.idx.iter().any(|&i| i as usize >= nr_vx) {
            return Err(GlintError::InvalidFormat("index out of range"));
        }
        for attr in VertexAttr::ALL {
            if attr == VertexAttr::Position {
                continue;
            }
            if let Some(data) = self.attr(attr) {
                if data.nr() != nr_vx {
                    return Err(GlintError::InvalidFormat("attribute count mismatch"));
                }
            }
        }
        Ok(())
    }

    /// Reorders the index buffer for vertex-cache locality (Forsyth-style
    /// greedy scoring). The triangle set is unchanged.
    pub fn optimize(&mut self) {
        const CACHE_SIZE: usize = 32;
        const LAST_TRI_SCORE: f32 = 0.75;
        const CACHE_DECAY_POWER: f32 = 1.5;
        const VALENCE_SCALE: f32 = 2.0;
        const VALENCE_POWER: f32 = -0.5;

        let nr_tris = self.idx.len() / 3;
        let nr_vx = self.nr_vx();
        if nr_tris < 2 || nr_vx == 0 {
            return;
        }

        let vertex_score = |cache_pos: Option<usize>, remaining_valence: u32| -> f32 {
            if remaining_valence == 0 {
                return -1.0;
            }
            let mut score = match cache_pos {
                None => 0.0,
                Some(0..=2) => LAST_TRI_SCORE,
                Some(p) => {
                    let scaled = 1.0 - (p - 3) as f32 / (CACHE_SIZE - 3) as f32;
                    scaled.powf(CACHE_DECAY_POWER)
                }
            };
            score += VALENCE_SCALE * (remaining_valence as f32).powf(VALENCE_POWER);
            score
        };

        // Per-vertex triangle adjacency
        let mut valence = vec![0u32; nr_vx];
        for &i in &self.idx {
            valence[i as usize] += 1;
        }
        let mut adj_offsets = vec![0usize; nr_vx + 1];
        for v in 0..nr_vx {
            adj_offsets[v + 1] = adj_offsets[v] + valence[v] as usize;
        }
        let mut adj = vec![0u32; self.idx.len()];
        let mut fill = adj_offsets.clone();
        for (tri, chunk) in self.idx.chunks_exact(3).enumerate() {
            for &v in chunk {
                adj[fill[v as usize]] = tri as u32;
                fill[v as usize] += 1;
            }
        }

        let mut remaining = valence.clone();
        let mut emitted = vec![false; nr_tris];
        let mut cache: Vec<u16> = Vec::with_capacity(CACHE_SIZE + 3);
        let mut new_idx = Vec::with_capacity(self.idx.len());

        let tri_score = |tri: usize, remaining: &[u32], cache: &[u16], idx: &[u16]| -> f32 {
            let mut score = 0.0;
            for k in 0..3 {
                let v = idx[tri * 3 + k];
                let pos = cache.iter().position(|&c| c == v);
                score += vertex_score(pos, remaining[v as usize]);
            }
            score
        };

        for _ in 0..nr_tris {
            // Pick the best triangle touching the cache, or any remaining one
            let mut best = None;
            let mut best_score = f32::NEG_INFINITY;
            for &v in cache.iter() {
                for &tri in &adj[adj_offsets[v as usize]..adj_offsets[v as usize + 1]] {
                    if emitted[tri as usize] {
                        continue;
                    }
                    let score = tri_score(tri as usize, &remaining, &cache, &self.idx);
                    if score > best_score {
                        best_score = score;
                        best = Some(tri as usize);
                    }
                }
            }
            let tri = best.unwrap_or_else(|| emitted.iter().position(|&e| !e).unwrap());

            emitted[tri] = true;
            for k in 0..3 {
                let v = self.idx[tri * 3 + k];
                new_idx.push(v);
                remaining[v as usize] = remaining[v as usize].saturating_sub(1);
                if let Some(pos) = cache.iter().position(|&c| c == v) {
                    cache.remove(pos);
                }
                cache.insert(0, v);
            }
            cache.truncate(CACHE_SIZE);
        }

        self.idx = new_idx;
    }

    /// Produces a simplified index buffer for LOD `level` and its error
    /// metric. Returns `Ok(None)` when no reduction is possible at this
    /// level. Vertex positions are clustered on a grid that coarsens with
    /// the level; triangles that collapse are dropped.
    pub fn idx_to_lod(&self, level: u32) -> Result<Option<(Vec<u16>, f32)>> {
        let pos = self
            .attr(VertexAttr::Position)
            .ok_or(GlintError::NotSupported("LOD without positions"))?;
        if self.idx.is_empty() {
            return Err(GlintError::NotSupported("LOD without indices"));
        }

        // Grid resolution halves per level: 16, 8, 4, 2 cells per axis
        let cells = 32u32 >> (level + 1).min(5);
        if cells < 2 {
            return Ok(None);
        }

        let size = self.aabb.size().max(Vec3::splat(1e-6));
        let cell_size = size / cells as f32;
        let error = cell_size.length();
        if error <= 0.0 {
            return Ok(None);
        }

        // Map each vertex to the representative of its grid cell
        let mut cell_rep: rustc_hash::FxHashMap<(u32, u32, u32), u16> =
            rustc_hash::FxHashMap::default();
        let mut remap = vec![0u16; pos.nr()];
        for (i, p) in self.positions().enumerate() {
            let rel = (p - self.aabb.min) / cell_size;
            let key = (
                (rel.x as u32).min(cells - 1),
                (rel.y as u32).min(cells - 1),
                (rel.z as u32).min(cells - 1),
            );
            let rep = *cell_rep.entry(key).or_insert(i as u16);
            remap[i] = rep;
        }

        let mut out = Vec::with_capacity(self.idx.len());
        for tri in self.idx.chunks_exact(3) {
            let (a, b, c) = (
                remap[tri[0] as usize],
                remap[tri[1] as usize],
                remap[tri[2] as usize],
            );
            if a == b || b == c || a == c {
                continue;
            }
            out.extend_from_slice(&[a, b, c]);
        }

        if out.is_empty() || out.len() >= self.idx.len() {
            return Ok(None);
        }
        Ok(Some((out, error)))
    }

    /// Interleaves the requested attributes into a single vertex buffer laid
    /// out in the given order (the bound program's attribute order).
    pub fn flatten(&self, attrs: &[VertexAttr]) -> Result<FlatVertices> {
        let nr_vx = self.nr_vx();
        if nr_vx == 0 {
            return Err(GlintError::NotSupported("flatten of empty mesh"));
        }

        let mut stride = 0usize;
        let mut offsets = Vec::with_capacity(attrs.len());
        for &attr in attrs {
            let data = self
                .attr(attr)
                .ok_or_else(|| GlintError::NotFound(attr.name().into()))?;
            if data.nr() != nr_vx {
                return Err(GlintError::InvalidFormat("attribute count mismatch"));
            }
            offsets.push(stride);
            stride += data.stride();
        }

        let mut out = vec![0u8; stride * nr_vx];
        for (k, &attr) in attrs.iter().enumerate() {
            let Some(data) = self.attr(attr) else { continue };
            let elem = data.stride();
            for i in 0..nr_vx {
                let dst = i * stride + offsets[k];
                out[dst..dst + elem].copy_from_slice(data.element(i));
            }
        }

        Ok(FlatVertices {
            data: out,
            stride,
            offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::primitives;

    #[test]
    fn test_attr_dup_and_resize() {
        let mut mesh = Mesh::new("test");
        let pos: Vec<f32> = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        mesh.attr_dup(VertexAttr::Position, bytemuck::cast_slice(&pos), 12, 3)
            .unwrap();
        assert_eq!(mesh.nr_vx(), 3);

        mesh.attr_resize(VertexAttr::Position, 5).unwrap();
        assert_eq!(mesh.nr_vx(), 5);
        // Preserved head, zeroed tail
        let data = mesh.attr(VertexAttr::Position).unwrap();
        let floats: &[f32] = bytemuck::cast_slice(data.bytes());
        assert_eq!(floats[3], 1.0);
        assert_eq!(floats[12], 0.0);
    }

    #[test]
    fn test_aabb_from_positions() {
        let mesh = primitives::cube_mesh();
        let aabb = mesh.aabb();
        assert_eq!(aabb.min, Vec3::splat(-0.5));
        assert_eq!(aabb.max, Vec3::splat(0.5));
        assert!((aabb.avg_edge() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_catches_bad_indices() {
        let mut mesh = primitives::cube_mesh();
        assert!(mesh.validate().is_ok());

        let mut idx = mesh.indices().to_vec();
        idx.push(0);
        mesh.set_indices(idx);
        assert!(mesh.validate().is_err());

        let mut bad = primitives::cube_mesh();
        bad.set_indices(vec![0, 1, 999]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_optimize_preserves_triangles() {
        let mut mesh = primitives::cube_mesh();
        let mut before: Vec<[u16; 3]> = mesh
            .indices()
            .chunks_exact(3)
            .map(|t| {
                let mut tri = [t[0], t[1], t[2]];
                tri.sort_unstable();
                tri
            })
            .collect();
        before.sort_unstable();

        mesh.optimize();
        assert!(mesh.validate().is_ok());

        let mut after: Vec<[u16; 3]> = mesh
            .indices()
            .chunks_exact(3)
            .map(|t| {
                let mut tri = [t[0], t[1], t[2]];
                tri.sort_unstable();
                tri
            })
            .collect();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn test_lod_reduces_dense_grid() {
        let mesh = primitives::grid_mesh(20, 1.0);
        let full = mesh.nr_idx();

        let (lod, error) = mesh.idx_to_lod(0).unwrap().expect("reduction expected");
        assert!(lod.len() < full);
        assert_eq!(lod.len() % 3, 0);
        assert!(error > 0.0);

        // Coarser level reduces at least as much
        if let Some((coarser, coarse_error)) = mesh.idx_to_lod(2).unwrap() {
            assert!(coarser.len() <= lod.len());
            assert!(coarse_error > error);
        }
    }

    #[test]
    fn test_flatten_round_trip() {
        let mesh = primitives::cube_mesh();
        let attrs = [VertexAttr::Position, VertexAttr::Normal, VertexAttr::TexCoord];
        let flat = mesh.flatten(&attrs).unwrap();
        assert_eq!(flat.stride, 12 + 12 + 8);

        // Rebuild per-attribute views and compare byte-for-byte
        for (k, &attr) in attrs.iter().enumerate() {
            let orig = mesh.attr(attr).unwrap();
            let elem = orig.stride();
            let mut rebuilt = Vec::with_capacity(orig.bytes().len());
            for i in 0..mesh.nr_vx() {
                let start = i * flat.stride + flat.offsets[k];
                rebuilt.extend_from_slice(&flat.data[start..start + elem]);
            }
            assert_eq!(rebuilt, orig.bytes());
        }
    }
}
