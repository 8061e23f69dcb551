//! The light table and the clustered-lighting tile grid.
//!
//! `grid` is a 2-D array of square tiles, each a 128-bit mask (four 32-bit
//! lanes) naming the light sources that can touch fragments in the tile. The
//! mask array is rebuilt every frame and uploaded as an RGBA32UI texture the
//! model pass samples, so a scene can carry many more lights than the
//! fragment shader could afford to walk per fragment.

use glam::{Vec2, Vec3};

use crate::errors::{GlintError, Result};
use crate::renderer::backend::RenderBackend;
use crate::resources::texture::{Texture, TextureKind, TextureOptions};
use crate::resources::uniforms::{LightingBlock, LIGHTS_MAX};
use crate::scene::view::View;

/// Tile side in pixels.
pub const TILE_SIZE: u32 = 32;

/// Brightness threshold the attenuation radius is solved for.
const ATTENUATION_CUTOFF: f32 = 256.0;

/// One tile's light mask.
pub type TileMask = [u32; 4];

fn mask_set(mask: &mut TileMask, idx: usize) {
    if idx >= LIGHTS_MAX {
        return;
    }
    mask[idx / 32] |= 1u32 << (idx % 32);
}

#[derive(Debug)]
pub struct LightGrid {
    /// Viewport size in pixels.
    width: u32,
    height: u32,
    cell: u32,
    twidth: u32,
    theight: u32,
    tiles: Vec<TileMask>,
    tex: Texture,
}

impl LightGrid {
    fn new() -> Result<Self> {
        Ok(Self {
            width: 0,
            height: 0,
            cell: TILE_SIZE,
            twidth: 0,
            theight: 0,
            tiles: Vec::new(),
            tex: Texture::init(TextureOptions {
                kind: TextureKind::D2,
                format: wgpu::TextureFormat::Rgba32Uint,
                min_filter: wgpu::FilterMode::Nearest,
                mag_filter: wgpu::FilterMode::Nearest,
                wrap: wgpu::AddressMode::ClampToEdge,
                ..TextureOptions::default()
            })?,
        })
    }

    /// Re-tiles after a viewport change.
    fn update(&mut self) {
        if self.width == 0 || self.height == 0 || self.cell == 0 {
            return;
        }
        let twidth = self.width.div_ceil(self.cell);
        let theight = self.height.div_ceil(self.cell);
        if twidth * theight == self.twidth * self.theight {
            return;
        }

        self.twidth = twidth;
        self.theight = theight;
        self.tiles = vec![TileMask::default(); (twidth * theight) as usize];
    }

    #[must_use]
    pub fn tile(&self, x: u32, y: u32) -> Option<&TileMask> {
        if x >= self.twidth || y >= self.theight {
            return None;
        }
        self.tiles.get((y * self.twidth + x) as usize)
    }

    fn tile_mut(&mut self, x: u32, y: u32) -> Option<&mut TileMask> {
        if x >= self.twidth || y >= self.theight {
            return None;
        }
        self.tiles.get_mut((y * self.twidth + x) as usize)
    }

    #[must_use]
    pub fn texture(&self) -> &Texture {
        &self.tex
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.twidth, self.theight)
    }
}

pub struct LightTable {
    nr_lights: usize,
    pos: Vec<Vec3>,
    color: Vec<Vec3>,
    attenuation: Vec<Vec3>,
    dir: Vec<Vec3>,
    cutoff: Vec<f32>,
    is_dir: Vec<bool>,
    /// Per-light shadow view, fitted by the scene for casting lights.
    views: Vec<View>,
    pub ambient: Vec3,
    pub shadow_tint: Vec3,
    pub grid: LightGrid,
}

impl LightTable {
    pub fn new() -> Result<Self> {
        Ok(Self {
            nr_lights: 0,
            pos: Vec::new(),
            color: Vec::new(),
            attenuation: Vec::new(),
            dir: Vec::new(),
            cutoff: Vec::new(),
            is_dir: Vec::new(),
            views: Vec::new(),
            ambient: Vec3::splat(0.1),
            shadow_tint: Vec3::ZERO,
            grid: LightGrid::new()?,
        })
    }

    /// Reserves the next light slot.
    pub fn alloc(&mut self) -> Result<usize> {
        if self.nr_lights == LIGHTS_MAX {
            return Err(GlintError::TooLarge("light table full"));
        }
        self.pos.push(Vec3::ZERO);
        self.color.push(Vec3::ONE);
        self.attenuation.push(Vec3::new(1.0, 0.0, 0.0));
        self.dir.push(Vec3::NEG_Y);
        self.cutoff.push(0.0);
        self.is_dir.push(false);
        self.views.push(View::new(0.0, 1.0, 100.0));
        self.nr_lights += 1;
        Ok(self.nr_lights - 1)
    }

    #[must_use]
    pub fn nr_lights(&self) -> usize {
        self.nr_lights
    }

    #[must_use]
    pub fn is_valid(&self, idx: usize) -> bool {
        idx < self.nr_lights
    }

    pub fn set_pos(&mut self, idx: usize, pos: Vec3) {
        if self.is_valid(idx) {
            self.pos[idx] = pos;
        }
    }

    #[must_use]
    pub fn pos(&self, idx: usize) -> Vec3 {
        self.pos.get(idx).copied().unwrap_or(Vec3::ZERO)
    }

    pub fn set_color(&mut self, idx: usize, color: Vec3) {
        if self.is_valid(idx) {
            self.color[idx] = color;
        }
    }

    pub fn set_attenuation(&mut self, idx: usize, attenuation: Vec3) {
        if self.is_valid(idx) {
            self.attenuation[idx] = attenuation;
        }
    }

    pub fn set_direction(&mut self, idx: usize, dir: Vec3) {
        if self.is_valid(idx) {
            self.dir[idx] = dir;
        }
    }

    #[must_use]
    pub fn direction(&self, idx: usize) -> Vec3 {
        self.dir.get(idx).copied().unwrap_or(Vec3::NEG_Y)
    }

    pub fn set_directional(&mut self, idx: usize, is_directional: bool) {
        if self.is_valid(idx) {
            self.is_dir[idx] = is_directional;
        }
    }

    pub fn set_cutoff(&mut self, idx: usize, cutoff: f32) {
        if self.is_valid(idx) {
            self.cutoff[idx] = cutoff;
        }
    }

    #[must_use]
    pub fn is_directional(&self, idx: usize) -> bool {
        self.is_valid(idx) && self.is_dir[idx]
    }

    #[must_use]
    pub fn is_spotlight(&self, idx: usize) -> bool {
        self.is_valid(idx) && self.is_dir[idx] && self.cutoff[idx] > 0.0
    }

    pub fn view_mut(&mut self, idx: usize) -> Option<&mut View> {
        self.views.get_mut(idx)
    }

    #[must_use]
    pub fn view(&self, idx: usize) -> Option<&View> {
        self.views.get(idx)
    }

    /// World-space radius at which the light's brightest channel falls to
    /// the 1/256 threshold, from the attenuation quadratic.
    #[must_use]
    pub fn radius(&self, idx: usize) -> f32 {
        if !self.is_valid(idx) || self.is_dir[idx] {
            return 0.0;
        }
        let comp_max = self.color[idx].max_element();
        let att = self.attenuation[idx];
        let c = att.x - ATTENUATION_CUTOFF * comp_max;
        if att.z.abs() < 1e-6 {
            // No quadratic term: fall back to the linear solution
            return if att.y.abs() < 1e-6 { 0.0 } else { -c / att.y };
        }
        (-att.y + (att.y * att.y - 4.0 * att.z * c).sqrt()) / (2.0 * att.z)
    }

    /// Handles a viewport resize.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.grid.width = width;
        self.grid.height = height;
    }

    /// Rebuilds the tile masks for the current view and uploads the grid
    /// texture. Directional lights set their bit in every tile; point
    /// lights are projected and tested against each tile's four corners.
    pub fn grid_compute(&mut self, backend: &mut dyn RenderBackend, view: &View) -> Result<()> {
        self.grid.update();
        let (twidth, theight) = self.grid.dimensions();
        if twidth == 0 || theight == 0 {
            return Ok(());
        }

        for tile in &mut self.grid.tiles {
            *tile = TileMask::default();
        }

        let subview = &view.main;
        let mvp = subview.proj_mx * subview.view_mx;
        let grid_size = Vec2::new(self.grid.width as f32, self.grid.height as f32);
        let cell = self.grid.cell as f32;

        for idx in 0..self.nr_lights {
            if self.is_dir[idx] {
                for tile in &mut self.grid.tiles {
                    mask_set(tile, idx);
                }
                continue;
            }

            let light_pos = self.pos[idx].extend(1.0);
            let pos_view = subview.view_mx * light_pos;
            let pos_clip = mvp * light_pos;
            if pos_clip.w.abs() < 1e-3 {
                continue;
            }
            let ndc = pos_clip.truncate() / pos_clip.w;
            if ndc.z > 1.0 {
                continue;
            }

            let fx = subview.proj_mx.x_axis.x;
            let radius = self.radius(idx) * fx / -pos_view.z * (grid_size.x / 2.0);
            let rsq = radius * radius;

            let screen = Vec2::new(
                (ndc.x + 1.0) / 2.0 * grid_size.x,
                (1.0 - ndc.y) / 2.0 * grid_size.y,
            );

            for gy in 0..theight {
                for gx in 0..twidth {
                    let corners = [
                        Vec2::new(gx as f32 * cell, gy as f32 * cell),
                        Vec2::new((gx + 1) as f32 * cell, gy as f32 * cell),
                        Vec2::new(gx as f32 * cell, (gy + 1) as f32 * cell),
                        Vec2::new((gx + 1) as f32 * cell, (gy + 1) as f32 * cell),
                    ];
                    if corners
                        .iter()
                        .any(|corner| screen.distance_squared(*corner) < rsq)
                    {
                        if let Some(tile) = self.grid.tile_mut(gx, gy) {
                            mask_set(tile, idx);
                        }
                    }
                }
            }
        }

        self.grid.tex.load(
            backend,
            wgpu::TextureFormat::Rgba32Uint,
            twidth,
            theight,
            bytemuck::cast_slice(&self.grid.tiles),
        )
    }

    /// Fills the `lighting` uniform block.
    pub fn write_block(&self, block: &mut LightingBlock, use_normals: bool) {
        for idx in 0..self.nr_lights {
            block.light_pos[idx] = self.pos[idx].into();
            block.light_color[idx] = self.color[idx].into();
            block.light_dir[idx] = self.dir[idx].into();
            block.attenuation[idx] = self.attenuation[idx].into();
            block.light_directional[idx] = i32::from(self.is_dir[idx]).into();
        }
        block.nr_lights = self.nr_lights as i32;
        block.light_ambient = self.ambient;
        block.use_normals = i32::from(use_normals);
    }

    pub fn deinit(&mut self, backend: &mut dyn RenderBackend) {
        self.grid.tex.deinit(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;

    #[test]
    fn test_alloc_until_full() {
        let mut table = LightTable::new().unwrap();
        for i in 0..LIGHTS_MAX {
            assert_eq!(table.alloc().unwrap(), i);
        }
        assert!(matches!(table.alloc(), Err(GlintError::TooLarge(_))));
    }

    #[test]
    fn test_radius_from_attenuation() {
        let mut table = LightTable::new().unwrap();
        let idx = table.alloc().unwrap();
        table.set_color(idx, Vec3::ONE);
        table.set_attenuation(idx, Vec3::new(1.0, 0.09, 0.032));

        let radius = table.radius(idx);
        assert!((radius - 87.9).abs() < 0.5, "radius {radius}");

        table.set_directional(idx, true);
        assert_eq!(table.radius(idx), 0.0);
    }

    #[test]
    fn test_grid_bits_for_directional_and_point() {
        let mut backend = HeadlessBackend::new();
        let mut table = LightTable::new().unwrap();

        let l0 = table.alloc().unwrap();
        table.set_directional(l0, true);
        table.set_direction(l0, Vec3::new(0.0, -1.0, 0.0));

        let l1 = table.alloc().unwrap();
        table.set_pos(l1, Vec3::ZERO);
        table.set_color(l1, Vec3::ONE);
        table.set_attenuation(l1, Vec3::new(1.0, 0.09, 0.032));

        let mut view = View::new(70f32.to_radians(), 0.1, 500.0);
        view.update_perspective_projection(1024, 768, 1.0);
        view.update_from_angles(Vec3::new(0.0, 0.0, 10.0), 0.0, 0.0, 0.0);
        view.calc_frustum();

        table.set_viewport(1024, 768);
        table.grid_compute(&mut backend, &view).unwrap();

        let (twidth, theight) = table.grid.dimensions();
        assert_eq!((twidth, theight), (32, 24));

        // The directional light reaches every tile
        for gy in 0..theight {
            for gx in 0..twidth {
                assert_eq!(table.grid.tile(gx, gy).unwrap()[0] & 1, 1);
            }
        }

        // The point light covers the tile under the screen center
        let center = table.grid.tile(twidth / 2, theight / 2).unwrap();
        assert_eq!(center[0] & 0b10, 0b10);

        table.deinit(&mut backend);
    }

    #[test]
    fn test_mask_lanes() {
        let mut mask = TileMask::default();
        mask_set(&mut mask, 0);
        mask_set(&mut mask, 31);
        mask_set(&mut mask, 32);
        mask_set(&mut mask, 127);
        assert_eq!(mask[0], 0x8000_0001);
        assert_eq!(mask[1], 1);
        assert_eq!(mask[3], 0x8000_0000);
    }
}
